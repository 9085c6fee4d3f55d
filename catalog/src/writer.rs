//! Catalog writer (component C3): builds a new `.cat`/`.dat` pair from an
//! ordered set of in-memory files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{IoContext, Result};
use crate::path::VPath;

/// One file to be emitted into a catalog: its virtual path, payload, and the
/// timestamp to record (source mtime, or current time for synthetic output).
#[derive(Debug, Clone)]
pub struct CatalogSourceFile {
    pub virtual_path: String,
    pub bytes: Vec<u8>,
    pub timestamp: i64,
}

pub struct CatalogWriter;

impl CatalogWriter {
    /// Emit a `.cat`/`.dat` pair for `files`, in the given iteration order.
    /// Callers that want the "fresh directory scan" determinism described in
    /// §4.2 should order `files` with [`scan_directory_order`] first.
    pub fn write(
        cat_path: impl AsRef<Path>,
        dat_path: impl AsRef<Path>,
        files: &[CatalogSourceFile],
    ) -> Result<()> {
        let cat_path = cat_path.as_ref();
        let dat_path = dat_path.as_ref();

        let mut dat_out = BufWriter::new(File::create(dat_path).with_path(dat_path)?);
        let mut cat_out = BufWriter::new(File::create(cat_path).with_path(cat_path)?);

        for file in files {
            dat_out.write_all(&file.bytes).with_path(dat_path)?;

            let digest = md5::compute(&file.bytes);
            let vpath = VPath::normalize(&file.virtual_path);
            writeln!(
                cat_out,
                "{} {} {} {}",
                vpath.as_str(),
                file.bytes.len(),
                file.timestamp,
                hex::encode(digest.0)
            )
            .with_path(cat_path)?;
        }

        dat_out.flush().with_path(dat_path)?;
        cat_out.flush().with_path(cat_path)?;

        debug!(
            cat = %cat_path.display(),
            dat = %dat_path.display(),
            entries = files.len(),
            "wrote catalog"
        );

        Ok(())
    }

    /// As [`Self::write`], but also emits an empty `.sig` companion next to
    /// both the `.cat` and `.dat` outputs, satisfying the game's signature
    /// presence check (§4.2 — no actual signing is performed).
    pub fn write_with_sig(
        cat_path: impl AsRef<Path>,
        dat_path: impl AsRef<Path>,
        files: &[CatalogSourceFile],
    ) -> Result<()> {
        let cat_path = cat_path.as_ref();
        let dat_path = dat_path.as_ref();
        Self::write(cat_path, dat_path, files)?;

        for path in [cat_path, dat_path] {
            let sig_path = sig_path_for(path);
            File::create(&sig_path).with_path(&sig_path)?;
        }

        Ok(())
    }
}

fn sig_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".sig");
    path.with_file_name(name)
}

/// Recursively enumerate `root`, returning `(virtual_path, absolute_path)`
/// pairs in lowercase, depth-first lexical order — the order a fresh rescan
/// of the source tree produces, so reruns of [`CatalogWriter::write`] are
/// byte-for-byte deterministic.
pub fn scan_directory_order(root: impl AsRef<Path>) -> Result<Vec<(String, PathBuf)>> {
    let root = root.as_ref();
    let mut out = Vec::new();

    for entry in WalkDir::new(root)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
    {
        let entry = entry.map_err(|e| crate::error::CatalogError::Io {
            path: root.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        out.push((
            VPath::normalize(&rel).into_string(),
            entry.path().to_path_buf(),
        ));
    }

    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{CatalogFile, ReadPolicy};

    #[test]
    fn round_trips_a_scanned_directory() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("libraries")).unwrap();
        std::fs::write(src.path().join("libraries/jobs.xml"), b"<jobs/>").unwrap();
        std::fs::write(src.path().join("readme.txt"), b"hello").unwrap();

        let scanned = scan_directory_order(src.path()).unwrap();
        let files: Vec<CatalogSourceFile> = scanned
            .iter()
            .map(|(vpath, abs)| CatalogSourceFile {
                virtual_path: vpath.clone(),
                bytes: std::fs::read(abs).unwrap(),
                timestamp: 1_700_000_000,
            })
            .collect();

        let out_dir = tempfile::tempdir().unwrap();
        let cat_path = out_dir.path().join("01.cat");
        let dat_path = out_dir.path().join("01.dat");
        CatalogWriter::write(&cat_path, &dat_path, &files).unwrap();

        let catalog = CatalogFile::open(&cat_path, &dat_path).unwrap();
        for (vpath, abs) in &scanned {
            let original = std::fs::read(abs).unwrap();
            let read_back = catalog.read(vpath, ReadPolicy::default()).unwrap();
            assert_eq!(read_back, original);
        }
        assert_eq!(catalog.entries().len(), files.len());
    }

    #[test]
    fn write_with_sig_emits_empty_companions() {
        let out_dir = tempfile::tempdir().unwrap();
        let cat_path = out_dir.path().join("ext_01.cat");
        let dat_path = out_dir.path().join("ext_01.dat");
        let files = vec![CatalogSourceFile {
            virtual_path: "foo.xml".into(),
            bytes: b"<a/>".to_vec(),
            timestamp: 0,
        }];
        CatalogWriter::write_with_sig(&cat_path, &dat_path, &files).unwrap();

        assert!(out_dir.path().join("ext_01.cat.sig").exists());
        assert!(out_dir.path().join("ext_01.dat.sig").exists());
        assert_eq!(
            std::fs::metadata(out_dir.path().join("ext_01.cat.sig"))
                .unwrap()
                .len(),
            0
        );
    }
}
