//! Catalog reader (component C2): parses a `.cat` index and lazily reads
//! byte ranges out of the paired `.dat`, verifying MD5 and tolerating the
//! well-known empty-hash bug.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::Mmap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::entry::{CatalogEntry, EMPTY_HASH_HEX};
use crate::error::{CatalogError, IoContext, Result};
use crate::path::VPath;

/// Policy controlling how `.dat` checksum mismatches are handled at read
/// time, independent of the always-tolerated empty-hash bug.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadPolicy {
    pub allow_md5_errors: bool,
}

#[derive(Debug, Clone, Copy)]
struct IndexedLocation {
    offset: u64,
    length: u64,
    md5: [u8; 16],
    timestamp: i64,
}

/// Either a memory map of the `.dat` file or, when mapping fails (e.g. a
/// zero-length file, or a platform/filesystem that rejects the mapping), a
/// plain seekable reader guarded by a lock — mirrors the archive reader's
/// mmap-with-fallback strategy, since at most one read may be in flight
/// against the stateful seek position at a time.
#[derive(Debug)]
enum DatHandle {
    Mmap(Mmap),
    File(Mutex<BufReader<File>>),
}

impl DatHandle {
    fn read_at(&self, path: &Path, offset: u64, length: u64) -> Result<Vec<u8>> {
        match self {
            DatHandle::Mmap(mmap) => {
                let start = offset as usize;
                let end = start + length as usize;
                if end > mmap.len() {
                    return Err(bounds_error(path, offset, length, mmap.len() as u64));
                }
                Ok(mmap[start..end].to_vec())
            }
            DatHandle::File(locked) => {
                let mut reader = locked.lock();
                reader.seek(SeekFrom::Start(offset)).with_path(path)?;
                let mut buf = vec![0u8; length as usize];
                reader.read_exact(&mut buf).with_path(path)?;
                Ok(buf)
            }
        }
    }

    fn len(&self, path: &Path) -> Result<u64> {
        match self {
            DatHandle::Mmap(mmap) => Ok(mmap.len() as u64),
            DatHandle::File(locked) => {
                let reader = locked.lock();
                Ok(reader.get_ref().metadata().with_path(path)?.len())
            }
        }
    }
}

fn bounds_error(path: &Path, offset: u64, length: u64, size: u64) -> CatalogError {
    CatalogError::OutOfBounds {
        dat_path: path.to_path_buf(),
        path: String::new(),
        offset,
        length,
        size,
    }
}

/// A parsed `.cat` index paired with its `.dat` payload file. Read-only
/// after construction.
#[derive(Debug)]
pub struct CatalogFile {
    cat_path: PathBuf,
    dat_path: PathBuf,
    entries: Vec<CatalogEntry>,
    index: HashMap<String, IndexedLocation>,
    dat: DatHandle,
    empty_hash_bug_count: AtomicU64,
}

impl CatalogFile {
    /// Parse `cat_path` and open `dat_path` for lazy range reads.
    pub fn open(cat_path: impl AsRef<Path>, dat_path: impl AsRef<Path>) -> Result<Self> {
        let cat_path = cat_path.as_ref().to_path_buf();
        let dat_path = dat_path.as_ref().to_path_buf();

        let text = std::fs::read_to_string(&cat_path).with_path(&cat_path)?;
        let entries = parse_cat_text(&cat_path, &text)?;

        let mut index = HashMap::with_capacity(entries.len());
        let mut offset = 0u64;
        for entry in &entries {
            let key = VPath::normalize(&entry.path).into_string();
            index.insert(
                key,
                IndexedLocation {
                    offset,
                    length: entry.length,
                    md5: entry.md5,
                    timestamp: entry.timestamp,
                },
            );
            offset += entry.length;
        }

        let dat = open_dat(&dat_path)?;

        debug!(
            cat = %cat_path.display(),
            dat = %dat_path.display(),
            entries = entries.len(),
            "opened catalog"
        );

        Ok(Self {
            cat_path,
            dat_path,
            entries,
            index,
            dat,
            empty_hash_bug_count: AtomicU64::new(0),
        })
    }

    pub fn cat_path(&self) -> &Path {
        &self.cat_path
    }

    pub fn dat_path(&self) -> &Path {
        &self.dat_path
    }

    /// Entries in on-disk order (earlier entries may be shadowed by a later
    /// duplicate path within this same cat).
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(&VPath::normalize(path).into_string())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    pub fn timestamp_of(&self, path: &str) -> Option<i64> {
        self.index
            .get(&VPath::normalize(path).into_string())
            .map(|loc| loc.timestamp)
    }

    /// Number of empty-hash-bug entries tolerated so far (§7 metric).
    pub fn empty_hash_bug_count(&self) -> u64 {
        self.empty_hash_bug_count.load(Ordering::Relaxed)
    }

    /// Read the bytes for `path`, verifying MD5 per `policy`.
    pub fn read(&self, path: &str, policy: ReadPolicy) -> Result<Vec<u8>> {
        let key = VPath::normalize(path).into_string();
        let loc = self
            .index
            .get(&key)
            .ok_or_else(|| CatalogError::PathNotFound {
                cat_path: self.cat_path.clone(),
                path: key.clone(),
            })?;

        let size = self.dat.len(&self.dat_path)?;
        if loc.offset + loc.length > size {
            return Err(CatalogError::OutOfBounds {
                dat_path: self.dat_path.clone(),
                path: key,
                offset: loc.offset,
                length: loc.length,
                size,
            });
        }

        let bytes = self.dat.read_at(&self.dat_path, loc.offset, loc.length)?;
        let computed = md5::compute(&bytes).0;

        if computed == loc.md5 {
            return Ok(bytes);
        }

        let recorded_hex = hex::encode(loc.md5);
        if recorded_hex == EMPTY_HASH_HEX && !bytes.is_empty() {
            self.empty_hash_bug_count.fetch_add(1, Ordering::Relaxed);
            debug!(path = %key, "tolerating empty-hash bug: nonempty payload under empty-string MD5");
            return Ok(bytes);
        }

        if policy.allow_md5_errors {
            warn!(
                path = %key,
                expected = %recorded_hex,
                actual = %hex::encode(computed),
                "checksum mismatch tolerated by policy"
            );
            return Ok(bytes);
        }

        Err(CatalogError::ChecksumMismatch {
            path: key,
            expected: recorded_hex,
            actual: hex::encode(computed),
        })
    }
}

fn open_dat(dat_path: &Path) -> Result<DatHandle> {
    let file = File::open(dat_path).with_path(dat_path)?;
    let size = file.metadata().with_path(dat_path)?.len();

    if size == 0 {
        return Ok(DatHandle::File(Mutex::new(BufReader::new(file))));
    }

    match unsafe { Mmap::map(&file) } {
        Ok(mmap) => Ok(DatHandle::Mmap(mmap)),
        Err(source) => {
            warn!(dat = %dat_path.display(), error = %source, "falling back to seek-based dat reads");
            let file = File::open(dat_path).with_path(dat_path)?;
            Ok(DatHandle::File(Mutex::new(BufReader::new(file))))
        }
    }
}

/// Parse `.cat` index text (one entry per line, LF or CRLF, fields split
/// from the right since a path may contain spaces).
fn parse_cat_text(cat_path: &Path, text: &str) -> Result<Vec<CatalogEntry>> {
    let mut entries = Vec::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if raw_line.trim().is_empty() {
            return Err(CatalogError::MalformedLine {
                path: cat_path.to_path_buf(),
                line_no,
                detail: "blank lines are not permitted in a catalog index".to_string(),
            });
        }

        let parts: Vec<&str> = raw_line.rsplitn(4, ' ').collect();
        if parts.len() != 4 {
            return Err(CatalogError::MalformedLine {
                path: cat_path.to_path_buf(),
                line_no,
                detail: format!(
                    "expected `path length timestamp md5hex`, found {} field(s)",
                    parts.len()
                ),
            });
        }

        // rsplitn yields fields right-to-left: md5, timestamp, length, path.
        let md5_hex = parts[0];
        let timestamp_str = parts[1];
        let length_str = parts[2];
        let path = parts[3];

        let length: u64 = length_str.parse().map_err(|_| CatalogError::MalformedLine {
            path: cat_path.to_path_buf(),
            line_no,
            detail: format!("invalid length field {length_str:?}"),
        })?;
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| CatalogError::MalformedLine {
                path: cat_path.to_path_buf(),
                line_no,
                detail: format!("invalid timestamp field {timestamp_str:?}"),
            })?;

        let md5_bytes = hex::decode(md5_hex).map_err(|_| CatalogError::MalformedLine {
            path: cat_path.to_path_buf(),
            line_no,
            detail: format!("invalid md5 field {md5_hex:?}"),
        })?;
        if md5_bytes.len() != 16 {
            return Err(CatalogError::MalformedLine {
                path: cat_path.to_path_buf(),
                line_no,
                detail: format!("md5 field {md5_hex:?} is not 16 bytes"),
            });
        }
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&md5_bytes);

        entries.push(CatalogEntry {
            path: path.to_string(),
            length,
            timestamp,
            md5,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_pair(dir: &Path, cat_lines: &[String], dat_payload: &[u8]) -> (PathBuf, PathBuf) {
        let cat_path = dir.join("01.cat");
        let dat_path = dir.join("01.dat");
        let mut cat_file = File::create(&cat_path).unwrap();
        for line in cat_lines {
            writeln!(cat_file, "{line}").unwrap();
        }
        std::fs::write(&dat_path, dat_payload).unwrap();
        (cat_path, dat_path)
    }

    #[test]
    fn parses_path_with_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"hello world!";
        let digest = md5::compute(payload);
        let line = format!(
            "readme with spaces.txt {} 1700000000 {}",
            payload.len(),
            hex::encode(digest.0)
        );
        let (cat_path, dat_path) = write_pair(dir.path(), &[line], payload);

        let catalog = CatalogFile::open(&cat_path, &dat_path).unwrap();
        assert!(catalog.contains("readme with spaces.txt"));
        let bytes = catalog
            .read("readme with spaces.txt", ReadPolicy::default())
            .unwrap();
        assert_eq!(bytes, payload);
    }

    #[test]
    fn later_duplicate_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = b"AAAA";
        let second = b"BBBBBB";
        let d1 = md5::compute(first);
        let d2 = md5::compute(second);
        let lines = vec![
            format!("libraries/jobs.xml {} 1 {}", first.len(), hex::encode(d1.0)),
            format!(
                "libraries/jobs.xml {} 2 {}",
                second.len(),
                hex::encode(d2.0)
            ),
        ];
        let mut payload = Vec::new();
        payload.extend_from_slice(first);
        payload.extend_from_slice(second);
        let (cat_path, dat_path) = write_pair(dir.path(), &lines, &payload);

        let catalog = CatalogFile::open(&cat_path, &dat_path).unwrap();
        let bytes = catalog
            .read("libraries/jobs.xml", ReadPolicy::default())
            .unwrap();
        assert_eq!(bytes, second);
    }

    #[test]
    fn empty_hash_bug_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"twelve bytes";
        assert_eq!(payload.len(), 12);
        let line = format!("foo {} 1 {}", payload.len(), EMPTY_HASH_HEX);
        let (cat_path, dat_path) = write_pair(dir.path(), &[line], payload);

        let catalog = CatalogFile::open(&cat_path, &dat_path).unwrap();
        let bytes = catalog.read("foo", ReadPolicy::default()).unwrap();
        assert_eq!(bytes, payload);
        assert_eq!(catalog.empty_hash_bug_count(), 1);
    }

    #[test]
    fn checksum_mismatch_is_fatal_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"mismatched";
        let wrong = md5::compute(b"not the payload");
        let line = format!("foo {} 1 {}", payload.len(), hex::encode(wrong.0));
        let (cat_path, dat_path) = write_pair(dir.path(), &[line], payload);

        let catalog = CatalogFile::open(&cat_path, &dat_path).unwrap();
        let err = catalog.read("foo", ReadPolicy::default()).unwrap_err();
        assert!(matches!(err, CatalogError::ChecksumMismatch { .. }));
    }

    #[test]
    fn checksum_mismatch_allowed_by_policy() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"mismatched";
        let wrong = md5::compute(b"not the payload");
        let line = format!("foo {} 1 {}", payload.len(), hex::encode(wrong.0));
        let (cat_path, dat_path) = write_pair(dir.path(), &[line], payload);

        let catalog = CatalogFile::open(&cat_path, &dat_path).unwrap();
        let bytes = catalog
            .read("foo", ReadPolicy { allow_md5_errors: true })
            .unwrap();
        assert_eq!(bytes, payload);
    }

    #[test]
    fn blank_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cat_path = dir.path().join("01.cat");
        let dat_path = dir.path().join("01.dat");
        std::fs::write(&cat_path, "foo 1 1 d41d8cd98f00b204e9800998ecf8427e\n\n").unwrap();
        std::fs::write(&dat_path, b"x").unwrap();

        let err = CatalogFile::open(&cat_path, &dat_path).unwrap_err();
        assert!(matches!(err, CatalogError::MalformedLine { .. }));
    }

    #[test]
    fn path_lookup_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"content";
        let digest = md5::compute(payload);
        let line = format!(
            "Libraries/Jobs.xml {} 1 {}",
            payload.len(),
            hex::encode(digest.0)
        );
        let (cat_path, dat_path) = write_pair(dir.path(), &[line], payload);

        let catalog = CatalogFile::open(&cat_path, &dat_path).unwrap();
        assert!(catalog.contains("libraries/JOBS.xml"));
    }
}
