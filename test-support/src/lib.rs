//! Test fixtures shared across the modding framework core crates.
//!
//! Builds throwaway catalog pairs and extension directory trees so each
//! crate's integration tests can exercise real filesystem layouts without
//! duplicating the boilerplate in every test module.

use std::path::{Path, PathBuf};

/// One file to seed into a catalog or loose tree: its virtual path and raw
/// bytes.
pub type FixtureFile<'a> = (&'a str, &'a [u8]);

/// Write a `<stem>.cat`/`<stem>.dat` pair under `dir` from `files`, in the
/// given order — mirrors the on-disk format C2 parses: `path length
/// timestamp md5hex` per line, LF-terminated, payloads concatenated
/// contiguously into the `.dat`.
///
/// Timestamps are synthetic but stable (`base_timestamp + index`) so tests
/// that assert on them don't depend on wall-clock time.
pub fn write_catalog(dir: &Path, stem: &str, files: &[FixtureFile<'_>]) -> (PathBuf, PathBuf) {
    let cat_path = dir.join(format!("{stem}.cat"));
    let dat_path = dir.join(format!("{stem}.dat"));

    let mut cat_text = String::new();
    let mut dat_bytes = Vec::new();
    let base_timestamp: i64 = 1_700_000_000;

    for (index, (path, payload)) in files.iter().enumerate() {
        let digest = md5::compute(payload);
        cat_text.push_str(&format!(
            "{path} {} {} {}\n",
            payload.len(),
            base_timestamp + index as i64,
            hex::encode(digest.0)
        ));
        dat_bytes.extend_from_slice(payload);
    }

    std::fs::write(&cat_path, cat_text).expect("write fixture .cat");
    std::fs::write(&dat_path, dat_bytes).expect("write fixture .dat");
    (cat_path, dat_path)
}

/// Write `files` as loose files under `dir`, creating parent directories as
/// needed. Virtual paths use `/` regardless of host platform.
pub fn write_loose_files(dir: &Path, files: &[FixtureFile<'_>]) {
    for (path, payload) in files {
        let full = dir.join(path.replace('/', std::path::MAIN_SEPARATOR_STR));
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("create loose fixture parent dir");
        }
        std::fs::write(&full, payload).expect("write loose fixture file");
    }
}

/// Build a minimal `content.xml` body: one `<content>` element with a
/// `<dependency>` child per `(id, optional)` pair.
pub fn content_xml(id: &str, name: &str, version: &str, dependencies: &[(&str, bool)]) -> String {
    let mut deps = String::new();
    for (dep_id, optional) in dependencies {
        deps.push_str(&format!(
            "<dependency id=\"{dep_id}\" optional=\"{}\"/>",
            optional
        ));
    }
    format!(
        "<content id=\"{id}\" name=\"{name}\" version=\"{version}\" save=\"false\">{deps}</content>"
    )
}

/// Lay out `<root>/extensions/<id>/content.xml` plus any extra files, and
/// return the extension's directory — the shape C5 discovery scans.
pub fn write_extension(
    extensions_dir: &Path,
    id: &str,
    content_xml: &str,
    files: &[FixtureFile<'_>],
) -> PathBuf {
    let ext_dir = extensions_dir.join(id);
    std::fs::create_dir_all(&ext_dir).expect("create extension dir");
    std::fs::write(ext_dir.join("content.xml"), content_xml).expect("write content.xml");
    write_loose_files(&ext_dir, files);
    ext_dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_catalog_round_trips_through_md5() {
        let dir = tempfile::tempdir().unwrap();
        let (cat_path, dat_path) = write_catalog(
            dir.path(),
            "01",
            &[("libraries/jobs.xml", b"<jobs/>"), ("md/script.xml", b"<mdscript/>")],
        );
        let cat_text = std::fs::read_to_string(&cat_path).unwrap();
        assert_eq!(cat_text.lines().count(), 2);
        let dat_bytes = std::fs::read(&dat_path).unwrap();
        assert_eq!(dat_bytes, b"<jobs/><mdscript/>");
    }

    #[test]
    fn write_extension_lays_out_content_xml_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let extensions = dir.path().join("extensions");
        let xml = content_xml("my_mod", "My Mod", "1", &[("sn_mod_support_apis", true)]);
        let ext_dir = write_extension(&extensions, "my_mod", &xml, &[("libraries/jobs.xml", b"<diff/>")]);
        assert!(ext_dir.join("content.xml").is_file());
        assert!(ext_dir.join("libraries/jobs.xml").is_file());
    }
}
