//! Source location (C6): one search root (base, source-override, or
//! extension) with its own cat stack and loose-file tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use catalog::{CatalogFile, Glob, ReadPolicy, VPath};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::Result;

/// The three cat-naming categories from §6, in shadowing order (later
/// categories shadow earlier ones within the same location, matching the
/// spec's resolved open question that gives `subst_*` a higher slot than
/// `ext_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CatCategory {
    Base,
    Ext,
    Subst,
}

/// A root directory plus its ordered cat stack and loose-file tree (spec
/// §3 "Source Location", §4.5).
pub struct SourceLocation {
    root: PathBuf,
    loose: HashMap<VPath, PathBuf>,
    /// Low to high priority: later entries shadow earlier ones.
    cat_stack: Vec<CatalogFile>,
    prefer_loose: bool,
}

impl SourceLocation {
    /// Scan `root` for loose files and a cat stack named per §6's
    /// convention. A missing `root` yields an empty location rather than an
    /// error, since extension/override roots are frequently absent.
    pub fn open(root: impl Into<PathBuf>, prefer_loose: bool) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            debug!(root = %root.display(), "source location root does not exist, treating as empty");
            return Ok(Self {
                root,
                loose: HashMap::new(),
                cat_stack: Vec::new(),
                prefer_loose,
            });
        }

        let loose = scan_loose_files(&root);
        let cat_stack = open_cat_stack(&root)?;

        debug!(
            root = %root.display(),
            loose_files = loose.len(),
            cats = cat_stack.len(),
            "opened source location"
        );

        Ok(Self {
            root,
            loose,
            cat_stack,
            prefer_loose,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contains(&self, path: &VPath) -> bool {
        self.loose.contains_key(path) || self.cat_stack.iter().any(|cat| cat.contains(path.as_str()))
    }

    /// Read `path` honouring `prefer_loose`: within a location, at most one
    /// physical file wins per the data-model invariant.
    pub fn read(&self, path: &VPath, policy: ReadPolicy) -> Result<Option<Vec<u8>>> {
        let loose_hit = self.loose.get(path);
        if self.prefer_loose {
            if let Some(abs) = loose_hit {
                return Ok(Some(std::fs::read(abs)?));
            }
        }
        for cat in self.cat_stack.iter().rev() {
            if cat.contains(path.as_str()) {
                return Ok(Some(cat.read(path.as_str(), policy)?));
            }
        }
        if let Some(abs) = loose_hit {
            return Ok(Some(std::fs::read(abs)?));
        }
        Ok(None)
    }

    /// Merge loose and cat-stack paths matching `glob`, deduplicated after
    /// shadowing.
    pub fn list(&self, glob: &Glob) -> Vec<VPath> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for path in self.loose.keys() {
            if glob.matches(path) && seen.insert(path.clone()) {
                out.push(path.clone());
            }
        }
        for cat in &self.cat_stack {
            for path in cat.paths() {
                let vpath = VPath::normalize(path);
                if glob.matches(&vpath) && seen.insert(vpath.clone()) {
                    out.push(vpath);
                }
            }
        }
        out
    }
}

fn scan_loose_files(root: &Path) -> HashMap<VPath, PathBuf> {
    let mut out = HashMap::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry.path().extension().and_then(|e| e.to_str()).unwrap_or("");
        if matches!(ext, "cat" | "dat" | "sig") {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path()).to_string_lossy().replace('\\', "/");
        out.insert(VPath::normalize(&rel), entry.path().to_path_buf());
    }
    out
}

fn open_cat_stack(root: &Path) -> Result<Vec<CatalogFile>> {
    let mut numbered: Vec<(CatCategory, u32, PathBuf)> = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return Ok(Vec::new());
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("cat") {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        let Some((category, number)) = classify_cat_stem(stem) else {
            continue;
        };
        numbered.push((category, number, path));
    }

    numbered.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let mut cat_stack = Vec::with_capacity(numbered.len());
    for (_, _, cat_path) in numbered {
        let dat_path = cat_path.with_extension("dat");
        cat_stack.push(CatalogFile::open(&cat_path, &dat_path)?);
    }
    Ok(cat_stack)
}

fn classify_cat_stem(stem: &str) -> Option<(CatCategory, u32)> {
    if let Some(rest) = stem.strip_prefix("ext_") {
        return rest.parse().ok().map(|n| (CatCategory::Ext, n));
    }
    if let Some(rest) = stem.strip_prefix("subst_") {
        return rest.parse().ok().map(|n| (CatCategory::Subst, n));
    }
    stem.parse().ok().map(|n| (CatCategory::Base, n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::ReadPolicy;

    #[test]
    fn missing_root_is_an_empty_location() {
        let dir = tempfile::tempdir().unwrap();
        let location = SourceLocation::open(dir.path().join("nope"), true).unwrap();
        assert!(!location.contains(&VPath::normalize("foo.xml")));
    }

    #[test]
    fn loose_file_is_found_when_prefer_loose() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_loose_files(dir.path(), &[("libraries/jobs.xml", b"<jobs/>")]);
        let location = SourceLocation::open(dir.path(), true).unwrap();
        let bytes = location.read(&VPath::normalize("libraries/jobs.xml"), ReadPolicy::default()).unwrap();
        assert_eq!(bytes, Some(b"<jobs/>".to_vec()));
    }

    #[test]
    fn subst_cat_shadows_ext_cat_at_the_same_path() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_catalog(dir.path(), "ext_01", &[("wares.xml", b"<ext/>")]);
        test_support::write_catalog(dir.path(), "subst_01", &[("wares.xml", b"<subst/>")]);
        let location = SourceLocation::open(dir.path(), false).unwrap();
        let bytes = location.read(&VPath::normalize("wares.xml"), ReadPolicy::default()).unwrap();
        assert_eq!(bytes, Some(b"<subst/>".to_vec()));
    }

    #[test]
    fn higher_numbered_cat_shadows_lower_within_the_same_category() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_catalog(dir.path(), "01", &[("wares.xml", b"<old/>")]);
        test_support::write_catalog(dir.path(), "02", &[("wares.xml", b"<new/>")]);
        let location = SourceLocation::open(dir.path(), false).unwrap();
        let bytes = location.read(&VPath::normalize("wares.xml"), ReadPolicy::default()).unwrap();
        assert_eq!(bytes, Some(b"<new/>".to_vec()));
    }

    #[test]
    fn list_merges_loose_and_cat_entries_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_catalog(dir.path(), "01", &[("libraries/jobs.xml", b"<a/>"), ("libraries/wares.xml", b"<b/>")]);
        test_support::write_loose_files(dir.path(), &[("libraries/jobs.xml", b"<override/>")]);
        let location = SourceLocation::open(dir.path(), true).unwrap();
        let matches = location.list(&Glob::new("libraries/*.xml"));
        assert_eq!(matches.len(), 2);
    }
}
