//! The virtual file system (C9): composes C6 source locations across
//! priority order, tracks per-path provenance, and exposes
//! load/get-root/update-root/list.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use catalog::{Glob, ReadPolicy, VPath};
use extman::{DiscoveryFilter, ExtensionRecord};
use tracing::{debug, warn};
use xmlpatch::{apply, Document, PatchDocument, PatchFailure};

use crate::config::EngineConfig;
use crate::error::{ModVfsError, Result};
use crate::source::SourceLocation;

/// Which kind of source contributed a given priority slot, carrying the
/// extension id where relevant (drives `originating_extension_set`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Base,
    Override,
    Extension(String),
    Output(String),
}

impl SourceKind {
    fn extension_id(&self) -> Option<&str> {
        match self {
            SourceKind::Extension(id) | SourceKind::Output(id) => Some(id.as_str()),
            SourceKind::Base | SourceKind::Override => None,
        }
    }
}

struct SourceEntry {
    kind: SourceKind,
    location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discriminator {
    Binary,
    Xml,
}

/// One loaded file, per spec §3 "File Entry (runtime)".
#[derive(Debug)]
pub struct FileEntry {
    pub path: VPath,
    binary: Vec<u8>,
    tree: Option<Document>,
    pub discriminator: Discriminator,
    pub origin_source_index: usize,
    pub modified: bool,
    pub originating_extension_set: HashSet<String>,
    pub from_extension: Option<String>,
    /// Snapshot taken right after the seed+patches load, before any
    /// `update_root` — what C8 diffs the eventually-modified tree against.
    patched_base_snapshot: Option<String>,
    /// Suppresses this file's contribution to C10's `content.xml`
    /// regeneration (§4.9).
    pub skip_content: bool,
}

impl FileEntry {
    pub fn bytes(&self) -> &[u8] {
        &self.binary
    }
}

/// Cooperative, file-granularity cancellation (§5: "checked between files,
/// not mid-parse").
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct VirtualFileSystem {
    pub(crate) config: EngineConfig,
    sources: Vec<SourceEntry>,
    cache: HashMap<VPath, FileEntry>,
    cancel: CancelToken,
}

/// Scan `<root>/extensions`, `<user>/extensions`, and `config.extension_roots`
/// into a single candidate list, before load-order resolution. Shared by
/// normal construction and C11's alternative-order checker.
pub fn discover_records(config: &EngineConfig) -> Result<Vec<ExtensionRecord>> {
    let filter = DiscoveryFilter {
        whitelist: config.whitelist.clone(),
        blacklist: config.blacklist.clone(),
    };
    let mut records = extman::discover(
        &config.game_root,
        config.user_dir.as_deref(),
        &filter,
        &config.output_extension_id,
        config.strict_user_dir,
    )?;
    for extra_root in &config.extension_roots {
        if let Ok(manifest) = extman::Manifest::read(extra_root) {
            records.push(ExtensionRecord {
                id: manifest.id.clone(),
                name: manifest.name,
                version: manifest.version,
                enabled: true,
                dependencies: manifest.dependencies,
                is_output_extension: manifest.id == config.output_extension_id,
                path: extra_root.clone(),
            });
        }
    }
    Ok(records)
}

impl VirtualFileSystem {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let records = discover_records(&config)?;
        let load_order = extman::resolve_load_order(&records);
        Self::from_explicit_order(config, &load_order)
    }

    /// Assemble the VFS from an already-resolved extension order, bypassing
    /// discovery's own topological sort — the hook C11 uses to force
    /// alternative (alphabetical/earliest/latest) orderings of the same
    /// extension set.
    pub fn from_explicit_order(config: EngineConfig, ordered_extensions: &[ExtensionRecord]) -> Result<Self> {
        let mut sources = vec![SourceEntry {
            kind: SourceKind::Base,
            location: SourceLocation::open(&config.game_root, false)?,
        }];

        if let Some(root) = &config.source_override_root {
            sources.push(SourceEntry {
                kind: SourceKind::Override,
                location: SourceLocation::open(root, true)?,
            });
        }

        for record in ordered_extensions {
            if record.is_output_extension {
                continue;
            }
            sources.push(SourceEntry {
                kind: SourceKind::Extension(record.id.clone()),
                location: SourceLocation::open(&record.path, true)?,
            });
        }
        if !config.ignore_output_extension {
            if let Some(output) = ordered_extensions.iter().find(|r| r.is_output_extension) {
                sources.push(SourceEntry {
                    kind: SourceKind::Output(output.id.clone()),
                    location: SourceLocation::open(&output.path, true)?,
                });
            }
        }

        debug!(sources = sources.len(), "virtual file system assembled");

        Ok(Self {
            config,
            sources,
            cache: HashMap::new(),
            cancel: CancelToken::new(),
        })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn read_policy(&self) -> ReadPolicy {
        ReadPolicy {
            allow_md5_errors: self.config.allow_md5_errors,
        }
    }

    /// Load `path`, composing the seed and applying overriding patches if
    /// it is not already cached. Strict: an applier failure aborts the load
    /// (normal operation). Use [`Self::load_file_soft`] for the checker's
    /// soft-mode variant.
    pub fn load_file(&mut self, path: &str) -> Result<&FileEntry> {
        let vpath = VPath::normalize(path);
        if !self.cache.contains_key(&vpath) {
            let (entry, failures) = self.resolve(&vpath, true)?;
            debug_assert!(failures.is_empty(), "strict resolve must not report soft failures");
            self.cache.insert(vpath.clone(), entry);
        }
        Ok(self.cache.get(&vpath).expect("just inserted"))
    }

    /// As [`Self::load_file`], but applies patches in soft mode and returns
    /// the accumulated failures instead of aborting (used by C11).
    pub fn load_file_soft(&mut self, path: &str) -> Result<(&FileEntry, Vec<PatchFailure>)> {
        let vpath = VPath::normalize(path);
        let (entry, failures) = self.resolve(&vpath, false)?;
        self.cache.insert(vpath.clone(), entry);
        Ok((self.cache.get(&vpath).expect("just inserted"), failures))
    }

    /// Bulk-load `paths` ahead of time using a worker pool sized to
    /// available cores (§5's VFS warmup pool). `resolve` only borrows
    /// `self` immutably, so the scan/parse/patch pipeline runs fully in
    /// parallel; only the final cache insertion is serialised.
    pub fn warmup(&mut self, paths: &[String]) -> Result<()> {
        let vpaths: Vec<VPath> = paths.iter().map(|p| VPath::normalize(p)).collect();
        let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).max(1);

        let results: Vec<Result<(VPath, FileEntry)>> = if worker_count <= 1 || vpaths.len() <= 1 {
            vpaths.iter().map(|vp| self.resolve_entry(vp)).collect()
        } else {
            let this: &Self = self;
            let chunk_size = vpaths.len().div_ceil(worker_count).max(1);
            std::thread::scope(|scope| {
                let handles: Vec<_> = vpaths
                    .chunks(chunk_size)
                    .map(|chunk| scope.spawn(move || chunk.iter().map(|vp| this.resolve_entry(vp)).collect::<Vec<_>>()))
                    .collect();
                handles.into_iter().flat_map(|h| h.join().expect("warmup worker panicked")).collect()
            })
        };

        for result in results {
            let (vpath, entry) = result?;
            self.cache.insert(vpath, entry);
        }
        Ok(())
    }

    fn resolve_entry(&self, vpath: &VPath) -> Result<(VPath, FileEntry)> {
        let (entry, failures) = self.resolve(vpath, true)?;
        debug_assert!(failures.is_empty(), "strict resolve must not report soft failures");
        Ok((vpath.clone(), entry))
    }

    fn resolve(&self, vpath: &VPath, strict: bool) -> Result<(FileEntry, Vec<PatchFailure>)> {
        let mut patches: Vec<(usize, PatchDocument)> = Vec::new();
        let mut seed: Option<(usize, Vec<u8>)> = None;

        for i in (0..self.sources.len()).rev() {
            let Some(bytes) = self.sources[i].location.read(vpath, self.read_policy())? else {
                continue;
            };
            if let Some(text) = as_xml_text(&bytes) {
                match PatchDocument::parse(text) {
                    Ok(patch_doc) => {
                        patches.push((i, patch_doc));
                        continue;
                    }
                    Err(_) => {
                        seed = Some((i, bytes));
                        break;
                    }
                }
            }
            seed = Some((i, bytes));
            break;
        }

        let Some((seed_index, seed_bytes)) = seed else {
            return Err(ModVfsError::PathMissing {
                path: vpath.as_str().to_string(),
            });
        };
        patches.reverse();

        let mut originating = HashSet::new();
        let from_extension = self.sources[seed_index].kind.extension_id().map(str::to_string);
        if let Some(id) = &from_extension {
            originating.insert(id.clone());
        }

        let mut failures = Vec::new();
        let (final_bytes, tree) = if let Some(text) = as_xml_text(&seed_bytes) {
            match Document::parse(text) {
                Ok(mut doc) => {
                    for (src_idx, patch_doc) in &patches {
                        let op_failures = apply(&mut doc, patch_doc, strict)?;
                        if !op_failures.is_empty() {
                            warn!(
                                path = %vpath,
                                source = src_idx,
                                failures = op_failures.len(),
                                "patch application reported soft failures"
                            );
                            failures.extend(op_failures);
                        }
                        if let Some(id) = self.sources[*src_idx].kind.extension_id() {
                            originating.insert(id.to_string());
                        }
                    }
                    let rendered = doc.to_xml_string()?;
                    (rendered.into_bytes(), Some(doc))
                }
                Err(_) => (seed_bytes, None),
            }
        } else {
            (seed_bytes, None)
        };

        let discriminator = if tree.is_some() { Discriminator::Xml } else { Discriminator::Binary };
        let patched_base_snapshot = match &tree {
            Some(doc) => Some(doc.to_canonical_string()?),
            None => None,
        };

        Ok((
            FileEntry {
                path: vpath.clone(),
                binary: final_bytes,
                tree,
                discriminator,
                origin_source_index: seed_index,
                modified: false,
                originating_extension_set: originating,
                from_extension,
                patched_base_snapshot,
                skip_content: false,
            },
            failures,
        ))
    }

    /// Return the parsed XML root for `path`, loading and lazily parsing it
    /// if necessary.
    pub fn get_root(&mut self, path: &str) -> Result<&Document> {
        self.load_file(path)?;
        let vpath = VPath::normalize(path);
        let entry = self.cache.get_mut(&vpath).expect("just loaded");
        if entry.discriminator != Discriminator::Xml {
            return Err(ModVfsError::NotXml { path: vpath.as_str().to_string() });
        }
        if entry.tree.is_none() {
            let text = std::str::from_utf8(&entry.binary).map_err(|_| ModVfsError::NotXml {
                path: vpath.as_str().to_string(),
            })?;
            entry.tree = Some(Document::parse(text)?);
        }
        Ok(entry.tree.as_ref().expect("populated above"))
    }

    /// Install `new_root` as `path`'s current tree, marking it modified.
    pub fn update_root(&mut self, path: &str, new_root: Document) -> Result<()> {
        self.load_file(path)?;
        let vpath = VPath::normalize(path);
        let entry = self.cache.get_mut(&vpath).expect("just loaded");
        entry.binary = new_root.to_xml_string()?.into_bytes();
        entry.tree = Some(new_root);
        entry.modified = true;
        entry.discriminator = Discriminator::Xml;
        Ok(())
    }

    /// Walk every source, merging and deduplicating paths matching `glob`
    /// after shadowing.
    pub fn list_files(&self, glob: &str) -> Vec<VPath> {
        let compiled = Glob::new(glob);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for source in &self.sources {
            for path in source.location.list(&compiled) {
                if seen.insert(path.clone()) {
                    out.push(path);
                }
            }
        }
        out.sort();
        out
    }

    pub fn modified_files(&self) -> impl Iterator<Item = &FileEntry> {
        self.cache.values().filter(|entry| entry.modified)
    }

    pub fn cached_entry(&self, path: &str) -> Option<&FileEntry> {
        self.cache.get(&VPath::normalize(path))
    }

    pub(crate) fn patched_base_snapshot(&self, path: &str) -> Option<&str> {
        self.cache
            .get(&VPath::normalize(path))
            .and_then(|entry| entry.patched_base_snapshot.as_deref())
    }

    pub fn extension_load_order(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter_map(|s| s.kind.extension_id())
            .collect()
    }
}

/// Cheap textual sniff: must decode as UTF-8 and, after trimming leading
/// whitespace, start with `<` — good enough to separate candidate XML from
/// binary assets without a full parse.
fn as_xml_text(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes).ok().filter(|text| text.trim_start().starts_with('<'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfigBuilder;
    use pretty_assertions::assert_eq;

    fn base_config(game_root: &std::path::Path) -> EngineConfig {
        EngineConfigBuilder::new().game_root(game_root).build().unwrap()
    }

    #[test]
    fn reads_base_file_unmodified_with_no_extensions() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_loose_files(dir.path(), &[("libraries/jobs.xml", b"<jobs/>")]);
        let mut vfs = VirtualFileSystem::new(base_config(dir.path())).unwrap();
        let entry = vfs.load_file("libraries/jobs.xml").unwrap();
        assert_eq!(entry.bytes(), b"<jobs/>");
        assert!(entry.originating_extension_set.is_empty());
    }

    #[test]
    fn extension_patch_is_applied_over_base_seed_and_tracked_as_origin() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_loose_files(dir.path(), &[("libraries/jobs.xml", b"<jobs max=\"1\"/>")]);
        let extensions = dir.path().join("extensions");
        let content = test_support::content_xml("patch_mod", "Patch Mod", "1", &[]);
        let ext_dir = test_support::write_extension(
            &extensions,
            "patch_mod",
            &content,
            &[("libraries/jobs.xml", br#"<diff><replace sel="/jobs/@max">9</replace></diff>"#)],
        );
        assert!(ext_dir.join("content.xml").is_file());

        let mut vfs = VirtualFileSystem::new(base_config(dir.path())).unwrap();
        let entry = vfs.load_file("libraries/jobs.xml").unwrap();
        assert!(std::str::from_utf8(entry.bytes()).unwrap().contains("max=\"9\""));
        assert!(entry.originating_extension_set.contains("patch_mod"));
    }

    #[test]
    fn higher_priority_extension_full_replacement_becomes_the_new_seed() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_loose_files(dir.path(), &[("libraries/jobs.xml", b"<jobs max=\"1\"/>")]);
        let extensions = dir.path().join("extensions");
        let content = test_support::content_xml("replace_mod", "Replace Mod", "1", &[]);
        test_support::write_extension(
            &extensions,
            "replace_mod",
            &content,
            &[("libraries/jobs.xml", b"<jobs max=\"42\" fresh=\"true\"/>")],
        );

        let mut vfs = VirtualFileSystem::new(base_config(dir.path())).unwrap();
        let entry = vfs.load_file("libraries/jobs.xml").unwrap();
        let text = std::str::from_utf8(entry.bytes()).unwrap();
        assert!(text.contains("fresh=\"true\""));
        assert!(entry.originating_extension_set.contains("replace_mod"));
    }

    #[test]
    fn update_root_marks_file_modified() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_loose_files(dir.path(), &[("libraries/jobs.xml", b"<jobs/>")]);
        let mut vfs = VirtualFileSystem::new(base_config(dir.path())).unwrap();
        let root = vfs.get_root("libraries/jobs.xml").unwrap().clone();
        vfs.update_root("libraries/jobs.xml", root).unwrap();
        assert_eq!(vfs.modified_files().count(), 1);
    }

    #[test]
    fn missing_path_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut vfs = VirtualFileSystem::new(base_config(dir.path())).unwrap();
        let err = vfs.load_file("nowhere.xml").unwrap_err();
        assert!(matches!(err, ModVfsError::PathMissing { .. }));
    }

    #[test]
    fn warmup_populates_the_cache_for_every_requested_path() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_loose_files(
            dir.path(),
            &[("libraries/jobs.xml", b"<jobs/>"), ("libraries/wares.xml", b"<wares/>")],
        );
        let mut vfs = VirtualFileSystem::new(base_config(dir.path())).unwrap();
        vfs.warmup(&["libraries/jobs.xml".to_string(), "libraries/wares.xml".to_string()]).unwrap();

        assert!(vfs.cached_entry("libraries/jobs.xml").is_some());
        assert!(vfs.cached_entry("libraries/wares.xml").is_some());
    }
}
