//! Extension checker (C11, §4.10): re-resolves the same extension set under
//! alternative load orders and replays every path the target extension
//! patches in soft mode, surfacing operations that only fail under some
//! orderings — the class of bug a single fixed load order never exposes.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use catalog::VPath;
use extman::ExtensionRecord;
use tracing::debug;
use xmlpatch::PatchDocument;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::vfs::{discover_records, VirtualFileSystem};

/// Which ordering produced a given [`OrderFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderKind {
    /// The id-case-folded order `resolve_load_order` itself would pick.
    Alphabetical,
    /// The target extension scheduled as early as its dependencies allow.
    AsEarlyAsPossible,
    /// The target extension scheduled as late as its dependents allow.
    AsLateAsPossible,
}

#[derive(Debug, Clone)]
pub struct OrderFailure {
    pub order: OrderKind,
    pub path: String,
    pub sel: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub failures: Vec<OrderFailure>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Replay `target_extension_id`'s own patch files under three load orders
/// (alphabetical, earliest-possible, latest-possible — all still respecting
/// hard dependency edges) and report every operation that fails in soft
/// mode under any of them.
pub fn check_extension(config: &EngineConfig, target_extension_id: &str) -> Result<CheckReport> {
    let records = discover_records(config)?;
    let candidates = extman::resolve_load_order(&records);

    let Some(target) = candidates.iter().find(|r| r.id == target_extension_id) else {
        debug!(target_extension_id, "target extension is not enabled, nothing to check");
        return Ok(CheckReport::default());
    };

    let target_patches = collect_patch_paths(&target.path);
    if target_patches.is_empty() {
        return Ok(CheckReport::default());
    }

    let orders = [
        (OrderKind::Alphabetical, candidates.clone()),
        (OrderKind::AsEarlyAsPossible, biased_order(&candidates, target_extension_id, true)),
        (OrderKind::AsLateAsPossible, biased_order(&candidates, target_extension_id, false)),
    ];

    let mut failures = Vec::new();
    for (kind, order) in orders {
        let mut vfs = VirtualFileSystem::from_explicit_order(config.clone(), &order)?;
        for path in &target_patches {
            let (_, op_failures) = vfs.load_file_soft(path)?;
            for failure in op_failures {
                failures.push(OrderFailure {
                    order: kind,
                    path: path.clone(),
                    sel: failure.sel.clone(),
                    detail: failure.message.clone(),
                });
            }
        }
    }

    Ok(CheckReport { failures })
}

/// Every path under `extension_dir` whose content parses as a `<diff>`
/// patch document — the files whose soft-mode application this extension's
/// correctness actually depends on.
fn collect_patch_paths(extension_dir: &Path) -> Vec<String> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(extension_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if PatchDocument::parse(&text).is_err() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(extension_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        out.push(VPath::normalize(&rel).as_str().to_string());
    }
    out.sort();
    out
}

/// Topologically sort `candidates` the same way `resolve_load_order` does
/// (deterministic, dependency-respecting), except the ready queue always
/// prefers the target extension when `earliest` is set, and always defers
/// it otherwise — producing the earliest or latest position consistent
/// with the dependency graph rather than the plain alphabetical tiebreak.
fn biased_order(candidates: &[ExtensionRecord], target_id: &str, earliest: bool) -> Vec<ExtensionRecord> {
    let ids: HashSet<String> = candidates.iter().map(|r| r.id.clone()).collect();
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    let mut indegree: HashMap<String, usize> = HashMap::new();
    for record in candidates {
        indegree.entry(record.id.clone()).or_insert(0);
        for dep in &record.dependencies {
            if !ids.contains(&dep.id) {
                continue;
            }
            edges.entry(dep.id.clone()).or_default().push(record.id.clone());
            *indegree.entry(record.id.clone()).or_insert(0) += 1;
        }
    }

    let mut ready: Vec<String> = indegree.iter().filter(|&(_, &count)| count == 0).map(|(id, _)| id.clone()).collect();
    let mut order = Vec::new();
    let mut remaining_edges = edges;
    let mut remaining_indegree = indegree;

    while !ready.is_empty() {
        ready.sort_by_key(|id| id.to_ascii_lowercase());
        let next = if earliest && ready.iter().any(|id| id == target_id) {
            target_id.to_string()
        } else if !earliest && ready.len() > 1 && ready.iter().any(|id| id == target_id) {
            ready.iter().find(|id| id.as_str() != target_id).cloned().unwrap_or_else(|| target_id.to_string())
        } else {
            ready[0].clone()
        };
        ready.retain(|id| id != &next);
        order.push(next.clone());
        if let Some(successors) = remaining_edges.remove(&next) {
            for succ in successors {
                if let Some(count) = remaining_indegree.get_mut(&succ) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(succ);
                    }
                }
            }
        }
    }

    if order.len() < candidates.len() {
        let mut leftover: Vec<String> = candidates.iter().map(|r| r.id.clone()).filter(|id| !order.contains(id)).collect();
        leftover.sort_by_key(|id| id.to_ascii_lowercase());
        order.extend(leftover);
    }

    let by_id: HashMap<String, ExtensionRecord> = candidates.iter().map(|r| (r.id.clone(), r.clone())).collect();
    order.into_iter().filter_map(|id| by_id.get(&id).cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfigBuilder;

    #[test]
    fn clean_extension_reports_no_failures() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_loose_files(dir.path(), &[("libraries/jobs.xml", b"<jobs max=\"1\"/>")]);
        let extensions = dir.path().join("extensions");
        test_support::write_extension(
            &extensions,
            "patcher",
            &test_support::content_xml("patcher", "Patcher", "1", &[]),
            &[("libraries/jobs.xml", br#"<diff><add sel="/jobs" type="@max">5</add></diff>"#)],
        );

        let config = EngineConfigBuilder::new().game_root(dir.path()).output_extension_id("out").build().unwrap();
        let report = check_extension(&config, "patcher").unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn missing_selector_fails_under_every_order() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_loose_files(dir.path(), &[("libraries/jobs.xml", b"<jobs max=\"1\"/>")]);
        let extensions = dir.path().join("extensions");
        test_support::write_extension(
            &extensions,
            "patcher",
            &test_support::content_xml("patcher", "Patcher", "1", &[]),
            &[("libraries/jobs.xml", br#"<diff><add sel="/jobs/missing" type="@x">5</add></diff>"#)],
        );

        let config = EngineConfigBuilder::new().game_root(dir.path()).output_extension_id("out").build().unwrap();
        let report = check_extension(&config, "patcher").unwrap();
        assert_eq!(report.failures.len(), 3);
        assert!(report.failures.iter().all(|f| f.sel == "/jobs/missing"));
    }

    #[test]
    fn unchecked_extension_without_patch_files_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let extensions = dir.path().join("extensions");
        test_support::write_extension(&extensions, "assets_only", &test_support::content_xml("assets_only", "Assets", "1", &[]), &[]);

        let config = EngineConfigBuilder::new().game_root(dir.path()).output_extension_id("out").build().unwrap();
        let report = check_extension(&config, "assets_only").unwrap();
        assert!(report.is_clean());
    }
}
