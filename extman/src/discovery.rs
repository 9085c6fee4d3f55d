//! Extension discovery (C5): enumerates extensions on disk, resolves
//! enablement, and produces a dependency-respecting load order.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;
use crate::manifest::{Dependency, Manifest, UserConfig};

/// A discovered extension, immutable once built by [`discover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub dependencies: Vec<Dependency>,
    pub is_output_extension: bool,
    pub path: PathBuf,
}

/// Filters applied to the candidate folder-name set before enablement is
/// considered.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilter {
    pub whitelist: Option<HashSet<String>>,
    pub blacklist: HashSet<String>,
}

impl DiscoveryFilter {
    fn admits(&self, folder_name: &str) -> bool {
        if self.blacklist.contains(folder_name) {
            return false;
        }
        match &self.whitelist {
            Some(set) => set.contains(folder_name),
            None => true,
        }
    }
}

/// Scan `<root>/extensions/*/content.xml` and, if `user_dir` is given,
/// `<user>/extensions/*/content.xml`. Returns discovered records in no
/// particular order — pass the result to [`resolve_load_order`] for an
/// ordered, dependency-respecting list of the enabled subset.
pub fn discover(
    game_root: &Path,
    user_dir: Option<&Path>,
    filter: &DiscoveryFilter,
    output_extension_id: &str,
    strict_user_dir: bool,
) -> Result<Vec<ExtensionRecord>> {
    let mut records = Vec::new();
    let mut seen_ids = HashSet::new();

    let disabled = match user_dir {
        Some(dir) => UserConfig::read(dir, strict_user_dir)?.disabled_extensions,
        None => Vec::new(),
    };
    let disabled: HashSet<&str> = disabled.iter().map(String::as_str).collect();

    let mut roots = vec![game_root.join("extensions")];
    if let Some(dir) = user_dir {
        roots.push(dir.join("extensions"));
    }

    for extensions_dir in roots {
        let Ok(entries) = std::fs::read_dir(&extensions_dir) else {
            continue;
        };
        let mut folders: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_dir()).collect();
        folders.sort();

        for folder in folders {
            let folder_name = folder
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !filter.admits(&folder_name) {
                debug!("extension folder {folder_name} excluded by whitelist/blacklist");
                continue;
            }
            if !folder.join("content.xml").is_file() {
                continue;
            }
            let manifest = match Manifest::read(&folder) {
                Ok(m) => m,
                Err(err) => {
                    warn!("manifest parse failure for {folder_name}, treating as disabled: {err}");
                    continue;
                }
            };
            if !seen_ids.insert(manifest.id.clone()) {
                warn!("duplicate extension id {} at {folder_name}, keeping first occurrence", manifest.id);
                continue;
            }
            let enabled = !disabled.contains(manifest.id.as_str());
            records.push(ExtensionRecord {
                id: manifest.id.clone(),
                name: manifest.name,
                version: manifest.version,
                enabled,
                dependencies: manifest.dependencies,
                is_output_extension: manifest.id == output_extension_id,
                path: folder,
            });
        }
    }

    Ok(records)
}

/// Stable topological sort over the enabled subset of `records`: hard
/// dependency edges (`A depends on B` ⇒ B precedes A) are enforced, ties
/// broken by folder id case-folded. Unsatisfied hard dependencies disable
/// the dependent with a warning. Soft (optional) dependencies only relax
/// ordering, never enablement.
pub fn resolve_load_order(records: &[ExtensionRecord]) -> Vec<ExtensionRecord> {
    let by_id: HashMap<&str, &ExtensionRecord> = records.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut candidates: Vec<ExtensionRecord> = records.iter().filter(|r| r.enabled).cloned().collect();

    loop {
        let mut disabled_any = false;
        let enabled_ids: HashSet<&str> = candidates.iter().map(|r| r.id.as_str()).collect();
        let mut keep = Vec::new();
        for record in &candidates {
            let mut ok = true;
            for dep in &record.dependencies {
                if dep.optional {
                    continue;
                }
                let exists = by_id.contains_key(dep.id.as_str());
                let enabled = enabled_ids.contains(dep.id.as_str());
                if !exists || !enabled {
                    warn!(
                        "extension {} has an unsatisfied hard dependency on {}, disabling it",
                        record.id, dep.id
                    );
                    ok = false;
                    disabled_any = true;
                    break;
                }
            }
            if ok {
                keep.push(record.clone());
            }
        }
        candidates = keep;
        if !disabled_any {
            break;
        }
    }

    let ids: HashSet<String> = candidates.iter().map(|r| r.id.clone()).collect();
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    let mut indegree: HashMap<String, usize> = HashMap::new();
    for record in &candidates {
        indegree.entry(record.id.clone()).or_insert(0);
        for dep in &record.dependencies {
            if !ids.contains(&dep.id) {
                continue;
            }
            edges.entry(dep.id.clone()).or_default().push(record.id.clone());
            *indegree.entry(record.id.clone()).or_insert(0) += 1;
        }
    }

    let mut ready: Vec<String> = indegree
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(id, _)| id.clone())
        .collect();
    ready.sort_by_key(|id| id.to_ascii_lowercase());

    let mut order = Vec::new();
    let mut remaining_edges = edges;
    let mut remaining_indegree = indegree;

    while !ready.is_empty() {
        ready.sort_by_key(|id| id.to_ascii_lowercase());
        let next = ready.remove(0);
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
        let cycle_members: Vec<String> = candidates
            .iter()
            .map(|r| r.id.clone())
            .filter(|id| !order.contains(id))
            .collect();
        warn!(
            "dependency cycle detected among extensions [{}], breaking by folder-name tiebreak",
            cycle_members.join(", ")
        );
        let mut leftover = cycle_members;
        leftover.sort_by_key(|id| id.to_ascii_lowercase());
        order.extend(leftover);
    }

    let by_id: HashMap<String, ExtensionRecord> = candidates.into_iter().map(|r| (r.id.clone(), r)).collect();
    order.into_iter().filter_map(|id| by_id.get(&id).cloned()).collect()
}
