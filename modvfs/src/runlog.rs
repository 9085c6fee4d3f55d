//! Persisted run state (§6 "Persisted state"): a structured text log of the
//! files a prior run emitted, keyed by output-extension path, so C10's
//! cleaner can delete files an older run wrote that the new run no longer
//! produces.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogEntry {
    pub relative_path: String,
    pub sha256: String,
    pub bytes: u64,
    pub mtime: i64,
}

/// One line per emitted file: `path\tsha256\tbytes\tmtime`.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    entries: HashMap<String, RunLogEntry>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, relative_path: impl Into<String>, bytes: &[u8], mtime: i64) {
        let relative_path = relative_path.into();
        let sha256 = hex::encode(Sha256::digest(bytes));
        self.entries.insert(
            relative_path.clone(),
            RunLogEntry {
                relative_path,
                sha256,
                bytes: bytes.len() as u64,
                mtime,
            },
        );
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let mut entries = HashMap::new();
        for line in text.lines() {
            let fields: Vec<&str> = line.splitn(4, '\t').collect();
            let [relative_path, sha256, bytes, mtime] = fields[..] else {
                continue;
            };
            let (Ok(bytes), Ok(mtime)) = (bytes.parse(), mtime.parse()) else {
                continue;
            };
            entries.insert(
                relative_path.to_string(),
                RunLogEntry {
                    relative_path: relative_path.to_string(),
                    sha256: sha256.to_string(),
                    bytes,
                    mtime,
                },
            );
        }
        Ok(Self { entries })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut text = String::new();
        let mut paths: Vec<&String> = self.entries.keys().collect();
        paths.sort();
        for path_key in paths {
            let entry = &self.entries[path_key];
            text.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                entry.relative_path, entry.sha256, entry.bytes, entry.mtime
            ));
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Paths present in `previous` but absent from `self` — stale outputs an
    /// earlier run wrote that this run no longer emits.
    pub fn stale_paths(&self, previous: &RunLog) -> Vec<String> {
        previous
            .entries
            .keys()
            .filter(|path| !self.entries.contains_key(*path))
            .cloned()
            .collect()
    }

    /// Delete every file in `stale_paths` under `output_root`, logging each
    /// removal at debug level.
    pub fn clean_stale(output_root: &Path, stale_paths: &[String]) -> Result<()> {
        for relative in stale_paths {
            let full = output_root.join(relative);
            if full.is_file() {
                std::fs::remove_file(&full)?;
                debug!(path = %full.display(), "removed stale output from a prior run");
            }
        }
        Ok(())
    }
}

pub fn log_path_for(output_root: &Path) -> PathBuf {
    output_root.join(".modframework_runlog")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new();
        log.record("libraries/jobs.xml", b"<jobs/>", 1_700_000_000);
        let path = dir.path().join("runlog.txt");
        log.write(&path).unwrap();

        let read_back = RunLog::read(&path).unwrap();
        assert_eq!(read_back.paths().count(), 1);
    }

    #[test]
    fn stale_paths_are_those_dropped_between_runs() {
        let mut previous = RunLog::new();
        previous.record("a.xml", b"1", 1);
        previous.record("b.xml", b"2", 2);

        let mut current = RunLog::new();
        current.record("a.xml", b"1", 1);

        let stale = current.stale_paths(&previous);
        assert_eq!(stale, vec!["b.xml".to_string()]);
    }

    #[test]
    fn clean_stale_removes_files_under_output_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.xml"), b"gone").unwrap();
        RunLog::clean_stale(dir.path(), &["old.xml".to_string()]).unwrap();
        assert!(!dir.path().join("old.xml").exists());
    }
}
