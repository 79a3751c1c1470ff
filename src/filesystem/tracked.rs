//! The tracked utility set and the paths observed around each suite

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Read the tracked utility names, one per line.
///
/// Blank lines are skipped. A missing or unreadable file yields an empty
/// set so that presence checks degrade to no-ops instead of aborting a run.
pub fn load_tracked_names(file: &Path) -> Vec<String> {
    match std::fs::read_to_string(file) {
        Ok(content) => parse_tracked_names(&content),
        Err(e) => {
            tracing::warn!(file = %file.display(), error = %e, "tracked utility list unavailable");
            Vec::new()
        }
    }
}

pub fn parse_tracked_names(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Paths snapshotted before and after every suite: `bin_dir/<name>` for each
/// tracked name and each extra name, de-duplicated and sorted.
pub fn observed_paths(bin_dir: &Path, tracked: &[String], extra: &[String]) -> Vec<PathBuf> {
    tracked
        .iter()
        .chain(extra)
        .map(|name| bin_dir.join(name))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
