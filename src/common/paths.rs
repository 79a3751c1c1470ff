//! Configuration and proof-tree paths
//!
//! The proof tree is everything a run leaves behind for later audit:
//!
//! ```text
//! <proof_root>/
//!   logs/        per-suite script logs, product logs, copied event/audit logs
//!   snapshots/   <suite>/before.json, <suite>/after.json
//!   results/     <suite>/result.json, <suite>/presence.json, build_meta.json
//!   tmp/         suites_results.json (run-suites -> collect handoff)
//!   summary.json
//!   proofs.tar.gz
//! ```

use std::io;
use std::path::{Path, PathBuf};

/// Name used for the configuration directory
const APP_NAME: &str = "container-runner";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Layout of the proof tree under one root
#[derive(Debug, Clone)]
pub struct ProofLayout {
    root: PathBuf,
}

impl ProofLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join("summary.json")
    }

    pub fn archive_path(&self) -> PathBuf {
        self.root.join("proofs.tar.gz")
    }

    /// Persisted handoff between `run-suites` and `collect`
    pub fn handoff_path(&self) -> PathBuf {
        self.tmp_dir().join("suites_results.json")
    }

    pub fn suite_logs_dir(&self, suite: &str) -> PathBuf {
        self.logs_dir().join(suite)
    }

    pub fn suite_snapshots_dir(&self, suite: &str) -> PathBuf {
        self.snapshots_dir().join(suite)
    }

    pub fn suite_results_dir(&self, suite: &str) -> PathBuf {
        self.results_dir().join(suite)
    }

    /// Create every top-level directory of the tree
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            self.root.clone(),
            self.logs_dir(),
            self.snapshots_dir(),
            self.results_dir(),
            self.tmp_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Create the per-suite directories
    pub fn ensure_suite(&self, suite: &str) -> io::Result<()> {
        std::fs::create_dir_all(self.suite_logs_dir(suite))?;
        std::fs::create_dir_all(self.suite_snapshots_dir(suite))?;
        std::fs::create_dir_all(self.suite_results_dir(suite))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_layout_creates_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = ProofLayout::new(tmp.path().join(".proof"));
        layout.ensure().unwrap();
        layout.ensure_suite("enable-all").unwrap();

        assert!(layout.logs_dir().is_dir());
        assert!(layout.tmp_dir().is_dir());
        assert!(layout.suite_snapshots_dir("enable-all").is_dir());
        assert_eq!(
            layout.handoff_path(),
            tmp.path().join(".proof/tmp/suites_results.json")
        );
    }
}
