//! Presence assertions for the tracked utility set
//!
//! After a suite runs, every tracked utility is checked at its canonical
//! location. What counts as correct depends on whether the suite enabled the
//! replacement set (symlinks expected) or disabled it (symlinks must be gone).
//! A replacement binary that the product never installed is only tolerated
//! when the product said so in its output.

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::common::config::{PathsConfig, ProductConfig};

/// Observed state of one tracked utility
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppletPresence {
    pub name: String,
    /// A replacement binary exists in the bin dir or a candidate dir
    pub candidate_present: bool,
    pub target: PathBuf,
    pub is_symlink: bool,
    /// Exempt from symlink checks
    pub preserved: bool,
}

/// Result of one presence assertion
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PresenceReport {
    pub expect_symlink: bool,
    pub applets: Vec<AppletPresence>,
    pub failures: Vec<String>,
}

impl PresenceReport {
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Checks tracked utilities against one installation layout
#[derive(Debug, Clone)]
pub struct PresenceVerifier {
    bin_dir: PathBuf,
    candidate_dirs: Vec<PathBuf>,
    candidate_prefix: String,
    warning_token: String,
}

impl PresenceVerifier {
    pub fn new(
        bin_dir: impl Into<PathBuf>,
        candidate_dirs: Vec<PathBuf>,
        candidate_prefix: impl Into<String>,
        warning_token: impl Into<String>,
    ) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            candidate_dirs,
            candidate_prefix: candidate_prefix.into(),
            warning_token: warning_token.into().to_lowercase(),
        }
    }

    pub fn from_config(paths: &PathsConfig, product: &ProductConfig) -> Self {
        Self::new(
            paths.bin_dir.clone(),
            product.candidate_dirs.clone(),
            product.candidate_prefix.clone(),
            product.warning_token.clone(),
        )
    }

    /// Whether a replacement binary for `name` is installed anywhere we know
    pub fn candidate_present(&self, name: &str) -> bool {
        let prefixed = self.bin_dir.join(format!("{}{}", self.candidate_prefix, name));
        if prefixed.exists() {
            return true;
        }
        self.candidate_dirs.iter().any(|d| d.join(name).exists())
    }

    /// Check every tracked name once, in sorted order.
    ///
    /// `output` is the suite's captured stdout and stderr; it is searched
    /// case-insensitively for a product warning naming a missing utility.
    /// Returns the report and whether it holds no failures.
    pub fn assert_presence(
        &self,
        tracked: &[String],
        preserved: &BTreeSet<String>,
        output: &str,
        expect_symlink: bool,
    ) -> (PresenceReport, bool) {
        let output = output.to_lowercase();
        let names: BTreeSet<&str> = tracked.iter().map(String::as_str).collect();

        let mut report = PresenceReport {
            expect_symlink,
            ..Default::default()
        };

        for name in names {
            let target = self.bin_dir.join(name);
            let is_symlink = std::fs::symlink_metadata(&target)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
            let candidate_present = self.candidate_present(name);
            let is_preserved = preserved.contains(name);

            report.applets.push(AppletPresence {
                name: name.to_string(),
                candidate_present,
                target: target.clone(),
                is_symlink,
                preserved: is_preserved,
            });

            if is_preserved {
                continue;
            }

            if expect_symlink {
                if candidate_present {
                    if !is_symlink {
                        report.failures.push(format!(
                            "expected symlink for {} at {}, but not a symlink",
                            name,
                            target.display()
                        ));
                    }
                } else if !self.warned_about(&output, name) {
                    report.failures.push(format!(
                        "missing replacement for {} without corresponding product warning in output",
                        name
                    ));
                }
            } else if candidate_present && is_symlink {
                report.failures.push(format!(
                    "expected no symlink for {} at {} after disable, but found symlink",
                    name,
                    target.display()
                ));
            }
        }

        let ok = report.ok();
        (report, ok)
    }

    fn warned_about(&self, output: &str, name: &str) -> bool {
        !self.warning_token.is_empty()
            && output.contains(&self.warning_token)
            && output.contains(&name.to_lowercase())
    }
}
