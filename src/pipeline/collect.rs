//! The collect stage: summary and proof bundle. Best-effort throughout.

use colored::Colorize;
use std::path::Path;

use crate::events::Event;
use crate::report::{package, write_json, RunSummary, SuiteResult};

use super::{Pipeline, Stage};

const STAGE: Stage = Stage::Collect;

impl Pipeline {
    /// Write `summary.json`, copy the audit and event logs into the proof
    /// tree and package it. Returns whether any suite failed; I/O problems
    /// are only logged. Only a packaging failure is missing from the
    /// archived event log.
    pub fn collect(&self, results: &[SuiteResult], started_at: Option<String>) -> bool {
        let started = self.stage_started(STAGE);
        if let Err(e) = self.layout.ensure() {
            self.soft_failure(
                STAGE,
                None,
                format!("cannot create proof tree at {}: {}", self.layout.root().display(), e),
            );
        }

        let summary = RunSummary::new(
            self.host.distro_id.clone(),
            self.host.container_id.clone(),
            started_at,
            results.to_vec(),
        );
        let summary_path = self.layout.summary_path();
        match write_json(&summary_path, &summary) {
            Ok(()) => {
                println!("  {} summary written to {}", "✓".green(), summary_path.display());
                self.events.emit(
                    Event::new(STAGE.label(), "summary_written")
                        .message(format!("{} suites", summary.suites.len())),
                );
            }
            Err(e) => self.soft_failure(
                STAGE,
                None,
                format!("cannot write {}: {}", summary_path.display(), e),
            ),
        }

        let failed = summary.any_failed();
        if failed {
            let failing: Vec<&str> = results
                .iter()
                .filter(|r| !r.passed())
                .map(|r| r.name.as_str())
                .collect();
            println!("  {} failing suites: {}", "✗".red(), failing.join(", "));
        }

        // The event log is archived, so the stage closes before it is copied
        let archive = self.layout.archive_path();
        self.events.emit(
            Event::new(STAGE.label(), "packaging").message(archive.display().to_string()),
        );
        self.record_stage_done(STAGE, started);

        let logs_dir = self.layout.logs_dir();
        self.copy_log(&self.config.paths.product_audit_log, &logs_dir);
        self.copy_log(self.events.path(), &logs_dir);

        match package(&self.layout) {
            Ok(path) => println!("  {} proofs packaged at {}", "📦".green(), path.display()),
            Err(e) => self.soft_failure(
                STAGE,
                None,
                format!("cannot package {}: {}", archive.display(), e),
            ),
        }

        self.print_stage_done(STAGE);
        failed
    }

    /// Copy `src` into `dest_dir` under its own file name; absent sources
    /// are skipped
    fn copy_log(&self, src: &Path, dest_dir: &Path) {
        if !src.is_file() {
            tracing::debug!(path = %src.display(), "log not present; not copied");
            return;
        }
        let Some(file_name) = src.file_name() else {
            return;
        };
        let dest = dest_dir.join(file_name);
        if let Err(e) = std::fs::copy(src, &dest) {
            self.soft_failure(
                STAGE,
                None,
                format!("cannot copy {} to {}: {}", src.display(), dest.display(), e),
            );
        }
    }
}
