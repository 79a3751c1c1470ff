//! The run-suites stage

use colored::Colorize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::common::DescriptorError;
use crate::events::{Event, Level};
use crate::exec::{self, ExecOptions, ExecutionResult};
use crate::filesystem::{load_tracked_names, observed_paths, snapshot, write_snapshot};
use crate::report::{
    persist_results, script_log_paths, write_json, SuiteResult, SuiteResultBuilder,
};
use crate::suites::{MalformedSuite, Suite, SuiteEntry, SuiteSet};

use super::script::SuiteScript;
use super::{Pipeline, Stage};

const STAGE: Stage = Stage::RunSuites;

/// Inputs shared by every suite of one run
struct SuitePlan {
    tracked: Vec<String>,
    preserved: BTreeSet<String>,
    observed: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptKind {
    Execute,
    Restore,
}

impl ScriptKind {
    fn name(&self) -> &'static str {
        match self {
            ScriptKind::Execute => "execute",
            ScriptKind::Restore => "restore",
        }
    }

    /// Event stage label and start/done event names
    fn events(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            ScriptKind::Execute => (STAGE.label(), "exec_start", "exec_done"),
            ScriptKind::Restore => ("restore", "restore_start", "restore_done"),
        }
    }
}

impl Pipeline {
    /// Run every suite in order and persist the results for `collect`.
    ///
    /// A failing suite never stops the ones after it.
    pub async fn run_suite_set(&self, set: &SuiteSet) -> Vec<SuiteResult> {
        let started = self.stage_started(STAGE);
        if let Err(e) = self.layout.ensure() {
            self.soft_failure(
                STAGE,
                None,
                format!("cannot create proof tree at {}: {}", self.layout.root().display(), e),
            );
        }

        if set.is_empty() {
            println!("  no suites discovered under {}", self.config.paths.tests_dir().display());
        }

        let plan = self.plan();
        let total = set.len();
        let mut results = Vec::with_capacity(total);

        for (idx, entry) in set.entries.iter().enumerate() {
            println!(
                "\n{} [{}/{}] {}",
                "Running suite:".blue().bold(),
                idx + 1,
                total,
                entry.name().white().bold()
            );

            let (result, owns_dirs) = match entry {
                SuiteEntry::Ready(suite) => (self.run_suite(suite, &plan).await, true),
                SuiteEntry::Malformed(malformed) => (
                    self.record_malformed(malformed),
                    !matches!(malformed.error, DescriptorError::DuplicateName { .. }),
                ),
            };
            // A duplicate name must not overwrite the first suite's result.json
            if owns_dirs {
                self.write_result(&result);
            }
            self.finish_suite(&result);
            results.push(result);
        }

        let handoff = self.layout.handoff_path();
        if let Err(e) = persist_results(&results, &handoff) {
            self.soft_failure(
                STAGE,
                None,
                format!("cannot persist suite results to {}: {}", handoff.display(), e),
            );
        }

        self.stage_done(STAGE, started);
        results
    }

    fn plan(&self) -> SuitePlan {
        let tracked = load_tracked_names(&self.config.paths.tracked_names_file());
        let observed = observed_paths(
            &self.config.paths.bin_dir,
            &tracked,
            &self.config.product.extra_observed,
        );
        tracing::debug!(
            tracked = tracked.len(),
            observed = observed.len(),
            "suite plan ready"
        );
        SuitePlan {
            preserved: self.config.product.preserved.iter().cloned().collect(),
            tracked,
            observed,
        }
    }

    async fn run_suite(&self, suite: &Suite, plan: &SuitePlan) -> SuiteResult {
        let name = suite.name.as_str();
        if let Err(e) = self.layout.ensure_suite(name) {
            self.soft_failure(STAGE, Some(name), format!("cannot create suite directories: {}", e));
        }
        let logs_dir = self.layout.suite_logs_dir(name);
        let snapshots_dir = self.layout.suite_snapshots_dir(name);

        let mut result = SuiteResultBuilder::new(name, suite.expect);

        let before = snapshots_dir.join("before.json");
        self.take_snapshot(name, &plan.observed, &before);
        result.artifact(&before);

        let mut start = Event::new(STAGE.label(), "suite_start").suite(name);
        if !suite.summary.is_empty() {
            start = start.message(suite.summary.clone());
        }
        self.events.emit(start);

        if !suite.compatible {
            let message = format!(
                "suite {} incompatible with distro {} (allowed: {})",
                name,
                self.host.distro_id,
                suite.distro_check.join(", ")
            );
            println!("  {} {}", "✗".red(), message);
            self.events.emit(
                Event::new(STAGE.label(), "suite_incompatible")
                    .suite(name)
                    .level(Level::Error)
                    .message(message.clone()),
            );
            let (_, stderr_log) = script_log_paths(&logs_dir, ScriptKind::Execute.name());
            self.write_log(name, &stderr_log, &format!("{}\n", message));
            result.artifact(&stderr_log);
            result.incompatible(message);

            let after = snapshots_dir.join("after.json");
            self.take_snapshot(name, &plan.observed, &after);
            result.artifact(&after);
            return result.finish();
        }

        let executed = self
            .run_script(name, &suite.execute, ScriptKind::Execute, &logs_dir, &mut result)
            .await;
        result.executed(executed.rc, executed.elapsed_ms);
        if executed.timed_out {
            result.message(format!(
                "execute timed out after {}s",
                self.config.timeouts.suite_secs
            ));
        }

        let after = snapshots_dir.join("after.json");
        self.take_snapshot(name, &plan.observed, &after);
        result.artifact(&after);

        let intent = self.classifier.classify(suite);
        if intent.touches_tracked {
            if intent.is_ambiguous() {
                tracing::debug!(suite = name, "no enable/disable verb found; checking as disable");
            }
            let (report, ok) = self.presence.assert_presence(
                &plan.tracked,
                &plan.preserved,
                &executed.combined_output(),
                intent.expect_symlink(),
            );
            for failure in &report.failures {
                println!("  {} {}", "✗".red(), failure);
                self.events.emit(
                    Event::new(STAGE.label(), "assert_fail")
                        .suite(name)
                        .level(Level::Error)
                        .message(failure.clone()),
                );
            }
            if ok {
                self.events.emit(
                    Event::new(STAGE.label(), "assert_pass")
                        .suite(name)
                        .message(format!("{} tracked names checked", report.applets.len())),
                );
            }

            let presence_path = self.layout.suite_results_dir(name).join("presence.json");
            if let Err(e) = write_json(&presence_path, &report) {
                self.soft_failure(
                    STAGE,
                    Some(name),
                    format!("cannot write {}: {}", presence_path.display(), e),
                );
            }
            result.artifact(&presence_path);
            result.presence(ok);
        }

        if let Some(restore) = &suite.restore {
            let res = self
                .run_script(name, restore, ScriptKind::Restore, &logs_dir, &mut result)
                .await;
            if !res.success() {
                println!("  {} restore exited with rc={}", "✗".red(), res.rc);
            }
            result.restored(res.rc);
        }

        result.finish()
    }

    /// Materialize and run one script body, writing its logs as artifacts
    async fn run_script(
        &self,
        suite: &str,
        body: &str,
        kind: ScriptKind,
        logs_dir: &Path,
        result: &mut SuiteResultBuilder,
    ) -> ExecutionResult {
        let (stage_label, start_event, done_event) = kind.events();
        self.events
            .emit(Event::new(stage_label, start_event).suite(suite));

        let script = SuiteScript::in_logs_dir(&self.config.product.command, &self.layout.logs_dir());
        let res = match script.materialize(body) {
            Ok(file) => {
                let argv = vec!["bash".to_string(), file.path().display().to_string()];
                let res = exec::run(argv, &self.script_options()).await;
                drop(file);
                res
            }
            Err(e) => ExecutionResult::not_started(
                vec!["bash".to_string()],
                format!("cannot write {} script: {}", kind.name(), e),
            ),
        };

        let (stdout_log, stderr_log) = script_log_paths(logs_dir, kind.name());
        self.write_log(suite, &stdout_log, &res.stdout);
        self.write_log(suite, &stderr_log, &res.stderr);
        result.artifact(&stdout_log).artifact(&stderr_log);

        let level = if res.success() { Level::Info } else { Level::Warn };
        self.events.emit(
            Event::command(stage_label, done_event, &res)
                .suite(suite)
                .level(level),
        );
        res
    }

    fn script_options(&self) -> ExecOptions {
        let mut opts = ExecOptions::default()
            .in_dir(&self.config.paths.project_dir)
            .with_timeout(self.config.timeouts.suite());
        if let Some(locale) = &self.config.suites.script_locale {
            for key in ["LANG", "LC_ALL", "LANGUAGE"] {
                opts = opts.with_env(key, locale.clone());
            }
        }
        opts
    }

    fn record_malformed(&self, malformed: &MalformedSuite) -> SuiteResult {
        let message = format!("malformed descriptor {}: {}", malformed.path.display(), malformed.error);
        println!("  {} {}", "✗".red(), message);
        self.events.emit(
            Event::new(STAGE.label(), "suite_malformed")
                .suite(malformed.name.clone())
                .level(Level::Error)
                .message(message.clone()),
        );
        let mut result = SuiteResultBuilder::new(malformed.name.clone(), Default::default());
        result.malformed(message);
        result.finish()
    }

    fn write_result(&self, result: &SuiteResult) {
        let path = self.layout.suite_results_dir(&result.name).join("result.json");
        if let Err(e) = write_json(&path, result) {
            self.soft_failure(
                STAGE,
                Some(&result.name),
                format!("cannot write {}: {}", path.display(), e),
            );
        }
    }

    /// Log and print a finished verdict
    fn finish_suite(&self, result: &SuiteResult) {
        let level = if result.passed() { Level::Info } else { Level::Error };
        let mut event = Event::new(STAGE.label(), "suite_result")
            .suite(result.name.clone())
            .rc(result.rc)
            .duration_ms(result.duration_ms)
            .level(level)
            .message(result.status.as_str());
        if let Some(message) = &result.message {
            event = event.message(format!("{}: {}", result.status.as_str(), message));
        }
        self.events.emit(event);

        if result.passed() {
            println!("  {} {}", "✓".green().bold(), "PASS".green().bold());
        } else {
            println!(
                "  {} {} (rc={}, restore_rc={}, presence_ok={})",
                "✗".red().bold(),
                "FAIL".red().bold(),
                result.rc,
                result.restore_rc,
                result.presence_ok
            );
        }
    }

    fn take_snapshot(&self, suite: &str, paths: &[PathBuf], out: &Path) {
        if let Err(e) = write_snapshot(&snapshot(paths), out) {
            self.soft_failure(
                STAGE,
                Some(suite),
                format!("cannot write snapshot {}: {}", out.display(), e),
            );
        }
    }

    fn write_log(&self, suite: &str, path: &Path, content: &str) {
        let written = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(path, content));
        if let Err(e) = written {
            self.soft_failure(
                STAGE,
                Some(suite),
                format!("cannot write {}: {}", path.display(), e),
            );
        }
    }
}
