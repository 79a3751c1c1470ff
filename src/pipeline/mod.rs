//! Stage orchestration
//!
//! `preflight -> deps -> build -> run-suites -> collect`, each invocable on
//! its own, plus `all`. The first three stages are fail-fast and surface as
//! [`Error::StageFailed`]. `run-suites` never aborts on a single suite, and
//! `collect` only reports whether any suite failed.

mod checks;
mod collect;
mod script;
mod suites;

pub use script::SuiteScript;

use chrono::Utc;
use colored::Colorize;
use std::fmt;
use std::time::Instant;

use crate::common::{Error, HarnessConfig, HostInfo, ProofLayout, Result};
use crate::events::{Event, EventLogger, Level, RunIdentity};
use crate::filesystem::PresenceVerifier;
use crate::report::{any_failed, load_handoff, SuiteResult, HANDOFF_ENV};
use crate::suites::{discover, IntentClassifier, SuiteSet};

/// Component name stamped on every event record
pub const COMPONENT: &str = "container-runner";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preflight,
    Deps,
    Build,
    RunSuites,
    Collect,
    All,
}

impl Stage {
    /// Name on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Preflight => "preflight",
            Stage::Deps => "deps",
            Stage::Build => "build",
            Stage::RunSuites => "run-suites",
            Stage::Collect => "collect",
            Stage::All => "all",
        }
    }

    /// Name in event records
    pub fn label(&self) -> &'static str {
        match self {
            Stage::RunSuites => "run_suites",
            other => other.name(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-run values taken from the environment
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// `RUN_ID`, or a fresh v4 uuid
    pub run_id: String,
    /// `RUN_STARTED_AT`
    pub started_at: Option<String>,
    /// `SUITES_RESULTS_JSON`
    pub handoff_json: Option<String>,
}

impl RunContext {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |v: &String| !v.trim().is_empty();
        Self {
            run_id: lookup("RUN_ID")
                .filter(non_empty)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            started_at: lookup("RUN_STARTED_AT").filter(non_empty),
            handoff_json: lookup(HANDOFF_ENV).filter(non_empty),
        }
    }
}

/// What a stage invocation produced
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub results: Vec<SuiteResult>,
    /// At least one suite failed
    pub failed: bool,
}

impl RunOutcome {
    fn from_results(results: Vec<SuiteResult>) -> Self {
        let failed = any_failed(&results);
        Self { results, failed }
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed {
            1
        } else {
            0
        }
    }
}

/// Runs stages against one configuration and host
pub struct Pipeline {
    config: HarnessConfig,
    layout: ProofLayout,
    host: HostInfo,
    events: EventLogger,
    context: RunContext,
    presence: PresenceVerifier,
    classifier: IntentClassifier,
}

impl Pipeline {
    /// Detects the host from the configured files; nothing is written yet
    pub fn new(config: HarnessConfig, context: RunContext) -> Self {
        let host = HostInfo::detect(&config.paths);
        Self::with_host(config, context, host)
    }

    pub fn with_host(config: HarnessConfig, context: RunContext, host: HostInfo) -> Self {
        let layout = ProofLayout::new(config.paths.proof_root());
        let identity = RunIdentity {
            component: COMPONENT.to_string(),
            run_id: Some(context.run_id.clone()),
            container_id: Some(host.container_id.clone()),
            distro: Some(host.distro_id.clone()),
        };
        let events = EventLogger::new(config.paths.event_log.clone(), identity);
        let presence = PresenceVerifier::from_config(&config.paths, &config.product);
        let classifier =
            IntentClassifier::new(&config.product.command, &config.product.tracked_family);

        Self {
            config,
            layout,
            host,
            events,
            context,
            presence,
            classifier,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn layout(&self) -> &ProofLayout {
        &self.layout
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub fn events(&self) -> &EventLogger {
        &self.events
    }

    /// Discover suites under the configured tests dir, honouring the filter
    pub fn discover(&self) -> Result<SuiteSet> {
        discover(
            &self.config.paths.tests_dir(),
            &self.config.suites.filter,
            &self.host.distro_id,
        )
    }

    /// Run one stage (or all of them)
    pub async fn run(&self, stage: Stage) -> Result<RunOutcome> {
        match stage {
            Stage::Preflight => {
                self.preflight().await?;
                Ok(RunOutcome::default())
            }
            Stage::Deps => {
                self.deps().await?;
                Ok(RunOutcome::default())
            }
            Stage::Build => {
                self.build().await?;
                Ok(RunOutcome::default())
            }
            Stage::RunSuites => {
                let set = self.discover()?;
                let results = self.run_suite_set(&set).await;
                Ok(RunOutcome::from_results(results))
            }
            Stage::Collect => {
                let results = load_handoff(
                    self.context.handoff_json.as_deref(),
                    &self.layout.handoff_path(),
                );
                let failed = self.collect(&results, self.context.started_at.clone());
                Ok(RunOutcome { results, failed })
            }
            Stage::All => {
                let started_at = self
                    .context
                    .started_at
                    .clone()
                    .unwrap_or_else(|| Utc::now().to_rfc3339());
                // A bad filter must abort before anything is built or written
                let set = self.discover()?;
                self.preflight().await?;
                self.deps().await?;
                self.build().await?;
                let results = self.run_suite_set(&set).await;
                let failed = self.collect(&results, Some(started_at));
                Ok(RunOutcome { results, failed })
            }
        }
    }

    fn stage_started(&self, stage: Stage) -> Instant {
        println!("\n{} {}", "Stage:".blue().bold(), stage.name().white().bold());
        self.events.emit(Event::new(stage.label(), "stage_start"));
        Instant::now()
    }

    fn stage_done(&self, stage: Stage, started: Instant) {
        self.record_stage_done(stage, started);
        self.print_stage_done(stage);
    }

    fn record_stage_done(&self, stage: Stage, started: Instant) {
        let ms = started.elapsed().as_millis() as u64;
        self.events
            .emit(Event::new(stage.label(), "stage_done").duration_ms(ms));
    }

    fn print_stage_done(&self, stage: Stage) {
        println!("{} {} complete", "✓".green().bold(), stage.name());
    }

    /// Record a fatal stage failure and build the error that ends the run
    fn fail(&self, stage: Stage, code: i32, reason: impl Into<String>) -> Error {
        let reason = reason.into();
        tracing::error!(stage = stage.name(), code, "{}", reason);
        self.events.emit(
            Event::new(stage.label(), "stage_fail")
                .level(Level::Error)
                .rc(code)
                .message(reason.clone()),
        );
        Error::stage_failed(stage.name(), code, reason)
    }

    /// Log an I/O problem that must not change the outcome
    fn soft_failure(&self, stage: Stage, suite: Option<&str>, message: String) {
        tracing::warn!(stage = stage.name(), suite, "{}", message);
        let mut event = Event::new(stage.label(), "artifact_warn")
            .level(Level::Warn)
            .message(message);
        if let Some(suite) = suite {
            event = event.suite(suite);
        }
        self.events.emit(event);
    }
}
