//! Per-suite verdicts and the run summary

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::suites::Expect;

/// Written into every summary so auditors know what the runner refrains from
pub const HARNESS_POLICY: &str =
    "No harness mutation of product-owned artifacts; fail-on-skip enforced";

/// Return code recorded for a suite skipped as incompatible
pub const INCOMPATIBLE_RC: i32 = 125;

/// Return code recorded for a suite whose descriptor could not be loaded
pub const MALFORMED_RC: i32 = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Fail,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "pass",
            Status::Fail => "fail",
        }
    }
}

/// Verdict for one suite
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuiteResult {
    pub name: String,
    pub status: Status,
    /// Wall time of the execute block; 0 when it never ran
    pub duration_ms: u64,
    pub artifacts: Vec<String>,
    pub expect: Expect,
    pub rc: i32,
    /// 0 when there was no restore block
    pub restore_rc: i32,
    /// True when presence was not evaluated
    pub presence_ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SuiteResult {
    pub fn passed(&self) -> bool {
        self.status == Status::Pass
    }
}

/// Accumulates a suite's facts as it runs; the status is only computed by
/// [`SuiteResultBuilder::finish`], once every check has reported.
#[derive(Debug, Clone)]
pub struct SuiteResultBuilder {
    name: String,
    expect: Expect,
    rc: i32,
    duration_ms: u64,
    expectation_met: bool,
    presence_ok: bool,
    restore_rc: i32,
    artifacts: Vec<String>,
    message: Option<String>,
}

impl SuiteResultBuilder {
    pub fn new(name: impl Into<String>, expect: Expect) -> Self {
        Self {
            name: name.into(),
            expect,
            rc: 0,
            duration_ms: 0,
            expectation_met: false,
            presence_ok: true,
            restore_rc: 0,
            artifacts: Vec::new(),
            message: None,
        }
    }

    pub fn artifact(&mut self, path: &Path) -> &mut Self {
        self.artifacts.push(path.display().to_string());
        self
    }

    /// Execute block finished with `rc`
    pub fn executed(&mut self, rc: i32, duration_ms: u64) -> &mut Self {
        self.rc = rc;
        self.duration_ms = duration_ms;
        self.expectation_met = self.expect.is_met_by(rc);
        self
    }

    /// The suite never ran because the current distro is not allowed
    pub fn incompatible(&mut self, message: impl Into<String>) -> &mut Self {
        self.rc = INCOMPATIBLE_RC;
        self.expectation_met = false;
        self.message = Some(message.into());
        self
    }

    /// The descriptor could not be loaded
    pub fn malformed(&mut self, message: impl Into<String>) -> &mut Self {
        self.rc = MALFORMED_RC;
        self.expectation_met = false;
        self.message = Some(message.into());
        self
    }

    pub fn presence(&mut self, ok: bool) -> &mut Self {
        self.presence_ok = ok;
        self
    }

    pub fn restored(&mut self, rc: i32) -> &mut Self {
        self.restore_rc = rc;
        self
    }

    pub fn message(&mut self, message: impl Into<String>) -> &mut Self {
        self.message = Some(message.into());
        self
    }

    pub fn finish(self) -> SuiteResult {
        let status = if self.expectation_met && self.presence_ok && self.restore_rc == 0 {
            Status::Pass
        } else {
            Status::Fail
        };
        SuiteResult {
            name: self.name,
            status,
            duration_ms: self.duration_ms,
            artifacts: self.artifacts,
            expect: self.expect,
            rc: self.rc,
            restore_rc: self.restore_rc,
            presence_ok: self.presence_ok,
            message: self.message,
        }
    }
}

pub fn any_failed(results: &[SuiteResult]) -> bool {
    results.iter().any(|r| !r.passed())
}

/// Top-level `summary.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub distro: String,
    pub suites: Vec<SuiteResult>,
    pub started_at: Option<String>,
    pub finished_at: String,
    pub container_id: String,
    pub harness_policy: String,
}

impl RunSummary {
    /// Summary finishing now
    pub fn new(
        distro: impl Into<String>,
        container_id: impl Into<String>,
        started_at: Option<String>,
        suites: Vec<SuiteResult>,
    ) -> Self {
        Self {
            distro: distro.into(),
            suites,
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            container_id: container_id.into(),
            harness_policy: HARNESS_POLICY.to_string(),
        }
    }

    pub fn any_failed(&self) -> bool {
        any_failed(&self.suites)
    }
}

/// Environment variable carrying serialized results into `collect`
pub const HANDOFF_ENV: &str = "SUITES_RESULTS_JSON";

/// Persist results for a later, separately invoked `collect`
pub fn persist_results(results: &[SuiteResult], path: &Path) -> io::Result<()> {
    write_json(path, &results)
}

/// Recover results handed over by `run-suites`.
///
/// `env_json` (the value of [`HANDOFF_ENV`]) wins when it parses to a
/// non-empty list; otherwise the persisted file is read. Anything unreadable
/// yields an empty list.
pub fn load_handoff(env_json: Option<&str>, path: &Path) -> Vec<SuiteResult> {
    if let Some(raw) = env_json.filter(|s| !s.trim().is_empty()) {
        match serde_json::from_str::<Vec<SuiteResult>>(raw) {
            Ok(results) if !results.is_empty() => return results,
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "ignoring unparsable {}", HANDOFF_ENV),
        }
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "cannot read suite handoff");
            }
            return Vec::new();
        }
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "ignoring malformed suite handoff");
        Vec::new()
    })
}

/// Write any serializable value as pretty JSON, creating parent directories
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)
}

/// Paths of the per-script log pair for `kind` (`execute` or `restore`)
pub fn script_log_paths(logs_dir: &Path, kind: &str) -> (PathBuf, PathBuf) {
    (
        logs_dir.join(format!("{}.stdout.log", kind)),
        logs_dir.join(format!("{}.stderr.log", kind)),
    )
}
