//! Append-only JSONL event log shared by every stage.
//!
//! One complete JSON object per line, written in call order and never
//! rewritten. The file has exactly one writer: the running pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::exec::ExecutionResult;

/// Severity of an event record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// One line of the event log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub ts: String,
    pub component: String,
    pub run_id: Option<String>,
    pub container_id: Option<String>,
    pub distro: Option<String>,
    pub level: Level,
    pub stage: String,
    pub suite: Option<String>,
    pub event: Option<String>,
    pub cmd: Option<String>,
    pub rc: Option<i32>,
    pub duration_ms: Option<u64>,
    /// Only present when the caller supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Process-wide identifiers stamped onto every record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub component: String,
    pub run_id: Option<String>,
    pub container_id: Option<String>,
    pub distro: Option<String>,
}

/// An event under construction
#[derive(Debug, Clone)]
pub struct Event {
    stage: String,
    event: String,
    level: Level,
    suite: Option<String>,
    cmd: Option<String>,
    rc: Option<i32>,
    duration_ms: Option<u64>,
    message: Option<String>,
}

impl Event {
    pub fn new(stage: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            event: event.into(),
            level: Level::Info,
            suite: None,
            cmd: None,
            rc: None,
            duration_ms: None,
            message: None,
        }
    }

    /// A `cmd_exec`-style event carrying the command, its rc and duration
    pub fn command(stage: impl Into<String>, event: impl Into<String>, res: &ExecutionResult) -> Self {
        Self::new(stage, event)
            .cmd(res.display.clone())
            .rc(res.rc)
            .duration_ms(res.elapsed_ms)
    }

    pub fn suite(mut self, suite: impl Into<String>) -> Self {
        self.suite = Some(suite.into());
        self
    }

    pub fn cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = Some(cmd.into());
        self
    }

    pub fn rc(mut self, rc: i32) -> Self {
        self.rc = Some(rc);
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Writer for the event log
#[derive(Debug, Clone)]
pub struct EventLogger {
    path: PathBuf,
    identity: RunIdentity,
}

impl EventLogger {
    /// The file is created lazily on the first event
    pub fn new(path: impl Into<PathBuf>, identity: RunIdentity) -> Self {
        Self {
            path: path.into(),
            identity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Stamp and append one record.
    ///
    /// Write failures are reported through tracing and otherwise ignored; a
    /// broken audit sink must not change suite verdicts.
    pub fn emit(&self, event: Event) {
        let record = self.stamp(event);
        if let Err(e) = self.append(&record) {
            tracing::warn!(
                path = %self.path.display(),
                event = record.event.as_deref().unwrap_or(""),
                error = %e,
                "failed to append event record"
            );
        }
    }

    fn stamp(&self, event: Event) -> EventRecord {
        EventRecord {
            ts: Utc::now().to_rfc3339(),
            component: self.identity.component.clone(),
            run_id: self.identity.run_id.clone(),
            container_id: self.identity.container_id.clone(),
            distro: self.identity.distro.clone(),
            level: event.level,
            stage: event.stage,
            suite: event.suite,
            event: Some(event.event),
            cmd: event.cmd,
            rc: event.rc,
            duration_ms: event.duration_ms,
            message: event.message,
        }
    }

    fn append(&self, record: &EventRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> RunIdentity {
        RunIdentity {
            component: "runner".to_string(),
            run_id: Some("run-1".to_string()),
            container_id: Some("abc123def456".to_string()),
            distro: Some("arch".to_string()),
        }
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_records_append_in_call_order() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(tmp.path().join("log/runner.jsonl"), identity());

        logger.emit(Event::new("preflight", "stage_start"));
        logger.emit(
            Event::new("run_suites", "exec_done")
                .suite("enable-all")
                .rc(0)
                .duration_ms(12),
        );

        let lines = read_lines(logger.path());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "stage_start");
        assert_eq!(lines[1]["suite"], "enable-all");
        assert_eq!(lines[1]["rc"], 0);
        assert_eq!(lines[1]["run_id"], "run-1");
        assert_eq!(lines[1]["distro"], "arch");
        assert_eq!(lines[1]["level"], "info");
    }

    #[test]
    fn test_message_key_only_when_provided() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(tmp.path().join("runner.jsonl"), identity());

        logger.emit(Event::new("deps", "verify_pkg"));
        logger.emit(Event::new("deps", "verify_pkg").message("git"));

        let lines = read_lines(logger.path());
        let first = lines[0].as_object().unwrap();
        assert!(!first.contains_key("message"));
        // Unset optional fields are still present, as null
        assert!(first["cmd"].is_null());
        assert!(first["suite"].is_null());
        assert_eq!(lines[1]["message"], "git");
    }

    #[test]
    fn test_records_parse_back() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(tmp.path().join("runner.jsonl"), identity());
        logger.emit(
            Event::new("run_suites", "assert_fail")
                .level(Level::Error)
                .message("expected symlink"),
        );

        let content = std::fs::read_to_string(logger.path()).unwrap();
        let record: EventRecord = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(record.level, Level::Error);
        assert_eq!(record.component, "runner");
        assert_eq!(record.message.as_deref(), Some("expected symlink"));
    }

    #[test]
    fn test_unwritable_sink_does_not_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        let logger = EventLogger::new(blocker.join("runner.jsonl"), identity());
        logger.emit(Event::new("collect", "stage_start"));
    }
}
