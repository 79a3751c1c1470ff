//! Container Runner - in-container harness for a system-utility replacement tool
//!
//! This library discovers declarative test suites, runs them against the
//! product inside a disposable container, verifies the filesystem state the
//! product leaves behind, and packages everything into an auditable proof
//! bundle.

pub mod commands;
pub mod common;
pub mod events;
pub mod exec;
pub mod filesystem;
pub mod pipeline;
pub mod report;
pub mod suites;

// Re-export commonly used types for tests
pub use common::{Error, HarnessConfig, Result};
pub use pipeline::{Pipeline, RunContext, RunOutcome, Stage};
pub use report::{RunSummary, Status, SuiteResult};
