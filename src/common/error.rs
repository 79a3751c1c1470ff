//! Error types for the container runner
//!
//! Hard failures travel as `Err(Error)` and end the run. Soft failures
//! (artifact I/O, event log writes) are logged where they happen and never
//! reach this type.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the container runner
#[derive(Error, Debug)]
pub enum Error {
    // === Discovery Errors ===
    #[error("test filter '{filter}' did not match any discovered suites")]
    NoSuitesMatched { filter: String },

    #[error("Failed to walk suite directory '{path}': {error}")]
    SuiteWalk { path: String, error: String },

    // === Stage Errors ===
    #[error("{stage} failed (rc={code}): {reason}")]
    StageFailed {
        stage: String,
        code: i32,
        reason: String,
    },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },
}

impl Error {
    /// Create a stage failure carrying the originating return code
    pub fn stage_failed(stage: &str, code: i32, reason: impl Into<String>) -> Self {
        Self::StageFailed {
            stage: stage.to_string(),
            code,
            reason: reason.into(),
        }
    }

    /// Process exit code for this error. Never zero.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::StageFailed { code, .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

/// A descriptor that could not be turned into a suite.
///
/// Only the owning suite is affected; discovery carries on with the rest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("failed to read descriptor: {0}")]
    Read(String),

    #[error("invalid descriptor document: {0}")]
    Parse(String),

    #[error("unknown expect value '{0}' (expected pass, fail or xfail)")]
    UnknownExpect(String),

    #[error("suite name already used by {first}")]
    DuplicateName { first: String },
}
