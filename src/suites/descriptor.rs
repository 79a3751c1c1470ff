//! Suite descriptor types
//!
//! Defines the data structures for deserializing `task.yaml` documents and
//! the typed [`Suite`] built from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::common::DescriptorError;

/// File name of a suite descriptor
pub const DESCRIPTOR_FILE: &str = "task.yaml";

/// Raw descriptor document. Every field is optional.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct SuiteDescriptor {
    /// Human summary of what the suite checks
    pub summary: Option<String>,
    /// Script body run as the suite
    pub execute: Option<String>,
    /// Script body run afterwards to undo the suite's changes
    pub restore: Option<String>,
    /// Distros the suite supports; empty means all of them
    #[serde(rename = "distro-check")]
    pub distro_check: Option<Vec<String>>,
    /// Expected outcome of the execute block: pass (default), fail or xfail
    pub expect: Option<String>,
}

impl SuiteDescriptor {
    /// Parse a descriptor. Empty and null documents are an empty descriptor.
    pub fn parse(content: &str) -> Result<Self, DescriptorError> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| DescriptorError::Parse(e.to_string()))?;
        match value {
            serde_yaml::Value::Null => Ok(Self::default()),
            serde_yaml::Value::Mapping(_) => {
                serde_yaml::from_value(value).map_err(|e| DescriptorError::Parse(e.to_string()))
            }
            _ => Err(DescriptorError::Parse(
                "top level must be a mapping".to_string(),
            )),
        }
    }
}

/// Expected outcome of a suite's execute block
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Expect {
    #[default]
    Pass,
    Fail,
    Xfail,
}

impl Expect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Expect::Pass => "pass",
            Expect::Fail => "fail",
            Expect::Xfail => "xfail",
        }
    }

    /// Whether a non-zero execute rc is the desired outcome
    pub fn expects_failure(&self) -> bool {
        matches!(self, Expect::Fail | Expect::Xfail)
    }

    /// Whether an execute return code satisfies this expectation
    pub fn is_met_by(&self, rc: i32) -> bool {
        if self.expects_failure() {
            rc != 0
        } else {
            rc == 0
        }
    }
}

impl FromStr for Expect {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "pass" => Ok(Expect::Pass),
            "fail" => Ok(Expect::Fail),
            "xfail" => Ok(Expect::Xfail),
            _ => Err(DescriptorError::UnknownExpect(s.to_string())),
        }
    }
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded suite. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    /// Name of the directory holding the descriptor
    pub name: String,
    pub path: PathBuf,
    pub summary: String,
    pub execute: String,
    pub restore: Option<String>,
    /// Lower-cased distro identifiers
    pub distro_check: Vec<String>,
    pub expect: Expect,
    /// Whether the suite may run on the current distro
    pub compatible: bool,
}

impl Suite {
    /// Read and parse the descriptor at `path`
    pub fn load(path: &Path, distro_id: &str) -> Result<Self, DescriptorError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DescriptorError::Read(e.to_string()))?;
        Self::from_descriptor(path, &content, distro_id)
    }

    pub fn from_descriptor(
        path: &Path,
        content: &str,
        distro_id: &str,
    ) -> Result<Self, DescriptorError> {
        let descriptor = SuiteDescriptor::parse(content)?;

        let expect = match &descriptor.expect {
            Some(raw) => raw.parse()?,
            None => Expect::Pass,
        };
        let distro_check: Vec<String> = descriptor
            .distro_check
            .unwrap_or_default()
            .iter()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        let compatible = is_compatible(&distro_check, distro_id);

        Ok(Self {
            name: suite_name(path),
            path: path.to_path_buf(),
            summary: descriptor.summary.unwrap_or_default(),
            execute: descriptor.execute.unwrap_or_default(),
            restore: descriptor.restore.filter(|r| !r.trim().is_empty()),
            distro_check,
            expect,
            compatible,
        })
    }
}

/// Empty list means universally compatible
pub fn is_compatible(distro_check: &[String], distro_id: &str) -> bool {
    distro_check.is_empty() || distro_check.iter().any(|d| d.eq_ignore_ascii_case(distro_id))
}

/// Suite name: the descriptor's containing directory
pub fn suite_name(descriptor_path: &Path) -> String {
    descriptor_path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
