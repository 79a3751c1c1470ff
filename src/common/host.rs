//! Facts about the environment the runner executes in

use std::collections::BTreeMap;
use std::path::Path;

use super::config::PathsConfig;

/// Placeholder for identifiers that could not be determined
pub const UNKNOWN: &str = "unknown";

/// Parsed `os-release`-style environment descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    fields: BTreeMap<String, String>,
}

impl OsRelease {
    /// Read and parse the descriptor. Unreadable files yield an empty set.
    pub fn read(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "environment descriptor unreadable");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Self {
        let fields = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| {
                (
                    k.trim().to_string(),
                    v.trim().trim_matches('"').trim_matches('\'').to_string(),
                )
            })
            .collect();
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Lower-cased distro identifier, `unknown` when absent
    pub fn distro_id(&self) -> String {
        self.get("ID")
            .filter(|id| !id.is_empty())
            .map(str::to_lowercase)
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}

/// Identity of the host, fixed for the lifetime of a run
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub os_release: OsRelease,
    pub distro_id: String,
    pub container_id: String,
}

impl HostInfo {
    pub fn detect(paths: &PathsConfig) -> Self {
        let os_release = OsRelease::read(&paths.os_release);
        let distro_id = os_release.distro_id();
        let container_id = container_id(&paths.hostname_file, &paths.cgroup_file);
        Self {
            os_release,
            distro_id,
            container_id,
        }
    }
}

/// Container identifier: the hostname (docker sets it to the short id),
/// else the first hex-looking cgroup path segment, else `unknown`
pub fn container_id(hostname_file: &Path, cgroup_file: &Path) -> String {
    if let Ok(hostname) = std::fs::read_to_string(hostname_file) {
        let hostname = hostname.trim();
        if !hostname.is_empty() {
            return hostname.to_string();
        }
    }

    if let Ok(cgroup) = std::fs::read_to_string(cgroup_file) {
        let token = cgroup
            .lines()
            .flat_map(|line| line.trim().split('/'))
            .find(|tok| tok.len() >= 12 && tok.chars().all(|c| c.is_ascii_hexdigit()));
        if let Some(token) = token {
            return token[..12].to_lowercase();
        }
    }

    UNKNOWN.to_string()
}
