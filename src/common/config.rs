//! Configuration file handling
//!
//! Every field has a default matching the stock container layout, so an
//! absent or empty file is a valid configuration. A handful of environment
//! variables override the file after it is loaded.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct HarnessConfig {
    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// The product under test and the utility family it replaces
    #[serde(default)]
    pub product: ProductConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Preflight stage settings
    #[serde(default)]
    pub preflight: PreflightConfig,

    /// Dependency verification settings
    #[serde(default)]
    pub deps: DepsConfig,

    /// Build stage settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Suite execution settings
    #[serde(default)]
    pub suites: SuitesConfig,
}

/// Filesystem locations.
///
/// Unset project-relative entries resolve against `project_dir`.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,

    /// Root searched for suite descriptors (default `<project>/tests`)
    pub tests_dir: Option<PathBuf>,

    /// Root of the proof tree (default `<project>/.proof`)
    pub proof_root: Option<PathBuf>,

    /// Tracked-name list (default `<project>/tests/lib/rust-coreutils-bins.txt`)
    pub tracked_names_file: Option<PathBuf>,

    #[serde(default = "default_event_log")]
    pub event_log: PathBuf,

    /// Environment descriptor carrying the distro `ID=`
    #[serde(default = "default_os_release")]
    pub os_release: PathBuf,

    #[serde(default = "default_hostname_file")]
    pub hostname_file: PathBuf,

    #[serde(default = "default_cgroup_file")]
    pub cgroup_file: PathBuf,

    /// Audit log written by the product itself
    #[serde(default = "default_product_audit_log")]
    pub product_audit_log: PathBuf,

    /// Directory holding the standard binaries the product replaces
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            tests_dir: None,
            proof_root: None,
            tracked_names_file: None,
            event_log: default_event_log(),
            os_release: default_os_release(),
            hostname_file: default_hostname_file(),
            cgroup_file: default_cgroup_file(),
            product_audit_log: default_product_audit_log(),
            bin_dir: default_bin_dir(),
        }
    }
}

impl PathsConfig {
    pub fn tests_dir(&self) -> PathBuf {
        self.tests_dir
            .clone()
            .unwrap_or_else(|| self.project_dir.join("tests"))
    }

    pub fn proof_root(&self) -> PathBuf {
        self.proof_root
            .clone()
            .unwrap_or_else(|| self.project_dir.join(".proof"))
    }

    pub fn tracked_names_file(&self) -> PathBuf {
        self.tracked_names_file.clone().unwrap_or_else(|| {
            self.project_dir
                .join("tests")
                .join("lib")
                .join("rust-coreutils-bins.txt")
        })
    }
}

fn default_project_dir() -> PathBuf {
    PathBuf::from("/workspace")
}
fn default_event_log() -> PathBuf {
    PathBuf::from("/var/log/runner.jsonl")
}
fn default_os_release() -> PathBuf {
    PathBuf::from("/etc/os-release")
}
fn default_hostname_file() -> PathBuf {
    PathBuf::from("/etc/hostname")
}
fn default_cgroup_file() -> PathBuf {
    PathBuf::from("/proc/self/cgroup")
}
fn default_product_audit_log() -> PathBuf {
    PathBuf::from("/var/log/oxidizr-arch-audit.log")
}
fn default_bin_dir() -> PathBuf {
    PathBuf::from("/usr/bin")
}

/// The product under test
#[derive(Debug, Deserialize, Clone)]
pub struct ProductConfig {
    /// Command name the product is invoked by inside suite scripts
    #[serde(default = "default_product_command")]
    pub command: String,

    /// Token naming the tracked utility family in suite scripts
    #[serde(default = "default_tracked_family")]
    pub tracked_family: String,

    /// Directories where alternative implementations get installed
    #[serde(default = "default_candidate_dirs")]
    pub candidate_dirs: Vec<PathBuf>,

    /// Prefix of the alternative binary inside `bin_dir` (e.g. `uu-ls`)
    #[serde(default = "default_candidate_prefix")]
    pub candidate_prefix: String,

    /// Names the product is configured never to touch
    #[serde(default = "default_preserved")]
    pub preserved: Vec<String>,

    /// Additional names snapshotted for context
    #[serde(default = "default_extra_observed")]
    pub extra_observed: Vec<String>,

    /// Token the product emits when it cannot act on a name
    #[serde(default = "default_warning_token")]
    pub warning_token: String,
}

impl Default for ProductConfig {
    fn default() -> Self {
        Self {
            command: default_product_command(),
            tracked_family: default_tracked_family(),
            candidate_dirs: default_candidate_dirs(),
            candidate_prefix: default_candidate_prefix(),
            preserved: default_preserved(),
            extra_observed: default_extra_observed(),
            warning_token: default_warning_token(),
        }
    }
}

fn default_product_command() -> String {
    "oxidizr-arch".to_string()
}
fn default_tracked_family() -> String {
    "coreutils".to_string()
}
fn default_candidate_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/lib/uutils/coreutils"),
        PathBuf::from("/usr/lib/cargo/bin/coreutils"),
        PathBuf::from("/usr/lib/cargo/bin"),
    ]
}
fn default_candidate_prefix() -> String {
    "uu-".to_string()
}
fn default_preserved() -> Vec<String> {
    [
        "b2sum",
        "md5sum",
        "sha1sum",
        "sha224sum",
        "sha256sum",
        "sha384sum",
        "sha512sum",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_extra_observed() -> Vec<String> {
    vec!["sudo".to_string(), "find".to_string(), "xargs".to_string()]
}
fn default_warning_token() -> String {
    "warn".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Per-script timeout for execute and restore blocks
    #[serde(default = "default_suite")]
    pub suite_secs: u64,

    /// Version and provenance probes
    #[serde(default = "default_probe")]
    pub probe_secs: u64,

    /// Preflight build check
    #[serde(default = "default_check")]
    pub check_secs: u64,

    /// One package query during deps
    #[serde(default = "default_package_query")]
    pub package_query_secs: u64,

    /// Toolchain selection
    #[serde(default = "default_toolchain")]
    pub toolchain_secs: u64,

    /// Product build
    #[serde(default = "default_build")]
    pub build_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            suite_secs: default_suite(),
            probe_secs: default_probe(),
            check_secs: default_check(),
            package_query_secs: default_package_query(),
            toolchain_secs: default_toolchain(),
            build_secs: default_build(),
        }
    }
}

impl Timeouts {
    pub fn suite(&self) -> Duration {
        Duration::from_secs(self.suite_secs)
    }
}

fn default_suite() -> u64 {
    900
}
fn default_probe() -> u64 {
    30
}
fn default_check() -> u64 {
    1200
}
fn default_package_query() -> u64 {
    60
}
fn default_toolchain() -> u64 {
    120
}
fn default_build() -> u64 {
    7200
}

/// Preflight stage settings
#[derive(Debug, Deserialize, Clone)]
pub struct PreflightConfig {
    /// Tools that must be on PATH
    #[serde(default = "default_required_tools")]
    pub required_tools: Vec<String>,

    /// Non-fatal version probes, logged for provenance
    #[serde(default = "default_version_probes")]
    pub version_probes: Vec<Vec<String>>,

    /// Quick build check run in the project dir; non-zero is fatal
    #[serde(default = "default_check_command")]
    pub check_command: Vec<String>,

    /// Package database directory whose `*.db` mtimes get reported
    #[serde(default = "default_package_db_dir")]
    pub package_db_dir: Option<PathBuf>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            required_tools: default_required_tools(),
            version_probes: default_version_probes(),
            check_command: default_check_command(),
            package_db_dir: default_package_db_dir(),
        }
    }
}

fn default_required_tools() -> Vec<String> {
    vec!["cargo".to_string()]
}
fn default_version_probes() -> Vec<Vec<String>> {
    vec![
        argv(&["rustup", "--version"]),
        argv(&["cargo", "--version"]),
        argv(&["pacman", "-V"]),
    ]
}
fn default_check_command() -> Vec<String> {
    argv(&["cargo", "check"])
}
fn default_package_db_dir() -> Option<PathBuf> {
    Some(PathBuf::from("/var/lib/pacman/sync"))
}

/// Dependency verification settings (verify-only, nothing is installed)
#[derive(Debug, Deserialize, Clone)]
pub struct DepsConfig {
    /// Query command; the package name is appended
    #[serde(default = "default_query_command")]
    pub query_command: Vec<String>,

    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
}

impl Default for DepsConfig {
    fn default() -> Self {
        Self {
            query_command: default_query_command(),
            packages: default_packages(),
        }
    }
}

fn default_query_command() -> Vec<String> {
    argv(&["pacman", "-Qi"])
}
fn default_packages() -> Vec<String> {
    argv(&[
        "base-devel",
        "sudo",
        "git",
        "curl",
        "rustup",
        "which",
        "findutils",
        "tar",
        "gzip",
        "jq",
    ])
}

/// Build stage settings
#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Build profile (`CARGO_PROFILE`)
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Toolchain selector (`RUSTUP_TOOLCHAIN`)
    #[serde(default = "default_toolchain_name")]
    pub toolchain: String,

    /// Toolchain selection command; the toolchain is appended
    #[serde(default = "default_toolchain_command")]
    pub toolchain_command: Vec<String>,

    /// Non-fatal provenance probes
    #[serde(default = "default_provenance_probes")]
    pub provenance_probes: Vec<Vec<String>>,

    /// Build command; the profile is appended
    #[serde(default = "default_build_command")]
    pub build_command: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            toolchain: default_toolchain_name(),
            toolchain_command: default_toolchain_command(),
            provenance_probes: default_provenance_probes(),
            build_command: default_build_command(),
        }
    }
}

fn default_profile() -> String {
    "release".to_string()
}
fn default_toolchain_name() -> String {
    "stable".to_string()
}
fn default_toolchain_command() -> Vec<String> {
    argv(&["rustup", "default"])
}
fn default_provenance_probes() -> Vec<Vec<String>> {
    vec![
        argv(&["rustup", "show"]),
        argv(&["cargo", "--version"]),
        argv(&["rustc", "--version"]),
    ]
}
fn default_build_command() -> Vec<String> {
    argv(&["cargo", "build", "--profile"])
}

/// Suite execution settings
#[derive(Debug, Deserialize, Clone)]
pub struct SuitesConfig {
    /// Restrict run-suites to one suite name (`TEST_FILTER`)
    #[serde(default)]
    pub filter: String,

    /// Locale exported to suite scripts; `None` leaves the environment alone
    #[serde(default = "default_script_locale")]
    pub script_locale: Option<String>,
}

impl Default for SuitesConfig {
    fn default() -> Self {
        Self {
            filter: String::new(),
            script_locale: default_script_locale(),
        }
    }
}

fn default_script_locale() -> Option<String> {
    Some("en_US.UTF-8".to_string())
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl HarnessConfig {
    /// Load configuration and apply environment overrides
    ///
    /// An explicit path must exist. Without one, the platform config file is
    /// used when present, otherwise the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Apply `TEST_FILTER`, `SUITE_TIMEOUT_SEC`, `CARGO_PROFILE` and
    /// `RUSTUP_TOOLCHAIN` from `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(filter) = lookup("TEST_FILTER") {
            self.suites.filter = filter.trim().to_string();
        }

        if let Some(raw) = lookup("SUITE_TIMEOUT_SEC") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                Error::Config(format!("SUITE_TIMEOUT_SEC must be a number of seconds, got '{}'", raw))
            })?;
            if secs == 0 {
                return Err(Error::Config("SUITE_TIMEOUT_SEC must be positive".to_string()));
            }
            self.timeouts.suite_secs = secs;
        }

        if let Some(profile) = lookup("CARGO_PROFILE").filter(|v| !v.is_empty()) {
            self.build.profile = profile;
        }

        if let Some(toolchain) = lookup("RUSTUP_TOOLCHAIN").filter(|v| !v.is_empty()) {
            self.build.toolchain = toolchain;
        }

        Ok(())
    }
}
