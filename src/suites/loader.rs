//! Suite discovery

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::common::{DescriptorError, Error, Result};

use super::descriptor::{suite_name, Suite, DESCRIPTOR_FILE};

/// How many discovered paths get echoed at debug level
const LISTED_SUITES: usize = 5;

/// A descriptor that failed to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedSuite {
    pub name: String,
    pub path: PathBuf,
    pub error: DescriptorError,
}

/// One discovered descriptor, loaded or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuiteEntry {
    Ready(Suite),
    Malformed(MalformedSuite),
}

impl SuiteEntry {
    pub fn name(&self) -> &str {
        match self {
            SuiteEntry::Ready(s) => &s.name,
            SuiteEntry::Malformed(m) => &m.name,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            SuiteEntry::Ready(s) => &s.path,
            SuiteEntry::Malformed(m) => &m.path,
        }
    }
}

/// Everything discovery found, ordered by descriptor path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteSet {
    pub entries: Vec<SuiteEntry>,
}

impl SuiteSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn suites(&self) -> impl Iterator<Item = &Suite> {
        self.entries.iter().filter_map(|e| match e {
            SuiteEntry::Ready(s) => Some(s),
            SuiteEntry::Malformed(_) => None,
        })
    }

    pub fn malformed(&self) -> impl Iterator<Item = &MalformedSuite> {
        self.entries.iter().filter_map(|e| match e {
            SuiteEntry::Malformed(m) => Some(m),
            SuiteEntry::Ready(_) => None,
        })
    }
}

/// Find and load every descriptor under `root`.
///
/// A non-empty `filter` keeps only the suite with that name and is a fatal
/// error when nothing matches. Malformed descriptors are returned as
/// [`SuiteEntry::Malformed`] rather than failing discovery, and so is every
/// descriptor whose suite name an earlier descriptor already claimed.
pub fn discover(root: &Path, filter: &str, distro_id: &str) -> Result<SuiteSet> {
    let mut found = Vec::new();
    if root.exists() {
        collect_descriptors(root, &mut found)?;
    } else {
        tracing::warn!(root = %root.display(), "suite directory does not exist");
    }
    found.sort();

    for path in found.iter().take(LISTED_SUITES) {
        tracing::debug!(path = %path.display(), "discovered suite");
    }
    if found.len() > LISTED_SUITES {
        tracing::debug!("... and {} more", found.len() - LISTED_SUITES);
    }

    let filter = filter.trim();
    if !filter.is_empty() {
        found.retain(|p| suite_name(p) == filter);
        if found.is_empty() {
            return Err(Error::NoSuitesMatched {
                filter: filter.to_string(),
            });
        }
        tracing::info!(filter, "applying suite filter");
    }

    let mut claimed: HashMap<String, PathBuf> = HashMap::new();
    let entries = found
        .into_iter()
        .map(|path| {
            let name = suite_name(&path);
            if let Some(first) = claimed.get(&name) {
                let error = DescriptorError::DuplicateName {
                    first: first.display().to_string(),
                };
                tracing::warn!(path = %path.display(), %error, "duplicate suite name");
                return SuiteEntry::Malformed(MalformedSuite { name, path, error });
            }
            claimed.insert(name.clone(), path.clone());

            match Suite::load(&path, distro_id) {
                Ok(suite) => SuiteEntry::Ready(suite),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "malformed suite descriptor");
                    SuiteEntry::Malformed(MalformedSuite { name, path, error })
                }
            }
        })
        .collect();

    Ok(SuiteSet { entries })
}

fn collect_descriptors(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let walk_err = |e: std::io::Error| Error::SuiteWalk {
        path: dir.display().to_string(),
        error: e.to_string(),
    };

    for entry in std::fs::read_dir(dir).map_err(walk_err)? {
        let entry = entry.map_err(walk_err)?;
        // file_type does not follow symlinks, so linked directories cannot loop
        let file_type = entry.file_type().map_err(walk_err)?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_descriptors(&path, out)?;
        } else if entry.file_name() == DESCRIPTOR_FILE {
            out.push(path);
        }
    }
    Ok(())
}
