//! Point-in-time capture of filesystem metadata for a fixed path set

use serde::{Serialize, Serializer};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// State of one observed path
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub path: PathBuf,
    /// True for dangling symlinks too
    pub exists: bool,
    pub is_symlink: bool,
    pub link_target: Option<String>,
    /// Permission bits, rendered as `0o755`
    #[serde(serialize_with = "octal_mode")]
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl SnapshotEntry {
    /// Entry for a path that could not be observed
    pub fn absent(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            exists: false,
            is_symlink: false,
            link_target: None,
            mode: None,
            uid: None,
            gid: None,
        }
    }
}

fn octal_mode<S: Serializer>(mode: &Option<u32>, s: S) -> Result<S::Ok, S::Error> {
    match mode {
        Some(mode) => s.serialize_str(&format!("{:#o}", mode)),
        None => s.serialize_none(),
    }
}

/// Snapshot every path, preserving input order. Never fails: anything that
/// cannot be read is recorded as missing data.
pub fn snapshot<P: AsRef<Path>>(paths: &[P]) -> Vec<SnapshotEntry> {
    paths.iter().map(|p| stat_entry(p.as_ref())).collect()
}

/// Observe a single path without following a final symlink
pub fn stat_entry(path: &Path) -> SnapshotEntry {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "cannot stat observed path");
            }
            return SnapshotEntry::absent(path);
        }
    };

    let is_symlink = meta.file_type().is_symlink();
    let link_target = if is_symlink {
        fs::read_link(path)
            .ok()
            .map(|t| t.to_string_lossy().into_owned())
    } else {
        None
    };

    let (mode, uid, gid) = ownership(&meta);

    SnapshotEntry {
        path: path.to_path_buf(),
        exists: true,
        is_symlink,
        link_target,
        mode,
        uid,
        gid,
    }
}

#[cfg(unix)]
fn ownership(meta: &fs::Metadata) -> (Option<u32>, Option<u32>, Option<u32>) {
    use std::os::unix::fs::MetadataExt;
    (Some(meta.mode() & 0o777), Some(meta.uid()), Some(meta.gid()))
}

#[cfg(not(unix))]
fn ownership(_meta: &fs::Metadata) -> (Option<u32>, Option<u32>, Option<u32>) {
    (None, None, None)
}

/// Write a snapshot as pretty JSON, creating parent directories
pub fn write_snapshot(entries: &[SnapshotEntry], out: &Path) -> io::Result<()> {
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    fs::write(out, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_path_is_all_null() {
        let tmp = tempdir().unwrap();
        let missing = tmp.path().join("nope");
        let entries = snapshot(&[&missing]);
        assert_eq!(entries, vec![SnapshotEntry::absent(&missing)]);

        let json = serde_json::to_value(&entries[0]).unwrap();
        assert_eq!(json["exists"], false);
        assert!(json["mode"].is_null());
        assert!(json["link_target"].is_null());
    }

    #[cfg(unix)]
    #[test]
    fn test_regular_file_and_symlink() {
        use std::os::unix::fs::{symlink, PermissionsExt};

        let tmp = tempdir().unwrap();
        let file = tmp.path().join("ls");
        std::fs::write(&file, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o755)).unwrap();
        let link = tmp.path().join("cat");
        symlink("/usr/lib/cargo/bin/coreutils/cat", &link).unwrap();

        let entries = snapshot(&[file.clone(), link.clone()]);
        assert_eq!(entries[0].path, file);
        assert!(entries[0].exists);
        assert!(!entries[0].is_symlink);
        assert_eq!(entries[0].mode, Some(0o755));
        assert!(entries[0].uid.is_some());

        // Dangling, but still observed as existing
        assert!(entries[1].exists);
        assert!(entries[1].is_symlink);
        assert_eq!(
            entries[1].link_target.as_deref(),
            Some("/usr/lib/cargo/bin/coreutils/cat")
        );

        let json = serde_json::to_value(&entries[0]).unwrap();
        assert_eq!(json["mode"], "0o755");
    }

    #[test]
    fn test_order_is_preserved() {
        let tmp = tempdir().unwrap();
        let paths: Vec<PathBuf> = ["b", "a", "c"].iter().map(|n| tmp.path().join(n)).collect();
        let entries = snapshot(&paths);
        let got: Vec<_> = entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(got, paths);
    }

    #[test]
    fn test_write_snapshot_creates_parents() {
        let tmp = tempdir().unwrap();
        let out = tmp.path().join("snapshots/suite/before.json");
        write_snapshot(&snapshot(&[tmp.path()]), &out).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
    }
}
