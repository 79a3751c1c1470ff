//! Compressed proof bundle

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::common::ProofLayout;

/// Pack `logs/`, `snapshots/`, `results/` and `summary.json` into
/// `proofs.tar.gz` under the proof root. Missing members are skipped.
pub fn package(layout: &ProofLayout) -> io::Result<PathBuf> {
    let archive_path = layout.archive_path();
    let file = File::create(&archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (dir, name) in [
        (layout.logs_dir(), "logs"),
        (layout.snapshots_dir(), "snapshots"),
        (layout.results_dir(), "results"),
    ] {
        if dir.is_dir() {
            builder.append_dir_all(name, &dir)?;
        }
    }

    let summary = layout.summary_path();
    if summary.is_file() {
        builder.append_path_with_name(&summary, "summary.json")?;
    }

    builder.into_inner()?.finish()?;
    Ok(archive_path)
}

/// Member paths of a packaged bundle
pub fn list_members(archive_path: &Path) -> io::Result<Vec<String>> {
    let file = File::open(archive_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let mut members = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        members.push(entry.path()?.to_string_lossy().into_owned());
    }
    Ok(members)
}
