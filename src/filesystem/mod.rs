//! Filesystem observation: snapshots of the tracked paths and presence
//! assertions on the tracked utility set

mod presence;
mod snapshot;
mod tracked;

pub use presence::{AppletPresence, PresenceReport, PresenceVerifier};
pub use snapshot::{snapshot, stat_entry, write_snapshot, SnapshotEntry};
pub use tracked::{load_tracked_names, observed_paths, parse_tracked_names};
