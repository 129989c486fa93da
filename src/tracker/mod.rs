//! Workspace snapshots for rollback.

mod snapshot;

pub use snapshot::{GitSnapshotStore, Snapshot, SnapshotStore, snapshot_label};
