// Store module: snapshot persistence over pluggable backends

pub mod backend;
pub mod snapshot;

pub use backend::{MemoryStorage, SledStorage, StorageBackend};
pub use snapshot::{Snapshot, SnapshotStore};
