//! In-process caches

pub mod snapshot;

pub use snapshot::{SnapshotCacheStats, UserSnapshot, UserSnapshotCache};
