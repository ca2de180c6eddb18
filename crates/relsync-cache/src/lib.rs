//! Shared row-snapshot cache for the relsync commit engine.
//!
//! Holds the last committed column map per object identity, bounded by
//! LRU eviction and an optional TTL, and announces committed changes to
//! registered listeners without coupling them to the commit path.

pub mod cache;
pub mod notify;

pub use cache::{CommitGuard, SnapshotCache, SnapshotCacheConfig};
pub use notify::{ChangedRow, SnapshotChange, SnapshotListener};
