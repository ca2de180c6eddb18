//! Change notification for snapshot cache consumers.
//!
//! Sessions and other caches learn about committed rows through
//! [`SnapshotChange`] events. Delivery is best-effort: events are queued
//! while the cache lock is held and dispatched only after it is
//! released, so a slow listener can never block a commit and a listener
//! calling back into the cache cannot deadlock.

use relsync_core::ObjectId;

/// One updated entry within a change event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedRow {
    /// Identity of the updated row.
    pub id: ObjectId,
    /// Column names that differ from the previously cached snapshot.
    /// Every column when there was no prior entry.
    pub changed_columns: Vec<String>,
    /// Cache version stamped onto the new snapshot.
    pub version: u64,
}

/// A batch of cache mutations announced to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotChange {
    /// Opaque tag naming the originator, echoed back so a listener can
    /// ignore its own changes.
    pub source: String,
    /// Entries inserted or updated, with their per-column diffs.
    pub updated: Vec<ChangedRow>,
    /// Entries removed because their rows were deleted.
    pub deleted: Vec<ObjectId>,
}

impl SnapshotChange {
    /// True when the event carries no mutations.
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Observer of snapshot cache changes.
pub trait SnapshotListener: Send + Sync {
    /// Handle one change event. Must not assume it runs inside the
    /// mutation that produced the event.
    fn on_change(&self, change: &SnapshotChange);
}
