//! Bounded, shared row-snapshot cache.
//!
//! One cache instance is shared by every session attached to a store.
//! It keeps the last committed column map per object identity, bounded
//! by entry count (LRU eviction) and optionally by age (TTL, checked on
//! access). All mutations funnel through [`SnapshotCache::process_changes`],
//! which applies one commit's worth of changes atomically and announces
//! them to listeners after the lock is released.

use crate::notify::{ChangedRow, SnapshotChange, SnapshotListener};
use relsync_core::{ObjectId, RowSnapshot};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Tuning knobs for a [`SnapshotCache`].
#[derive(Debug, Clone)]
pub struct SnapshotCacheConfig {
    /// Maximum number of retained snapshots. Least-recently-used
    /// entries are evicted past this bound.
    pub max_entries: usize,
    /// Entry lifetime. `None` keeps entries until evicted or deleted.
    pub ttl: Option<Duration>,
}

impl Default for SnapshotCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: None,
        }
    }
}

impl SnapshotCacheConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum entry count.
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the entry lifetime.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

struct Entry {
    snapshot: RowSnapshot,
    stored_at: Instant,
    last_used: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<ObjectId, Entry>,
    next_version: u64,
}

/// Guard serializing commits against one shared cache.
///
/// Held by the commit orchestrator from planning through snapshot
/// refresh, so no two commits interleave their cache updates.
pub struct CommitGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

/// Shared cache of last-committed row snapshots.
pub struct SnapshotCache {
    config: SnapshotCacheConfig,
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<Arc<dyn SnapshotListener>>>,
    pending: Mutex<VecDeque<SnapshotChange>>,
    commit_mutex: Mutex<()>,
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SnapshotCache {
    /// Create a cache with the given configuration.
    pub fn new(config: SnapshotCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            listeners: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            commit_mutex: Mutex::new(()),
        }
    }

    /// Acquire the commit-serialization lock.
    pub fn commit_lock(&self) -> CommitGuard<'_> {
        CommitGuard(lock_recover(&self.commit_mutex))
    }

    /// Register a change listener.
    pub fn subscribe(&self, listener: Arc<dyn SnapshotListener>) {
        lock_recover(&self.listeners).push(listener);
    }

    /// Look up the cached snapshot for an identity.
    ///
    /// An entry past its TTL is treated as absent and dropped; the
    /// caller falls through to a fetch exactly as on a miss.
    pub fn get(&self, id: &ObjectId) -> Option<RowSnapshot> {
        let mut inner = lock_recover(&self.inner);
        let expired = match inner.entries.get(id) {
            Some(entry) => self
                .config
                .ttl
                .is_some_and(|ttl| entry.stored_at.elapsed() >= ttl),
            None => return None,
        };
        if expired {
            inner.entries.remove(id);
            tracing::trace!(id = %id, "snapshot expired");
            return None;
        }
        let entry = inner.entries.get_mut(id)?;
        entry.last_used = Instant::now();
        Some(entry.snapshot.clone())
    }

    /// Apply one commit's worth of changes atomically.
    ///
    /// Each updated snapshot is diffed against the prior entry (no
    /// prior entry means every column counts as changed) and stamped
    /// with a fresh cache version. Deleted identities are dropped.
    /// Listeners are notified after the entry lock is released, and
    /// only when the event carries at least one mutation.
    pub fn process_changes(
        &self,
        source: &str,
        updated: Vec<(ObjectId, RowSnapshot)>,
        deleted: &[ObjectId],
    ) {
        let now = Instant::now();
        let mut changed_rows = Vec::new();
        let mut removed = Vec::new();
        {
            let mut inner = lock_recover(&self.inner);
            for (id, snapshot) in updated {
                let changed_columns = match inner.entries.get(&id) {
                    Some(prior) => snapshot.diff(&prior.snapshot),
                    None => snapshot.diff(&RowSnapshot::default()),
                };
                if changed_columns.is_empty() && inner.entries.contains_key(&id) {
                    continue;
                }
                inner.next_version += 1;
                let version = inner.next_version;
                inner.entries.insert(
                    id.clone(),
                    Entry {
                        snapshot: snapshot.with_version(version),
                        stored_at: now,
                        last_used: now,
                    },
                );
                changed_rows.push(ChangedRow {
                    id,
                    changed_columns,
                    version,
                });
            }
            for id in deleted {
                if inner.entries.remove(id).is_some() {
                    removed.push(id.clone());
                }
            }
            self.evict_lru(&mut inner);
        }

        let change = SnapshotChange {
            source: source.to_string(),
            updated: changed_rows,
            deleted: removed,
        };
        if change.is_empty() {
            return;
        }
        tracing::debug!(
            source = %change.source,
            updated = change.updated.len(),
            deleted = change.deleted.len(),
            "snapshot cache changed"
        );
        lock_recover(&self.pending).push_back(change);
        self.dispatch_pending();
    }

    /// Drop one entry without notifying listeners. Used when a session
    /// invalidates an object locally.
    pub fn forget(&self, id: &ObjectId) {
        lock_recover(&self.inner).entries.remove(id);
    }

    /// Drop every entry without notifying listeners.
    pub fn clear(&self) {
        lock_recover(&self.inner).entries.clear();
    }

    /// Number of cached snapshots.
    pub fn len(&self) -> usize {
        lock_recover(&self.inner).entries.len()
    }

    /// True when the cache holds no snapshots.
    pub fn is_empty(&self) -> bool {
        lock_recover(&self.inner).entries.is_empty()
    }

    fn evict_lru(&self, inner: &mut Inner) {
        while inner.entries.len() > self.config.max_entries {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone());
            match victim {
                Some(id) => {
                    inner.entries.remove(&id);
                    tracing::trace!(id = %id, "evicted least-recently-used snapshot");
                }
                None => break,
            }
        }
    }

    /// Deliver queued events, one at a time, outside the entry lock.
    ///
    /// Queue order is delivery order even when a listener triggers
    /// further changes while handling an event.
    fn dispatch_pending(&self) {
        loop {
            let change = match lock_recover(&self.pending).pop_front() {
                Some(change) => change,
                None => return,
            };
            let listeners = lock_recover(&self.listeners).clone();
            for listener in listeners {
                listener.on_change(&change);
            }
        }
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(SnapshotCacheConfig::default())
    }
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("len", &self.len())
            .field("max_entries", &self.config.max_entries)
            .field("ttl", &self.config.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relsync_core::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn oid(n: i64) -> ObjectId {
        ObjectId::permanent("Order", [("id".to_string(), Value::BigInt(n))])
    }

    fn snap(pairs: &[(&str, Value)]) -> RowSnapshot {
        RowSnapshot::new(pairs.iter().map(|(c, v)| ((*c).to_string(), v.clone())))
    }

    struct Recorder {
        events: Mutex<Vec<SnapshotChange>>,
    }

    impl SnapshotListener for Recorder {
        fn on_change(&self, change: &SnapshotChange) {
            self.events.lock().unwrap().push(change.clone());
        }
    }

    #[test]
    fn test_roundtrip_and_len() {
        let cache = SnapshotCache::default();
        cache.process_changes(
            "s1",
            vec![(oid(1), snap(&[("status", Value::Text("open".into()))]))],
            &[],
        );
        assert_eq!(cache.len(), 1);
        let got = cache.get(&oid(1)).unwrap();
        assert_eq!(got.get("status"), Some(&Value::Text("open".into())));
        assert!(cache.get(&oid(2)).is_none());
    }

    #[test]
    fn test_diff_against_prior_entry() {
        let cache = SnapshotCache::default();
        let recorder = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
        });
        cache.subscribe(recorder.clone());

        cache.process_changes(
            "s1",
            vec![(
                oid(1),
                snap(&[("status", Value::Text("open".into())), ("qty", Value::Int(1))]),
            )],
            &[],
        );
        cache.process_changes(
            "s1",
            vec![(
                oid(1),
                snap(&[("status", Value::Text("done".into())), ("qty", Value::Int(1))]),
            )],
            &[],
        );

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        // First event has no prior entry, so every column changed.
        assert_eq!(
            events[0].updated[0].changed_columns,
            vec!["qty".to_string(), "status".to_string()]
        );
        assert_eq!(
            events[1].updated[0].changed_columns,
            vec!["status".to_string()]
        );
        assert!(events[1].updated[0].version > events[0].updated[0].version);
    }

    #[test]
    fn test_identical_snapshot_produces_no_event() {
        let cache = SnapshotCache::default();
        let recorder = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
        });
        let s = snap(&[("status", Value::Text("open".into()))]);
        cache.process_changes("s1", vec![(oid(1), s.clone())], &[]);
        cache.subscribe(recorder.clone());
        cache.process_changes("s1", vec![(oid(1), s)], &[]);
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_and_notifies() {
        let cache = SnapshotCache::default();
        let recorder = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
        });
        cache.subscribe(recorder.clone());

        cache.process_changes("s1", vec![(oid(1), snap(&[("a", Value::Int(1))]))], &[]);
        cache.process_changes("s1", vec![], &[oid(1)]);

        assert!(cache.get(&oid(1)).is_none());
        let events = recorder.events.lock().unwrap();
        assert_eq!(events[1].deleted, vec![oid(1)]);
        // Deleting an unknown id is a no-op and emits nothing.
        drop(events);
        cache.process_changes("s1", vec![], &[oid(9)]);
        assert_eq!(recorder.events.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_lru_eviction_bounds_entries() {
        let cache = SnapshotCache::new(SnapshotCacheConfig::new().max_entries(2));
        cache.process_changes("s1", vec![(oid(1), snap(&[("a", Value::Int(1))]))], &[]);
        cache.process_changes("s1", vec![(oid(2), snap(&[("a", Value::Int(2))]))], &[]);
        // Touch 1 so 2 becomes the LRU victim.
        std::thread::sleep(Duration::from_millis(5));
        cache.get(&oid(1)).unwrap();
        cache.process_changes("s1", vec![(oid(3), snap(&[("a", Value::Int(3))]))], &[]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&oid(1)).is_some());
        assert!(cache.get(&oid(2)).is_none());
        assert!(cache.get(&oid(3)).is_some());
    }

    #[test]
    fn test_ttl_expiry_reads_as_miss() {
        let cache =
            SnapshotCache::new(SnapshotCacheConfig::new().ttl(Duration::from_millis(10)));
        cache.process_changes("s1", vec![(oid(1), snap(&[("a", Value::Int(1))]))], &[]);
        assert!(cache.get(&oid(1)).is_some());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&oid(1)).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_forget_and_clear_are_silent() {
        let cache = SnapshotCache::default();
        let recorder = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
        });
        cache.process_changes("s1", vec![(oid(1), snap(&[("a", Value::Int(1))]))], &[]);
        cache.process_changes("s1", vec![(oid(2), snap(&[("a", Value::Int(2))]))], &[]);
        cache.subscribe(recorder.clone());

        cache.forget(&oid(1));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_listener_reentrancy_does_not_deadlock() {
        struct Reentrant {
            cache: Arc<SnapshotCache>,
            depth: AtomicUsize,
        }

        impl SnapshotListener for Reentrant {
            fn on_change(&self, _change: &SnapshotChange) {
                // A listener reading the cache back must not deadlock.
                if self.depth.fetch_add(1, Ordering::SeqCst) == 0 {
                    let _ = self.cache.get(&oid(1));
                }
            }
        }

        let cache = Arc::new(SnapshotCache::default());
        let listener = Arc::new(Reentrant {
            cache: cache.clone(),
            depth: AtomicUsize::new(0),
        });
        cache.subscribe(listener.clone());
        cache.process_changes("s1", vec![(oid(1), snap(&[("a", Value::Int(1))]))], &[]);
        assert_eq!(listener.depth.load(Ordering::SeqCst), 1);
    }
}
