//! Physical-store seams: key generation, batch execution, transactions,
//! and commit notification.
//!
//! The engine never talks SQL. Everything store-specific sits behind
//! these traits; one [`DataNode`] bundles them per physical store. All
//! calls are synchronous — a commit is serialized end-to-end on the
//! calling thread, and blocking happens only inside the adapter.

use crate::descriptor::BatchDescriptor;
use crate::error::{ExecutionError, Result, RollbackStatus};
use crate::ident::ObjectId;
use crate::snapshot::RowSnapshot;
use crate::value::Value;

/// Store-specific primary key generation.
///
/// Called at most once per entity per commit cycle, for the single
/// generated column an entity may declare.
pub trait KeyGenerator: Send + Sync {
    /// Produce the next key value for the given physical table.
    fn generate_key(&self, table: &str) -> Result<Value>;
}

/// One physical connection participating in a commit transaction.
///
/// Implementations wrap whatever the adapter uses for a transactional
/// session. Rollback is best-effort; the caller swallows per-connection
/// rollback failures so the remaining connections still roll back.
pub trait NodeConnection: Send {
    /// Open the transaction scope on this connection.
    fn begin(&mut self) -> Result<()>;
    /// Commit the transaction scope.
    fn commit(&mut self) -> Result<()>;
    /// Roll the transaction scope back.
    fn rollback(&mut self) -> Result<()>;
}

/// Batch execution against one physical store.
pub trait BatchExecutor: Send + Sync {
    /// Open a connection for a commit transaction.
    fn connect(&self) -> Result<Box<dyn NodeConnection>>;

    /// Execute one batch inside the given transaction connection.
    ///
    /// Returns the affected-row count per logical row, in row order. A
    /// zero count on a row of an optimistic batch is how lock conflicts
    /// surface; the executor reports counts, the orchestrator decides.
    fn execute(
        &self,
        batch: &BatchDescriptor,
        conn: &mut dyn NodeConnection,
    ) -> Result<Vec<u64>>;
}

/// One physical store: its name, key generation, and execution seam.
pub struct DataNode {
    /// Node name, referenced by `Entity::node`.
    pub name: String,
    /// Key generation facility for this store.
    pub key_generator: Box<dyn KeyGenerator>,
    /// Batch execution facility for this store.
    pub executor: Box<dyn BatchExecutor>,
}

impl DataNode {
    /// Bundle a node from its parts.
    pub fn new(
        name: impl Into<String>,
        key_generator: Box<dyn KeyGenerator>,
        executor: Box<dyn BatchExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            key_generator,
            executor,
        }
    }
}

impl std::fmt::Debug for DataNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataNode").field("name", &self.name).finish()
    }
}

/// The transaction object for one commit invocation.
///
/// Tracks every physical connection opened during execution. Private to
/// one orchestrator run; never shared across commits.
#[derive(Default)]
pub struct NodeTransaction {
    connections: Vec<(String, Box<dyn NodeConnection>)>,
}

impl NodeTransaction {
    /// Create an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the open connection for `node`, opening and beginning one on
    /// first use.
    pub fn connection_for(
        &mut self,
        node: &DataNode,
    ) -> Result<&mut (dyn NodeConnection + '_)> {
        let idx = match self
            .connections
            .iter()
            .position(|(name, _)| name == &node.name)
        {
            Some(idx) => idx,
            None => {
                let mut conn = node.executor.connect()?;
                conn.begin()?;
                self.connections.push((node.name.clone(), conn));
                self.connections.len() - 1
            }
        };
        Ok(self.connections[idx].1.as_mut())
    }

    /// Number of connections opened so far.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True when no connection has been opened.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Commit every open connection. The first failure aborts and
    /// propagates; connections after it are left to rollback.
    pub fn commit(&mut self) -> Result<()> {
        for (name, conn) in &mut self.connections {
            tracing::debug!(node = %name, "committing transaction connection");
            conn.commit()?;
        }
        Ok(())
    }

    /// Roll back every open connection, best-effort.
    ///
    /// A rollback failure on one connection is logged and swallowed so
    /// the remaining connections still roll back. The returned status
    /// tells the caller whether every rollback succeeded.
    pub fn rollback(&mut self) -> RollbackStatus {
        let mut status = RollbackStatus::RolledBack;
        for (name, conn) in &mut self.connections {
            if let Err(err) = conn.rollback() {
                tracing::warn!(node = %name, error = %err, "rollback failed on connection");
                status = RollbackStatus::Unknown;
            } else {
                tracing::debug!(node = %name, "rolled back transaction connection");
            }
        }
        status
    }
}

impl ExecutionError {
    /// Convenience constructor for store adapters.
    pub fn new(
        node: impl Into<String>,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            table: table.into(),
            message: message.into(),
            source: None,
        }
    }
}

// ============================================================================
// Commit notification
// ============================================================================

/// Lifecycle event published around a commit.
#[derive(Debug, Clone)]
pub enum CommitEvent {
    /// Fired after planning, before any batch executes.
    PreCommit,
    /// Fired after a confirmed transaction commit.
    Committed {
        /// Updated snapshots per object identity.
        snapshots: Vec<(ObjectId, RowSnapshot)>,
        /// Identities whose rows were deleted.
        deleted: Vec<ObjectId>,
    },
    /// Fired after the rollback path completed.
    RolledBack,
}

/// Observer of commit lifecycle events.
///
/// Delivery is best-effort and decoupled from the commit path; a
/// listener must not assume it runs before `commit()` returns.
pub trait CommitListener: Send + Sync {
    /// Handle one lifecycle event.
    fn on_event(&self, event: &CommitEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct RecordingConnection {
        log: std::sync::Arc<Mutex<Vec<&'static str>>>,
        fail_rollback: bool,
    }

    impl NodeConnection for RecordingConnection {
        fn begin(&mut self) -> Result<()> {
            self.log.lock().unwrap().push("begin");
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            self.log.lock().unwrap().push("commit");
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.log.lock().unwrap().push("rollback");
            if self.fail_rollback {
                return Err(crate::error::Error::Custom("rollback refused".into()));
            }
            Ok(())
        }
    }

    struct StubExecutor {
        log: std::sync::Arc<Mutex<Vec<&'static str>>>,
        fail_rollback: AtomicBool,
        connects: AtomicUsize,
    }

    impl BatchExecutor for StubExecutor {
        fn connect(&self) -> Result<Box<dyn NodeConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingConnection {
                log: self.log.clone(),
                fail_rollback: self.fail_rollback.load(Ordering::SeqCst),
            }))
        }

        fn execute(
            &self,
            _batch: &BatchDescriptor,
            _conn: &mut dyn NodeConnection,
        ) -> Result<Vec<u64>> {
            Ok(vec![])
        }
    }

    struct NoKeys;

    impl KeyGenerator for NoKeys {
        fn generate_key(&self, _table: &str) -> Result<Value> {
            Err(crate::error::Error::Custom("no keys here".into()))
        }
    }

    fn stub_node(
        name: &str,
        log: std::sync::Arc<Mutex<Vec<&'static str>>>,
        fail_rollback: bool,
    ) -> DataNode {
        DataNode::new(
            name,
            Box::new(NoKeys),
            Box::new(StubExecutor {
                log,
                fail_rollback: AtomicBool::new(fail_rollback),
                connects: AtomicUsize::new(0),
            }),
        )
    }

    #[test]
    fn test_connection_reused_per_node() {
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));
        let node = stub_node("main", log.clone(), false);

        let mut tx = NodeTransaction::new();
        tx.connection_for(&node).unwrap();
        tx.connection_for(&node).unwrap();

        assert_eq!(tx.len(), 1);
        // begin runs once, on first use
        assert_eq!(log.lock().unwrap().as_slice(), &["begin"]);
    }

    #[test]
    fn test_commit_commits_every_connection() {
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));
        let a = stub_node("a", log.clone(), false);
        let b = stub_node("b", log.clone(), false);

        let mut tx = NodeTransaction::new();
        tx.connection_for(&a).unwrap();
        tx.connection_for(&b).unwrap();
        tx.commit().unwrap();

        assert_eq!(
            log.lock().unwrap().as_slice(),
            &["begin", "begin", "commit", "commit"]
        );
    }

    #[test]
    fn test_rollback_swallows_failures_and_reports_unknown() {
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));
        let bad = stub_node("bad", log.clone(), true);
        let good = stub_node("good", log.clone(), false);

        let mut tx = NodeTransaction::new();
        tx.connection_for(&bad).unwrap();
        tx.connection_for(&good).unwrap();

        let status = tx.rollback();
        assert_eq!(status, RollbackStatus::Unknown);
        // The failing rollback did not stop the second connection.
        assert_eq!(
            log.lock()
                .unwrap()
                .iter()
                .filter(|e| **e == "rollback")
                .count(),
            2
        );
    }

    #[test]
    fn test_rollback_clean_path() {
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));
        let node = stub_node("main", log, false);

        let mut tx = NodeTransaction::new();
        tx.connection_for(&node).unwrap();
        assert_eq!(tx.rollback(), RollbackStatus::RolledBack);
    }
}
