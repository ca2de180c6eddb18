//! The commit orchestrator: one synchronous pass from dirty objects to
//! a confirmed (or cleanly rolled back) transaction.
//!
//! A commit runs entirely on the calling thread, holding the store
//! borrow and the cache's commit lock from planning through snapshot
//! refresh. Planning failures abort before any connection opens, so
//! they always report a clean rollback. Execution failures roll every
//! touched connection back best-effort and report whether that rollback
//! itself succeeded. Object state, resolved ids, and snapshots advance
//! only after every node confirmed its transaction commit.

use crate::batch::BatchPlanner;
use crate::classify::{NodeChangeSet, classify};
use crate::keys::resolve_permanent_ids;
use crate::sort::{EntitySorter, sort_objects};
use crate::store::{FlattenedArc, ObjectStore};
use relsync_cache::SnapshotCache;
use relsync_core::{
    BatchDescriptor, CommitEvent, CommitListener, DataNode, Entity, EntityModel, Error,
    ExecutionError, NodeTransaction, ObjectId, ObjectState, OptimisticLockError, Result,
    RollbackStatus, RowSnapshot, ValidationError,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Where a commit currently stands. Observable for diagnostics; the
/// engine never re-enters an earlier phase within one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPhase {
    /// No commit in progress.
    #[default]
    Idle,
    /// Classifying dirty objects into per-node change sets.
    Categorizing,
    /// Resolving permanent ids for new objects.
    KeyGenerating,
    /// Building batch descriptors.
    BatchBuilding,
    /// Transaction object created, no batch executed yet.
    TransactionOpen,
    /// Executing batches against the nodes.
    Executing,
    /// The last commit completed successfully.
    Committed,
    /// The last commit failed and was rolled back.
    RolledBack,
}

struct NodePlan {
    node_index: usize,
    batches: Vec<BatchDescriptor>,
}

struct PlannedCommit {
    plans: Vec<NodePlan>,
    /// Modified objects whose values matched their snapshot.
    unchanged: Vec<ObjectId>,
    /// Temporary to permanent id resolutions.
    resolved: HashMap<ObjectId, ObjectId>,
    /// Permanent ids of objects with a row written (insert or update).
    written: Vec<ObjectId>,
    /// Permanent ids of objects with a row deleted.
    deleted: Vec<ObjectId>,
}

/// Orchestrates commits for one session.
#[derive(Default)]
pub struct CommitEngine {
    phase: CommitPhase,
    listeners: Vec<Arc<dyn CommitListener>>,
}

impl CommitEngine {
    /// Create an idle engine with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a commit lifecycle listener.
    pub fn subscribe(&mut self, listener: Arc<dyn CommitListener>) {
        self.listeners.push(listener);
    }

    /// The phase the engine last reached.
    pub fn phase(&self) -> CommitPhase {
        self.phase
    }

    /// Commit every pending change in `store` against `nodes`.
    ///
    /// Succeeds only when every node confirmed its transaction; any
    /// failure surfaces as a single commit error carrying the rollback
    /// status, with object states and snapshots left untouched.
    #[tracing::instrument(skip_all)]
    pub fn commit(
        &mut self,
        store: &mut ObjectStore,
        model: &EntityModel,
        nodes: &[DataNode],
        cache: &SnapshotCache,
    ) -> Result<()> {
        let guard = cache.commit_lock();

        let planned = match self.plan(store, model, nodes) {
            Ok(planned) => planned,
            Err(err) => {
                tracing::warn!(error = %err, "commit aborted during planning");
                self.phase = CommitPhase::RolledBack;
                drop(guard);
                self.notify(&CommitEvent::RolledBack);
                return Err(err.into_commit_failure(RollbackStatus::RolledBack));
            }
        };

        // Fake modifications quietly return to committed, row or no row.
        for id in &planned.unchanged {
            mark(store, id, ObjectState::Committed);
        }
        if planned.plans.iter().all(|p| p.batches.is_empty()) {
            tracing::debug!("nothing to commit");
            self.phase = CommitPhase::Committed;
            return Ok(());
        }

        self.notify(&CommitEvent::PreCommit);
        self.phase = CommitPhase::TransactionOpen;
        let mut tx = NodeTransaction::new();
        self.phase = CommitPhase::Executing;
        let executed = execute(&mut tx, nodes, &planned.plans).and_then(|()| tx.commit());
        if let Err(err) = executed {
            tracing::warn!(error = %err, "commit failed, rolling back");
            let status = tx.rollback();
            self.phase = CommitPhase::RolledBack;
            drop(guard);
            self.notify(&CommitEvent::RolledBack);
            return Err(err.into_commit_failure(status));
        }

        // Identity swap first, so snapshot refresh sees permanent ids.
        for (old, new) in &planned.resolved {
            store.rekey(old, new.clone());
        }
        let mut snapshots = Vec::new();
        {
            let planner = BatchPlanner::new(model, store, &planned.resolved);
            for id in &planned.written {
                let Some(object) = store.object(id) else {
                    continue;
                };
                let Some(entity) = model.entity(object.entity()) else {
                    continue;
                };
                snapshots.push((
                    id.clone(),
                    RowSnapshot::new(planner.row_values(entity, object)),
                ));
            }
        }
        for (id, snapshot) in &snapshots {
            if store.set_snapshot(id, snapshot.clone()).is_ok() {
                mark(store, id, ObjectState::Committed);
            }
        }
        for id in &planned.deleted {
            store.remove(id);
        }
        store.clear_arcs();
        cache.process_changes("commit", snapshots.clone(), &planned.deleted);

        drop(guard);
        self.phase = CommitPhase::Committed;
        tracing::debug!(
            written = snapshots.len(),
            deleted = planned.deleted.len(),
            "commit confirmed"
        );
        self.notify(&CommitEvent::Committed {
            snapshots,
            deleted: planned.deleted,
        });
        Ok(())
    }

    /// Phases one through three: classify, resolve keys, build batches.
    /// Read-only over the store; no connection is opened here.
    fn plan(
        &mut self,
        store: &ObjectStore,
        model: &EntityModel,
        nodes: &[DataNode],
    ) -> Result<PlannedCommit> {
        self.phase = CommitPhase::Categorizing;
        let change_sets = classify(store, model)?;

        let mut node_arcs: HashMap<String, Vec<FlattenedArc>> = HashMap::new();
        for arc in store.arcs() {
            let entity = entity_named(model, &arc.entity)?;
            node_arcs
                .entry(entity.node.to_string())
                .or_default()
                .push(arc.clone());
        }

        self.phase = CommitPhase::KeyGenerating;
        let sorter = EntitySorter::new(model);
        let mut insert_entities: Vec<String> = Vec::new();
        for set in &change_sets {
            for (name, _) in &set.inserts {
                if !insert_entities.contains(name) {
                    insert_entities.push(name.clone());
                }
            }
        }
        sorter.sort_entity_names(&mut insert_entities, false);

        let mut resolved = HashMap::new();
        let mut insert_ids: HashMap<String, Vec<ObjectId>> = HashMap::new();
        for name in &insert_entities {
            let entity = entity_named(model, name)?;
            let node = node_named(nodes, entity.node)?;
            let mut ids = bucket_ids(&change_sets, name, |s| &s.inserts);
            sort_objects(store, entity, &mut ids, false)?;
            resolve_permanent_ids(store, entity, node, &ids, &mut resolved)?;
            insert_ids.insert(name.clone(), ids);
        }

        self.phase = CommitPhase::BatchBuilding;
        let planner = BatchPlanner::new(model, store, &resolved);
        let mut plans = Vec::new();
        let mut unchanged = Vec::new();
        let mut written = Vec::new();
        let mut deleted = Vec::new();
        for set in &change_sets {
            let node_index = nodes
                .iter()
                .position(|n| n.name == set.node)
                .ok_or_else(|| missing_node(&set.node))?;
            let arcs = node_arcs.remove(&set.node).unwrap_or_default();
            let mut batches = Vec::new();

            // Inserts in master-first entity order, masters' rows first
            // inside each reflexive entity.
            for name in &insert_entities {
                if !set.inserts.iter().any(|(n, _)| n == name) {
                    continue;
                }
                let entity = entity_named(model, name)?;
                let ids = &insert_ids[name];
                written.extend(ids.iter().map(|id| resolved.get(id).unwrap_or(id).clone()));
                batches.extend(planner.insert_batches(entity, ids)?);
            }
            batches.extend(planner.flattened_insert_batches(&arcs)?);

            for (name, ids) in &set.updates {
                let entity = entity_named(model, name)?;
                let before = unchanged.len();
                batches.extend(planner.update_batches(entity, ids, &mut unchanged)?);
                let skipped = &unchanged[before..];
                written.extend(
                    ids.iter()
                        .filter(|id| !skipped.contains(*id))
                        .cloned(),
                );
            }

            batches.extend(planner.flattened_delete_batches(&arcs)?);

            // Deletes in reverse entity order, dependents' rows first
            // inside each reflexive entity.
            let mut delete_entities: Vec<String> =
                set.deletes.iter().map(|(n, _)| n.clone()).collect();
            sorter.sort_entity_names(&mut delete_entities, true);
            for name in &delete_entities {
                let entity = entity_named(model, name)?;
                let mut ids = bucket_ids(std::slice::from_ref(set), name, |s| &s.deletes);
                sort_objects(store, entity, &mut ids, true)?;
                deleted.extend(ids.iter().filter(|id| !id.is_temporary()).cloned());
                batches.extend(planner.delete_batches(entity, &ids)?);
            }

            plans.push(NodePlan {
                node_index,
                batches,
            });
        }

        // Nodes with pending join-table work but no object changes.
        for (node_name, arcs) in node_arcs {
            let node_index = nodes
                .iter()
                .position(|n| n.name == node_name)
                .ok_or_else(|| missing_node(&node_name))?;
            let mut batches = planner.flattened_insert_batches(&arcs)?;
            batches.extend(planner.flattened_delete_batches(&arcs)?);
            plans.push(NodePlan {
                node_index,
                batches,
            });
        }

        Ok(PlannedCommit {
            plans,
            unchanged,
            resolved,
            written,
            deleted,
        })
    }

    fn notify(&self, event: &CommitEvent) {
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }
}

impl std::fmt::Debug for CommitEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitEngine")
            .field("phase", &self.phase)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Run every plan, one node at a time, inside the shared transaction.
/// A zero affected-row count on an optimistic row aborts immediately.
fn execute(tx: &mut NodeTransaction, nodes: &[DataNode], plans: &[NodePlan]) -> Result<()> {
    for plan in plans {
        let node = &nodes[plan.node_index];
        for batch in &plan.batches {
            if batch.is_empty() {
                continue;
            }
            tracing::debug!(
                node = %node.name,
                table = %batch.table,
                rows = batch.len(),
                "executing batch"
            );
            let conn = tx.connection_for(node)?;
            let counts = node.executor.execute(batch, conn)?;
            if counts.len() != batch.len() {
                return Err(ExecutionError::new(
                    node.name.clone(),
                    batch.table.clone(),
                    format!(
                        "adapter reported {} row counts for {} rows",
                        counts.len(),
                        batch.len()
                    ),
                )
                .into());
            }
            if batch.is_optimistic() {
                for (row, count) in batch.rows.iter().zip(&counts) {
                    if *count == 0 {
                        return Err(OptimisticLockError {
                            table: batch.table.clone(),
                            id: row.id.clone(),
                        }
                        .into());
                    }
                }
            }
        }
    }
    Ok(())
}

fn mark(store: &mut ObjectStore, id: &ObjectId, state: ObjectState) {
    if let Err(err) = store.set_state(id, state) {
        tracing::warn!(id = %id, error = %err, "state transition on untracked object");
    }
}

fn entity_named<'a>(model: &'a EntityModel, name: &str) -> Result<&'a Entity> {
    model.entity(name).ok_or_else(|| {
        ValidationError::UnknownEntity {
            entity: name.to_string(),
        }
        .into()
    })
}

fn node_named<'a>(nodes: &'a [DataNode], name: &str) -> Result<&'a DataNode> {
    nodes
        .iter()
        .find(|n| n.name == name)
        .ok_or_else(|| missing_node(name))
}

fn missing_node(name: &str) -> Error {
    Error::Custom(format!("no node named '{name}'"))
}

fn bucket_ids(
    sets: &[NodeChangeSet],
    entity: &str,
    select: impl Fn(&NodeChangeSet) -> &Vec<(String, Vec<ObjectId>)>,
) -> Vec<ObjectId> {
    sets.iter()
        .flat_map(|set| select(set).iter())
        .filter(|(name, _)| name == entity)
        .flat_map(|(_, ids)| ids.iter().cloned())
        .collect()
}
