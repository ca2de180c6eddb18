//! Change classification: one pass over the tracked objects, bucketing
//! dirty ones by node, entity, and operation kind.
//!
//! Transient and hollow objects contribute nothing. Buckets preserve
//! first-seen order at every level so the rest of the pipeline stays
//! deterministic for a given registration order.

use crate::store::ObjectStore;
use relsync_core::{EntityModel, ObjectId, ObjectState, Result, ValidationError};

/// Dirty objects of one node, grouped by entity and operation.
#[derive(Debug, Default)]
pub struct NodeChangeSet {
    /// Node name.
    pub node: String,
    /// Objects pending INSERT, per entity.
    pub inserts: Vec<(String, Vec<ObjectId>)>,
    /// Objects pending UPDATE, per entity.
    pub updates: Vec<(String, Vec<ObjectId>)>,
    /// Objects pending DELETE, per entity.
    pub deletes: Vec<(String, Vec<ObjectId>)>,
}

impl NodeChangeSet {
    fn bucket(buckets: &mut Vec<(String, Vec<ObjectId>)>, entity: &str, id: ObjectId) {
        match buckets.iter_mut().find(|(name, _)| name == entity) {
            Some((_, ids)) => ids.push(id),
            None => buckets.push((entity.to_string(), vec![id])),
        }
    }

    /// Total number of dirty objects in this change set.
    pub fn len(&self) -> usize {
        self.inserts
            .iter()
            .chain(&self.updates)
            .chain(&self.deletes)
            .map(|(_, ids)| ids.len())
            .sum()
    }

    /// True when no dirty object maps to this node.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Classify every dirty tracked object into per-node change sets.
///
/// Fails when a dirty object references an entity the model does not
/// map; nothing has executed at that point, so the commit aborts whole.
#[tracing::instrument(skip_all)]
pub fn classify(store: &ObjectStore, model: &EntityModel) -> Result<Vec<NodeChangeSet>> {
    let mut sets: Vec<NodeChangeSet> = Vec::new();
    for object in store.objects() {
        if !object.state().dirty() {
            continue;
        }
        let entity = model
            .entity(object.entity())
            .ok_or_else(|| ValidationError::UnknownEntity {
                entity: object.entity().to_string(),
            })?;
        let set = match sets.iter_mut().position(|s| s.node == entity.node) {
            Some(idx) => &mut sets[idx],
            None => {
                sets.push(NodeChangeSet {
                    node: entity.node.to_string(),
                    ..NodeChangeSet::default()
                });
                let last = sets.len() - 1;
                &mut sets[last]
            }
        };
        let buckets = match object.state() {
            ObjectState::New => &mut set.inserts,
            ObjectState::Modified => &mut set.updates,
            ObjectState::Deleted => &mut set.deletes,
            _ => unreachable!("only dirty states reach bucketing"),
        };
        NodeChangeSet::bucket(buckets, entity.name, object.id().clone());
    }
    for set in &sets {
        tracing::debug!(node = %set.node, changes = set.len(), "classified changes");
    }
    Ok(sets)
}
