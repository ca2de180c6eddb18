//! The object store: tracked objects, their values, and pending
//! join-table work.
//!
//! One store belongs to one session. It owns every tracked object's
//! attribute values, to-one relationship targets, persistence state,
//! and retained row snapshot, and it is the single place where a
//! temporary id is swapped for its permanent one — [`ObjectStore::rekey`]
//! updates the object map, relationship targets, and flattened-arc
//! worklists in one step, so no holder ever observes a stale id.

use relsync_core::{Error, ObjectId, ObjectState, Result, RowSnapshot, Value};
use std::collections::HashMap;

/// One tracked object.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    id: ObjectId,
    entity: String,
    state: ObjectState,
    values: HashMap<String, Value>,
    to_one: HashMap<String, ObjectId>,
    snapshot: Option<RowSnapshot>,
}

impl TrackedObject {
    /// Current identity.
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// Entity name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Persistence state.
    pub fn state(&self) -> ObjectState {
        self.state
    }

    /// One attribute value, by logical attribute name.
    pub fn value(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    /// All attribute values.
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// The target of a to-one relationship, when set.
    pub fn to_one_target(&self, relationship: &str) -> Option<&ObjectId> {
        self.to_one.get(relationship)
    }

    /// The retained last-committed snapshot, when available.
    pub fn snapshot(&self) -> Option<&RowSnapshot> {
        self.snapshot.as_ref()
    }
}

/// Direction of pending join-table work for one flattened arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcOp {
    /// The arc was linked; a join-table row must be inserted.
    Insert,
    /// The arc was unlinked; the join-table row must be deleted.
    Delete,
}

/// One pending join-table row for a flattened relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedArc {
    /// Source entity name.
    pub entity: String,
    /// Flattened relationship name on the source entity.
    pub relationship: String,
    /// Source object identity.
    pub source: ObjectId,
    /// Target object identity.
    pub target: ObjectId,
    /// Insert or delete.
    pub op: ArcOp,
}

/// All tracked objects of one session, in registration order.
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: HashMap<ObjectId, TrackedObject>,
    order: Vec<ObjectId>,
    arcs: Vec<FlattenedArc>,
}

impl ObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh object pending INSERT. Mints and returns its
    /// temporary id.
    pub fn register_new(
        &mut self,
        entity: impl Into<String>,
        values: impl IntoIterator<Item = (String, Value)>,
    ) -> ObjectId {
        let entity = entity.into();
        let id = ObjectId::temporary(entity.clone());
        tracing::trace!(id = %id, "registered new object");
        self.insert_object(TrackedObject {
            id: id.clone(),
            entity,
            state: ObjectState::New,
            values: values.into_iter().collect(),
            to_one: HashMap::new(),
            snapshot: None,
        });
        id
    }

    /// Track an object fetched from the store, in sync with its row.
    pub fn track_committed(
        &mut self,
        id: ObjectId,
        entity: impl Into<String>,
        values: impl IntoIterator<Item = (String, Value)>,
        snapshot: RowSnapshot,
    ) {
        self.insert_object(TrackedObject {
            id,
            entity: entity.into(),
            state: ObjectState::Committed,
            values: values.into_iter().collect(),
            to_one: HashMap::new(),
            snapshot: Some(snapshot),
        });
    }

    /// Track an identity whose attribute values were never fetched.
    /// Hollow objects contribute no commit work.
    pub fn track_hollow(&mut self, id: ObjectId, entity: impl Into<String>) {
        self.insert_object(TrackedObject {
            id,
            entity: entity.into(),
            state: ObjectState::Hollow,
            values: HashMap::new(),
            to_one: HashMap::new(),
            snapshot: None,
        });
    }

    fn insert_object(&mut self, object: TrackedObject) {
        let id = object.id.clone();
        if self.objects.insert(id.clone(), object).is_none() {
            self.order.push(id);
        }
    }

    /// Set one attribute value. A committed object becomes modified.
    pub fn set_value(
        &mut self,
        id: &ObjectId,
        attribute: impl Into<String>,
        value: Value,
    ) -> Result<()> {
        let object = self.object_mut(id)?;
        object.values.insert(attribute.into(), value);
        if object.state == ObjectState::Committed {
            object.state = ObjectState::Modified;
        }
        Ok(())
    }

    /// Point a to-one relationship at a target, or clear it with `None`.
    /// A committed object becomes modified.
    pub fn set_to_one(
        &mut self,
        id: &ObjectId,
        relationship: impl Into<String>,
        target: Option<ObjectId>,
    ) -> Result<()> {
        let object = self.object_mut(id)?;
        match target {
            Some(target) => {
                object.to_one.insert(relationship.into(), target);
            }
            None => {
                object.to_one.remove(&relationship.into());
            }
        }
        if object.state == ObjectState::Committed {
            object.state = ObjectState::Modified;
        }
        Ok(())
    }

    /// Mark an object for deletion. An object that was never persisted
    /// drops straight back to transient and contributes no DELETE.
    pub fn delete(&mut self, id: &ObjectId) -> Result<()> {
        let object = self.object_mut(id)?;
        object.state = match object.state {
            ObjectState::New => ObjectState::Transient,
            _ => ObjectState::Deleted,
        };
        Ok(())
    }

    /// Record a linked flattened arc, cancelling a pending unlink of
    /// the same arc instead of queueing both.
    pub fn link_flattened(
        &mut self,
        entity: impl Into<String>,
        relationship: impl Into<String>,
        source: ObjectId,
        target: ObjectId,
    ) {
        let arc = FlattenedArc {
            entity: entity.into(),
            relationship: relationship.into(),
            source,
            target,
            op: ArcOp::Insert,
        };
        if self.cancel_arc(&arc, ArcOp::Delete) {
            return;
        }
        self.arcs.push(arc);
    }

    /// Record an unlinked flattened arc, cancelling a pending link of
    /// the same arc instead of queueing both.
    pub fn unlink_flattened(
        &mut self,
        entity: impl Into<String>,
        relationship: impl Into<String>,
        source: ObjectId,
        target: ObjectId,
    ) {
        let arc = FlattenedArc {
            entity: entity.into(),
            relationship: relationship.into(),
            source,
            target,
            op: ArcOp::Delete,
        };
        if self.cancel_arc(&arc, ArcOp::Insert) {
            return;
        }
        self.arcs.push(arc);
    }

    fn cancel_arc(&mut self, arc: &FlattenedArc, opposite: ArcOp) -> bool {
        let position = self.arcs.iter().position(|a| {
            a.op == opposite
                && a.relationship == arc.relationship
                && a.source == arc.source
                && a.target == arc.target
        });
        match position {
            Some(idx) => {
                self.arcs.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Pending join-table work, in recording order.
    pub fn arcs(&self) -> &[FlattenedArc] {
        &self.arcs
    }

    /// Drop all pending join-table work after a successful commit.
    pub fn clear_arcs(&mut self) {
        self.arcs.clear();
    }

    /// Look up a tracked object.
    pub fn object(&self, id: &ObjectId) -> Option<&TrackedObject> {
        self.objects.get(id)
    }

    fn object_mut(&mut self, id: &ObjectId) -> Result<&mut TrackedObject> {
        self.objects
            .get_mut(id)
            .ok_or_else(|| Error::Custom(format!("object {id} is not tracked")))
    }

    /// Iterate tracked objects in registration order.
    pub fn objects(&self) -> impl Iterator<Item = &TrackedObject> {
        self.order.iter().filter_map(|id| self.objects.get(id))
    }

    /// Iterate tracked objects in one state, in registration order.
    pub fn objects_in_state(&self, state: ObjectState) -> impl Iterator<Item = &TrackedObject> {
        self.objects().filter(move |o| o.state == state)
    }

    /// Number of tracked objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when no objects are tracked.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// The retained snapshot for an identity.
    pub fn snapshot(&self, id: &ObjectId) -> Option<&RowSnapshot> {
        self.objects.get(id).and_then(|o| o.snapshot.as_ref())
    }

    /// Replace the retained snapshot for an identity.
    pub fn set_snapshot(&mut self, id: &ObjectId, snapshot: RowSnapshot) -> Result<()> {
        self.object_mut(id)?.snapshot = Some(snapshot);
        Ok(())
    }

    /// Force an object's persistence state.
    pub fn set_state(&mut self, id: &ObjectId, state: ObjectState) -> Result<()> {
        self.object_mut(id)?.state = state;
        Ok(())
    }

    /// Stop tracking an object entirely.
    pub fn remove(&mut self, id: &ObjectId) {
        if self.objects.remove(id).is_some() {
            self.order.retain(|o| o != id);
        }
    }

    /// Swap a temporary id for its permanent counterpart everywhere:
    /// the object map, every to-one target pointing at it, and every
    /// pending flattened arc. Holders of the old id never see a
    /// half-applied swap because the store is exclusively borrowed.
    pub fn rekey(&mut self, old: &ObjectId, new: ObjectId) {
        let Some(mut object) = self.objects.remove(old) else {
            return;
        };
        tracing::trace!(old = %old, new = %new, "rekeying object");
        object.id = new.clone();
        self.objects.insert(new.clone(), object);
        for slot in &mut self.order {
            if slot == old {
                *slot = new.clone();
            }
        }
        for object in self.objects.values_mut() {
            for target in object.to_one.values_mut() {
                if target == old {
                    *target = new.clone();
                }
            }
        }
        for arc in &mut self.arcs {
            if &arc.source == old {
                arc.source = new.clone();
            }
            if &arc.target == old {
                arc.target = new.clone();
            }
        }
    }
}
