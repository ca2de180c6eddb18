//! Batch construction: turning classified, ordered, key-resolved
//! changes into grouped DML descriptors.
//!
//! Rows sharing one SQL shape land in one descriptor: same table, same
//! column signature, and for updates and deletes the same set of
//! null-valued qualifier columns. Update rows are diffed against the
//! retained snapshot first; an object whose values match its snapshot
//! exactly (a "fake" modification) produces no row at all and is
//! reported back so the orchestrator can quietly re-mark it committed.

use crate::store::{ArcOp, FlattenedArc, ObjectStore, TrackedObject};
use relsync_core::{
    BatchDescriptor, BatchKind, BatchRow, Entity, EntityModel, LockMode, ObjectId,
    QualifierTemplate, Result, RowSnapshot, ValidationError, Value,
};
use std::collections::HashMap;

/// Outcome of diffing an object's current values against its snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeSet {
    /// Every column matches the snapshot; nothing to write.
    Unchanged,
    /// Columns to write, in entity attribute order.
    Changed(Vec<(String, Value)>),
}

/// Builds descriptors for one commit. Borrows the store read-only; all
/// state mutation stays with the orchestrator.
pub struct BatchPlanner<'a> {
    model: &'a EntityModel,
    store: &'a ObjectStore,
    resolved: &'a HashMap<ObjectId, ObjectId>,
}

impl<'a> BatchPlanner<'a> {
    /// Create a planner over one commit's resolved ids.
    pub fn new(
        model: &'a EntityModel,
        store: &'a ObjectStore,
        resolved: &'a HashMap<ObjectId, ObjectId>,
    ) -> Self {
        Self {
            model,
            store,
            resolved,
        }
    }

    fn permanent_id<'b>(&'b self, id: &'b ObjectId) -> &'b ObjectId {
        self.resolved.get(id).unwrap_or(id)
    }

    /// Full column map for one object's row, in deterministic column
    /// order: attributes first, then foreign-key columns of direct
    /// to-one relationships not already covered by an attribute.
    pub fn row_values(&self, entity: &Entity, object: &TrackedObject) -> Vec<(String, Value)> {
        let permanent = self.permanent_id(object.id());
        let mut columns = Vec::new();
        for attr in &entity.attributes {
            let value = permanent
                .key_value(attr.column)
                .or_else(|| object.value(attr.name))
                .cloned()
                .unwrap_or(Value::Null);
            columns.push((attr.column.to_string(), value));
        }
        for rel in &entity.relationships {
            if rel.to_many || rel.is_flattened() {
                continue;
            }
            for join in &rel.joins {
                if columns.iter().any(|(c, _)| c == join.source_column) {
                    continue;
                }
                let value = object
                    .to_one_target(rel.name)
                    .map(|t| self.permanent_id(t))
                    .and_then(|t| t.key_value(join.target_column))
                    .cloned()
                    .unwrap_or(Value::Null);
                columns.push((join.source_column.to_string(), value));
            }
        }
        columns
    }

    /// Diff one object against its retained snapshot. Without a
    /// snapshot every current column counts as changed.
    pub fn change_set(&self, entity: &Entity, object: &TrackedObject) -> ChangeSet {
        let empty = RowSnapshot::default();
        let prior = object.snapshot().unwrap_or(&empty);
        let changed: Vec<(String, Value)> = self
            .row_values(entity, object)
            .into_iter()
            .filter(|(column, value)| {
                !entity
                    .attribute_for_column(column)
                    .is_some_and(|a| a.primary_key)
                    && prior.get(column) != Some(value)
            })
            .collect();
        if changed.is_empty() {
            ChangeSet::Unchanged
        } else {
            ChangeSet::Changed(changed)
        }
    }

    /// Insert descriptors for one entity's new objects, in the given
    /// (already instance-sorted) order.
    pub fn insert_batches(&self, entity: &Entity, ids: &[ObjectId]) -> Result<Vec<BatchDescriptor>> {
        self.check_writable(entity, ids)?;
        let mut batches: Vec<BatchDescriptor> = Vec::new();
        for id in ids {
            let object = self.tracked(id)?;
            let row = self.row_values(entity, object);
            let columns: Vec<String> = row.iter().map(|(c, _)| c.clone()).collect();
            let values: Vec<Value> = row.into_iter().map(|(_, v)| v).collect();
            let idx = batches.iter().position(|b| {
                matches!(&b.kind, BatchKind::Insert { columns: existing } if *existing == columns)
            });
            let idx = match idx {
                Some(idx) => idx,
                None => {
                    batches.push(BatchDescriptor::new(
                        entity.table,
                        BatchKind::Insert { columns },
                    ));
                    batches.len() - 1
                }
            };
            batches[idx].push(BatchRow {
                id: self.permanent_id(id).clone(),
                values,
                qualifier_values: Vec::new(),
            });
        }
        Ok(batches)
    }

    /// Update descriptors for one entity's modified objects. Objects
    /// whose values match their snapshot produce no row and are
    /// returned in `unchanged` instead.
    pub fn update_batches(
        &self,
        entity: &Entity,
        ids: &[ObjectId],
        unchanged: &mut Vec<ObjectId>,
    ) -> Result<Vec<BatchDescriptor>> {
        self.check_writable(entity, ids)?;
        let mut batches: Vec<BatchDescriptor> = Vec::new();
        for id in ids {
            let object = self.tracked(id)?;
            let changed = match self.change_set(entity, object) {
                ChangeSet::Unchanged => {
                    tracing::trace!(id = %id, "values match snapshot, skipping update");
                    unchanged.push(id.clone());
                    continue;
                }
                ChangeSet::Changed(changed) => changed,
            };
            let set_columns: Vec<String> = changed.iter().map(|(c, _)| c.clone()).collect();
            let values: Vec<Value> = changed.into_iter().map(|(_, v)| v).collect();
            let (qualifier, qualifier_values) = self.qualifier_for(entity, object)?;

            let idx = batches.iter().position(|b| {
                matches!(
                    &b.kind,
                    BatchKind::Update { set_columns: sc, qualifier: q }
                        if *sc == set_columns && *q == qualifier
                )
            });
            let idx = match idx {
                Some(idx) => idx,
                None => {
                    batches.push(BatchDescriptor::new(
                        entity.table,
                        BatchKind::Update {
                            set_columns,
                            qualifier,
                        },
                    ));
                    batches.len() - 1
                }
            };
            batches[idx].push(BatchRow {
                id: id.clone(),
                values,
                qualifier_values,
            });
        }
        Ok(batches)
    }

    /// Delete descriptors for one entity's deleted objects, in the
    /// given (already instance-sorted) order. Objects that never made
    /// it to the store are skipped outright.
    pub fn delete_batches(&self, entity: &Entity, ids: &[ObjectId]) -> Result<Vec<BatchDescriptor>> {
        self.check_writable(entity, ids)?;
        let mut batches: Vec<BatchDescriptor> = Vec::new();
        for id in ids {
            if id.is_temporary() {
                tracing::trace!(id = %id, "never persisted, skipping delete");
                continue;
            }
            let object = self.tracked(id)?;
            let (qualifier, qualifier_values) = self.qualifier_for(entity, object)?;
            let idx = batches
                .iter()
                .position(|b| matches!(&b.kind, BatchKind::Delete { qualifier: q } if *q == qualifier));
            let idx = match idx {
                Some(idx) => idx,
                None => {
                    batches.push(BatchDescriptor::new(
                        entity.table,
                        BatchKind::Delete { qualifier },
                    ));
                    batches.len() - 1
                }
            };
            batches[idx].push(BatchRow {
                id: id.clone(),
                values: Vec::new(),
                qualifier_values,
            });
        }
        Ok(batches)
    }

    /// Insert descriptors for pending flattened-arc links, one
    /// descriptor per join table. Arcs with a deleted endpoint are
    /// dropped: the endpoint's DELETE removes the row's reason to
    /// exist, and the join row itself is handled by the unlink path.
    pub fn flattened_insert_batches(&self, arcs: &[FlattenedArc]) -> Result<Vec<BatchDescriptor>> {
        let mut batches: Vec<BatchDescriptor> = Vec::new();
        for arc in arcs.iter().filter(|a| a.op == ArcOp::Insert) {
            if self.endpoint_deleted(&arc.source) || self.endpoint_deleted(&arc.target) {
                continue;
            }
            let (flattened, row) = self.arc_row(arc)?;
            let columns: Vec<String> = row.iter().map(|(c, _)| c.clone()).collect();
            let values: Vec<Value> = row.into_iter().map(|(_, v)| v).collect();
            let idx = batches.iter().position(|b| b.table == flattened.join_table);
            let idx = match idx {
                Some(idx) => idx,
                None => {
                    batches.push(BatchDescriptor::new(
                        flattened.join_table,
                        BatchKind::Insert { columns },
                    ));
                    batches.len() - 1
                }
            };
            batches[idx].push(BatchRow {
                id: self.permanent_id(&arc.source).clone(),
                values,
                qualifier_values: Vec::new(),
            });
        }
        Ok(batches)
    }

    /// Delete descriptors for pending flattened-arc unlinks. Arcs with
    /// a still-temporary endpoint never had a row and are skipped.
    pub fn flattened_delete_batches(&self, arcs: &[FlattenedArc]) -> Result<Vec<BatchDescriptor>> {
        let mut batches: Vec<BatchDescriptor> = Vec::new();
        for arc in arcs.iter().filter(|a| a.op == ArcOp::Delete) {
            if self.permanent_id(&arc.source).is_temporary()
                || self.permanent_id(&arc.target).is_temporary()
            {
                continue;
            }
            let (flattened, row) = self.arc_row(arc)?;
            let columns: Vec<String> = row.iter().map(|(c, _)| c.clone()).collect();
            let values: Vec<Value> = row.into_iter().map(|(_, v)| v).collect();
            let idx = batches.iter().position(|b| b.table == flattened.join_table);
            let idx = match idx {
                Some(idx) => idx,
                None => {
                    batches.push(BatchDescriptor::new(
                        flattened.join_table,
                        BatchKind::Delete {
                            qualifier: QualifierTemplate::new(columns),
                        },
                    ));
                    batches.len() - 1
                }
            };
            batches[idx].push(BatchRow {
                id: self.permanent_id(&arc.source).clone(),
                values: Vec::new(),
                qualifier_values: values,
            });
        }
        Ok(batches)
    }

    /// Join-table column/value pairs for one arc: source key columns
    /// first, then target key columns.
    fn arc_row(
        &self,
        arc: &FlattenedArc,
    ) -> Result<(&'a relsync_core::FlattenedJoin, Vec<(String, Value)>)> {
        let entity = self
            .model
            .entity(&arc.entity)
            .ok_or_else(|| ValidationError::UnknownEntity {
                entity: arc.entity.clone(),
            })?;
        let rel = entity
            .relationship_named(&arc.relationship)
            .and_then(|r| r.flattened.as_ref())
            .ok_or_else(|| ValidationError::UnknownEntity {
                entity: format!("{}.{}", arc.entity, arc.relationship),
            })?;
        let mut row = Vec::new();
        for (endpoint, joins) in [
            (&arc.source, &rel.source_joins),
            (&arc.target, &rel.target_joins),
        ] {
            let permanent = self.permanent_id(endpoint);
            for join in joins {
                let value = permanent.key_value(join.source_column).cloned().ok_or_else(|| {
                    ValidationError::MissingMasterKey {
                        entity: arc.entity.clone(),
                        relationship: arc.relationship.clone(),
                    }
                })?;
                row.push((join.target_column.to_string(), value));
            }
        }
        Ok((rel, row))
    }

    fn endpoint_deleted(&self, id: &ObjectId) -> bool {
        self.store
            .object(id)
            .is_some_and(|o| o.state() == relsync_core::ObjectState::Deleted)
    }

    /// WHERE shape and values for one update/delete row: primary key
    /// columns from the identity, extended under optimistic locking by
    /// every column flagged for locking, valued from the retained
    /// snapshot.
    fn qualifier_for(
        &self,
        entity: &Entity,
        object: &TrackedObject,
    ) -> Result<(QualifierTemplate, Vec<Value>)> {
        let id = object.id();
        let mut columns: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        for attr in entity.primary_key_attributes() {
            columns.push(attr.column.to_string());
            values.push(id.key_value(attr.column).cloned().unwrap_or(Value::Null));
        }

        let optimistic = entity.lock_mode == LockMode::Optimistic;
        if optimistic {
            let mut locking: Vec<&str> = entity
                .attributes
                .iter()
                .filter(|a| a.used_for_locking && !a.primary_key)
                .map(|a| a.column)
                .collect();
            for rel in &entity.relationships {
                if rel.used_for_locking && !rel.to_many && !rel.is_flattened() {
                    locking.extend(rel.joins.iter().map(|j| j.source_column));
                }
            }
            let snapshot = object.snapshot().ok_or_else(|| {
                relsync_core::Error::from(ValidationError::MissingSnapshot { id: id.clone() })
            })?;
            for column in locking {
                if columns.iter().any(|c| c == column) {
                    continue;
                }
                columns.push(column.to_string());
                values.push(snapshot.get(column).cloned().unwrap_or(Value::Null));
            }
        }

        let null_columns: Vec<String> = columns
            .iter()
            .zip(&values)
            .filter(|(_, v)| v.is_null())
            .map(|(c, _)| c.clone())
            .collect();
        let qualifier = QualifierTemplate::new(columns)
            .with_null_columns(null_columns)
            .optimistic(optimistic);
        Ok((qualifier, values))
    }

    fn check_writable(&self, entity: &Entity, ids: &[ObjectId]) -> Result<()> {
        if entity.read_only && !ids.is_empty() {
            return Err(ValidationError::ReadOnlyEntity {
                entity: entity.name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn tracked(&self, id: &ObjectId) -> Result<&'a TrackedObject> {
        self.store
            .object(id)
            .ok_or_else(|| relsync_core::Error::Custom(format!("object {id} is not tracked")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relsync_core::{Attribute, FlattenedJoin, Join, Relationship};

    fn order_entity() -> Entity {
        Entity::new("Order", "orders")
            .attribute(Attribute::new("id", "id").primary_key(true).generated(true))
            .attribute(Attribute::new("status", "status"))
            .attribute(Attribute::new("note", "note"))
    }

    fn locked_order_entity() -> Entity {
        Entity::new("Order", "orders")
            .lock_mode(LockMode::Optimistic)
            .attribute(Attribute::new("id", "id").primary_key(true))
            .attribute(Attribute::new("status", "status").used_for_locking(true))
            .attribute(Attribute::new("note", "note"))
    }

    fn model_with(entity: Entity) -> EntityModel {
        let mut model = EntityModel::new();
        model.add(entity);
        model
    }

    fn perm(n: i64) -> ObjectId {
        ObjectId::permanent("Order", [("id".to_string(), Value::BigInt(n))])
    }

    fn committed_order(store: &mut ObjectStore, n: i64, status: &str) -> ObjectId {
        let id = perm(n);
        let columns = [
            ("id".to_string(), Value::BigInt(n)),
            ("status".to_string(), Value::Text(status.into())),
            ("note".to_string(), Value::Null),
        ];
        store.track_committed(
            id.clone(),
            "Order",
            [("status".to_string(), Value::Text(status.into()))],
            RowSnapshot::new(columns),
        );
        id
    }

    #[test]
    fn test_same_shape_rows_share_one_descriptor() {
        let entity = order_entity();
        let model = model_with(entity.clone());
        let mut store = ObjectStore::new();
        let mut resolved = HashMap::new();

        let inserts: Vec<_> = (0..3)
            .map(|i| {
                let id = store
                    .register_new("Order", [("status".to_string(), Value::Text("new".into()))]);
                resolved.insert(id.clone(), perm(100 + i));
                id
            })
            .collect();
        let updates: Vec<_> = (0..2)
            .map(|i| {
                let id = committed_order(&mut store, i, "open");
                store
                    .set_value(&id, "status", Value::Text("done".into()))
                    .unwrap();
                id
            })
            .collect();
        let deletes: Vec<_> = (10..13)
            .map(|i| {
                let id = committed_order(&mut store, i, "open");
                store.delete(&id).unwrap();
                id
            })
            .collect();

        let planner = BatchPlanner::new(&model, &store, &resolved);
        let mut unchanged = Vec::new();
        assert_eq!(planner.insert_batches(&entity, &inserts).unwrap().len(), 1);
        assert_eq!(
            planner
                .update_batches(&entity, &updates, &mut unchanged)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(planner.delete_batches(&entity, &deletes).unwrap().len(), 1);
        assert!(unchanged.is_empty());
    }

    #[test]
    fn test_insert_row_carries_resolved_key_and_values() {
        let entity = order_entity();
        let model = model_with(entity.clone());
        let mut store = ObjectStore::new();
        let id = store.register_new("Order", [("status".to_string(), Value::Text("new".into()))]);
        let mut resolved = HashMap::new();
        resolved.insert(id.clone(), perm(7));

        let planner = BatchPlanner::new(&model, &store, &resolved);
        let batches = planner.insert_batches(&entity, &[id]).unwrap();
        let BatchKind::Insert { columns } = &batches[0].kind else {
            panic!("expected insert");
        };
        assert_eq!(columns, &vec!["id".to_string(), "status".to_string(), "note".to_string()]);
        assert_eq!(
            batches[0].rows[0].values,
            vec![Value::BigInt(7), Value::Text("new".into()), Value::Null]
        );
        assert_eq!(batches[0].rows[0].id, perm(7));
    }

    #[test]
    fn test_fake_modification_yields_no_row() {
        let entity = order_entity();
        let model = model_with(entity.clone());
        let mut store = ObjectStore::new();
        let id = committed_order(&mut store, 1, "open");
        // Overwrite with the same value the snapshot already holds.
        store
            .set_value(&id, "status", Value::Text("open".into()))
            .unwrap();

        let resolved = HashMap::new();
        let planner = BatchPlanner::new(&model, &store, &resolved);
        let mut unchanged = Vec::new();
        let batches = planner
            .update_batches(&entity, &[id.clone()], &mut unchanged)
            .unwrap();
        assert!(batches.is_empty());
        assert_eq!(unchanged, vec![id]);
    }

    #[test]
    fn test_update_writes_only_changed_columns() {
        let entity = order_entity();
        let model = model_with(entity.clone());
        let mut store = ObjectStore::new();
        let id = committed_order(&mut store, 1, "open");
        store
            .set_value(&id, "status", Value::Text("done".into()))
            .unwrap();

        let resolved = HashMap::new();
        let planner = BatchPlanner::new(&model, &store, &resolved);
        let mut unchanged = Vec::new();
        let batches = planner.update_batches(&entity, &[id], &mut unchanged).unwrap();
        let BatchKind::Update { set_columns, qualifier } = &batches[0].kind else {
            panic!("expected update");
        };
        assert_eq!(set_columns, &vec!["status".to_string()]);
        assert_eq!(qualifier.columns, vec!["id".to_string()]);
        assert!(!qualifier.optimistic);
        assert_eq!(batches[0].rows[0].qualifier_values, vec![Value::BigInt(1)]);
    }

    #[test]
    fn test_optimistic_qualifier_uses_snapshot_values() {
        let entity = locked_order_entity();
        let model = model_with(entity.clone());
        let mut store = ObjectStore::new();
        let id = committed_order(&mut store, 1, "open");
        store
            .set_value(&id, "status", Value::Text("done".into()))
            .unwrap();

        let resolved = HashMap::new();
        let planner = BatchPlanner::new(&model, &store, &resolved);
        let mut unchanged = Vec::new();
        let batches = planner.update_batches(&entity, &[id], &mut unchanged).unwrap();
        let BatchKind::Update { qualifier, .. } = &batches[0].kind else {
            panic!("expected update");
        };
        assert!(qualifier.optimistic);
        assert_eq!(
            qualifier.columns,
            vec!["id".to_string(), "status".to_string()]
        );
        // The qualifier carries the snapshot's value, not the new one.
        assert_eq!(
            batches[0].rows[0].qualifier_values,
            vec![Value::BigInt(1), Value::Text("open".into())]
        );
    }

    #[test]
    fn test_null_qualifier_values_split_batches() {
        let entity = Entity::new("Order", "orders")
            .lock_mode(LockMode::Optimistic)
            .attribute(Attribute::new("id", "id").primary_key(true))
            .attribute(Attribute::new("note", "note").used_for_locking(true));
        let model = model_with(entity.clone());
        let mut store = ObjectStore::new();

        let with_note = perm(1);
        store.track_committed(
            with_note.clone(),
            "Order",
            [],
            RowSnapshot::new([
                ("id".to_string(), Value::BigInt(1)),
                ("note".to_string(), Value::Text("x".into())),
            ]),
        );
        store.delete(&with_note).unwrap();
        let without_note = perm(2);
        store.track_committed(
            without_note.clone(),
            "Order",
            [],
            RowSnapshot::new([
                ("id".to_string(), Value::BigInt(2)),
                ("note".to_string(), Value::Null),
            ]),
        );
        store.delete(&without_note).unwrap();

        let resolved = HashMap::new();
        let planner = BatchPlanner::new(&model, &store, &resolved);
        let batches = planner
            .delete_batches(&entity, &[with_note, without_note])
            .unwrap();
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_missing_snapshot_under_locking_is_fatal() {
        let entity = locked_order_entity();
        let model = model_with(entity.clone());
        let mut store = ObjectStore::new();
        let id = perm(1);
        // Hollow-tracked object: known identity, no retained snapshot.
        store.track_hollow(id.clone(), "Order");
        store.delete(&id).unwrap();

        let resolved = HashMap::new();
        let planner = BatchPlanner::new(&model, &store, &resolved);
        let err = planner.delete_batches(&entity, &[id]).unwrap_err();
        assert!(err.to_string().contains("no retained snapshot"));
    }

    #[test]
    fn test_read_only_entity_is_fatal_before_any_row() {
        let entity = order_entity().read_only(true);
        let model = model_with(entity.clone());
        let mut store = ObjectStore::new();
        let id = store.register_new("Order", []);

        let resolved = HashMap::new();
        let planner = BatchPlanner::new(&model, &store, &resolved);
        let err = planner.insert_batches(&entity, &[id]).unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn test_never_persisted_delete_is_skipped() {
        let entity = order_entity();
        let model = model_with(entity.clone());
        let store = ObjectStore::new();
        let resolved = HashMap::new();
        let planner = BatchPlanner::new(&model, &store, &resolved);
        let batches = planner
            .delete_batches(&entity, &[ObjectId::temporary("Order")])
            .unwrap();
        assert!(batches.is_empty());
    }

    fn flattened_model() -> EntityModel {
        let mut model = EntityModel::new();
        model.add(
            Entity::new("Order", "orders")
                .attribute(Attribute::new("id", "id").primary_key(true))
                .relationship(Relationship::flattened(
                    "categories",
                    "Category",
                    FlattenedJoin {
                        join_table: "order_categories",
                        source_joins: vec![Join::new("id", "order_id")],
                        target_joins: vec![Join::new("id", "category_id")],
                    },
                )),
        );
        model.add(
            Entity::new("Category", "categories")
                .attribute(Attribute::new("id", "id").primary_key(true)),
        );
        model
    }

    #[test]
    fn test_flattened_arcs_group_per_join_table() {
        let model = flattened_model();
        let mut store = ObjectStore::new();
        let cat = ObjectId::permanent("Category", [("id".to_string(), Value::BigInt(9))]);
        store.link_flattened("Order", "categories", perm(1), cat.clone());
        store.link_flattened("Order", "categories", perm(2), cat.clone());
        store.unlink_flattened("Order", "categories", perm(3), cat);

        let resolved = HashMap::new();
        let planner = BatchPlanner::new(&model, &store, &resolved);
        let inserts = planner.flattened_insert_batches(store.arcs()).unwrap();
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].table, "order_categories");
        assert_eq!(inserts[0].rows.len(), 2);
        assert_eq!(
            inserts[0].rows[0].values,
            vec![Value::BigInt(1), Value::BigInt(9)]
        );

        let deletes = planner.flattened_delete_batches(store.arcs()).unwrap();
        assert_eq!(deletes.len(), 1);
        assert_eq!(
            deletes[0].rows[0].qualifier_values,
            vec![Value::BigInt(3), Value::BigInt(9)]
        );
    }

    #[test]
    fn test_flattened_insert_resolves_temporary_endpoints() {
        let model = flattened_model();
        let mut store = ObjectStore::new();
        let order = store.register_new("Order", []);
        let cat = ObjectId::permanent("Category", [("id".to_string(), Value::BigInt(9))]);
        store.link_flattened("Order", "categories", order.clone(), cat);

        let mut resolved = HashMap::new();
        resolved.insert(order, perm(4));
        let planner = BatchPlanner::new(&model, &store, &resolved);
        let inserts = planner.flattened_insert_batches(store.arcs()).unwrap();
        assert_eq!(
            inserts[0].rows[0].values,
            vec![Value::BigInt(4), Value::BigInt(9)]
        );
    }

    #[test]
    fn test_flattened_arc_with_deleted_endpoint_is_dropped() {
        let model = flattened_model();
        let mut store = ObjectStore::new();
        let order = perm(1);
        store.track_committed(order.clone(), "Order", [], RowSnapshot::default());
        let cat = ObjectId::permanent("Category", [("id".to_string(), Value::BigInt(9))]);
        store.link_flattened("Order", "categories", order.clone(), cat);
        store.delete(&order).unwrap();

        let resolved = HashMap::new();
        let planner = BatchPlanner::new(&model, &store, &resolved);
        assert!(planner.flattened_insert_batches(store.arcs()).unwrap().is_empty());
    }
}
