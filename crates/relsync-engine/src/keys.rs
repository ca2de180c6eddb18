//! Permanent-id resolution for freshly inserted objects.
//!
//! Every primary-key column of a new object is filled from, in order:
//! a value propagated from a master object through a key-feeding to-one
//! relationship, a value the object already carries, or the node's key
//! generator. At most one column per entity may fall through to the
//! generator. Masters resolve before dependents because entities are
//! processed in insert order, so a still-temporary master is a hard
//! ordering bug and aborts the commit.

use crate::store::ObjectStore;
use relsync_core::{DataNode, Entity, ObjectId, Result, ValidationError, Value};
use std::collections::{BTreeMap, HashMap};

/// Resolve permanent ids for the new objects of one entity.
///
/// `resolved` maps temporary to permanent ids accumulated across the
/// whole commit; masters resolved by earlier calls are looked up
/// through it, and this call adds its own resolutions to it.
#[tracing::instrument(skip_all, fields(entity = entity.name))]
pub fn resolve_permanent_ids(
    store: &ObjectStore,
    entity: &Entity,
    node: &DataNode,
    ids: &[ObjectId],
    resolved: &mut HashMap<ObjectId, ObjectId>,
) -> Result<()> {
    for id in ids {
        if !id.is_temporary() {
            continue;
        }
        let mut key: BTreeMap<String, Value> = BTreeMap::new();
        let mut generated = false;
        for attr in entity.primary_key_attributes() {
            // The master's key is authoritative for the columns its
            // joins feed, even when the object carries a stale value.
            if let Some(value) = propagated_value(store, entity, id, attr.column, resolved)? {
                key.insert(attr.column.to_string(), value);
                continue;
            }
            let own = store
                .object(id)
                .and_then(|o| o.value(attr.name))
                .filter(|v| !v.is_null());
            if let Some(value) = own {
                key.insert(attr.column.to_string(), value.clone());
                continue;
            }
            if generated {
                return Err(ValidationError::MultipleGeneratedKeys {
                    entity: entity.name.to_string(),
                    column: attr.column.to_string(),
                }
                .into());
            }
            let value = node.key_generator.generate_key(entity.table)?;
            tracing::trace!(id = %id, column = attr.column, value = %value, "generated key");
            key.insert(attr.column.to_string(), value);
            generated = true;
        }
        let permanent = ObjectId::permanent(entity.name, key);
        tracing::debug!(old = %id, new = %permanent, "resolved permanent id");
        resolved.insert(id.clone(), permanent);
    }
    Ok(())
}

/// Value for one primary-key column propagated from a master object,
/// when a key-feeding relationship covers the column.
fn propagated_value(
    store: &ObjectStore,
    entity: &Entity,
    id: &ObjectId,
    column: &str,
    resolved: &HashMap<ObjectId, ObjectId>,
) -> Result<Option<Value>> {
    for rel in entity.master_relationships() {
        let Some(join) = rel.joins.iter().find(|j| j.source_column == column) else {
            continue;
        };
        let missing_master = || {
            ValidationError::MissingMasterKey {
                entity: entity.name.to_string(),
                relationship: rel.name.to_string(),
            }
            .into()
        };
        let Some(object) = store.object(id) else {
            return Err(missing_master());
        };
        let Some(target) = object.to_one_target(rel.name) else {
            return Err(missing_master());
        };
        let master = resolved.get(target).unwrap_or(target);
        let Some(value) = master.key_value(join.target_column) else {
            return Err(missing_master());
        };
        return Ok(Some(value.clone()));
    }
    Ok(None)
}
