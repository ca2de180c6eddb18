//! Object identity and persistence state.
//!
//! Every tracked object carries an [`ObjectId`]: either a permanent id
//! holding the actual primary-key column values, or a temporary token
//! minted at registration time. A temporary id is replaced by its
//! permanent counterpart exactly once, during commit, and every holder
//! of the old id is re-keyed atomically by the object store.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter for temporary id tokens.
static NEXT_TEMP_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Identity of a tracked object.
///
/// The key map of a permanent id is ordered (`BTreeMap`) so that two
/// ids built from the same columns in different order compare and hash
/// identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectId {
    /// Permanent identity: primary-key column name to value.
    /// Immutable once assigned.
    Permanent {
        /// Entity name this id belongs to.
        entity: String,
        /// Primary-key column values.
        key: BTreeMap<String, Value>,
    },
    /// Temporary identity assigned at registration, resolved to a
    /// permanent id during commit.
    Temporary {
        /// Entity name this id belongs to.
        entity: String,
        /// Opaque token, unique within the process.
        token: u64,
    },
}

impl ObjectId {
    /// Mint a fresh temporary id for the given entity.
    pub fn temporary(entity: impl Into<String>) -> Self {
        ObjectId::Temporary {
            entity: entity.into(),
            token: NEXT_TEMP_TOKEN.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Build a permanent id from primary-key column/value pairs.
    pub fn permanent(
        entity: impl Into<String>,
        pairs: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        ObjectId::Permanent {
            entity: entity.into(),
            key: pairs.into_iter().collect(),
        }
    }

    /// Check whether this id is still temporary.
    pub fn is_temporary(&self) -> bool {
        matches!(self, ObjectId::Temporary { .. })
    }

    /// The entity name this id belongs to.
    pub fn entity(&self) -> &str {
        match self {
            ObjectId::Permanent { entity, .. } | ObjectId::Temporary { entity, .. } => entity,
        }
    }

    /// Look up one primary-key column value. `None` for temporary ids
    /// and for columns not part of the key.
    pub fn key_value(&self, column: &str) -> Option<&Value> {
        match self {
            ObjectId::Permanent { key, .. } => key.get(column),
            ObjectId::Temporary { .. } => None,
        }
    }

    /// The full key map of a permanent id.
    pub fn key_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            ObjectId::Permanent { key, .. } => Some(key),
            ObjectId::Temporary { .. } => None,
        }
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectId::Permanent { entity, key } => {
                write!(f, "{entity}{{")?;
                for (i, (col, val)) in key.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{col}={val}")?;
                }
                write!(f, "}}")
            }
            ObjectId::Temporary { entity, token } => write!(f, "{entity}#tmp{token}"),
        }
    }
}

/// Persistence state of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Not registered with any store; ignored by commit.
    Transient,
    /// Registered, pending INSERT.
    New,
    /// Known identity but no fetched attribute values; ignored by commit.
    Hollow,
    /// In sync with the last committed row.
    Committed,
    /// Attribute or relationship values changed, pending UPDATE.
    Modified,
    /// Marked for deletion, pending DELETE.
    Deleted,
}

impl ObjectState {
    /// Does this object have (or expect) a database row?
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            ObjectState::New
                | ObjectState::Committed
                | ObjectState::Modified
                | ObjectState::Deleted
        )
    }

    /// Does this object contribute work to a commit?
    pub fn dirty(&self) -> bool {
        matches!(
            self,
            ObjectState::New | ObjectState::Modified | ObjectState::Deleted
        )
    }

    /// The state this object moves to after a successful commit.
    pub fn after_commit(self) -> ObjectState {
        match self {
            ObjectState::New | ObjectState::Modified => ObjectState::Committed,
            ObjectState::Deleted => ObjectState::Transient,
            other => other,
        }
    }
}
