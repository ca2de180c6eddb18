//! Batch descriptors: the abstract DML units handed to a store adapter.
//!
//! A descriptor groups rows that share one generated-SQL shape: same
//! table, same column signature, and the same set of null-valued
//! qualifier columns (NULL needs `IS NULL`, not `= ?`, so rows with
//! different null sets cannot share a statement). The adapter layer
//! translates a descriptor into dialect-specific SQL; this crate never
//! builds SQL text.

use crate::ident::ObjectId;
use crate::value::Value;

/// Template describing the qualifier (WHERE shape) shared by every row
/// of an update or delete batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifierTemplate {
    /// Qualifier column names, primary key first, then locking columns.
    pub columns: Vec<String>,
    /// The subset of `columns` whose value is NULL in every row of the
    /// batch. Part of the batch signature.
    pub null_columns: Vec<String>,
    /// Whether zero affected rows must be treated as a lock conflict.
    pub optimistic: bool,
}

impl QualifierTemplate {
    /// Create a non-locking qualifier over the given columns.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            null_columns: Vec::new(),
            optimistic: false,
        }
    }

    /// Mark this qualifier as optimistic.
    pub fn optimistic(mut self, value: bool) -> Self {
        self.optimistic = value;
        self
    }

    /// Record the null-valued column subset.
    pub fn with_null_columns(mut self, mut null_columns: Vec<String>) -> Self {
        null_columns.sort_unstable();
        self.null_columns = null_columns;
        self
    }
}

/// Direction-specific shape of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchKind {
    /// INSERT: every row supplies a value per column.
    Insert {
        /// Inserted column names, in parameter order.
        columns: Vec<String>,
    },
    /// UPDATE: every row supplies set values plus qualifier values.
    Update {
        /// Updated column names, in parameter order.
        set_columns: Vec<String>,
        /// Shared WHERE shape.
        qualifier: QualifierTemplate,
    },
    /// DELETE: every row supplies qualifier values only.
    Delete {
        /// Shared WHERE shape.
        qualifier: QualifierTemplate,
    },
}

impl BatchKind {
    /// Whether this batch carries an optimistic qualifier.
    pub fn is_optimistic(&self) -> bool {
        match self {
            BatchKind::Insert { .. } => false,
            BatchKind::Update { qualifier, .. } | BatchKind::Delete { qualifier } => {
                qualifier.optimistic
            }
        }
    }
}

/// One logical row within a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    /// Identity of the object this row belongs to, used to report
    /// per-row lock conflicts and to advance object state post-commit.
    pub id: ObjectId,
    /// Values for the insert/set columns, in column order. Empty for
    /// deletes.
    pub values: Vec<Value>,
    /// Values for the qualifier columns, in qualifier-column order.
    /// Empty for inserts.
    pub qualifier_values: Vec<Value>,
}

/// A grouped set of same-shape DML operations for one physical table.
///
/// Created by the batch builder, consumed exactly once by execution.
#[derive(Debug, Clone)]
pub struct BatchDescriptor {
    /// Target physical table.
    pub table: String,
    /// Direction and column shape.
    pub kind: BatchKind,
    /// Ordered row parameter sets.
    pub rows: Vec<BatchRow>,
}

impl BatchDescriptor {
    /// Create an empty descriptor.
    pub fn new(table: impl Into<String>, kind: BatchKind) -> Self {
        Self {
            table: table.into(),
            kind,
            rows: Vec::new(),
        }
    }

    /// Append one row.
    pub fn push(&mut self, row: BatchRow) {
        self.rows.push(row);
    }

    /// Number of rows in this batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether a zero affected-row count for a row of this batch must
    /// fail the commit.
    pub fn is_optimistic(&self) -> bool {
        self.kind.is_optimistic()
    }
}
