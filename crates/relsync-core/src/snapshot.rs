//! Row snapshots: last-known persisted column values per object identity.
//!
//! Snapshots drive two things: dirty-column detection during update
//! batch construction, and optimistic-lock qualifier values. The
//! version counter detects conflicting concurrent updates to the cache
//! entry itself, not to the database row.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Last-known persisted column map for one object identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSnapshot {
    columns: HashMap<String, Value>,
    version: u64,
}

impl RowSnapshot {
    /// Build a snapshot from column/value pairs.
    pub fn new(columns: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            version: 0,
        }
    }

    /// Look up one column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// The full column map.
    pub fn columns(&self) -> &HashMap<String, Value> {
        &self.columns
    }

    /// Number of columns captured.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when no columns are captured.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Cache-level version counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Stamp a new cache version onto this snapshot.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Column names whose values differ from `prior`, including columns
    /// present on only one side. Sorted for deterministic output.
    pub fn diff(&self, prior: &RowSnapshot) -> Vec<String> {
        let mut changed: Vec<String> = self
            .columns
            .iter()
            .filter(|(col, val)| prior.columns.get(*col) != Some(val))
            .map(|(col, _)| col.clone())
            .collect();
        for col in prior.columns.keys() {
            if !self.columns.contains_key(col) {
                changed.push(col.clone());
            }
        }
        changed.sort_unstable();
        changed
    }
}

impl FromIterator<(String, Value)> for RowSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(pairs: &[(&str, Value)]) -> RowSnapshot {
        RowSnapshot::new(pairs.iter().map(|(c, v)| ((*c).to_string(), v.clone())))
    }

    #[test]
    fn test_diff_detects_changed_column() {
        let before = snap(&[("name", Value::Text("a".into())), ("qty", Value::Int(1))]);
        let after = snap(&[("name", Value::Text("b".into())), ("qty", Value::Int(1))]);
        assert_eq!(after.diff(&before), vec!["name".to_string()]);
    }

    #[test]
    fn test_diff_of_identical_snapshots_is_empty() {
        let a = snap(&[("name", Value::Text("a".into()))]);
        assert!(a.diff(&a.clone()).is_empty());
    }

    #[test]
    fn test_diff_includes_added_and_removed_columns() {
        let before = snap(&[("old_col", Value::Int(1))]);
        let after = snap(&[("new_col", Value::Int(2))]);
        assert_eq!(
            after.diff(&before),
            vec!["new_col".to_string(), "old_col".to_string()]
        );
    }

    #[test]
    fn test_diff_against_empty_is_everything() {
        let after = snap(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        assert_eq!(
            after.diff(&RowSnapshot::default()),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_version_stamping() {
        let s = snap(&[("a", Value::Int(1))]).with_version(7);
        assert_eq!(s.version(), 7);
        assert_eq!(s.get("a"), Some(&Value::Int(1)));
    }
}
