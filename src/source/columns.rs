//! Column structure discovery: kinds and role classification.
//!
//! Column roles (timestamp, key) are inferred from column names with
//! substring heuristics. The heuristics live behind the `RoleClassifier`
//! trait so tests can substitute deterministic or adversarial column sets
//! without touching file I/O.

use snafu::prelude::*;

use crate::error::{NoKeyColumnSnafu, NoTimestampColumnSnafu, SourceError};

/// Semantic kind of a source column, inferred from the SQLite declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    Temporal,
    Blob,
}

impl ColumnKind {
    /// Infer the kind from a SQLite declared type (e.g. "INTEGER",
    /// "VARCHAR(20)", "TIMESTAMP"). Follows SQLite's own affinity rules in
    /// spirit: substring matching, falling back to text.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_uppercase();
        if upper.contains("INT") {
            ColumnKind::Integer
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            ColumnKind::Real
        } else if upper.contains("TIME") || upper.contains("DATE") {
            ColumnKind::Temporal
        } else if upper.contains("BLOB") {
            ColumnKind::Blob
        } else {
            ColumnKind::Text
        }
    }
}

/// Functional role of a column within the synchronized table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Timestamp,
    Key,
    Ordinary,
}

/// A discovered source column.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    pub kind: ColumnKind,
    pub role: ColumnRole,
}

/// Strategy for classifying column roles from names.
pub trait RoleClassifier: Send + Sync {
    /// Whether this column name designates the record timestamp.
    fn is_timestamp(&self, name: &str) -> bool;
    /// Whether this column name designates the record key.
    fn is_key(&self, name: &str) -> bool;
}

/// Default name-substring heuristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringClassifier;

impl RoleClassifier for SubstringClassifier {
    fn is_timestamp(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        lower.contains("time") || lower.contains("date")
    }

    fn is_key(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        ["key", "id", "register", "name"]
            .iter()
            .any(|needle| lower.contains(needle))
    }
}

/// The discovered structure of the table of interest.
///
/// Built once from the first conforming source file; later files in the
/// same run are read against this layout without re-validation.
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    pub timestamp_idx: usize,
    pub key_idx: usize,
}

impl TableLayout {
    /// Classify discovered columns and locate the timestamp and key roles.
    ///
    /// The first column matching each heuristic wins; the key heuristic
    /// skips the column already chosen as timestamp so the composite
    /// constraint never degenerates to a single column. Missing roles are
    /// fatal for the run.
    pub fn classify(
        table: String,
        raw_columns: Vec<(String, ColumnKind)>,
        classifier: &dyn RoleClassifier,
    ) -> Result<Self, SourceError> {
        let timestamp_idx = raw_columns
            .iter()
            .position(|(name, _)| classifier.is_timestamp(name))
            .context(NoTimestampColumnSnafu { table: &table })?;
        let key_idx = raw_columns
            .iter()
            .enumerate()
            .position(|(i, (name, _))| i != timestamp_idx && classifier.is_key(name))
            .context(NoKeyColumnSnafu { table: &table })?;

        let columns = raw_columns
            .into_iter()
            .enumerate()
            .map(|(i, (name, kind))| {
                let role = if i == timestamp_idx {
                    ColumnRole::Timestamp
                } else if i == key_idx {
                    ColumnRole::Key
                } else {
                    ColumnRole::Ordinary
                };
                ColumnDescriptor { name, kind, role }
            })
            .collect();

        Ok(Self {
            table,
            columns,
            timestamp_idx,
            key_idx,
        })
    }

    /// Name of the timestamp column.
    pub fn timestamp_column(&self) -> &str {
        &self.columns[self.timestamp_idx].name
    }

    /// Name of the key column.
    pub fn key_column(&self) -> &str {
        &self.columns[self.key_idx].name
    }

    /// Kind of the timestamp column.
    pub fn timestamp_kind(&self) -> ColumnKind {
        self.columns[self.timestamp_idx].kind
    }

    /// Column names in discovery order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(columns: &[(&str, &str)]) -> Result<TableLayout, SourceError> {
        let raw = columns
            .iter()
            .map(|(name, declared)| (name.to_string(), ColumnKind::from_declared(declared)))
            .collect();
        TableLayout::classify("readings".to_string(), raw, &SubstringClassifier)
    }

    #[test]
    fn test_kind_from_declared_type() {
        assert_eq!(ColumnKind::from_declared("INTEGER"), ColumnKind::Integer);
        assert_eq!(ColumnKind::from_declared("BIGINT"), ColumnKind::Integer);
        assert_eq!(ColumnKind::from_declared("REAL"), ColumnKind::Real);
        assert_eq!(ColumnKind::from_declared("double"), ColumnKind::Real);
        assert_eq!(ColumnKind::from_declared("TIMESTAMP"), ColumnKind::Temporal);
        assert_eq!(ColumnKind::from_declared("DATETIME"), ColumnKind::Temporal);
        assert_eq!(ColumnKind::from_declared("VARCHAR(20)"), ColumnKind::Text);
        assert_eq!(ColumnKind::from_declared("BLOB"), ColumnKind::Blob);
        assert_eq!(ColumnKind::from_declared(""), ColumnKind::Text);
    }

    #[test]
    fn test_roles_are_located() {
        let layout = layout(&[
            ("register_id", "INTEGER"),
            ("sample_time", "REAL"),
            ("humidity", "REAL"),
        ])
        .unwrap();

        assert_eq!(layout.timestamp_column(), "sample_time");
        assert_eq!(layout.key_column(), "register_id");
        assert_eq!(layout.columns[2].role, ColumnRole::Ordinary);
    }

    #[test]
    fn test_missing_timestamp_column_is_fatal() {
        let err = layout(&[("register_id", "INTEGER"), ("humidity", "REAL")]).unwrap_err();
        assert!(matches!(err, SourceError::NoTimestampColumn { .. }));
    }

    #[test]
    fn test_missing_key_column_is_fatal() {
        let err = layout(&[("sample_time", "REAL"), ("humidity", "REAL")]).unwrap_err();
        assert!(matches!(err, SourceError::NoKeyColumn { .. }));
    }

    #[test]
    fn test_key_heuristic_skips_the_timestamp_column() {
        // "key_time" matches both heuristics; the key role must land on a
        // different column so the composite constraint stays two columns.
        let layout = layout(&[("key_time", "REAL"), ("sensor_name", "TEXT")]).unwrap();
        assert_eq!(layout.timestamp_column(), "key_time");
        assert_eq!(layout.key_column(), "sensor_name");
    }

    #[test]
    fn test_classifier_is_injectable() {
        struct Exact;
        impl RoleClassifier for Exact {
            fn is_timestamp(&self, name: &str) -> bool {
                name == "ts"
            }
            fn is_key(&self, name: &str) -> bool {
                name == "k"
            }
        }

        let raw = vec![
            ("ts".to_string(), ColumnKind::Real),
            ("k".to_string(), ColumnKind::Text),
        ];
        let layout = TableLayout::classify("t".to_string(), raw, &Exact).unwrap();
        assert_eq!(layout.timestamp_idx, 0);
        assert_eq!(layout.key_idx, 1);
    }
}
