//! Destination schema reconciliation.
//!
//! Compares the destination table structure against the columns discovered
//! from the source and produces a strictly additive delta: create the table
//! on first run (with the composite uniqueness constraint the bulk loader's
//! conflict policy depends on), or add missing columns as nullable.
//! Existing columns are never removed, renamed or migrated; a type mismatch
//! is detected and logged, nothing more.

use tracing::{debug, info, warn};

use crate::emit;
use crate::error::DestinationError;
use crate::metrics::events::SchemaColumnsAdded;
use crate::sink::Destination;
use crate::source::{ColumnKind, TableLayout};

/// Map a source column kind to its destination type. Deterministic and total.
pub fn postgres_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Integer => "BIGINT",
        ColumnKind::Real => "DOUBLE PRECISION",
        ColumnKind::Text => "TEXT",
        ColumnKind::Temporal => "TIMESTAMP",
        ColumnKind::Blob => "BYTEA",
    }
}

/// Spelling of the mapped type as reported by `information_schema.columns`.
pub(crate) fn information_schema_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Integer => "bigint",
        ColumnKind::Real => "double precision",
        ColumnKind::Text => "text",
        ColumnKind::Temporal => "timestamp without time zone",
        ColumnKind::Blob => "bytea",
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// An existing destination column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestColumn {
    pub name: String,
    pub data_type: String,
}

/// A column to be created on the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub pg_type: &'static str,
}

/// A detected type mismatch, logged and left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaConflict {
    pub column: String,
    pub existing: String,
    pub expected: &'static str,
}

/// The structural change required to accept the discovered columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDelta {
    /// Table does not exist: create it with all discovered columns and a
    /// composite uniqueness constraint over (key column, timestamp column).
    CreateTable {
        columns: Vec<ColumnDef>,
        key_column: String,
        timestamp_column: String,
    },
    /// Add these columns, nullable, to the existing table.
    AddColumns(Vec<ColumnDef>),
    /// Destination already matches the discovered structure.
    Noop,
}

/// Result of reconciling destination structure against discovered columns.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub delta: SchemaDelta,
    pub conflicts: Vec<SchemaConflict>,
}

/// Compute the additive delta between an existing destination table
/// (`None` when absent) and the discovered source layout.
pub fn reconcile(existing: Option<&[DestColumn]>, layout: &TableLayout) -> Reconciliation {
    let Some(existing) = existing else {
        let columns = layout
            .columns
            .iter()
            .map(|c| ColumnDef {
                name: c.name.clone(),
                pg_type: postgres_type(c.kind),
            })
            .collect();
        return Reconciliation {
            delta: SchemaDelta::CreateTable {
                columns,
                key_column: layout.key_column().to_string(),
                timestamp_column: layout.timestamp_column().to_string(),
            },
            conflicts: Vec::new(),
        };
    };

    let mut additions = Vec::new();
    let mut conflicts = Vec::new();
    for column in &layout.columns {
        match existing.iter().find(|c| c.name == column.name) {
            None => additions.push(ColumnDef {
                name: column.name.clone(),
                pg_type: postgres_type(column.kind),
            }),
            Some(dest) => {
                let expected = information_schema_type(column.kind);
                if dest.data_type != expected {
                    conflicts.push(SchemaConflict {
                        column: column.name.clone(),
                        existing: dest.data_type.clone(),
                        expected: postgres_type(column.kind),
                    });
                }
            }
        }
    }
    // Columns present only in the destination are left untouched.

    let delta = if additions.is_empty() {
        SchemaDelta::Noop
    } else {
        SchemaDelta::AddColumns(additions)
    };
    Reconciliation { delta, conflicts }
}

/// Reconciles and applies schema changes for one destination table.
pub struct SchemaSynchronizer {
    table: String,
}

impl SchemaSynchronizer {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Bring the destination table structure up to date with the discovered
    /// layout. Applying an already-reconciled schema is a no-op.
    pub async fn synchronize<D: Destination + ?Sized>(
        &self,
        destination: &mut D,
        layout: &TableLayout,
    ) -> Result<(), DestinationError> {
        let existing = destination.table_columns(&self.table).await?;
        let reconciliation = reconcile(existing.as_deref(), layout);

        for conflict in &reconciliation.conflicts {
            warn!(
                "Schema conflict on '{}'.'{}': destination is {}, source infers {}; \
                 leaving column unchanged",
                self.table, conflict.column, conflict.existing, conflict.expected
            );
        }

        match reconciliation.delta {
            SchemaDelta::CreateTable {
                columns,
                key_column,
                timestamp_column,
            } => {
                destination
                    .create_table(&self.table, &columns, &key_column, &timestamp_column)
                    .await?;
                info!(
                    "Created table '{}' with {} columns and composite key ({}, {})",
                    self.table,
                    columns.len(),
                    key_column,
                    timestamp_column
                );
            }
            SchemaDelta::AddColumns(columns) => {
                destination.add_columns(&self.table, &columns).await?;
                for column in &columns {
                    info!(
                        "Added column '{}' {} to '{}'",
                        column.name, column.pg_type, self.table
                    );
                }
                emit!(SchemaColumnsAdded {
                    count: columns.len() as u64
                });
            }
            SchemaDelta::Noop => {
                debug!("Table '{}' structure is up to date", self.table);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SubstringClassifier, TableLayout};

    fn layout() -> TableLayout {
        TableLayout::classify(
            "sensor_readings".to_string(),
            vec![
                ("register_id".to_string(), ColumnKind::Integer),
                ("sample_time".to_string(), ColumnKind::Real),
                ("humidity".to_string(), ColumnKind::Real),
            ],
            &SubstringClassifier,
        )
        .unwrap()
    }

    fn existing(columns: &[(&str, &str)]) -> Vec<DestColumn> {
        columns
            .iter()
            .map(|(name, data_type)| DestColumn {
                name: name.to_string(),
                data_type: data_type.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_missing_table_creates_with_composite_key() {
        let reconciliation = reconcile(None, &layout());
        match reconciliation.delta {
            SchemaDelta::CreateTable {
                columns,
                key_column,
                timestamp_column,
            } => {
                assert_eq!(columns.len(), 3);
                assert_eq!(key_column, "register_id");
                assert_eq!(timestamp_column, "sample_time");
                assert_eq!(columns[0].pg_type, "BIGINT");
                assert_eq!(columns[1].pg_type, "DOUBLE PRECISION");
            }
            other => panic!("expected CreateTable, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_column_is_added_with_mapped_type() {
        let dest = existing(&[
            ("register_id", "bigint"),
            ("sample_time", "double precision"),
        ]);
        let reconciliation = reconcile(Some(&dest), &layout());
        assert_eq!(
            reconciliation.delta,
            SchemaDelta::AddColumns(vec![ColumnDef {
                name: "humidity".to_string(),
                pg_type: "DOUBLE PRECISION",
            }])
        );
        assert!(reconciliation.conflicts.is_empty());
    }

    #[test]
    fn test_reconcile_twice_is_a_noop() {
        let dest = existing(&[
            ("register_id", "bigint"),
            ("sample_time", "double precision"),
            ("humidity", "double precision"),
        ]);
        let reconciliation = reconcile(Some(&dest), &layout());
        assert_eq!(reconciliation.delta, SchemaDelta::Noop);
    }

    #[test]
    fn test_type_mismatch_is_reported_not_migrated() {
        let dest = existing(&[
            ("register_id", "text"),
            ("sample_time", "double precision"),
            ("humidity", "double precision"),
        ]);
        let reconciliation = reconcile(Some(&dest), &layout());
        assert_eq!(reconciliation.delta, SchemaDelta::Noop);
        assert_eq!(
            reconciliation.conflicts,
            vec![SchemaConflict {
                column: "register_id".to_string(),
                existing: "text".to_string(),
                expected: "BIGINT",
            }]
        );
    }

    #[test]
    fn test_destination_only_columns_are_left_untouched() {
        let dest = existing(&[
            ("register_id", "bigint"),
            ("sample_time", "double precision"),
            ("humidity", "double precision"),
            ("ingested_at", "timestamp without time zone"),
        ]);
        let reconciliation = reconcile(Some(&dest), &layout());
        assert_eq!(reconciliation.delta, SchemaDelta::Noop);
    }

    #[test]
    fn test_quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
