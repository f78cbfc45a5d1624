//! Destination abstraction and bulk loading.

pub mod postgres;

pub use postgres::PostgresDestination;

use async_trait::async_trait;

use crate::error::DestinationError;
use crate::schema::{ColumnDef, DestColumn};
use crate::source::{Row, TableLayout};

/// Result of one bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Rows newly committed to the destination.
    pub inserted: u64,
    /// Rows silently skipped because their (key, timestamp) composite
    /// already exists.
    pub skipped: u64,
    /// Rows excluded from the batch because a cell would not coerce to the
    /// destination column type.
    pub rejected: u64,
}

/// The destination database, owned by the orchestrator for the duration of
/// a cycle.
///
/// A trait seam so orchestrator behavior (retry, backoff, checkpoint
/// advancement) is testable without a live server.
#[async_trait]
pub trait Destination: Send {
    /// Cheap connectivity check, used on cycles with no data to move.
    async fn ping(&mut self) -> Result<(), DestinationError>;

    /// Columns of the given table, or `None` when the table does not exist.
    async fn table_columns(
        &mut self,
        table: &str,
    ) -> Result<Option<Vec<DestColumn>>, DestinationError>;

    /// Create the table with a composite primary key over
    /// (key column, timestamp column).
    async fn create_table(
        &mut self,
        table: &str,
        columns: &[ColumnDef],
        key_column: &str,
        timestamp_column: &str,
    ) -> Result<(), DestinationError>;

    /// Add nullable columns to an existing table.
    async fn add_columns(
        &mut self,
        table: &str,
        columns: &[ColumnDef],
    ) -> Result<(), DestinationError>;

    /// Commit rows in a single transaction, skipping (key, timestamp)
    /// duplicates. Either every non-duplicate row commits, or the entire
    /// transaction rolls back and the cycle reports failure.
    async fn load(
        &mut self,
        table: &str,
        layout: &TableLayout,
        rows: Vec<Row>,
    ) -> Result<LoadOutcome, DestinationError>;
}
