//! PostgreSQL destination.
//!
//! Owns the destination connection, reconnecting lazily whenever the
//! previous client is gone, so transient connection losses surface as
//! per-cycle failures rather than terminating the process. Bulk loads run
//! as a single transaction of set-oriented multi-row inserts with an
//! `ON CONFLICT (key, timestamp) DO NOTHING` conflict policy keyed on the
//! composite constraint established by the schema synchronizer.

use bytes::BytesMut;
use chrono::NaiveDateTime;
use snafu::prelude::*;
use std::time::Duration;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

use crate::config::DestinationConfig;
use crate::error::{
    ConnectSnafu, DdlSnafu, DestinationError, InspectSnafu, LoadSnafu, PingSnafu, TransactionSnafu,
};
use crate::instant;
use crate::schema::{information_schema_type, quote_ident, ColumnDef, DestColumn};
use crate::sink::{Destination, LoadOutcome};
use crate::source::{CellValue, ColumnKind, Row, TableLayout};

/// PostgreSQL's wire-protocol bind parameter limit (i16).
const MAX_BIND_PARAMS: usize = 65_535;

/// Upper bound on rows per insert statement.
const MAX_ROWS_PER_STATEMENT: usize = 1_000;

/// A coerced destination value, bound dynamically per column.
#[derive(Debug, Clone, PartialEq)]
enum PgCell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Bytes(Vec<u8>),
}

impl ToSql for PgCell {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            PgCell::Null => Ok(IsNull::Yes),
            PgCell::Int(v) => v.to_sql(ty, out),
            PgCell::Float(v) => v.to_sql(ty, out),
            PgCell::Text(v) => v.to_sql(ty, out),
            PgCell::Timestamp(v) => v.to_sql(ty, out),
            PgCell::Bytes(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Per-column binding strategy, derived from the destination catalog.
///
/// A destination column whose reported type differs from the inferred
/// kind keeps its existing type: the value is sent as text and cast
/// server-side, instead of binding a binary representation the column
/// would reject.
#[derive(Debug, Clone, PartialEq)]
enum BindPlan {
    Native,
    TextCast(String),
}

fn bind_plans(layout: &TableLayout, existing: Option<&[DestColumn]>) -> Vec<BindPlan> {
    let Some(existing) = existing else {
        return vec![BindPlan::Native; layout.columns.len()];
    };
    layout
        .columns
        .iter()
        .map(|column| match existing.iter().find(|c| c.name == column.name) {
            Some(dest) if dest.data_type != information_schema_type(column.kind) => {
                BindPlan::TextCast(dest.data_type.clone())
            }
            _ => BindPlan::Native,
        })
        .collect()
}

/// Exact conversion of an integral real; `None` beyond i64 range.
fn real_to_int(v: f64) -> Option<i64> {
    // 2^63 rounds up when widened to f64, so the upper bound is exclusive
    if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

/// Coerce one source cell to the destination column kind.
///
/// Widening coercions only; `None` marks the row as a conversion reject.
fn coerce_cell(cell: CellValue, kind: ColumnKind) -> Option<PgCell> {
    match (kind, cell) {
        (_, CellValue::Null) => Some(PgCell::Null),
        (ColumnKind::Integer, CellValue::Integer(v)) => Some(PgCell::Int(v)),
        (ColumnKind::Integer, CellValue::Real(v)) => real_to_int(v).map(PgCell::Int),
        (ColumnKind::Integer, CellValue::Text(s)) => s.trim().parse().ok().map(PgCell::Int),
        (ColumnKind::Real, CellValue::Real(v)) => Some(PgCell::Float(v)),
        (ColumnKind::Real, CellValue::Integer(v)) => Some(PgCell::Float(v as f64)),
        (ColumnKind::Real, CellValue::Text(s)) => s.trim().parse().ok().map(PgCell::Float),
        (ColumnKind::Text, CellValue::Text(s)) => Some(PgCell::Text(s)),
        (ColumnKind::Text, CellValue::Integer(v)) => Some(PgCell::Text(v.to_string())),
        (ColumnKind::Text, CellValue::Real(v)) => Some(PgCell::Text(v.to_string())),
        (ColumnKind::Temporal, cell) => instant::normalize(&cell).map(PgCell::Timestamp),
        (ColumnKind::Blob, CellValue::Blob(b)) => Some(PgCell::Bytes(b)),
        _ => None,
    }
}

/// Render a cell as text for a server-side cast.
fn coerce_cell_text(cell: CellValue) -> Option<PgCell> {
    match cell {
        CellValue::Null => Some(PgCell::Null),
        CellValue::Integer(v) => Some(PgCell::Text(v.to_string())),
        CellValue::Real(v) => Some(PgCell::Text(v.to_string())),
        CellValue::Text(s) => Some(PgCell::Text(s)),
        CellValue::Blob(_) => None,
    }
}

/// Coerce a full row; `None` when any cell fails.
fn coerce_row(row: Row, layout: &TableLayout, plans: &[BindPlan]) -> Option<Vec<PgCell>> {
    let mut cells = Vec::with_capacity(row.cells.len());
    for ((cell, column), plan) in row.cells.into_iter().zip(&layout.columns).zip(plans) {
        let coerced = match plan {
            BindPlan::Native => coerce_cell(cell, column.kind),
            BindPlan::TextCast(_) => coerce_cell_text(cell),
        };
        cells.push(coerced?);
    }
    Some(cells)
}

/// Build a multi-row insert with the composite conflict target.
fn build_insert_statement(
    table: &str,
    column_names: &[&str],
    key_column: &str,
    timestamp_column: &str,
    row_count: usize,
    plans: &[BindPlan],
) -> String {
    let columns = column_names
        .iter()
        .map(|name| quote_ident(name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut values = String::new();
    let width = column_names.len();
    for row in 0..row_count {
        if row > 0 {
            values.push_str(", ");
        }
        values.push('(');
        for col in 0..width {
            if col > 0 {
                values.push_str(", ");
            }
            let n = row * width + col + 1;
            match &plans[col] {
                BindPlan::Native => {
                    values.push('$');
                    values.push_str(&n.to_string());
                }
                // Typing the parameter as text lets the server's input
                // function produce the column's actual type
                BindPlan::TextCast(data_type) => {
                    values.push_str(&format!("CAST(${n}::text AS {data_type})"));
                }
            }
        }
        values.push(')');
    }

    format!(
        "INSERT INTO {} ({columns}) VALUES {values} ON CONFLICT ({}, {}) DO NOTHING",
        quote_ident(table),
        quote_ident(key_column),
        quote_ident(timestamp_column)
    )
}

/// Destination backed by tokio-postgres.
pub struct PostgresDestination {
    config: DestinationConfig,
    client: Option<tokio_postgres::Client>,
}

impl PostgresDestination {
    /// Create a destination; the connection is established lazily on first
    /// use and re-established whenever the previous one is gone.
    pub fn new(config: DestinationConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    fn pg_config(&self) -> tokio_postgres::Config {
        let mut cfg = tokio_postgres::Config::new();
        cfg.host(&self.config.host)
            .port(self.config.port)
            .user(&self.config.user)
            .dbname(&self.config.dbname)
            .connect_timeout(Duration::from_secs(self.config.connect_timeout_secs));
        if !self.config.password.is_empty() {
            cfg.password(&self.config.password);
        }
        cfg
    }

    async fn client(&mut self) -> Result<&mut tokio_postgres::Client, DestinationError> {
        let stale = self.client.as_ref().map_or(true, |c| c.is_closed());
        if stale {
            let (client, connection) = self.pg_config().connect(NoTls).await.context(ConnectSnafu)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!("Destination connection terminated: {e}");
                }
            });
            info!(
                "Connected to destination {}:{}/{}",
                self.config.host, self.config.port, self.config.dbname
            );
            self.client = Some(client);
        }
        Ok(self.client.as_mut().expect("client established above"))
    }
}

#[async_trait::async_trait]
impl Destination for PostgresDestination {
    async fn ping(&mut self) -> Result<(), DestinationError> {
        let client = self.client().await?;
        client.simple_query("SELECT 1").await.context(PingSnafu)?;
        Ok(())
    }

    async fn table_columns(
        &mut self,
        table: &str,
    ) -> Result<Option<Vec<DestColumn>>, DestinationError> {
        let client = self.client().await?;

        let exists: bool = client
            .query_one(
                "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_name = $1)",
                &[&table],
            )
            .await
            .context(InspectSnafu)?
            .get(0);
        if !exists {
            return Ok(None);
        }

        let rows = client
            .query(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_name = $1 ORDER BY ordinal_position",
                &[&table],
            )
            .await
            .context(InspectSnafu)?;

        Ok(Some(
            rows.into_iter()
                .map(|row| DestColumn {
                    name: row.get(0),
                    data_type: row.get(1),
                })
                .collect(),
        ))
    }

    async fn create_table(
        &mut self,
        table: &str,
        columns: &[ColumnDef],
        key_column: &str,
        timestamp_column: &str,
    ) -> Result<(), DestinationError> {
        let column_defs = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.pg_type))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "CREATE TABLE {} ({column_defs}, PRIMARY KEY ({}, {}))",
            quote_ident(table),
            quote_ident(key_column),
            quote_ident(timestamp_column)
        );

        let client = self.client().await?;
        client
            .execute(&statement, &[])
            .await
            .context(DdlSnafu { statement })?;
        Ok(())
    }

    async fn add_columns(
        &mut self,
        table: &str,
        columns: &[ColumnDef],
    ) -> Result<(), DestinationError> {
        let client = self.client().await?;
        for column in columns {
            let statement = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(table),
                quote_ident(&column.name),
                column.pg_type
            );
            client
                .execute(&statement, &[])
                .await
                .context(DdlSnafu { statement })?;
        }
        Ok(())
    }

    async fn load(
        &mut self,
        table: &str,
        layout: &TableLayout,
        rows: Vec<Row>,
    ) -> Result<LoadOutcome, DestinationError> {
        // Bind against the column types the destination actually has, so a
        // logged schema conflict stays a logged conflict instead of a load
        // failure.
        let existing = self.table_columns(table).await?;
        let plans = bind_plans(layout, existing.as_deref());

        // Coerce before opening the transaction: a row that cannot be
        // converted is an isolated per-row failure, not a transaction
        // failure.
        let mut converted: Vec<Vec<PgCell>> = Vec::with_capacity(rows.len());
        let mut rejected = 0u64;
        for row in rows {
            let timestamp = row.timestamp;
            match coerce_row(row, layout, &plans) {
                Some(cells) => converted.push(cells),
                None => {
                    warn!(
                        "Dropping row at {}: value does not coerce to destination types",
                        timestamp
                    );
                    rejected += 1;
                }
            }
        }
        if converted.is_empty() {
            return Ok(LoadOutcome {
                inserted: 0,
                skipped: 0,
                rejected,
            });
        }

        let column_names = layout.column_names();
        let width = column_names.len();
        let page_rows = (MAX_BIND_PARAMS / width.max(1)).clamp(1, MAX_ROWS_PER_STATEMENT);

        let client = self.client().await?;
        let tx = client.transaction().await.context(TransactionSnafu)?;

        let attempted = converted.len() as u64;
        let mut inserted = 0u64;
        for page in converted.chunks(page_rows) {
            let statement = build_insert_statement(
                table,
                &column_names,
                layout.key_column(),
                layout.timestamp_column(),
                page.len(),
                &plans,
            );
            let params: Vec<&(dyn ToSql + Sync)> = page
                .iter()
                .flat_map(|row| row.iter().map(|cell| cell as &(dyn ToSql + Sync)))
                .collect();
            // Any statement error drops `tx`, rolling the whole cycle back
            inserted += tx.execute(&statement, &params).await.context(LoadSnafu)?;
        }
        tx.commit().await.context(TransactionSnafu)?;

        let skipped = attempted - inserted;
        debug!(
            "Loaded {attempted} rows into '{table}': {inserted} inserted, {skipped} duplicates \
             skipped, {rejected} rejected"
        );
        Ok(LoadOutcome {
            inserted,
            skipped,
            rejected,
        })
    }
}
