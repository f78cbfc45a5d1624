//! Incremental extraction from per-day SQLite files.
//!
//! Enumerates dated source files, discovers the table of interest from the
//! first conforming file, extracts rows strictly newer than the checkpoint
//! from every file, and merges them into a single globally time-ordered
//! sequence. Per-file problems (unreadable file, missing table) are logged
//! and skipped; only missing timestamp/key roles are fatal for the run.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::checkpoint::Checkpoint;
use crate::config::SourceConfig;
use crate::emit;
use crate::error::{ListDirSnafu, OpenFileSnafu, QuerySnafu, SourceError};
use crate::instant;
use crate::metrics::events::SourceFilesScanned;
use crate::schema::quote_ident;
use crate::source::{CellValue, ColumnKind, Row, RoleClassifier, SubstringClassifier, TableLayout};

/// One dated source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub date: NaiveDate,
}

/// Result of one extraction pass.
#[derive(Debug)]
pub struct Extraction {
    /// Structure discovered from the first conforming file.
    pub layout: TableLayout,
    /// Globally time-ordered rows strictly newer than the checkpoint.
    pub rows: Vec<Row>,
    /// Maximum timestamp across the merged sequence; `None` when no rows
    /// were produced (an empty cycle must leave the checkpoint unchanged).
    pub max_timestamp: Option<NaiveDateTime>,
    /// Rows dropped because their timestamp value would not normalize.
    pub rejected: u64,
}

/// Reader for a directory of `YYYY_MM_DD.<ext>` SQLite files.
pub struct SqliteReader {
    dir: PathBuf,
    extension: String,
    table: Option<String>,
    classifier: Box<dyn RoleClassifier>,
}

impl SqliteReader {
    /// Create a reader with the default substring role heuristics.
    pub fn new(config: &SourceConfig) -> Self {
        Self::with_classifier(config, Box::new(SubstringClassifier))
    }

    /// Create a reader with a custom role classification strategy.
    pub fn with_classifier(config: &SourceConfig, classifier: Box<dyn RoleClassifier>) -> Self {
        Self {
            dir: PathBuf::from(&config.dir),
            extension: config.extension.clone(),
            table: config.table.clone(),
            classifier,
        }
    }

    /// Enumerate candidate files whose names parse as `%Y_%m_%d.<ext>`,
    /// sorted by date ascending. Non-conforming names are skipped with a
    /// warning, not an error.
    pub fn enumerate(&self) -> Result<Vec<SourceFile>, SourceError> {
        let entries = std::fs::read_dir(&self.dir).context(ListDirSnafu { dir: &self.dir })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.context(ListDirSnafu { dir: &self.dir })?;
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            match parse_file_date(&path, &self.extension) {
                Some(date) => files.push(SourceFile { path, date }),
                None => {
                    warn!("Skipping non-conforming file name: {}", path.display());
                }
            }
        }
        files.sort_by_key(|f| f.date);

        emit!(SourceFilesScanned {
            count: files.len() as u64
        });
        Ok(files)
    }

    /// Extract all rows strictly newer than the checkpoint across every
    /// candidate file, merged into one globally time-ordered sequence.
    ///
    /// Returns `None` when no conforming file yields the table of interest
    /// (nothing to synchronize this cycle).
    pub fn extract_since(&self, checkpoint: Checkpoint) -> Result<Option<Extraction>, SourceError> {
        let files = self.enumerate()?;
        if files.is_empty() {
            warn!("No source files found in {}", self.dir.display());
            return Ok(None);
        }

        let mut layout: Option<TableLayout> = None;
        let mut rows: Vec<Row> = Vec::new();
        let mut rejected = 0u64;

        for file in &files {
            let conn = match open_read_only(&file.path) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Skipping unreadable source file: {e}");
                    continue;
                }
            };

            // Structure is discovered once, from the first file that has the
            // table; later files are read against the same layout.
            if layout.is_none() {
                match self.discover(&conn, &file.path) {
                    Ok(Some(discovered)) => {
                        info!(
                            "Discovered table '{}' with {} columns (timestamp: {}, key: {})",
                            discovered.table,
                            discovered.columns.len(),
                            discovered.timestamp_column(),
                            discovered.key_column()
                        );
                        layout = Some(discovered);
                    }
                    Ok(None) => {
                        warn!("No table of interest in {}, skipping", file.path.display());
                        continue;
                    }
                    // Missing roles are fatal for the run, not per-file
                    Err(
                        e @ (SourceError::NoTimestampColumn { .. }
                        | SourceError::NoKeyColumn { .. }),
                    ) => return Err(e),
                    Err(e) => {
                        warn!("Skipping source file after discovery error: {e}");
                        continue;
                    }
                }
            }
            let Some(layout) = layout.as_ref() else {
                continue;
            };

            match extract_file(&conn, layout, checkpoint, &file.path) {
                Ok(outcome) => {
                    debug!(
                        "{}: {} rows after checkpoint ({} rejected)",
                        file.path.display(),
                        outcome.rows.len(),
                        outcome.rejected
                    );
                    rows.extend(outcome.rows);
                    rejected += outcome.rejected;
                }
                Err(e) => {
                    warn!("Skipping source file after read error: {e}");
                }
            }
        }

        let Some(layout) = layout else {
            warn!(
                "No candidate file in {} contained a table to synchronize",
                self.dir.display()
            );
            return Ok(None);
        };

        // Files are not guaranteed to be processed in chronological order,
        // and stragglers can land in a neighboring day's file. A stable
        // sort produces the single globally ordered sequence the loader
        // depends on, with ties keeping enumeration-then-intra-file order.
        rows.sort_by_key(|row| row.timestamp);
        let max_timestamp = rows.last().map(|row| row.timestamp);

        Ok(Some(Extraction {
            layout,
            rows,
            max_timestamp,
            rejected,
        }))
    }

    /// Discover the table of interest and classify its columns.
    ///
    /// Returns `Ok(None)` when this file does not contain the table; missing
    /// timestamp/key roles propagate as fatal errors.
    fn discover(
        &self,
        conn: &Connection,
        path: &Path,
    ) -> Result<Option<TableLayout>, SourceError> {
        let table = match find_table(conn, self.table.as_deref()).context(QuerySnafu { path })? {
            Some(table) => table,
            None => return Ok(None),
        };

        let raw_columns = table_columns(conn, &table).context(QuerySnafu { path })?;
        TableLayout::classify(table, raw_columns, self.classifier.as_ref()).map(Some)
    }
}

/// Per-file extraction outcome.
struct FileRows {
    rows: Vec<Row>,
    rejected: u64,
}

/// Query rows strictly newer than the checkpoint from one file.
fn extract_file(
    conn: &Connection,
    layout: &TableLayout,
    checkpoint: Checkpoint,
    path: &Path,
) -> Result<FileRows, SourceError> {
    // Later files may lack the table entirely (e.g. an empty day)
    if find_table(conn, Some(&layout.table))
        .context(QuerySnafu { path })?
        .is_none()
    {
        return Ok(FileRows {
            rows: Vec::new(),
            rejected: 0,
        });
    }

    let column_list = layout
        .column_names()
        .iter()
        .map(|name| quote_ident(name))
        .collect::<Vec<_>>()
        .join(", ");
    let ts = quote_ident(layout.timestamp_column());
    let sql = format!(
        "SELECT {column_list} FROM {} WHERE {ts} > ?1 ORDER BY {ts} ASC",
        quote_ident(&layout.table)
    );

    // Bind the numeric epoch. Under sqlite's cross-type ordering text
    // sorts after every numeric, so numerically stored timestamps are
    // filtered exactly and text-stored ones all pass through to the
    // normalized comparison below, which is authoritative.
    let since = Value::Real(instant::to_epoch_seconds(checkpoint.0));

    let mut stmt = conn.prepare(&sql).context(QuerySnafu { path })?;
    let mut sql_rows = stmt.query([since]).context(QuerySnafu { path })?;

    let column_count = layout.columns.len();
    let mut rows = Vec::new();
    let mut rejected = 0u64;

    while let Some(sql_row) = sql_rows.next().context(QuerySnafu { path })? {
        let mut cells = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let value: Value = sql_row.get(i).context(QuerySnafu { path })?;
            cells.push(CellValue::from(value));
        }

        let Some(timestamp) = instant::normalize(&cells[layout.timestamp_idx]) else {
            warn!(
                "Dropping row from {}: timestamp value {:?} does not normalize",
                path.display(),
                cells[layout.timestamp_idx]
            );
            rejected += 1;
            continue;
        };
        // Strictly greater than the checkpoint; rows at the boundary were
        // committed by the cycle that wrote it.
        if timestamp <= checkpoint.0 {
            continue;
        }

        rows.push(Row { cells, timestamp });
    }

    Ok(FileRows { rows, rejected })
}

/// Parse a `YYYY_MM_DD.<ext>` file name into its calendar date.
fn parse_file_date(path: &Path, extension: &str) -> Option<NaiveDate> {
    if !path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
    {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    NaiveDate::parse_from_str(stem, "%Y_%m_%d").ok()
}

fn open_read_only(path: &Path) -> Result<Connection, SourceError> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .context(OpenFileSnafu { path })
}

/// Find the table of interest: the configured name when set, otherwise the
/// first non-system table present.
fn find_table(conn: &Connection, configured: Option<&str>) -> rusqlite::Result<Option<String>> {
    match configured {
        Some(name) => conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional(),
    }
}

/// Read column names and declared types via `PRAGMA table_info`.
fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<(String, ColumnKind)>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let declared: String = row.get(2)?;
            Ok((name, ColumnKind::from_declared(&declared)))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}
