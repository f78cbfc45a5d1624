//! Error types for snowdrift using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase. The orchestrator classifies
//! failures through `SyncError::is_transient()`: transient failures abort
//! the current cycle and are retried with backoff, everything else
//! terminates the process.

use snafu::prelude::*;
use std::path::PathBuf;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Source directory is empty.
    #[snafu(display("Source directory cannot be empty"))]
    EmptySourceDir,

    /// Checkpoint path is empty.
    #[snafu(display("Checkpoint path cannot be empty"))]
    EmptyCheckpointPath,

    /// A required destination connection parameter is missing.
    #[snafu(display("Destination connection parameter '{name}' cannot be empty"))]
    EmptyDestinationParam { name: &'static str },

    /// Sync interval must be positive.
    #[snafu(display("Sync interval must be greater than zero"))]
    ZeroSyncInterval,

    /// Retry delays are inconsistent.
    #[snafu(display(
        "Initial retry delay ({initial}s) must be positive and no greater than max ({max}s)"
    ))]
    InvalidRetryDelays { initial: u64, max: u64 },

    /// The configured default checkpoint does not parse.
    #[snafu(display("Invalid default checkpoint '{value}'"))]
    InvalidDefaultCheckpoint {
        value: String,
        source: chrono::format::ParseError,
    },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Checkpoint Errors ============

/// Errors that can occur while loading or saving the checkpoint file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CheckpointError {
    /// Checkpoint file is absent and no default was configured.
    ///
    /// Fatal for the process, but the decision to terminate belongs to the
    /// caller, not to this module.
    #[snafu(display("Checkpoint file {} is absent and no default is configured", path.display()))]
    Unavailable { path: PathBuf },

    /// IO error reading or writing the checkpoint file.
    #[snafu(display("Checkpoint IO failed for {}", path.display()))]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Checkpoint file contains invalid JSON.
    #[snafu(display("Checkpoint file {} is not valid JSON", path.display()))]
    Json {
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Checkpoint instant does not parse.
    #[snafu(display("Checkpoint instant '{value}' does not parse"))]
    Timestamp {
        value: String,
        source: chrono::format::ParseError,
    },
}

// ============ Source Errors ============

/// Errors that can occur while reading source SQLite files.
///
/// Per-file open/query problems are logged and skipped inside the reader;
/// only structural failures surface here.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// Failed to list the source directory.
    #[snafu(display("Failed to list source directory {}", dir.display()))]
    ListDir {
        source: std::io::Error,
        dir: PathBuf,
    },

    /// The discovered table has no column matching the timestamp heuristic.
    #[snafu(display("Table '{table}' has no timestamp column (name containing 'time' or 'date')"))]
    NoTimestampColumn { table: String },

    /// The discovered table has no column matching the key heuristic.
    #[snafu(display(
        "Table '{table}' has no key column (name containing 'key', 'id', 'register' or 'name')"
    ))]
    NoKeyColumn { table: String },

    /// Failed to open a source file (handled per-file by the reader).
    #[snafu(display("Failed to open source file {}", path.display()))]
    OpenFile {
        source: rusqlite::Error,
        path: PathBuf,
    },

    /// A query against a source file failed (handled per-file by the reader).
    #[snafu(display("Query failed against {}", path.display()))]
    Query {
        source: rusqlite::Error,
        path: PathBuf,
    },
}

// ============ Destination Errors ============

/// Errors that can occur against the destination database.
///
/// All of these are transient at cycle granularity: connection losses and
/// transaction failures alike roll the cycle back without advancing the
/// checkpoint, and the orchestrator retries with backoff.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DestinationError {
    /// Failed to establish a connection.
    #[snafu(display("Failed to connect to destination"))]
    Connect { source: tokio_postgres::Error },

    /// Connectivity check failed.
    #[snafu(display("Destination connectivity check failed"))]
    Ping { source: tokio_postgres::Error },

    /// Failed to inspect the destination schema.
    #[snafu(display("Failed to inspect destination schema"))]
    Inspect { source: tokio_postgres::Error },

    /// A DDL statement failed.
    #[snafu(display("DDL failed: {statement}"))]
    Ddl {
        source: tokio_postgres::Error,
        statement: String,
    },

    /// The bulk insert failed; the transaction was rolled back.
    #[snafu(display("Bulk load failed, transaction rolled back"))]
    Load { source: tokio_postgres::Error },

    /// Failed to open or commit the load transaction.
    #[snafu(display("Load transaction failed"))]
    Transaction { source: tokio_postgres::Error },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Sync Error (top-level) ============

/// Top-level errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SyncError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Checkpoint error.
    #[snafu(display("Checkpoint error"))]
    Checkpoint { source: CheckpointError },

    /// Source reader error.
    #[snafu(display("Source error"))]
    Source { source: SourceError },

    /// Destination error.
    #[snafu(display("Destination error"))]
    Destination { source: DestinationError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}

impl SyncError {
    /// Check whether this failure should be retried at cycle granularity.
    ///
    /// Destination failures (connection loss, rolled-back transactions),
    /// checkpoint file IO and source directory listing are transient: the
    /// cycle aborts without advancing the checkpoint and is retried with
    /// backoff. Everything else is fatal for the process.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Destination { .. } => true,
            SyncError::Checkpoint { source } => matches!(source, CheckpointError::Io { .. }),
            SyncError::Source { source } => matches!(source, SourceError::ListDir { .. }),
            _ => false,
        }
    }
}
