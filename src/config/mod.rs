//! Configuration parsing and validation.
//!
//! Handles loading configuration from YAML files. The resulting `Config`
//! is an immutable value threaded into the synchronizer at startup; there
//! is no ambient/global configuration state.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;

use crate::error::{
    ConfigError, EmptyCheckpointPathSnafu, EmptyDestinationParamSnafu, EmptySourceDirSnafu,
    InvalidRetryDelaysSnafu, ReadFileSnafu, YamlParseSnafu, ZeroSyncIntervalSnafu,
};

/// Main configuration structure for the synchronizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub checkpoint: CheckpointConfig,
    /// Sync loop timing (optional, sensible defaults).
    #[serde(default)]
    pub sync: SyncConfig,
    /// Metrics configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Source configuration for reading per-day SQLite files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Directory containing `YYYY_MM_DD.<ext>` files.
    pub dir: String,

    /// Table to synchronize. When unset, the first non-system table of the
    /// first conforming file is used.
    #[serde(default)]
    pub table: Option<String>,

    /// File extension of source files (default: "db").
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_extension() -> String {
    "db".to_string()
}

/// Destination connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub dbname: String,

    /// Destination table name. Defaults to the discovered source table name.
    #[serde(default)]
    pub table: Option<String>,

    /// Connection timeout in seconds (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_port() -> u16 {
    5432
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// Checkpoint persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Path of the checkpoint JSON file.
    pub path: String,

    /// Instant to start from when no checkpoint file exists yet, in
    /// `%Y-%m-%d %H:%M:%S%.6f` format. Without it, a missing checkpoint
    /// file is fatal.
    #[serde(default)]
    pub default: Option<String>,
}

/// Sync loop timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds to sleep between cycles (default: 60).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Initial retry delay after a transient failure (default: 1s).
    #[serde(default = "default_initial_retry_delay_secs")]
    pub initial_retry_delay_secs: u64,

    /// Maximum retry delay; the backoff doubles up to this cap (default: 60s).
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            initial_retry_delay_secs: default_initial_retry_delay_secs(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}

fn default_initial_retry_delay_secs() -> u64 {
    1
}

fn default_max_retry_delay_secs() -> u64 {
    60
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Missing required connection parameters fail here, before the first
    /// cycle ever runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.source.dir.is_empty(), EmptySourceDirSnafu);
        ensure!(!self.checkpoint.path.is_empty(), EmptyCheckpointPathSnafu);
        ensure!(
            !self.destination.host.is_empty(),
            EmptyDestinationParamSnafu { name: "host" }
        );
        ensure!(
            !self.destination.user.is_empty(),
            EmptyDestinationParamSnafu { name: "user" }
        );
        ensure!(
            !self.destination.dbname.is_empty(),
            EmptyDestinationParamSnafu { name: "dbname" }
        );
        ensure!(self.sync.interval_secs > 0, ZeroSyncIntervalSnafu);
        ensure!(
            self.sync.initial_retry_delay_secs > 0
                && self.sync.initial_retry_delay_secs <= self.sync.max_retry_delay_secs,
            InvalidRetryDelaysSnafu {
                initial: self.sync.initial_retry_delay_secs,
                max: self.sync.max_retry_delay_secs,
            }
        );
        Ok(())
    }
}
