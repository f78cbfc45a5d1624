//! snowdrift: incremental sync from daily SQLite files to PostgreSQL.
//!
//! This tool polls a directory of per-day SQLite files and replicates
//! rows newer than the persisted checkpoint into one consolidated
//! PostgreSQL table, evolving the destination schema as source columns
//! appear.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use snowdrift::config::Config;
use snowdrift::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, SyncError};
use snowdrift::sync::run_sync;

/// Daily SQLite to PostgreSQL sync tool.
#[derive(Parser, Debug)]
#[command(name = "snowdrift")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without syncing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), SyncError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("snowdrift starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    // Initialize metrics if enabled
    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        snowdrift::metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Source directory: {}", config.source.dir);
        info!(
            "Destination: {}:{}/{}",
            config.destination.host, config.destination.port, config.destination.dbname
        );
        info!("Checkpoint: {}", config.checkpoint.path);
        info!(
            "Sync interval: {}s, retry delay: {}s to {}s",
            config.sync.interval_secs,
            config.sync.initial_retry_delay_secs,
            config.sync.max_retry_delay_secs
        );
        info!("Configuration is valid");
        return Ok(());
    }

    let stats = run_sync(config).await?;

    info!("Sync completed successfully");
    info!("  Cycles completed: {}", stats.cycles_completed);
    info!("  Rows extracted: {}", stats.rows_extracted);
    info!("  Rows inserted: {}", stats.rows_inserted);
    info!("  Duplicate rows skipped: {}", stats.rows_skipped);
    info!("  Rows rejected: {}", stats.rows_rejected);
    info!("  Retries: {}", stats.retries);

    Ok(())
}
