//! Sync loop orchestration.
//!
//! Connects the checkpoint store, source reader, schema synchronizer and
//! destination into a polling loop with retry and graceful shutdown. Each
//! cycle is all-or-nothing: the checkpoint only advances after the
//! destination transaction has committed, so a failed cycle re-extracts
//! the same window and the conflict policy absorbs the replay.

mod backoff;
mod signal;

use snafu::prelude::*;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::Config;
use crate::emit;
use crate::error::{
    CheckpointSnafu, ConfigSnafu, DestinationSnafu, InvalidDefaultCheckpointSnafu, SourceSnafu,
    SyncError,
};
use crate::metrics::events::{
    CheckpointSaved, CycleCompleted, CycleStatus, RetryScheduled, RowsExtracted, RowsInserted,
    RowsRejected, RowsSkipped,
};
use crate::schema::SchemaSynchronizer;
use crate::sink::{Destination, PostgresDestination};
use crate::source::SqliteReader;

use backoff::Backoff;

/// Statistics about the sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub cycles_completed: usize,
    pub rows_extracted: u64,
    pub rows_inserted: u64,
    pub rows_skipped: u64,
    pub rows_rejected: u64,
    pub retries: usize,
}

/// Result of a single sync cycle.
enum CycleOutcome {
    /// Rows were loaded; the checkpoint may have advanced.
    Synced,
    /// Nothing newer than the checkpoint; destination reachability was
    /// still verified.
    Empty,
}

/// Drives checkpoint-bounded extraction cycles against a destination.
pub struct Synchronizer<D: Destination> {
    config: Config,
    store: CheckpointStore,
    reader: SqliteReader,
    destination: D,
    shutdown: CancellationToken,
    stats: SyncStats,
}

impl<D: Destination> Synchronizer<D> {
    pub fn new(
        config: Config,
        destination: D,
        shutdown: CancellationToken,
    ) -> Result<Self, SyncError> {
        config.validate().context(ConfigSnafu)?;

        let default = match &config.checkpoint.default {
            Some(value) => Some(
                Checkpoint::parse(value)
                    .context(InvalidDefaultCheckpointSnafu { value })
                    .context(ConfigSnafu)?,
            ),
            None => None,
        };
        let store = CheckpointStore::new(&config.checkpoint.path, default);
        let reader = SqliteReader::new(&config.source);

        Ok(Self {
            config,
            store,
            reader,
            destination,
            shutdown,
            stats: SyncStats::default(),
        })
    }

    /// Run cycles until shutdown is requested or a fatal error occurs.
    ///
    /// A transient failure aborts only the current cycle: the loop waits
    /// out a doubling backoff delay and tries again. Success resets the
    /// backoff and the loop returns to the configured sync interval.
    pub async fn run(&mut self) -> Result<SyncStats, SyncError> {
        info!("Starting sync loop");

        let interval = Duration::from_secs(self.config.sync.interval_secs);
        let mut backoff = Backoff::new(
            Duration::from_secs(self.config.sync.initial_retry_delay_secs),
            Duration::from_secs(self.config.sync.max_retry_delay_secs),
        );

        loop {
            if self.shutdown.is_cancelled() {
                info!("Shutdown requested");
                break;
            }

            let wait = match self.run_cycle().await {
                Ok(outcome) => {
                    backoff.reset();
                    self.stats.cycles_completed += 1;
                    let status = match outcome {
                        CycleOutcome::Synced => CycleStatus::Success,
                        CycleOutcome::Empty => CycleStatus::Empty,
                    };
                    emit!(CycleCompleted { status });
                    interval
                }
                Err(e) if e.is_transient() => {
                    emit!(CycleCompleted {
                        status: CycleStatus::Failed
                    });
                    emit!(RetryScheduled);
                    self.stats.retries += 1;
                    let delay = backoff.next_delay();
                    warn!("Cycle failed: {e}, retrying in {}s", delay.as_secs());
                    delay
                }
                Err(e) => return Err(e),
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested during wait");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Sync loop completed: {:?}", self.stats);
        Ok(self.stats.clone())
    }

    /// Run one extraction-load cycle.
    async fn run_cycle(&mut self) -> Result<CycleOutcome, SyncError> {
        let checkpoint = self.store.load().context(CheckpointSnafu)?;
        debug!("Cycle start, checkpoint at {checkpoint}");

        let Some(extraction) = self
            .reader
            .extract_since(checkpoint)
            .context(SourceSnafu)?
        else {
            self.destination.ping().await.context(DestinationSnafu)?;
            return Ok(CycleOutcome::Empty);
        };

        if extraction.rejected > 0 {
            self.stats.rows_rejected += extraction.rejected;
            emit!(RowsRejected {
                count: extraction.rejected
            });
        }
        if extraction.rows.is_empty() {
            debug!("No rows newer than {checkpoint}");
            self.destination.ping().await.context(DestinationSnafu)?;
            return Ok(CycleOutcome::Empty);
        }

        let extracted = extraction.rows.len() as u64;
        self.stats.rows_extracted += extracted;
        emit!(RowsExtracted { count: extracted });

        let table = self
            .config
            .destination
            .table
            .clone()
            .unwrap_or_else(|| extraction.layout.table.clone());

        SchemaSynchronizer::new(&table)
            .synchronize(&mut self.destination, &extraction.layout)
            .await
            .context(DestinationSnafu)?;

        let outcome = self
            .destination
            .load(&table, &extraction.layout, extraction.rows)
            .await
            .context(DestinationSnafu)?;
        self.stats.rows_inserted += outcome.inserted;
        self.stats.rows_skipped += outcome.skipped;
        self.stats.rows_rejected += outcome.rejected;
        emit!(RowsInserted {
            count: outcome.inserted
        });
        emit!(RowsSkipped {
            count: outcome.skipped
        });
        if outcome.rejected > 0 {
            emit!(RowsRejected {
                count: outcome.rejected
            });
        }

        // The commit above is the durability point; only now may the
        // checkpoint move.
        if let Some(max) = extraction.max_timestamp {
            let candidate = Checkpoint(max);
            if candidate > checkpoint {
                self.store.save(candidate).context(CheckpointSnafu)?;
                emit!(CheckpointSaved);
                info!("Checkpoint advanced to {candidate}");
            }
        }

        info!(
            "Cycle complete: {} extracted, {} inserted, {} duplicates skipped",
            extracted, outcome.inserted, outcome.skipped
        );
        Ok(CycleOutcome::Synced)
    }

    /// Totals accumulated so far.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }
}

/// Run the sync loop with the given configuration, wiring the Unix signal
/// handler to the shutdown token.
pub async fn run_sync(config: Config) -> Result<SyncStats, SyncError> {
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            signal::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let destination = PostgresDestination::new(config.destination.clone());
    let mut synchronizer = Synchronizer::new(config, destination, shutdown)?;
    synchronizer.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_stats_default() {
        let stats = SyncStats::default();
        assert_eq!(stats.cycles_completed, 0);
        assert_eq!(stats.rows_inserted, 0);
        assert_eq!(stats.retries, 0);
    }
}
