//! Integration tests for the sync cycle orchestration.
//!
//! Drive the synchronizer against real per-day SQLite fixtures and an
//! in-memory destination, checking retry scheduling, checkpoint
//! advancement and schema evolution without a live PostgreSQL server.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use snowdrift::config::{
    CheckpointConfig, Config, DestinationConfig, MetricsConfig, SourceConfig, SyncConfig,
};
use snowdrift::error::{CheckpointError, DestinationError, SyncError};
use snowdrift::schema::{ColumnDef, DestColumn};
use snowdrift::sink::{Destination, LoadOutcome};
use snowdrift::source::{Row, TableLayout};
use snowdrift::Synchronizer;

/// 2026-01-25 00:00:00 UTC.
const DAY_25: f64 = 1_769_299_200.0;

/// Produce a real driver error by connecting to a closed port.
async fn pg_error() -> tokio_postgres::Error {
    tokio_postgres::Config::new()
        .host("127.0.0.1")
        .port(1)
        .user("nobody")
        .dbname("nowhere")
        .connect(tokio_postgres::NoTls)
        .await
        .map(|_| ())
        .expect_err("connection to a closed port must fail")
}

fn write_day_file(dir: &Path, name: &str, rows: &[(i64, f64, f64)]) {
    let conn = rusqlite::Connection::open(dir.join(name)).unwrap();
    conn.execute_batch(
        "CREATE TABLE sensor_readings (register_id INT, sample_time TIME, humidity REAL)",
    )
    .unwrap();
    for (id, ts, humidity) in rows {
        conn.execute(
            "INSERT INTO sensor_readings VALUES (?1, ?2, ?3)",
            rusqlite::params![id, ts, humidity],
        )
        .unwrap();
    }
}

fn test_config(source_dir: &Path, checkpoint_path: &Path, default: Option<&str>) -> Config {
    Config {
        source: SourceConfig {
            dir: source_dir.to_string_lossy().into_owned(),
            table: None,
            extension: "db".to_string(),
        },
        destination: DestinationConfig {
            host: "localhost".to_string(),
            port: 5432,
            user: "sync".to_string(),
            password: String::new(),
            dbname: "telemetry".to_string(),
            table: None,
            connect_timeout_secs: 1,
        },
        checkpoint: CheckpointConfig {
            path: checkpoint_path.to_string_lossy().into_owned(),
            default: default.map(str::to_string),
        },
        sync: SyncConfig {
            interval_secs: 60,
            initial_retry_delay_secs: 1,
            max_retry_delay_secs: 60,
        },
        metrics: MetricsConfig {
            enabled: false,
            address: "127.0.0.1:0".to_string(),
        },
    }
}

fn catalog_type(pg_type: &str) -> String {
    let spelled = match pg_type {
        "BIGINT" => "bigint",
        "DOUBLE PRECISION" => "double precision",
        "TEXT" => "text",
        "TIMESTAMP" => "timestamp without time zone",
        "BYTEA" => "bytea",
        other => other,
    };
    spelled.to_string()
}

struct MockState {
    /// Fail this many load calls before succeeding.
    fail_loads: usize,
    /// Rows per load the conflict policy would skip as duplicates.
    duplicates_per_load: u64,
    /// Successful pings or loads before cancelling the shutdown token.
    stop_after: usize,
    existing: Option<Vec<DestColumn>>,
    created_tables: Vec<String>,
    added_columns: Vec<ColumnDef>,
    load_row_counts: Vec<usize>,
    pings: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            fail_loads: 0,
            duplicates_per_load: 0,
            stop_after: 1,
            existing: None,
            created_tables: Vec::new(),
            added_columns: Vec::new(),
            load_row_counts: Vec::new(),
            pings: 0,
        }
    }
}

/// Scripted destination that cancels the shutdown token once `stop_after`
/// pings or loads have succeeded, so `run` stops at the next wait.
#[derive(Clone)]
struct MockDestination {
    state: Arc<Mutex<MockState>>,
    done: CancellationToken,
}

impl MockDestination {
    fn new(state: MockState, done: CancellationToken) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            done,
        }
    }

    fn note_success(&self, state: &mut MockState) {
        state.stop_after = state.stop_after.saturating_sub(1);
        if state.stop_after == 0 {
            self.done.cancel();
        }
    }
}

#[async_trait]
impl Destination for MockDestination {
    async fn ping(&mut self) -> Result<(), DestinationError> {
        let mut state = self.state.lock().unwrap();
        state.pings += 1;
        self.note_success(&mut state);
        Ok(())
    }

    async fn table_columns(
        &mut self,
        _table: &str,
    ) -> Result<Option<Vec<DestColumn>>, DestinationError> {
        Ok(self.state.lock().unwrap().existing.clone())
    }

    async fn create_table(
        &mut self,
        table: &str,
        columns: &[ColumnDef],
        _key_column: &str,
        _timestamp_column: &str,
    ) -> Result<(), DestinationError> {
        let mut state = self.state.lock().unwrap();
        state.created_tables.push(table.to_string());
        state.existing = Some(
            columns
                .iter()
                .map(|c| DestColumn {
                    name: c.name.clone(),
                    data_type: catalog_type(c.pg_type),
                })
                .collect(),
        );
        Ok(())
    }

    async fn add_columns(
        &mut self,
        _table: &str,
        columns: &[ColumnDef],
    ) -> Result<(), DestinationError> {
        let mut state = self.state.lock().unwrap();
        for column in columns {
            state.added_columns.push(column.clone());
            if let Some(existing) = state.existing.as_mut() {
                existing.push(DestColumn {
                    name: column.name.clone(),
                    data_type: catalog_type(column.pg_type),
                });
            }
        }
        Ok(())
    }

    async fn load(
        &mut self,
        _table: &str,
        _layout: &TableLayout,
        rows: Vec<Row>,
    ) -> Result<LoadOutcome, DestinationError> {
        let should_fail = {
            let mut state = self.state.lock().unwrap();
            if state.fail_loads > 0 {
                state.fail_loads -= 1;
                true
            } else {
                false
            }
        };
        if should_fail {
            return Err(DestinationError::Load {
                source: pg_error().await,
            });
        }

        let mut state = self.state.lock().unwrap();
        let attempted = rows.len() as u64;
        let skipped = state.duplicates_per_load.min(attempted);
        state.load_row_counts.push(rows.len());
        self.note_success(&mut state);
        Ok(LoadOutcome {
            inserted: attempted - skipped,
            skipped,
            rejected: 0,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_load_failures_are_retried_with_backoff() {
    let source = TempDir::new().unwrap();
    let checkpoint_dir = TempDir::new().unwrap();
    let checkpoint_path = checkpoint_dir.path().join("checkpoint.json");
    write_day_file(
        source.path(),
        "2026_01_25.db",
        &[(1, DAY_25 + 5.0, 40.0), (2, DAY_25 + 10.0, 41.0)],
    );

    let config = test_config(
        source.path(),
        &checkpoint_path,
        Some("2026-01-25 00:00:00.000000"),
    );
    let shutdown = CancellationToken::new();
    let mock = MockDestination::new(
        MockState {
            fail_loads: 2,
            ..MockState::default()
        },
        shutdown.clone(),
    );

    let mut synchronizer = Synchronizer::new(config, mock.clone(), shutdown).unwrap();
    let started = tokio::time::Instant::now();
    let stats = synchronizer.run().await.unwrap();
    let elapsed = started.elapsed();

    // Two failed attempts wait 1s then 2s before the third succeeds
    assert!(elapsed >= Duration::from_secs(3), "elapsed: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(60), "elapsed: {elapsed:?}");
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.rows_inserted, 2);

    let state = mock.state.lock().unwrap();
    assert_eq!(state.load_row_counts, vec![2, 2, 2]);
    assert_eq!(state.created_tables, vec!["sensor_readings".to_string()]);

    let saved = std::fs::read_to_string(&checkpoint_path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(json["lastSuccessfulTime"], "2026-01-25 00:00:10.000000");
}

#[tokio::test(start_paused = true)]
async fn test_second_cycle_over_unchanged_data_inserts_nothing() {
    let source = TempDir::new().unwrap();
    let checkpoint_dir = TempDir::new().unwrap();
    let checkpoint_path = checkpoint_dir.path().join("checkpoint.json");
    write_day_file(
        source.path(),
        "2026_01_25.db",
        &[(1, DAY_25 + 5.0, 40.0), (2, DAY_25 + 10.0, 41.0)],
    );

    let config = test_config(
        source.path(),
        &checkpoint_path,
        Some("2026-01-25 00:00:00.000000"),
    );
    let shutdown = CancellationToken::new();
    let mock = MockDestination::new(
        MockState {
            stop_after: 2,
            ..MockState::default()
        },
        shutdown.clone(),
    );

    let mut synchronizer = Synchronizer::new(config, mock.clone(), shutdown).unwrap();
    let stats = synchronizer.run().await.unwrap();

    // Cycle one loads both rows and advances the checkpoint; cycle two
    // finds nothing newer and must not load or move it.
    assert_eq!(stats.cycles_completed, 2);
    assert_eq!(stats.rows_extracted, 2);
    assert_eq!(stats.rows_inserted, 2);

    let state = mock.state.lock().unwrap();
    assert_eq!(state.load_row_counts, vec![2]);
    assert_eq!(state.pings, 1);

    let saved = std::fs::read_to_string(&checkpoint_path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(json["lastSuccessfulTime"], "2026-01-25 00:00:10.000000");
}

#[tokio::test(start_paused = true)]
async fn test_empty_cycle_pings_and_leaves_checkpoint_alone() {
    let source = TempDir::new().unwrap();
    let checkpoint_dir = TempDir::new().unwrap();
    let checkpoint_path = checkpoint_dir.path().join("checkpoint.json");
    write_day_file(source.path(), "2026_01_25.db", &[(1, DAY_25 + 5.0, 40.0)]);

    // Everything in the file is older than the starting checkpoint
    let config = test_config(
        source.path(),
        &checkpoint_path,
        Some("2026-01-26 00:00:00.000000"),
    );
    let shutdown = CancellationToken::new();
    let mock = MockDestination::new(MockState::default(), shutdown.clone());

    let mut synchronizer = Synchronizer::new(config, mock.clone(), shutdown).unwrap();
    let stats = synchronizer.run().await.unwrap();

    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.rows_extracted, 0);

    let state = mock.state.lock().unwrap();
    assert_eq!(state.pings, 1);
    assert!(state.load_row_counts.is_empty());
    assert!(
        !checkpoint_path.exists(),
        "empty cycle must not write a checkpoint"
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_checkpoint_without_default_is_fatal() {
    let source = TempDir::new().unwrap();
    let checkpoint_dir = TempDir::new().unwrap();
    let checkpoint_path = checkpoint_dir.path().join("checkpoint.json");
    write_day_file(source.path(), "2026_01_25.db", &[(1, DAY_25 + 5.0, 40.0)]);

    let config = test_config(source.path(), &checkpoint_path, None);
    let shutdown = CancellationToken::new();
    let mock = MockDestination::new(MockState::default(), shutdown.clone());

    let mut synchronizer = Synchronizer::new(config, mock, shutdown).unwrap();
    let error = synchronizer.run().await.unwrap_err();

    assert!(matches!(
        error,
        SyncError::Checkpoint {
            source: CheckpointError::Unavailable { .. }
        }
    ));
    assert!(!error.is_transient());
}

#[tokio::test(start_paused = true)]
async fn test_new_source_column_is_added_to_destination() {
    let source = TempDir::new().unwrap();
    let checkpoint_dir = TempDir::new().unwrap();
    let checkpoint_path = checkpoint_dir.path().join("checkpoint.json");
    write_day_file(source.path(), "2026_01_25.db", &[(1, DAY_25 + 5.0, 40.0)]);

    // Destination predates the humidity column
    let existing = vec![
        DestColumn {
            name: "register_id".to_string(),
            data_type: "bigint".to_string(),
        },
        DestColumn {
            name: "sample_time".to_string(),
            data_type: "timestamp without time zone".to_string(),
        },
    ];
    let config = test_config(
        source.path(),
        &checkpoint_path,
        Some("2026-01-25 00:00:00.000000"),
    );
    let shutdown = CancellationToken::new();
    let mock = MockDestination::new(
        MockState {
            existing: Some(existing),
            ..MockState::default()
        },
        shutdown.clone(),
    );

    let mut synchronizer = Synchronizer::new(config, mock.clone(), shutdown).unwrap();
    synchronizer.run().await.unwrap();

    let state = mock.state.lock().unwrap();
    assert!(state.created_tables.is_empty());
    assert_eq!(
        state.added_columns,
        vec![ColumnDef {
            name: "humidity".to_string(),
            pg_type: "DOUBLE PRECISION",
        }]
    );
    assert_eq!(state.load_row_counts, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_rows_are_reported_as_skipped() {
    let source = TempDir::new().unwrap();
    let checkpoint_dir = TempDir::new().unwrap();
    let checkpoint_path = checkpoint_dir.path().join("checkpoint.json");
    write_day_file(
        source.path(),
        "2026_01_25.db",
        &[(1, DAY_25 + 5.0, 40.0), (1, DAY_25 + 10.0, 41.0)],
    );

    let config = test_config(
        source.path(),
        &checkpoint_path,
        Some("2026-01-25 00:00:00.000000"),
    );
    let shutdown = CancellationToken::new();
    let mock = MockDestination::new(
        MockState {
            duplicates_per_load: 1,
            ..MockState::default()
        },
        shutdown.clone(),
    );

    let mut synchronizer = Synchronizer::new(config, mock.clone(), shutdown).unwrap();
    let stats = synchronizer.run().await.unwrap();

    assert_eq!(stats.rows_extracted, 2);
    assert_eq!(stats.rows_inserted, 1);
    assert_eq!(stats.rows_skipped, 1);
}
