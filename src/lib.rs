//! snowdrift: incremental sync from daily SQLite files to PostgreSQL.
//!
//! This library replicates append-only timestamped records from a
//! directory of per-day SQLite files (named `YYYY_MM_DD.<ext>`) into one
//! consolidated PostgreSQL table, using a persisted checkpoint to extract
//! only rows strictly newer than the last successful run. Replayed rows
//! are absorbed by an `ON CONFLICT DO NOTHING` policy on the composite
//! key and timestamp constraint, so cycles are idempotent.
//!
//! # Example
//!
//! ```ignore
//! use snowdrift::{Config, run_sync, error::SyncError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SyncError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let stats = run_sync(config).await?;
//!     println!("Inserted {} rows", stats.rows_inserted);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod instant;
pub mod metrics;
pub mod schema;
pub mod sink;
pub mod source;
pub mod sync;

// Re-export main types
pub use config::Config;
pub use sync::{run_sync, SyncStats, Synchronizer};
