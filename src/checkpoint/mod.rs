//! Durable persistence of the last successfully synchronized instant.
//!
//! The checkpoint is a single JSON record at a configured path:
//!
//! ```json
//! {"lastSuccessfulTime": "2026-01-25 08:30:00.123456"}
//! ```
//!
//! Saves are atomic with respect to process crash: the new value is written
//! to a sibling temp file, fsynced, then renamed over the existing file, so
//! a crash mid-write always leaves the previous value readable. This module
//! never terminates the process; a missing file without a configured
//! default surfaces as `CheckpointError::Unavailable` and the orchestrator
//! decides.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{CheckpointError, IoSnafu, JsonSnafu, TimestampSnafu, UnavailableSnafu};
use crate::instant::CHECKPOINT_FORMAT;

/// The newest record instant already committed to the destination.
///
/// Monotonically non-decreasing across successful cycles; never advanced on
/// a failed or partial cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Checkpoint(pub NaiveDateTime);

impl Checkpoint {
    /// Parse a checkpoint instant from its persisted representation.
    pub fn parse(value: &str) -> Result<Self, chrono::format::ParseError> {
        NaiveDateTime::parse_from_str(value, CHECKPOINT_FORMAT).map(Checkpoint)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(CHECKPOINT_FORMAT))
    }
}

/// On-disk representation of the checkpoint record.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    #[serde(rename = "lastSuccessfulTime")]
    last_successful_time: String,
}

/// File-backed checkpoint persistence.
///
/// Single-writer by contract: the design does not provide inter-process
/// locking, so running two synchronizers against the same checkpoint file
/// is out of contract.
pub struct CheckpointStore {
    path: PathBuf,
    default: Option<Checkpoint>,
}

impl CheckpointStore {
    /// Create a store for the given path with an optional default returned
    /// when no checkpoint file exists yet.
    pub fn new(path: impl Into<PathBuf>, default: Option<Checkpoint>) -> Self {
        Self {
            path: path.into(),
            default,
        }
    }

    /// Load the last persisted checkpoint.
    ///
    /// An absent file yields the configured default, or
    /// `CheckpointError::Unavailable` when none was configured.
    pub fn load(&self) -> Result<Checkpoint, CheckpointError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return match self.default {
                    Some(default) => {
                        info!(
                            "No checkpoint file at {}, starting from default {}",
                            self.path.display(),
                            default
                        );
                        Ok(default)
                    }
                    None => UnavailableSnafu { path: &self.path }.fail(),
                };
            }
            Err(e) => {
                return Err(e).context(IoSnafu { path: &self.path });
            }
        };

        let record: CheckpointRecord =
            serde_json::from_str(&content).context(JsonSnafu { path: &self.path })?;
        let checkpoint = Checkpoint::parse(&record.last_successful_time).context(TimestampSnafu {
            value: record.last_successful_time.clone(),
        })?;
        debug!("Loaded checkpoint {}", checkpoint);
        Ok(checkpoint)
    }

    /// Persist a new checkpoint durably.
    ///
    /// Writes to `<path>.tmp`, fsyncs, renames over the final path, then
    /// fsyncs the containing directory.
    pub fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let record = CheckpointRecord {
            last_successful_time: checkpoint.to_string(),
        };
        // Infallible: CheckpointRecord is a single string field
        let json = serde_json::to_string(&record).context(JsonSnafu { path: &self.path })?;

        let tmp_path = temp_path(&self.path);
        let write = |path: &Path| -> std::io::Result<()> {
            let mut file = File::create(path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()
        };
        write(&tmp_path).context(IoSnafu { path: &tmp_path })?;
        fs::rename(&tmp_path, &self.path).context(IoSnafu { path: &self.path })?;

        // The rename itself must survive a crash, not just the file content
        if let Some(dir) = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            File::open(dir)
                .and_then(|handle| handle.sync_all())
                .context(IoSnafu { path: dir })?;
        }

        debug!("Saved checkpoint {}", checkpoint);
        Ok(())
    }
}

/// Sibling temp path for atomic replacement (`checkpoint.json.tmp`).
fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
