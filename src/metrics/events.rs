//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the sync loop.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::counter;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when the source directory is scanned for day files.
pub struct SourceFilesScanned {
    pub count: u64,
}

impl InternalEvent for SourceFilesScanned {
    fn emit(self) {
        trace!(count = self.count, "Source files scanned");
        counter!("snowdrift_source_files_scanned_total").increment(self.count);
    }
}

/// Event emitted when rows are extracted from source files.
pub struct RowsExtracted {
    pub count: u64,
}

impl InternalEvent for RowsExtracted {
    fn emit(self) {
        trace!(count = self.count, "Rows extracted");
        counter!("snowdrift_rows_extracted_total").increment(self.count);
    }
}

/// Event emitted when rows are inserted into the destination.
pub struct RowsInserted {
    pub count: u64,
}

impl InternalEvent for RowsInserted {
    fn emit(self) {
        trace!(count = self.count, "Rows inserted");
        counter!("snowdrift_rows_inserted_total").increment(self.count);
    }
}

/// Event emitted when rows are skipped as duplicates by the conflict policy.
pub struct RowsSkipped {
    pub count: u64,
}

impl InternalEvent for RowsSkipped {
    fn emit(self) {
        trace!(count = self.count, "Rows skipped");
        counter!("snowdrift_rows_skipped_total").increment(self.count);
    }
}

/// Event emitted when rows are dropped as unusable.
pub struct RowsRejected {
    pub count: u64,
}

impl InternalEvent for RowsRejected {
    fn emit(self) {
        trace!(count = self.count, "Rows rejected");
        counter!("snowdrift_rows_rejected_total").increment(self.count);
    }
}

/// Event emitted when destination columns are added during schema evolution.
pub struct SchemaColumnsAdded {
    pub count: u64,
}

impl InternalEvent for SchemaColumnsAdded {
    fn emit(self) {
        trace!(count = self.count, "Schema columns added");
        counter!("snowdrift_schema_columns_added_total").increment(self.count);
    }
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Copy)]
pub enum CycleStatus {
    Success,
    Empty,
    Failed,
}

impl CycleStatus {
    fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Success => "success",
            CycleStatus::Empty => "empty",
            CycleStatus::Failed => "failed",
        }
    }
}

/// Event emitted when a sync cycle finishes.
pub struct CycleCompleted {
    pub status: CycleStatus,
}

impl InternalEvent for CycleCompleted {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Cycle completed");
        counter!("snowdrift_cycles_total", "status" => self.status.as_str()).increment(1);
    }
}

/// Event emitted when a failed cycle schedules a retry.
pub struct RetryScheduled;

impl InternalEvent for RetryScheduled {
    fn emit(self) {
        trace!("Retry scheduled");
        counter!("snowdrift_retries_total").increment(1);
    }
}

/// Event emitted when the checkpoint is persisted.
pub struct CheckpointSaved;

impl InternalEvent for CheckpointSaved {
    fn emit(self) {
        trace!("Checkpoint saved");
        counter!("snowdrift_checkpoints_saved_total").increment(1);
    }
}
