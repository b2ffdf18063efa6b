//! Internal events for metrics emission.
//!
//! Each struct is one measurable occurrence in a run. Events implement
//! `InternalEvent`, which records the matching counter, gauge or histogram.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Input
// ============================================================================

/// An input file was fetched and decoded.
pub struct InputFileRead {
    pub source: &'static str,
    pub bytes: u64,
}

impl InternalEvent for InputFileRead {
    fn emit(self) {
        trace!(source = self.source, bytes = self.bytes, "Input file read");
        counter!("sparkify_input_files_total", "source" => self.source).increment(1);
        counter!("sparkify_input_bytes_total", "source" => self.source).increment(self.bytes);
    }
}

/// Records decoded from a source.
pub struct RecordsRead {
    pub source: &'static str,
    pub count: u64,
}

impl InternalEvent for RecordsRead {
    fn emit(self) {
        trace!(source = self.source, count = self.count, "Records read");
        counter!("sparkify_records_read_total", "source" => self.source).increment(self.count);
    }
}

/// A malformed line was skipped under the `skip` parse policy.
pub struct ParseErrorSkipped {
    pub source: &'static str,
}

impl InternalEvent for ParseErrorSkipped {
    fn emit(self) {
        trace!(source = self.source, "Parse error skipped");
        counter!("sparkify_parse_errors_skipped_total", "source" => self.source).increment(1);
    }
}

// ============================================================================
// Tables
// ============================================================================

/// Rows produced for an analytics table.
pub struct TableRowsWritten {
    pub table: &'static str,
    pub rows: u64,
}

impl InternalEvent for TableRowsWritten {
    fn emit(self) {
        trace!(table = self.table, rows = self.rows, "Table rows written");
        counter!("sparkify_table_rows_total", "table" => self.table).increment(self.rows);
        gauge!("sparkify_table_rows", "table" => self.table).set(self.rows as f64);
    }
}

/// A Parquet file was uploaded.
pub struct ParquetFileWritten {
    pub table: &'static str,
    pub bytes: u64,
}

impl InternalEvent for ParquetFileWritten {
    fn emit(self) {
        trace!(table = self.table, bytes = self.bytes, "Parquet file written");
        counter!("sparkify_parquet_files_total", "table" => self.table).increment(1);
        counter!("sparkify_parquet_bytes_total", "table" => self.table).increment(self.bytes);
    }
}

/// Log events that matched no songplay join and were dropped.
pub struct SongplayEventsDropped {
    pub count: u64,
}

impl InternalEvent for SongplayEventsDropped {
    fn emit(self) {
        trace!(count = self.count, "Songplay events dropped");
        counter!("sparkify_songplay_events_dropped_total").increment(self.count);
    }
}

/// A pipeline stage finished.
pub struct StageCompleted {
    pub stage: &'static str,
    pub duration: Duration,
}

impl InternalEvent for StageCompleted {
    fn emit(self) {
        trace!(
            stage = self.stage,
            duration_ms = self.duration.as_millis(),
            "Stage completed"
        );
        histogram!("sparkify_stage_duration_seconds", "stage" => self.stage)
            .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    List,
    Delete,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
            StorageOperation::Delete => "delete",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// A storage request completed.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request"
        );
        counter!(
            "sparkify_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!(
            "sparkify_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
