//! Error types for the capture pipeline.
//!
//! Precondition violations surface as [`CaptureError`]. Reconciliation
//! ambiguity is reported as a [`ReconcileError`] value inside the capture
//! report and never aborts the capture service.

use std::path::PathBuf;

use crate::record::ProcessInfo;

/// Convenience result alias for fallible framecap operations.
pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

/// Failures of the capture service surface (start/stop/persist).
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    // ─────────────────────────────────────────────────────────────────────
    // Precondition violations
    // ─────────────────────────────────────────────────────────────────────
    #[error("capture already running")]
    AlreadyCapturing,

    #[error("no capture running")]
    NotCapturing,

    #[error("capture service is locked while the previous capture is processed")]
    ServiceLocked,

    #[error("process {0} not found")]
    ProcessNotFound(ProcessInfo),

    #[error("record directory {} does not exist", .0.display())]
    InvalidDirectory(PathBuf),

    #[error("invalid process name")]
    InvalidProcessName,

    // ─────────────────────────────────────────────────────────────────────
    // Runtime
    // ─────────────────────────────────────────────────────────────────────
    #[error("telemetry ingestor is no longer running")]
    IngestorClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why reconciliation produced no capture interval.
///
/// Every variant is an expected outcome on bad or ambiguous telemetry: the
/// caller logs it, re-arms the archive and is ready for the next capture.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconcileError {
    #[error("no live capture data available")]
    NoCaptureData,

    #[error("multiple instances of '{process}' detected (process ids {ids:?})")]
    MultipleInstances { process: String, ids: Vec<u32> },

    #[error("empty archive, unable to process capture data")]
    EmptyArchive,

    #[error(
        "archive and live stream do not overlap (first live time {first_live:.4}s, last archive time {last_archive:.4}s)"
    )]
    NoOverlap { first_live: f64, last_archive: f64 },

    #[error("no record found at or after the start counter {qpc_start:.4}s")]
    NoStartBoundary { qpc_start: f64 },

    #[error("empty capture interval")]
    EmptyInterval,
}

/// Failure to turn one telemetry line into a [`RawRecord`](crate::record::RawRecord).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("telemetry source reported an error row")]
    ErrorRow,

    #[error("column {column} holds an invalid value '{value}'")]
    InvalidValue { column: &'static str, value: String },
}

/// Persistence and record-file failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed session file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} is flagged to be ignored", .0.display())]
    Ignored(PathBuf),

    #[error("{} contains no data rows", .0.display())]
    Empty(PathBuf),

    #[error("unsupported file type: {}", .0.display())]
    UnsupportedFile(PathBuf),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
