//! # framecap-core
//!
//! **Frame telemetry in, precise capture windows out.**
//!
//! `framecap-core` consumes a continuous stream of per-frame presentation
//! telemetry (one CSV line per presented frame), keeps a rolling pre-roll
//! archive of recent frames, and on request cuts an exact capture interval
//! out of archive plus live data. The interval is turned into a columnar
//! session run and persisted as JSON.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use framecap_core::{
//!     CaptureConfig, CaptureManager, CaptureOptions, ProcessInfo, ProcessRegistry,
//!     StreamIngestor, spawn_ingestor,
//! };
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> framecap_core::Result<()> {
//! let config = CaptureConfig::default();
//! let registry = ProcessRegistry::new(config.process_staleness());
//! let (lines, rx) = mpsc::channel::<String>(4096);
//! let (ingest, _worker) = spawn_ingestor(
//!     StreamIngestor::new(&config, registry.clone()),
//!     rx,
//!     CancellationToken::new(),
//! );
//! // ... feed telemetry lines into `lines` ...
//!
//! let manager = CaptureManager::builder(config, ingest, Arc::new(registry)).build();
//! let options = CaptureOptions {
//!     capture_time: Duration::from_secs(20),
//!     ..CaptureOptions::new(ProcessInfo::new("game.exe", 4242))
//! };
//! manager.start_capture(options).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Telemetry lines → [`StreamIngestor`] (archive + live buffers) →
//! [`CaptureManager`] (delay, timer, stop) → [`reconcile()`] → [`SessionRunBuilder`] →
//! [`SessionSink`]
//!
//! All buffer mutation happens on a single ingest worker task; the capture
//! manager talks to it through an [`IngestHandle`].

pub mod archive;
pub mod capture;
pub mod config;
pub mod counter;
pub mod error;
pub mod ingest;
pub mod normalize;
pub mod reconcile;
pub mod record;
pub mod session;
pub mod simulate;
pub mod store;

pub use archive::{ArchiveBuffer, DEFAULT_ARCHIVE_CAPACITY};
pub use capture::{
    CaptureManager, CaptureManagerBuilder, CaptureOptions, CaptureOutcome, CaptureReport,
    CaptureState, CaptureStatus, StartOutcome, StopOutcome,
};
pub use config::CaptureConfig;
pub use counter::{ManualCounter, PerformanceCounter, SystemCounter};
pub use error::{CaptureError, ReconcileError, RecordError, Result, StoreError};
pub use ingest::{
    IngestHandle, IngestStats, ProcessRegistry, ProcessSource, Snapshot, StreamIngestor,
    spawn_ingestor,
};
pub use normalize::{merge_sessions, normalize_run_times};
pub use reconcile::{Reconciler, TerminationMode, reconcile, termination_mode};
pub use record::{Column, ColumnMap, ProcessInfo, RawRecord, SchemaVersion};
pub use session::{
    CaptureData, MachineInfo, SensorTimeline, Session, SessionInfo, SessionRun,
    SessionRunBuilder, detect_machine_info, fingerprint,
};
pub use simulate::{Scenario, TelemetrySimulator, spawn_simulator};
pub use store::{
    CaptureFileMode, JsonSessionStore, PersistRequest, SessionSink, SessionSummary,
    list_sessions, load_record_file, load_session,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
