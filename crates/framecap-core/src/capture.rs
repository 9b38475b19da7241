//! Capture state machine.
//!
//! ```text
//! Stopped ──► StartedDelay ──► Started | StartedTimer | StartedRemote ──► Processing ──► Stopped
//!                  │                                                          ▲
//!                  └──────────────── cancel ──► Stopped                       │
//!                                          stop (explicit or timer) ──────────┘
//! ```
//!
//! [`CaptureManager`] is cheap to clone; all clones drive the same capture.
//! While a stop is processed (drain wait, reconciliation, persistence) the
//! service is locked and start requests are rejected.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::CaptureConfig;
use crate::counter::{PerformanceCounter, SystemCounter};
use crate::error::{CaptureError, ReconcileError, Result, StoreError};
use crate::ingest::{IngestHandle, ProcessSource, Snapshot};
use crate::reconcile::Reconciler;
use crate::record::ProcessInfo;
use crate::session::{Session, SessionInfo, SessionRunBuilder};
use crate::store::{CaptureFileMode, JsonSessionStore, PersistRequest, SessionSink};

const STATUS_QUEUE: usize = 64;
const REPORT_QUEUE: usize = 8;

// ---------------------------------------------------------------------------
// Options and status
// ---------------------------------------------------------------------------

/// Parameters of one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    pub process: ProcessInfo,
    /// Zero means run until an explicit stop.
    pub capture_time: Duration,
    pub delay: Duration,
    pub file_mode: CaptureFileMode,
    /// Falls back to the configured record directory.
    pub record_directory: Option<PathBuf>,
    pub remote: bool,
    pub comment: String,
}

impl CaptureOptions {
    pub fn new(process: ProcessInfo) -> Self {
        Self {
            process,
            capture_time: Duration::ZERO,
            delay: Duration::ZERO,
            file_mode: CaptureFileMode::Json,
            record_directory: None,
            remote: false,
            comment: String::new(),
        }
    }

    fn running_state(&self) -> CaptureState {
        if self.remote {
            CaptureState::StartedRemote
        } else if self.capture_time.is_zero() {
            CaptureState::Started
        } else {
            CaptureState::StartedTimer
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureState {
    Stopped,
    StartedDelay,
    Started,
    StartedTimer,
    StartedRemote,
    Processing,
}

impl CaptureState {
    /// Whether live capture is running.
    pub fn is_capturing(self) -> bool {
        matches!(
            self,
            Self::Started | Self::StartedTimer | Self::StartedRemote
        )
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::StartedDelay => "delay",
            Self::Started => "capturing",
            Self::StartedTimer => "capturing (timed)",
            Self::StartedRemote => "capturing (remote)",
            Self::Processing => "processing",
        };
        f.write_str(s)
    }
}

/// Notification published on every state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub state: CaptureState,
    pub message: Option<String>,
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(CaptureState),
    /// The delay countdown was cancelled before live capture began.
    Cancelled,
}

/// Result of a stop request.
#[derive(Debug)]
pub enum StopOutcome {
    DelayCancelled,
    Finished(Arc<CaptureReport>),
}

/// What happened to a finished capture.
#[derive(Debug)]
pub enum CaptureOutcome {
    Saved { session: Session, path: PathBuf },
    PersistFailed { session: Session, error: StoreError },
    Rejected(ReconcileError),
}

#[derive(Debug)]
pub struct CaptureReport {
    pub process: ProcessInfo,
    pub elapsed: Duration,
    pub archive_frames: usize,
    pub live_frames: usize,
    pub outcome: CaptureOutcome,
}

impl CaptureReport {
    pub fn session(&self) -> Option<&Session> {
        match &self.outcome {
            CaptureOutcome::Saved { session, .. } | CaptureOutcome::PersistFailed { session, .. } => {
                Some(session)
            }
            CaptureOutcome::Rejected(_) => None,
        }
    }

    fn summary(&self) -> String {
        match &self.outcome {
            CaptureOutcome::Saved { session, path } => format!(
                "capture file written to {} ({} frames, {:.2}s)",
                path.display(),
                session.frame_count(),
                session
                    .runs
                    .first()
                    .map(|r| r.capture_data.duration_secs())
                    .unwrap_or(0.0)
            ),
            CaptureOutcome::PersistFailed { error, .. } => {
                format!("error while saving capture data: {error}")
            }
            CaptureOutcome::Rejected(reason) => {
                format!("no file written: {reason}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct ActiveCapture {
    options: CaptureOptions,
    qpc_start: f64,
    started: Instant,
}

struct Inner {
    state: CaptureState,
    locked: bool,
    delay_cancel: Option<CancellationToken>,
    timer_cancel: Option<CancellationToken>,
    active: Option<ActiveCapture>,
}

struct Shared {
    config: CaptureConfig,
    ingest: IngestHandle,
    processes: Arc<dyn ProcessSource>,
    counter: Arc<dyn PerformanceCounter>,
    sink: Arc<dyn SessionSink>,
    status: broadcast::Sender<CaptureStatus>,
    reports: broadcast::Sender<Arc<CaptureReport>>,
    inner: Mutex<Inner>,
}

/// Builder for [`CaptureManager`].
pub struct CaptureManagerBuilder {
    config: CaptureConfig,
    ingest: IngestHandle,
    processes: Arc<dyn ProcessSource>,
    counter: Arc<dyn PerformanceCounter>,
    sink: Arc<dyn SessionSink>,
}

impl CaptureManagerBuilder {
    pub fn counter(mut self, counter: Arc<dyn PerformanceCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn SessionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> CaptureManager {
        let (status, _) = broadcast::channel(STATUS_QUEUE);
        let (reports, _) = broadcast::channel(REPORT_QUEUE);
        CaptureManager {
            shared: Arc::new(Shared {
                config: self.config,
                ingest: self.ingest,
                processes: self.processes,
                counter: self.counter,
                sink: self.sink,
                status,
                reports,
                inner: Mutex::new(Inner {
                    state: CaptureState::Stopped,
                    locked: false,
                    delay_cancel: None,
                    timer_cancel: None,
                    active: None,
                }),
            }),
        }
    }
}

/// Drives captures against a running ingest worker.
#[derive(Clone)]
pub struct CaptureManager {
    shared: Arc<Shared>,
}

impl CaptureManager {
    /// Manager using the system counter and the JSON session store.
    pub fn builder(
        config: CaptureConfig,
        ingest: IngestHandle,
        processes: Arc<dyn ProcessSource>,
    ) -> CaptureManagerBuilder {
        CaptureManagerBuilder {
            config,
            ingest,
            processes,
            counter: Arc::new(SystemCounter),
            sink: Arc::new(JsonSessionStore),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.inner().state
    }

    /// Whether a stop is being processed.
    pub fn is_locked(&self) -> bool {
        self.inner().locked
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureStatus> {
        self.shared.status.subscribe()
    }

    /// Reports of finished captures, including timer-driven ones.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<Arc<CaptureReport>> {
        self.shared.reports.subscribe()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.shared.config
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, state: CaptureState, message: Option<String>) {
        match &message {
            Some(m) => info!("capture state -> {state}: {m}"),
            None => info!("capture state -> {state}"),
        }
        let _ = self.shared.status.send(CaptureStatus { state, message });
    }

    /// Start a capture.
    ///
    /// Returns after the delay countdown (if any) and once live capture runs.
    /// A cancelled countdown yields [`StartOutcome::Cancelled`].
    pub async fn start_capture(&self, options: CaptureOptions) -> Result<StartOutcome> {
        let delay_token = {
            let mut inner = self.inner();
            if inner.locked {
                return Err(CaptureError::ServiceLocked);
            }
            if inner.state != CaptureState::Stopped {
                return Err(CaptureError::AlreadyCapturing);
            }
            if options.process.name.trim().is_empty() {
                return Err(CaptureError::InvalidProcessName);
            }
            if !self.shared.processes.is_running(&options.process) {
                return Err(CaptureError::ProcessNotFound(options.process.clone()));
            }
            if let Some(dir) = &options.record_directory {
                if !dir.is_dir() {
                    return Err(CaptureError::InvalidDirectory(dir.clone()));
                }
            }

            if options.delay.is_zero() {
                inner.state = options.running_state();
                None
            } else {
                let token = CancellationToken::new();
                inner.delay_cancel = Some(token.clone());
                inner.state = CaptureState::StartedDelay;
                Some(token)
            }
        };

        if let Some(token) = delay_token {
            self.emit(
                CaptureState::StartedDelay,
                Some(format!(
                    "capture delay of {:.1}s started",
                    options.delay.as_secs_f64()
                )),
            );

            // The countdown is cancelled only by stop_capture, under the lock,
            // and that call also resets the state. A cancelled countdown must
            // not touch the state again: a new capture may already own it.
            tokio::select! {
                _ = token.cancelled() => return Ok(StartOutcome::Cancelled),
                _ = tokio::time::sleep(options.delay) => {}
            }

            let still_running = self.shared.processes.is_running(&options.process);
            {
                let mut inner = self.inner();
                if token.is_cancelled() {
                    return Ok(StartOutcome::Cancelled);
                }
                inner.delay_cancel = None;
                if still_running {
                    inner.state = options.running_state();
                } else {
                    inner.state = CaptureState::Stopped;
                }
            }
            if !still_running {
                self.emit(
                    CaptureState::Stopped,
                    Some(format!("process {} is gone", options.process)),
                );
                return Err(CaptureError::ProcessNotFound(options.process));
            }
        }

        let qpc_start = self.shared.counter.now_secs();
        if let Err(e) = self.shared.ingest.start_live(&options.process).await {
            self.inner().state = CaptureState::Stopped;
            self.emit(CaptureState::Stopped, Some(e.to_string()));
            return Err(e);
        }

        let state = options.running_state();
        let capture_time = options.capture_time;
        let message = if capture_time.is_zero() {
            format!("capturing of process {} started", options.process)
        } else {
            format!(
                "capturing of process {} started, set time {:.1}s",
                options.process,
                capture_time.as_secs_f64()
            )
        };

        let timer_token = {
            let mut inner = self.inner();
            inner.active = Some(ActiveCapture {
                options,
                qpc_start,
                started: Instant::now(),
            });
            (!capture_time.is_zero()).then(|| {
                let token = CancellationToken::new();
                inner.timer_cancel = Some(token.clone());
                token
            })
        };
        self.emit(state, Some(message));

        if let Some(token) = timer_token {
            let manager = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(capture_time) => {
                        if let Err(e) = manager.stop_capture().await {
                            error!("error on timed capture stop: {e}");
                        }
                    }
                }
            });
        }

        Ok(StartOutcome::Started(state))
    }

    /// Stop the running capture, or cancel a pending delay countdown.
    ///
    /// Waits out the drain offset, reconciles archive and live data, builds
    /// and persists the session, then re-arms for the next capture.
    pub async fn stop_capture(&self) -> Result<StopOutcome> {
        let active = {
            let mut inner = self.inner();
            if inner.state == CaptureState::StartedDelay {
                if let Some(token) = inner.delay_cancel.take() {
                    token.cancel();
                }
                inner.state = CaptureState::Stopped;
                drop(inner);
                self.emit(CaptureState::Stopped, Some("capture canceled".to_string()));
                return Ok(StopOutcome::DelayCancelled);
            }
            if inner.locked {
                return Err(CaptureError::ServiceLocked);
            }
            let Some(active) = inner.active.take() else {
                return Err(CaptureError::NotCapturing);
            };
            if let Some(token) = inner.timer_cancel.take() {
                token.cancel();
            }
            inner.locked = true;
            inner.state = CaptureState::Processing;
            active
        };

        let elapsed = active.started.elapsed();
        let drain = self.shared.config.drain_offset();
        self.emit(
            CaptureState::Processing,
            Some(format!(
                "running offset of {}ms to gather latest frames",
                drain.as_millis()
            )),
        );
        tokio::time::sleep(drain).await;

        let snapshot = match self.shared.ingest.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.unlock(Some(e.to_string()));
                return Err(e);
            }
        };

        let report = Arc::new(self.process(active, elapsed, snapshot));
        self.unlock(Some(report.summary()));
        let _ = self.shared.reports.send(report.clone());
        Ok(StopOutcome::Finished(report))
    }

    fn unlock(&self, message: Option<String>) {
        {
            let mut inner = self.inner();
            inner.locked = false;
            inner.state = CaptureState::Stopped;
        }
        self.emit(CaptureState::Stopped, message);
    }

    fn process(&self, active: ActiveCapture, elapsed: Duration, snapshot: Snapshot) -> CaptureReport {
        let config = &self.shared.config;
        let options = active.options;
        info!(
            "processing capture of {}: {} archived, {} live frames, {:.3}s elapsed",
            options.process,
            snapshot.archive.len(),
            snapshot.live.len(),
            elapsed.as_secs_f64()
        );

        let interval = Reconciler::new(config.early_stop_tolerance_secs).reconcile(
            &snapshot.archive,
            &snapshot.live,
            &options,
            active.qpc_start,
            elapsed.as_secs_f64(),
        );

        let outcome = match interval {
            Err(reason) => {
                warn!("capture of {} rejected: {reason}", options.process);
                CaptureOutcome::Rejected(reason)
            }
            Ok(interval) => {
                // The first frame starts before the trigger instant.
                let lines: Vec<String> = interval
                    .iter()
                    .skip(1)
                    .map(|r| r.line().to_string())
                    .collect();
                if lines.is_empty() {
                    warn!("capture of {} holds a single frame", options.process);
                    CaptureOutcome::Rejected(ReconcileError::EmptyInterval)
                } else {
                    let run = SessionRunBuilder::new(config.schema).build(&lines);
                    let session = Session::new(
                        SessionInfo::new(&options.process.name, &options.comment),
                        vec![run],
                    );
                    self.persist(session, lines, &options)
                }
            }
        };

        CaptureReport {
            process: options.process,
            elapsed,
            archive_frames: snapshot.archive.len(),
            live_frames: snapshot.live.len(),
            outcome,
        }
    }

    fn persist(&self, session: Session, lines: Vec<String>, options: &CaptureOptions) -> CaptureOutcome {
        let config = &self.shared.config;
        let request = PersistRequest {
            session,
            header: config.schema.header(),
            raw_lines: lines,
            directory: options
                .record_directory
                .clone()
                .unwrap_or_else(|| config.record_directory.clone()),
            file_mode: options.file_mode,
        };

        match self.shared.sink.persist(&request) {
            Ok(path) => CaptureOutcome::Saved {
                session: request.session,
                path,
            },
            Err(error) => {
                error!("error while saving capture data: {error}");
                CaptureOutcome::PersistFailed {
                    session: request.session,
                    error,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
