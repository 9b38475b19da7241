//! Serialized consumer of the telemetry stream.
//!
//! One worker task owns the archive and the live buffer. Outside a capture
//! every record goes to the archive. Once live capture starts, records are
//! appended to the live buffer, and archive filling continues only until the
//! first live frame of the captured process is older than that process's
//! newest archived frame: from there on both buffers overlap for that process
//! and the archive has nothing more to contribute. Frames of other processes
//! run on their own clocks and never end archive filling.
//!
//! Other tasks talk to the worker through an [`IngestHandle`]. At stop time
//! the worker hands both buffers over by move and immediately re-arms the
//! archive for the next capture.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, trace};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveBuffer;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::record::{ColumnMap, ProcessInfo, RawRecord};

const COMMAND_QUEUE: usize = 16;

// ---------------------------------------------------------------------------
// Process registry
// ---------------------------------------------------------------------------

/// Answers "is this process currently running".
pub trait ProcessSource: Send + Sync {
    fn running(&self) -> Vec<ProcessInfo>;

    fn is_running(&self, process: &ProcessInfo) -> bool {
        self.running().iter().any(|p| p == process)
    }
}

/// Processes seen in the telemetry stream within a staleness window.
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    seen: Arc<Mutex<HashMap<ProcessInfo, Instant>>>,
    staleness: Duration,
}

impl ProcessRegistry {
    pub fn new(staleness: Duration) -> Self {
        Self {
            seen: Arc::new(Mutex::new(HashMap::new())),
            staleness,
        }
    }

    /// Record that `process` produced a frame just now.
    pub fn observe(&self, process: &ProcessInfo) {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match seen.get_mut(process) {
            Some(last) => *last = now,
            None => {
                // Evict stale entries whenever a new process shows up.
                seen.retain(|_, last| now.duration_since(*last) <= self.staleness);
                seen.insert(process.clone(), now);
            }
        }
    }

    /// Number of processes currently tracked, stale ones included.
    pub fn tracked(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ProcessSource for ProcessRegistry {
    fn running(&self) -> Vec<ProcessInfo> {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let mut running: Vec<ProcessInfo> = seen
            .iter()
            .filter(|(_, last)| now.duration_since(**last) <= self.staleness)
            .map(|(p, _)| p.clone())
            .collect();
        running.sort();
        running
    }
}

// ---------------------------------------------------------------------------
// Ingestor state
// ---------------------------------------------------------------------------

/// Buffers handed over at stop time, oldest record first.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub archive: Vec<RawRecord>,
    pub live: Vec<RawRecord>,
}

/// Counters of the ingestor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub rejected: u64,
    pub archive_len: usize,
    pub live_len: usize,
    pub live_active: bool,
    pub archive_filling: bool,
}

/// Archive + live buffer state machine, driven by one consumer.
#[derive(Debug)]
pub struct StreamIngestor {
    columns: ColumnMap,
    archive: ArchiveBuffer,
    live: Vec<RawRecord>,
    live_hint: usize,
    live_active: bool,
    archive_filling: bool,
    target: Option<String>,
    first_target_live: Option<f64>,
    latest_target_archived: Option<f64>,
    registry: ProcessRegistry,
    accepted: u64,
    rejected: u64,
}

impl StreamIngestor {
    pub fn new(config: &CaptureConfig, registry: ProcessRegistry) -> Self {
        Self {
            columns: ColumnMap::for_schema(config.schema),
            archive: ArchiveBuffer::new(config.archive_capacity),
            live: Vec::new(),
            live_hint: config.live_buffer_hint,
            live_active: false,
            archive_filling: true,
            target: None,
            first_target_live: None,
            latest_target_archived: None,
            registry,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Parse and ingest one telemetry line. Lines that do not parse are dropped.
    pub fn ingest_line(&mut self, line: &str) {
        match RawRecord::parse(line, &self.columns) {
            Ok(record) => self.ingest(record),
            Err(e) => {
                self.rejected += 1;
                trace!("dropping telemetry line: {e}");
            }
        }
    }

    pub fn ingest(&mut self, record: RawRecord) {
        self.accepted += 1;
        self.registry.observe(record.process());

        let is_target = self.is_target(&record);
        if self.live_active {
            if is_target && self.first_target_live.is_none() {
                self.first_target_live = Some(record.time());
            }
            self.live.push(record.clone());
        }
        if self.archive_filling {
            if is_target {
                self.latest_target_archived = Some(record.time());
            }
            self.archive.push(record);
            if self.live_active && self.caught_up() {
                self.archive_filling = false;
                debug!(
                    "live stream caught up with archive ({} archived, {} live), archive filling stopped",
                    self.archive.len(),
                    self.live.len()
                );
            }
        }
    }

    fn is_target(&self, record: &RawRecord) -> bool {
        self.target
            .as_deref()
            .is_some_and(|name| record.process_name() == name)
    }

    fn caught_up(&self) -> bool {
        match (self.first_target_live, self.latest_target_archived) {
            (Some(first), Some(latest)) => first < latest,
            _ => false,
        }
    }

    /// Begin appending to the live buffer for a capture of `target`.
    pub fn start_live(&mut self, target: &ProcessInfo) {
        self.live = Vec::with_capacity(self.live_hint);
        self.live_active = true;
        self.target = Some(target.name.clone());
        self.first_target_live = None;
        self.latest_target_archived = self
            .archive
            .iter()
            .filter(|r| r.process_name() == target.name)
            .last()
            .map(RawRecord::time);
        info!(
            "live capture of {target} started with {} archived records",
            self.archive.len()
        );
    }

    /// Stop live capture, move both buffers out and re-arm the archive.
    pub fn snapshot(&mut self) -> Snapshot {
        self.live_active = false;
        let snapshot = Snapshot {
            archive: self.archive.take(),
            live: std::mem::take(&mut self.live),
        };
        self.archive_filling = true;
        self.target = None;
        self.first_target_live = None;
        self.latest_target_archived = None;
        debug!(
            "snapshot taken: {} archived, {} live; archive re-armed",
            snapshot.archive.len(),
            snapshot.live.len()
        );
        snapshot
    }

    pub fn archive(&self) -> &ArchiveBuffer {
        &self.archive
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            accepted: self.accepted,
            rejected: self.rejected,
            archive_len: self.archive.len(),
            live_len: self.live.len(),
            live_active: self.live_active,
            archive_filling: self.archive_filling,
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::StartLive { target, ack } => {
                self.start_live(&target);
                let _ = ack.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

enum Command {
    StartLive {
        target: ProcessInfo,
        ack: oneshot::Sender<()>,
    },
    Snapshot { reply: oneshot::Sender<Snapshot> },
    Stats { reply: oneshot::Sender<IngestStats> },
}

/// Cloneable handle to a running ingest worker.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::StartLive { target, .. } => write!(f, "StartLive({target})"),
            Command::Snapshot { .. } => write!(f, "Snapshot"),
            Command::Stats { .. } => write!(f, "Stats"),
        }
    }
}

impl IngestHandle {
    /// Start live capture of `target`. Returns once the worker has switched over.
    pub async fn start_live(&self, target: &ProcessInfo) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::StartLive {
            target: target.clone(),
            ack,
        })
        .await?;
        done.await.map_err(|_| CaptureError::IngestorClosed)
    }

    /// Stop live capture and take both buffers.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| CaptureError::IngestorClosed)
    }

    pub async fn stats(&self) -> Result<IngestStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| CaptureError::IngestorClosed)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CaptureError::IngestorClosed)
    }
}

/// Spawn the ingest worker on the current tokio runtime.
///
/// The worker runs until `shutdown` fires or every handle is dropped. It keeps
/// serving commands after the line source closes. The join handle yields the
/// final ingestor state.
pub fn spawn_ingestor(
    mut ingestor: StreamIngestor,
    mut lines: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) -> (IngestHandle, JoinHandle<StreamIngestor>) {
    let (tx, mut commands) = mpsc::channel(COMMAND_QUEUE);

    let task = tokio::spawn(async move {
        let mut lines_open = true;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => ingestor.handle(command),
                    None => break,
                },
                line = lines.recv(), if lines_open => match line {
                    Some(line) => ingestor.ingest_line(&line),
                    None => {
                        lines_open = false;
                        info!("telemetry source closed after {} records", ingestor.accepted);
                    }
                },
            }
        }
        debug!("ingest worker stopped");
        ingestor
    });

    (IngestHandle { commands: tx }, task)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
