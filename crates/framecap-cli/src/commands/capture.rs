//! `framecap capture`: run one capture against a live telemetry stream.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use framecap_core::{
    CaptureConfig, CaptureError, CaptureManager, CaptureOptions, CaptureOutcome, CaptureReport,
    ProcessInfo, ProcessRegistry, ProcessSource, StartOutcome, StopOutcome, StreamIngestor,
    spawn_ingestor,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{fail, format_duration_secs};

const LINE_QUEUE: usize = 8192;
const PROCESS_WAIT: Duration = Duration::from_secs(10);

pub struct CaptureCommandConfig<'a> {
    pub process: &'a str,
    pub pid: u32,
    pub duration: Duration,
    pub delay: Duration,
    pub output: Option<&'a str>,
    pub file_mode: &'a str,
    pub comment: Option<&'a str>,
    pub remote: bool,
    pub source_cmd: Option<&'a str>,
    pub config: CaptureConfig,
}

/// Run the capture command.
pub fn run(cmd: CaptureCommandConfig<'_>) {
    let rt = super::runtime();
    let code = rt.block_on(capture(cmd));
    std::process::exit(code);
}

async fn capture(cmd: CaptureCommandConfig<'_>) -> i32 {
    let config = cmd.config;
    let process = ProcessInfo::new(cmd.process, cmd.pid);
    let shutdown = CancellationToken::new();

    let registry = ProcessRegistry::new(config.process_staleness());
    let (tx, rx) = mpsc::channel(LINE_QUEUE);
    let (ingest, worker) = spawn_ingestor(
        StreamIngestor::new(&config, registry.clone()),
        rx,
        shutdown.clone(),
    );

    let mut child = None;
    let reader = match cmd.source_cmd {
        Some(command) => {
            let mut spawned = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .stdout(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .unwrap_or_else(|e| fail(format!("cannot run source command '{command}': {e}")));
            let Some(stdout) = spawned.stdout.take() else {
                fail("source command has no stdout");
            };
            child = Some(spawned);
            spawn_reader(stdout, tx, shutdown.clone())
        }
        None => spawn_reader(tokio::io::stdin(), tx, shutdown.clone()),
    };

    // Ctrl+C stops an open capture or cancels the delay.
    let (interrupt_tx, mut interrupts) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })
    .unwrap_or_else(|e| fail(format!("cannot set Ctrl+C handler: {e}")));

    println!("Waiting for telemetry of {process}...");
    if !wait_for_process(&registry, &process).await {
        eprintln!(
            "Process {process} not seen within {}s. Running: {}",
            PROCESS_WAIT.as_secs(),
            describe_running(&registry)
        );
        shutdown.cancel();
        return 1;
    }

    let manager = CaptureManager::builder(config, ingest, Arc::new(registry)).build();
    let mut reports = manager.subscribe_reports();
    let printer = spawn_status_printer(&manager);

    let options = CaptureOptions {
        capture_time: cmd.duration,
        delay: cmd.delay,
        file_mode: super::parse_file_mode(cmd.file_mode),
        record_directory: cmd.output.map(PathBuf::from),
        remote: cmd.remote,
        comment: cmd.comment.unwrap_or_default().to_string(),
        ..CaptureOptions::new(process)
    };

    let starter = manager.clone();
    let mut start = tokio::spawn(async move { starter.start_capture(options).await });
    let started = tokio::select! {
        result = &mut start => result,
        _ = interrupts.recv() => {
            if let Err(e) = manager.stop_capture().await {
                eprintln!("{e}");
            }
            start.await
        }
    };

    let code = match started {
        Ok(Ok(StartOutcome::Started(state))) => {
            if cmd.duration.is_zero() {
                println!("Capture running ({state}), press Ctrl+C to stop");
            }
            match await_report(&manager, &mut reports, &mut interrupts).await {
                Some(report) => print_report(&report),
                None => 1,
            }
        }
        Ok(Ok(StartOutcome::Cancelled)) => {
            println!("Capture canceled during delay");
            0
        }
        Ok(Err(e)) => {
            eprintln!("Error: {e}");
            1
        }
        Err(e) => {
            eprintln!("Error: capture task failed: {e}");
            1
        }
    };

    shutdown.cancel();
    let _ = reader.await;
    let _ = worker.await;
    printer.abort();
    if let Some(mut child) = child {
        let _ = child.kill().await;
    }
    code
}

fn spawn_reader<R>(
    source: R,
    lines: mpsc::Sender<String>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(source).lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = reader.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if lines.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    log::info!("telemetry source closed");
                    break;
                }
                Err(e) => {
                    log::error!("error reading telemetry: {e}");
                    break;
                }
            }
        }
    })
}

async fn wait_for_process(registry: &ProcessRegistry, process: &ProcessInfo) -> bool {
    let deadline = tokio::time::Instant::now() + PROCESS_WAIT;
    while tokio::time::Instant::now() < deadline {
        if registry.is_running(process) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

fn describe_running(registry: &ProcessRegistry) -> String {
    let running = registry.running();
    if running.is_empty() {
        "none".to_string()
    } else {
        running
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn spawn_status_printer(manager: &CaptureManager) -> tokio::task::JoinHandle<()> {
    let mut status = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(update) = status.recv().await {
            match update.message {
                Some(message) => println!("  [{}] {message}", update.state),
                None => println!("  [{}]", update.state),
            }
        }
    })
}

async fn await_report(
    manager: &CaptureManager,
    reports: &mut tokio::sync::broadcast::Receiver<Arc<CaptureReport>>,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> Option<Arc<CaptureReport>> {
    tokio::select! {
        report = reports.recv() => report.ok(),
        _ = interrupts.recv() => match manager.stop_capture().await {
            Ok(StopOutcome::Finished(report)) => Some(report),
            Ok(StopOutcome::DelayCancelled) => None,
            // A timer-driven stop is already running.
            Err(CaptureError::ServiceLocked) => reports.recv().await.ok(),
            Err(e) => {
                eprintln!("Error: {e}");
                None
            }
        },
    }
}

fn print_report(report: &CaptureReport) -> i32 {
    println!();
    println!("Capture of {}", report.process);
    println!(
        "  Elapsed:   {}",
        format_duration_secs(report.elapsed.as_secs_f64())
    );
    println!(
        "  Buffered:  {} archived, {} live",
        report.archive_frames, report.live_frames
    );
    match &report.outcome {
        CaptureOutcome::Saved { session, path } => {
            let duration = session
                .runs
                .first()
                .map(|r| r.capture_data.duration_secs())
                .unwrap_or(0.0);
            println!("  Frames:    {}", session.frame_count());
            println!("  Duration:  {}", format_duration_secs(duration));
            println!("  Saved to:  {}", path.display());
            0
        }
        CaptureOutcome::PersistFailed { session, error } => {
            println!("  Frames:    {}", session.frame_count());
            eprintln!("  Not saved: {error}");
            1
        }
        CaptureOutcome::Rejected(reason) => {
            eprintln!("  Rejected:  {reason}");
            1
        }
    }
}
