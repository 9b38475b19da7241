//! `framecap simulate`: synthetic telemetry, printed or captured end to end.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use framecap_core::{
    CaptureConfig, CaptureManager, CaptureOptions, ManualCounter, PerformanceCounter, ProcessInfo,
    ProcessRegistry, Scenario, StartOutcome, StreamIngestor, SystemCounter, TelemetrySimulator,
    spawn_ingestor, spawn_simulator,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::fail;

const FIRST_PID: u32 = 4242;

pub struct SimulateCommandConfig<'a> {
    pub scenario: &'a str,
    pub seed: Option<u64>,
    pub processes: usize,
    pub lines: Option<usize>,
    pub realtime: bool,
    pub duration: Duration,
    pub delay: Duration,
    pub output: Option<&'a str>,
    pub config: CaptureConfig,
}

/// Run the simulate command.
pub fn run(cmd: SimulateCommandConfig<'_>) {
    let scenario: Scenario = cmd.scenario.parse().unwrap_or_else(|e| fail(e));
    let mut simulator = TelemetrySimulator::new(cmd.config.schema, scenario, cmd.seed);
    for i in 0..cmd.processes.max(1) {
        let name = if i == 0 {
            "simulated".to_string()
        } else {
            format!("simulated{i}")
        };
        simulator.add_process(
            ProcessInfo::new(name, FIRST_PID + i as u32),
            format!("0x{:08X}", i + 1),
        );
    }

    if let Some(count) = cmd.lines {
        if cmd.realtime {
            // Stamp on the clock `framecap capture` anchors its start on.
            let simulator = simulator.with_clock(SystemCounter.now_secs());
            super::runtime().block_on(stream_lines(simulator, count));
        } else {
            print_lines(&mut simulator, count);
        }
        return;
    }

    let rt = super::runtime();
    let code = rt.block_on(capture(simulator, cmd));
    std::process::exit(code);
}

fn print_lines(simulator: &mut TelemetrySimulator, count: usize) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let header = simulator.schema().header();
    let write = |out: &mut std::io::StdoutLock<'_>, line: &str| writeln!(out, "{line}");
    if write(&mut out, &header).is_err() {
        return;
    }
    let mut written = 0;
    while written < count {
        for line in simulator.tick().0 {
            if written == count || write(&mut out, &line).is_err() {
                return;
            }
            written += 1;
        }
    }
}

/// Print lines as they fall due; `count == 0` runs until stdout closes.
async fn stream_lines(simulator: TelemetrySimulator, count: usize) {
    let header = simulator.schema().header();
    let shutdown = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(1024);
    let feeder = spawn_simulator(simulator, ManualCounter::new(0.0), tx, shutdown.clone());

    let stdout = std::io::stdout();
    let mut written = 0;
    let mut ok = writeln!(stdout.lock(), "{header}").is_ok();
    while ok && (count == 0 || written < count) {
        let Some(line) = rx.recv().await else {
            break;
        };
        let mut out = stdout.lock();
        ok = writeln!(out, "{line}").and_then(|_| out.flush()).is_ok();
        written += 1;
    }

    shutdown.cancel();
    drop(rx);
    let _ = feeder.await;
}

async fn capture(simulator: TelemetrySimulator, cmd: SimulateCommandConfig<'_>) -> i32 {
    let config = cmd.config;
    let target = simulator.processes()[0].clone();
    if let Some(dir) = cmd.output {
        std::fs::create_dir_all(dir).unwrap_or_else(|e| fail(format!("cannot create {dir}: {e}")));
    }
    let shutdown = CancellationToken::new();

    let registry = ProcessRegistry::new(config.process_staleness());
    let (tx, rx) = mpsc::channel(4096);
    let (ingest, worker) = spawn_ingestor(
        StreamIngestor::new(&config, registry.clone()),
        rx,
        shutdown.clone(),
    );
    let counter = ManualCounter::new(0.0);
    let feeder = spawn_simulator(simulator, counter.clone(), tx, shutdown.clone());

    println!(
        "Simulating {} ({}), filling pre-roll archive...",
        target,
        cmd.scenario
    );
    tokio::time::sleep(Duration::from_secs(2)).await;

    let manager = CaptureManager::builder(config, ingest, Arc::new(registry))
        .counter(Arc::new(counter))
        .build();
    let mut reports = manager.subscribe_reports();
    let mut status = manager.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(update) = status.recv().await {
            if let Some(message) = update.message {
                println!("  [{}] {message}", update.state);
            }
        }
    });

    let duration = if cmd.duration.is_zero() {
        Duration::from_secs(10)
    } else {
        cmd.duration
    };
    let options = CaptureOptions {
        capture_time: duration,
        delay: cmd.delay,
        record_directory: cmd.output.map(PathBuf::from),
        comment: format!("simulated {}", cmd.scenario),
        ..CaptureOptions::new(target)
    };

    let code = match manager.start_capture(options).await {
        Ok(StartOutcome::Started(_)) => match reports.recv().await {
            Ok(report) if report.session().is_some() => 0,
            _ => 1,
        },
        Ok(StartOutcome::Cancelled) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };

    shutdown.cancel();
    let _ = feeder.await;
    let _ = worker.await;
    // Let the last status line print.
    tokio::task::yield_now().await;
    printer.abort();
    code
}
