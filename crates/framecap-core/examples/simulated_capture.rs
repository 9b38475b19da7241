//! Run a timed capture against simulated telemetry.
//!
//! Feeds a synthetic 60 fps stream into the ingest worker, captures five
//! seconds of it and writes the session to `./captures`.
//!
//! Run: `cargo run --example simulated_capture`

use std::sync::Arc;
use std::time::Duration;

use framecap_core::{
    CaptureConfig, CaptureManager, CaptureOptions, CaptureOutcome, ManualCounter, ProcessInfo,
    ProcessRegistry, Scenario, StreamIngestor, TelemetrySimulator, spawn_ingestor,
    spawn_simulator,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = CaptureConfig::default();
    let process = ProcessInfo::new("demo.exe", 4242);
    let shutdown = CancellationToken::new();

    let registry = ProcessRegistry::new(config.process_staleness());
    let (tx, rx) = mpsc::channel(4096);
    let (ingest, worker) = spawn_ingestor(
        StreamIngestor::new(&config, registry.clone()),
        rx,
        shutdown.clone(),
    );

    let counter = ManualCounter::new(0.0);
    let mut simulator = TelemetrySimulator::new(config.schema, Scenario::Stable60, Some(7));
    simulator.add_process(process.clone(), "0x00000001");
    let feeder = spawn_simulator(simulator, counter.clone(), tx, shutdown.clone());

    // Let the pre-roll archive fill.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let manager = CaptureManager::builder(config, ingest, Arc::new(registry))
        .counter(Arc::new(counter))
        .build();
    let mut reports = manager.subscribe_reports();

    let options = CaptureOptions {
        capture_time: Duration::from_secs(5),
        comment: "simulated capture".to_string(),
        ..CaptureOptions::new(process)
    };
    manager
        .start_capture(options)
        .await
        .expect("Failed to start capture");
    println!("Capturing for 5s...");

    let report = reports.recv().await.expect("Capture report");
    match &report.outcome {
        CaptureOutcome::Saved { session, path } => println!(
            "Saved {} frames to {}",
            session.frame_count(),
            path.display()
        ),
        CaptureOutcome::PersistFailed { error, .. } => println!("Capture not saved: {error}"),
        CaptureOutcome::Rejected(reason) => println!("Capture rejected: {reason}"),
    }

    shutdown.cancel();
    let _ = feeder.await;
    let _ = worker.await;
}
