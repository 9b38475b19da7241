//! Integration tests for framecap-core.
//!
//! These tests drive the full pipeline:
//! simulated telemetry → ingest worker → capture manager → reconciliation →
//! session files on disk → loading and merging.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use framecap_core::store::IGNORE_MARKER;
use framecap_core::{
    CaptureConfig, CaptureFileMode, CaptureManager, CaptureOptions, CaptureOutcome, CaptureState,
    ManualCounter, ProcessInfo, ProcessRegistry, Scenario, SchemaVersion, StopOutcome, StoreError,
    StreamIngestor, TelemetrySimulator, list_sessions, load_record_file, load_session,
    merge_sessions, spawn_ingestor, spawn_simulator,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Pipeline {
    manager: CaptureManager,
    shutdown: CancellationToken,
}

fn pipeline(scenario: Scenario, processes: &[ProcessInfo]) -> Pipeline {
    let scaled: Vec<(ProcessInfo, f64)> = processes.iter().map(|p| (p.clone(), 1.0)).collect();
    pipeline_scaled(scenario, &scaled)
}

/// Pipeline whose processes present at their own rates (frame-time scale).
fn pipeline_scaled(scenario: Scenario, processes: &[(ProcessInfo, f64)]) -> Pipeline {
    let config = CaptureConfig::default();
    let shutdown = CancellationToken::new();
    let registry = ProcessRegistry::new(config.process_staleness());
    let (tx, rx) = mpsc::channel(4096);
    let (ingest, _worker) = spawn_ingestor(
        StreamIngestor::new(&config, registry.clone()),
        rx,
        shutdown.clone(),
    );

    let counter = ManualCounter::new(0.0);
    let mut simulator = TelemetrySimulator::new(config.schema, scenario, Some(42));
    for (process, scale) in processes {
        simulator.add_process_scaled(process.clone(), "0x00000001", *scale);
    }
    spawn_simulator(simulator, counter.clone(), tx, shutdown.clone());

    let manager = CaptureManager::builder(config, ingest, Arc::new(registry))
        .counter(Arc::new(counter))
        .build();
    Pipeline { manager, shutdown }
}

fn game() -> ProcessInfo {
    ProcessInfo::new("game.exe", 4242)
}

fn options_in(dir: &Path) -> CaptureOptions {
    CaptureOptions {
        record_directory: Some(dir.to_path_buf()),
        ..CaptureOptions::new(game())
    }
}

#[tokio::test(start_paused = true)]
async fn timed_capture_writes_loadable_session() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(Scenario::Stable60, &[game()]);
    let mut reports = p.manager.subscribe_reports();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let options = CaptureOptions {
        capture_time: Duration::from_secs(2),
        comment: "integration".to_string(),
        ..options_in(dir.path())
    };
    p.manager.start_capture(options).await.unwrap();
    let report = reports.recv().await.unwrap();

    let CaptureOutcome::Saved { session, path } = &report.outcome else {
        panic!("expected a saved session, got {:?}", report.outcome);
    };
    assert!(path.starts_with(dir.path()));
    assert!(path.file_name().unwrap().to_str().unwrap().starts_with("CX_game_"));

    let frames = session.frame_count();
    assert!((100..=140).contains(&frames), "frames = {frames}");
    let data = &session.runs[0].capture_data;
    assert!(data.is_aligned());
    assert_eq!(data.time_in_seconds[0], 0.0);
    let duration = data.duration_secs();
    assert!((1.85..=2.05).contains(&duration), "duration = {duration}");

    let loaded = load_session(path).unwrap();
    assert_eq!(loaded.hash, session.hash);
    assert_eq!(loaded.frame_count(), frames);
    assert_eq!(loaded.info.comment, "integration");
    assert_eq!(p.manager.state(), CaptureState::Stopped);

    p.shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn json_csv_mode_writes_ignored_raw_table() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(Scenario::Stable144, &[game()]);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let options = CaptureOptions {
        file_mode: CaptureFileMode::JsonCsv,
        ..options_in(dir.path())
    };
    p.manager.start_capture(options).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let StopOutcome::Finished(report) = p.manager.stop_capture().await.unwrap() else {
        panic!("expected a finished capture");
    };
    let CaptureOutcome::Saved { path, session } = &report.outcome else {
        panic!("expected a saved session");
    };

    let raw = path.with_file_name(format!(
        "{}_RAW.csv",
        path.file_stem().unwrap().to_str().unwrap()
    ));
    let text = std::fs::read_to_string(&raw).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some(IGNORE_MARKER));
    assert_eq!(lines.next(), Some(SchemaVersion::Current.header().as_str()));
    assert_eq!(lines.count(), session.frame_count());

    assert!(matches!(
        load_record_file(&raw, SchemaVersion::Current),
        Err(StoreError::Ignored(_))
    ));

    p.shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn other_processes_do_not_leak_into_capture() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ProcessInfo::new("launcher.exe", 7);
    let p = pipeline(Scenario::Stable60, &[game(), launcher]);
    tokio::time::sleep(Duration::from_secs(2)).await;

    p.manager.start_capture(options_in(dir.path())).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let StopOutcome::Finished(report) = p.manager.stop_capture().await.unwrap() else {
        panic!("expected a finished capture");
    };
    let session = report.session().expect("session");
    let frames = session.frame_count();
    assert!((50..=70).contains(&frames), "frames = {frames}");
    assert_eq!(session.info.process_name, "game");

    p.shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn faster_processes_interleaved_ahead_of_target() {
    let dir = tempfile::tempdir().unwrap();
    // A launcher at ten times the game's frame rate and an overlay slower than
    // the game: live data almost always opens with a launcher frame.
    let p = pipeline_scaled(
        Scenario::Stable60,
        &[
            (ProcessInfo::new("launcher.exe", 7), 0.1),
            (game(), 1.0),
            (ProcessInfo::new("overlay.exe", 9), 2.3),
        ],
    );
    tokio::time::sleep(Duration::from_secs(3)).await;

    p.manager.start_capture(options_in(dir.path())).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let StopOutcome::Finished(report) = p.manager.stop_capture().await.unwrap() else {
        panic!("expected a finished capture");
    };
    let session = report
        .session()
        .unwrap_or_else(|| panic!("capture rejected: {:?}", report.outcome));
    let frames = session.frame_count();
    assert!((50..=70).contains(&frames), "frames = {frames}");
    assert_eq!(session.info.process_name, "game");

    // Timed captures take the same path once the archive has refilled.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let options = CaptureOptions {
        capture_time: Duration::from_secs(2),
        ..options_in(dir.path())
    };
    let mut reports = p.manager.subscribe_reports();
    p.manager.start_capture(options).await.unwrap();
    let report = reports.recv().await.unwrap();
    let session = report
        .session()
        .unwrap_or_else(|| panic!("capture rejected: {:?}", report.outcome));
    let frames = session.frame_count();
    assert!((100..=140).contains(&frames), "frames = {frames}");

    p.shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn sessions_are_listed_and_merged() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(Scenario::GpuBound, &[game()]);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let mut paths = Vec::new();
    for _ in 0..2 {
        p.manager.start_capture(options_in(dir.path())).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let StopOutcome::Finished(report) = p.manager.stop_capture().await.unwrap() else {
            panic!("expected a finished capture");
        };
        let CaptureOutcome::Saved { path, .. } = &report.outcome else {
            panic!("expected a saved session");
        };
        paths.push(path.clone());
    }
    assert_ne!(paths[0], paths[1]);

    let listed = list_sessions(dir.path()).unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|s| s.process_name == "game"));

    let sessions: Vec<_> = paths.iter().map(|p| load_session(p).unwrap()).collect();
    let merged = merge_sessions(&sessions, "merged").unwrap();
    assert_eq!(merged.runs.len(), 2);
    assert_eq!(
        merged.frame_count(),
        sessions[0].frame_count() + sessions[1].frame_count()
    );
    let times: Vec<f64> = merged
        .runs
        .iter()
        .flat_map(|r| r.capture_data.time_in_seconds.iter().copied())
        .collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));

    p.shutdown.cancel();
}
