//! `framecap parse`: build a session from a record file.

use std::path::Path;

use framecap_core::store::save_session;
use framecap_core::{SchemaVersion, Session, StoreError, load_record_file, load_session};

use super::{fail, format_duration_secs};

/// Run the parse command.
pub fn run(file: &str, schema: SchemaVersion, output: Option<&str>) {
    let path = Path::new(file);
    let is_csv = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    let loaded = if is_csv {
        load_record_file(path, schema)
    } else {
        load_session(path)
    };

    let session = match loaded {
        Ok(session) => session,
        Err(StoreError::Ignored(_)) => {
            println!("{file} is marked //Ignore=true (raw capture table), nothing to parse");
            return;
        }
        Err(e) => fail(e),
    };

    print_session(file, &session);

    if let Some(out) = output {
        save_session(Path::new(out), &session).unwrap_or_else(|e| fail(e));
        println!("\nSession written to {out}");
    }
}

pub fn print_session(label: &str, session: &Session) {
    println!("Session: {label}");
    println!("  ID:       {}", session.info.id);
    println!("  Process:  {}", session.info.process_name);
    println!("  Created:  {}", session.info.creation_date);
    if !session.info.comment.is_empty() {
        println!("  Comment:  {}", session.info.comment);
    }
    println!(
        "  Machine:  {} ({}, {} cores, {})",
        session.info.machine.cpu,
        session.info.machine.arch,
        session.info.machine.cores,
        session.info.machine.os
    );
    println!("  Version:  {}", session.info.app_version);
    for (key, value) in &session.info.metadata {
        println!("  {key}: {value}");
    }
    println!("  Hash:     {}", session.hash);
    println!("  Frames:   {}", session.frame_count());

    for (i, run) in session.runs.iter().enumerate() {
        let data = &run.capture_data;
        let avg_ms = if data.is_empty() {
            0.0
        } else {
            data.ms_between_presents.iter().sum::<f64>() / data.len() as f64
        };
        let fps = if avg_ms > 0.0 { 1000.0 / avg_ms } else { 0.0 };
        let dropped = data.dropped.iter().filter(|d| **d).count();
        println!(
            "  Run {:<3} {:>7} frames  {:>8}  avg {:>6.2}ms ({:>6.1} fps)  dropped {:<5} runtime {}",
            i + 1,
            data.len(),
            format_duration_secs(data.duration_secs()),
            avg_ms,
            fps,
            dropped,
            run.runtime
        );
    }
}
