//! `framecap sessions`: list stored sessions or show one.

use std::path::Path;

use framecap_core::{list_sessions, load_session};

use super::{fail, format_duration_secs, truncate};

/// Run the sessions command.
pub fn run(session_path: Option<&str>, dir: &str) {
    if let Some(path) = session_path {
        let session = load_session(Path::new(path)).unwrap_or_else(|e| fail(e));
        super::parse::print_session(path, &session);
    } else {
        list(dir);
    }
}

fn list(dir: &str) {
    let sessions_dir = Path::new(dir);
    if !sessions_dir.exists() {
        println!("No capture directory found at {dir}");
        println!("Capture a session first: framecap capture --process <name> --pid <pid>");
        return;
    }

    let sessions = list_sessions(sessions_dir).unwrap_or_else(|e| fail(e));
    if sessions.is_empty() {
        println!("No sessions found in {dir}/");
        return;
    }

    println!(
        "{:<44} {:<20} {:<21} {:>4} {:>8} {:>9}",
        "File", "Process", "Created", "Runs", "Frames", "Duration"
    );
    println!("{}", "-".repeat(111));

    for summary in &sessions {
        let file_name = summary
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let comment_hint = if summary.comment.is_empty() {
            String::new()
        } else {
            format!("  {}", truncate(&summary.comment, 30))
        };

        println!(
            "{:<44} {:<20} {:<21} {:>4} {:>8} {:>9}{}",
            truncate(&file_name, 44),
            truncate(&summary.process_name, 20),
            summary.creation_date,
            summary.runs,
            summary.frames,
            format_duration_secs(summary.duration_secs),
            comment_hint,
        );
    }

    println!("\n{} session(s) in {dir}/", sessions.len());
    println!("Run: framecap sessions --session <file>  for details");
}
