//! `framecap merge`: join several sessions into one.

use std::path::Path;

use framecap_core::store::save_session;
use framecap_core::{Session, load_session, merge_sessions};

use super::fail;

/// Run the merge command.
pub fn run(inputs: &[String], output: &str, comment: Option<&str>) {
    if inputs.len() < 2 {
        fail("merge needs at least two sessions");
    }

    let sessions: Vec<Session> = inputs
        .iter()
        .map(|input| {
            load_session(Path::new(input))
                .unwrap_or_else(|e| fail(format!("cannot load {input}: {e}")))
        })
        .collect();

    let names: Vec<&str> = sessions.iter().map(|s| s.info.process_name.as_str()).collect();
    if names.iter().any(|n| *n != names[0]) {
        eprintln!("Warning: merging sessions of different processes: {}", names.join(", "));
    }

    let Some(merged) = merge_sessions(&sessions, comment.unwrap_or_default()) else {
        fail("nothing to merge");
    };
    save_session(Path::new(output), &merged).unwrap_or_else(|e| fail(e));

    println!(
        "Merged {} sessions ({} runs, {} frames) into {output}",
        sessions.len(),
        merged.runs.len(),
        merged.frame_count()
    );
}
