//! Session persistence and record file loading.
//!
//! # File layout
//!
//! - `CX_<process>_<timestamp>.json`: serialized [`Session`]
//! - `CX_<process>_<timestamp>_RAW.csv`: the raw capture table, written in
//!   [`CaptureFileMode::JsonCsv`]. It starts with the ignore marker so it is
//!   never picked up as a session of its own.
//!
//! Record files may start with `//Key=Value` metadata lines before the
//! column header.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::record::SchemaVersion;
use crate::session::{Session, SessionInfo, SessionRunBuilder, file_timestamp};

/// First line of a record file that must not be loaded.
pub const IGNORE_MARKER: &str = "//Ignore=true";
/// Prefix of metadata lines.
pub const HEADER_MARKER: &str = "//";
/// Separates key and value in metadata lines.
pub const INFO_SEPARATOR: char = '=';

const FILE_PREFIX: &str = "CX_";

// ---------------------------------------------------------------------------
// File mode
// ---------------------------------------------------------------------------

/// Which artifacts a finished capture writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFileMode {
    #[default]
    Json,
    JsonCsv,
}

impl fmt::Display for CaptureFileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::JsonCsv => write!(f, "json-csv"),
        }
    }
}

impl std::str::FromStr for CaptureFileMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "json-csv" | "jsoncsv" => Ok(Self::JsonCsv),
            other => Err(format!("unknown file mode '{other}' (expected json|json-csv)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Everything a sink needs to persist one finished capture.
#[derive(Debug, Clone)]
pub struct PersistRequest {
    pub session: Session,
    /// Column header of the raw lines.
    pub header: String,
    pub raw_lines: Vec<String>,
    pub directory: PathBuf,
    pub file_mode: CaptureFileMode,
}

/// Receives finished sessions.
pub trait SessionSink: Send + Sync {
    /// Persist the capture and return the path of the session file.
    fn persist(&self, request: &PersistRequest) -> Result<PathBuf, StoreError>;
}

/// Writes sessions as JSON files into the request's directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSessionStore;

impl SessionSink for JsonSessionStore {
    fn persist(&self, request: &PersistRequest) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&request.directory).map_err(|e| StoreError::io(&request.directory, e))?;
        let process = sanitize_file_component(&request.session.info.process_name);
        let stem = unique_stem(&request.directory, &format!("{FILE_PREFIX}{process}_{}", file_timestamp()));

        if request.file_mode == CaptureFileMode::JsonCsv {
            let raw_path = request.directory.join(format!("{stem}_RAW.csv"));
            write_raw_csv(&raw_path, &request.header, &request.raw_lines)?;
            debug!("raw capture table written to {}", raw_path.display());
        }

        let path = request.directory.join(format!("{stem}.json"));
        save_session(&path, &request.session)?;
        info!(
            "session with {} frames written to {}",
            request.session.frame_count(),
            path.display()
        );
        Ok(path)
    }
}

fn unique_stem(dir: &Path, base: &str) -> String {
    let mut stem = base.to_string();
    let mut n = 1;
    while dir.join(format!("{stem}.json")).exists() {
        stem = format!("{base}_{n}");
        n += 1;
    }
    stem
}

fn sanitize_file_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    if cleaned.trim().is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

// ---------------------------------------------------------------------------
// Reading and writing
// ---------------------------------------------------------------------------

/// Write a session as pretty JSON.
pub fn save_session(path: &Path, session: &Session) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(session).map_err(|e| StoreError::json(path, e))?;
    fs::write(path, json).map_err(|e| StoreError::io(path, e))
}

/// Write a raw capture table preceded by the ignore marker.
pub fn write_raw_csv<S: AsRef<str>>(path: &Path, header: &str, lines: &[S]) -> Result<(), StoreError> {
    let file = fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let write_all = |writer: &mut BufWriter<fs::File>| -> std::io::Result<()> {
        writeln!(writer, "{IGNORE_MARKER}")?;
        writeln!(writer, "{header}")?;
        for line in lines {
            writeln!(writer, "{}", line.as_ref())?;
        }
        writer.flush()
    };
    write_all(&mut writer).map_err(|e| StoreError::io(path, e))
}

/// Load a `.json` session or build one from a `.csv` record file.
pub fn load_session(path: &Path) -> Result<Session, StoreError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("json") => {
            let text = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
            serde_json::from_str(&text).map_err(|e| StoreError::json(path, e))
        }
        Some("csv") => load_record_file(path, SchemaVersion::Current),
        _ => Err(StoreError::UnsupportedFile(path.to_path_buf())),
    }
}

/// Build a single-run session from a CSV record file.
pub fn load_record_file(path: &Path, schema: SchemaVersion) -> Result<Session, StoreError> {
    let text = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    let mut lines = text.lines().peekable();

    if lines.peek().map(|l| l.trim()) == Some(IGNORE_MARKER) {
        return Err(StoreError::Ignored(path.to_path_buf()));
    }

    let mut metadata = BTreeMap::new();
    while let Some(line) = lines.next_if(|l| l.starts_with(HEADER_MARKER)) {
        if let Some((key, value)) = line[HEADER_MARKER.len()..].split_once(INFO_SEPARATOR) {
            metadata.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    let body: Vec<&str> = lines.filter(|l| !l.trim().is_empty()).collect();
    let run = SessionRunBuilder::new(schema).build(&body);
    if run.capture_data.is_empty() {
        return Err(StoreError::Empty(path.to_path_buf()));
    }

    let process = metadata
        .get("ProcessName")
        .or_else(|| metadata.get("GameName"))
        .cloned()
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().trim_start_matches(FILE_PREFIX).to_string())
                .unwrap_or_default()
        });
    let comment = metadata.get("Comment").cloned().unwrap_or_default();

    let mut info = SessionInfo::new(&process, &comment);
    if let Some(game) = metadata.get("GameName") {
        info.game_name = game.clone();
    }
    info.metadata = metadata;

    Ok(Session::new(info, vec![run]))
}

/// Summary of one stored session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub path: PathBuf,
    pub id: String,
    pub process_name: String,
    pub creation_date: String,
    pub comment: String,
    pub runs: usize,
    pub frames: usize,
    pub duration_secs: f64,
}

/// Stored `.json` sessions in `dir`, newest first. Unreadable files are skipped.
pub fn list_sessions(dir: &Path) -> Result<Vec<SessionSummary>, StoreError> {
    let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut sessions = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let session = match load_session(&path) {
            Ok(s) => s,
            Err(e) => {
                debug!("skipping {}: {e}", path.display());
                continue;
            }
        };
        sessions.push(SessionSummary {
            id: session.info.id.clone(),
            process_name: session.info.process_name.clone(),
            creation_date: session.info.creation_date.clone(),
            comment: session.info.comment.clone(),
            runs: session.runs.len(),
            frames: session.frame_count(),
            duration_secs: session
                .runs
                .iter()
                .map(|r| r.capture_data.duration_secs())
                .sum(),
            path,
        });
    }

    sessions.sort_by(|a, b| {
        b.creation_date
            .cmp(&a.creation_date)
            .then_with(|| b.path.cmp(&a.path))
    });
    Ok(sessions)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
