//! Columnar session runs built from raw telemetry lines.
//!
//! A [`SessionRun`] holds one parallel array per measured quantity, all of
//! the same length and index-aligned to the same frame, plus a content
//! fingerprint over the verbatim input lines. A [`Session`] groups one or
//! more runs with metadata about the capture and the machine it ran on.
//!
//! # Storage Format
//!
//! Sessions serialize to JSON with PascalCase keys:
//! - `Hash`: fingerprint over the sorted run fingerprints
//! - `Info`: [`SessionInfo`] (process, comment, machine, creation time)
//! - `Runs`: list of runs, each with `Hash`, `Runtime`, `CaptureData`

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::record::{Column, ColumnMap, SchemaVersion, looks_like_header, split_fields};

// ---------------------------------------------------------------------------
// Machine info
// ---------------------------------------------------------------------------

/// Machine information captured with each session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub os: String,
    pub arch: String,
    pub cpu: String,
    pub cores: usize,
}

/// Best-effort description of the capturing machine.
pub fn detect_machine_info() -> MachineInfo {
    let os = match os_version() {
        Some(version) => format!("{} {version}", std::env::consts::OS),
        None => std::env::consts::OS.to_string(),
    };
    MachineInfo {
        os,
        arch: std::env::consts::ARCH.to_string(),
        cpu: cpu_model().unwrap_or_else(|| "unknown".to_string()),
        cores: std::thread::available_parallelism().map_or(1, |n| n.get()),
    }
}

/// Value of the first `key<sep>value` line of a system file.
#[cfg(target_os = "linux")]
fn system_file_value(path: &str, key: &str, sep: char) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    text.lines().find_map(|line| {
        let (k, v) = line.split_once(sep)?;
        (k.trim() == key).then(|| v.trim().trim_matches('"').to_string())
    })
}

#[cfg(target_os = "macos")]
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = std::process::Command::new(program).args(args).output().ok()?;
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

#[cfg(target_os = "linux")]
fn os_version() -> Option<String> {
    system_file_value("/etc/os-release", "PRETTY_NAME", '=')
}

#[cfg(target_os = "linux")]
fn cpu_model() -> Option<String> {
    system_file_value("/proc/cpuinfo", "model name", ':')
}

#[cfg(target_os = "macos")]
fn os_version() -> Option<String> {
    command_output("sw_vers", &["-productVersion"])
}

#[cfg(target_os = "macos")]
fn cpu_model() -> Option<String> {
    command_output("sysctl", &["-n", "machdep.cpu.brand_string"])
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn os_version() -> Option<String> {
    None
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn cpu_model() -> Option<String> {
    None
}

// ---------------------------------------------------------------------------
// Capture data
// ---------------------------------------------------------------------------

/// Frame table of one run. Every array has the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaptureData {
    pub time_in_seconds: Vec<f64>,
    pub ms_between_presents: Vec<f64>,
    pub dropped: Vec<bool>,
    pub ms_between_display_change: Vec<f64>,
    pub ms_until_displayed: Vec<f64>,
    #[serde(rename = "MsInPresentAPI")]
    pub ms_in_present_api: Vec<f64>,
    #[serde(rename = "QPCTime")]
    pub qpc_time: Vec<f64>,
    pub present_mode: Vec<i32>,
    pub allows_tearing: Vec<i32>,
    pub sync_interval: Vec<i32>,
    #[serde(default)]
    pub gpu_active: Vec<f64>,
    /// Only present when the source tracks PC latency. Unparseable values are NaN.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "nan_as_null")]
    pub pc_latency: Option<Vec<f64>>,
}

impl CaptureData {
    /// Zero-filled table of `len` frames.
    pub fn zeroed(len: usize, with_pc_latency: bool) -> Self {
        Self {
            time_in_seconds: vec![0.0; len],
            ms_between_presents: vec![0.0; len],
            dropped: vec![false; len],
            ms_between_display_change: vec![0.0; len],
            ms_until_displayed: vec![0.0; len],
            ms_in_present_api: vec![0.0; len],
            qpc_time: vec![0.0; len],
            present_mode: vec![0; len],
            allows_tearing: vec![0; len],
            sync_interval: vec![0; len],
            gpu_active: vec![0.0; len],
            pc_latency: with_pc_latency.then(|| vec![0.0; len]),
        }
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.time_in_seconds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_in_seconds.is_empty()
    }

    /// Whether every column has the same length.
    pub fn is_aligned(&self) -> bool {
        let n = self.len();
        [
            self.ms_between_presents.len(),
            self.dropped.len(),
            self.ms_between_display_change.len(),
            self.ms_until_displayed.len(),
            self.ms_in_present_api.len(),
            self.qpc_time.len(),
            self.present_mode.len(),
            self.allows_tearing.len(),
            self.sync_interval.len(),
            self.gpu_active.len(),
        ]
        .iter()
        .all(|&len| len == n)
            && self.pc_latency.as_ref().is_none_or(|v| v.len() == n)
    }

    /// Shift the time axis so the first frame is at 0.
    pub fn normalize_time(&mut self) {
        if let Some(&start) = self.time_in_seconds.first() {
            for t in &mut self.time_in_seconds {
                *t -= start;
            }
        }
    }

    /// Time of the last frame, in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.time_in_seconds.last().copied().unwrap_or(0.0)
    }
}

/// JSON has no NaN, so unparseable latency values travel as `null`.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &Option<Vec<f64>>, s: S) -> Result<S::Ok, S::Error> {
        match values {
            None => s.serialize_none(),
            Some(v) => s.collect_seq(v.iter().map(|x| (!x.is_nan()).then_some(*x))),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<f64>>, D::Error> {
        let raw: Option<Vec<Option<f64>>> = Option::deserialize(d)?;
        Ok(raw.map(|v| v.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect()))
    }
}

/// Sensor timing paired with a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SensorTimeline {
    pub measure_time: Vec<f64>,
    pub between_measure_times: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Session run
// ---------------------------------------------------------------------------

/// One captured run: fingerprint, runtime identifier and frame table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionRun {
    pub hash: String,
    pub runtime: String,
    pub capture_data: CaptureData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_data: Option<SensorTimeline>,
}

/// Map a present-mode description to its integer code. Unknown text maps to 0.
pub fn present_mode_code(text: &str) -> i32 {
    match text.trim() {
        "Hardware: Legacy Flip" => 1,
        "Hardware: Legacy Copy to front buffer" => 2,
        "Hardware: Independent Flip" => 3,
        "Composed: Flip" => 4,
        "Hardware Composed: Independent Flip" => 5,
        "Composed: Copy with GPU GDI" => 6,
        "Composed: Copy with CPU GDI" => 7,
        "Composed: Composition Atlas" => 8,
        _ => 0,
    }
}

/// Lowercase hex SHA-256 of `lines` joined with the field separator.
pub fn fingerprint<S: AsRef<str>>(lines: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            hasher.update(b",");
        }
        hasher.update(line.as_ref().as_bytes());
    }
    hex_encode(&hasher.finalize())
}

/// Builds a [`SessionRun`] from telemetry lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionRunBuilder {
    schema: SchemaVersion,
}

impl SessionRunBuilder {
    /// `schema` is used when the input carries no header line.
    pub fn new(schema: SchemaVersion) -> Self {
        Self { schema }
    }

    /// Parse `lines` into a run.
    ///
    /// A leading header line overrides the default schema. Blank lines are
    /// skipped. Fields that do not parse keep the column's zero default.
    pub fn build<S: AsRef<str>>(&self, lines: &[S]) -> SessionRun {
        let mut lines: Vec<&str> = lines.iter().map(|l| l.as_ref()).collect();

        let columns = match lines.first() {
            Some(first) if looks_like_header(first) => {
                let map = ColumnMap::from_header(first);
                lines.remove(0);
                map
            }
            _ => ColumnMap::for_schema(self.schema),
        };
        lines.retain(|l| !l.trim().is_empty());

        let hash = fingerprint(&lines);
        let mut data = CaptureData::zeroed(lines.len(), columns.has(Column::MsPcLatency));
        let mut runtime = None;

        for (i, line) in lines.iter().enumerate() {
            let fields = split_fields(line);
            let get = |column: Column| -> Option<&str> {
                columns
                    .index(column)
                    .and_then(|idx| fields.get(idx))
                    .map(|s| s.trim())
            };

            if i == 0 {
                runtime = get(Column::Runtime).map(str::to_string);
            }

            if let Some(ms) = get(Column::CpuStartQpcTimeMs).and_then(parse_f64) {
                data.time_in_seconds[i] = ms / 1000.0;
            } else if let Some(secs) = get(Column::TimeInSeconds).and_then(parse_f64) {
                data.time_in_seconds[i] = secs;
            }
            if let Some(v) = get(Column::MsBetweenPresents).and_then(parse_f64) {
                data.ms_between_presents[i] = v;
            }
            if let Some(v) = get(Column::Dropped) {
                data.dropped[i] = parse_flag(v);
            }
            if let Some(v) = get(Column::MsBetweenDisplayChange).and_then(parse_f64) {
                data.ms_between_display_change[i] = v;
            }
            if let Some(v) = get(Column::MsUntilDisplayed).and_then(parse_f64) {
                data.ms_until_displayed[i] = v;
            }
            if let Some(v) = get(Column::MsInPresentApi).and_then(parse_f64) {
                data.ms_in_present_api[i] = v;
            }
            if let Some(v) = get(Column::QpcTime).and_then(parse_f64) {
                data.qpc_time[i] = v;
            }
            if let Some(v) = get(Column::PresentMode) {
                data.present_mode[i] = present_mode_code(v);
            }
            if let Some(v) = get(Column::AllowsTearing).and_then(parse_i32) {
                data.allows_tearing[i] = v;
            }
            if let Some(v) = get(Column::SyncInterval).and_then(parse_i32) {
                data.sync_interval[i] = v;
            }
            if let Some(v) = get(Column::MsGpuActive).and_then(parse_f64) {
                data.gpu_active[i] = v;
            }
            if let Some(latency) = data.pc_latency.as_mut() {
                latency[i] = get(Column::MsPcLatency).and_then(parse_f64).unwrap_or(f64::NAN);
            }
        }

        if columns.has(Column::CpuStartQpcTimeMs) || columns.has(Column::TimeInSeconds) {
            data.normalize_time();
        } else {
            data.time_in_seconds = cumulative_times(&data.ms_between_presents);
        }

        SessionRun {
            hash,
            runtime: runtime
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
            capture_data: data,
            sensor_data: None,
        }
    }
}

/// Frame start times from frame durations: the first frame starts at 0.
fn cumulative_times(frame_ms: &[f64]) -> Vec<f64> {
    let mut acc = 0.0;
    let mut times = Vec::with_capacity(frame_ms.len());
    for (i, ms) in frame_ms.iter().enumerate() {
        if i > 0 {
            acc += ms;
        }
        times.push(acc / 1000.0);
    }
    times
}

fn parse_f64(text: &str) -> Option<f64> {
    text.parse::<f64>().ok()
}

fn parse_i32(text: &str) -> Option<i32> {
    text.parse::<i32>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().map(|v| v as i32))
}

fn parse_flag(text: &str) -> bool {
    match text.parse::<i64>() {
        Ok(v) => v != 0,
        Err(_) => text.eq_ignore_ascii_case("true"),
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Metadata of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfo {
    pub id: String,
    pub process_name: String,
    pub game_name: String,
    pub creation_date: String,
    pub comment: String,
    pub machine: MachineInfo,
    pub app_version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl SessionInfo {
    pub fn new(process_name: &str, comment: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            process_name: process_name.to_string(),
            game_name: process_name.to_string(),
            creation_date: utc_stamp(since_epoch(), ":"),
            comment: comment.to_string(),
            machine: detect_machine_info(),
            app_version: crate::VERSION.to_string(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Aggregate of one or more runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Session {
    pub hash: String,
    pub info: SessionInfo,
    pub runs: Vec<SessionRun>,
}

impl Session {
    pub fn new(info: SessionInfo, runs: Vec<SessionRun>) -> Self {
        let hash = session_hash(&runs);
        Self { hash, info, runs }
    }

    /// Total frames over all runs.
    pub fn frame_count(&self) -> usize {
        self.runs.iter().map(|r| r.capture_data.len()).sum()
    }
}

/// Fingerprint of a run set, independent of run order.
pub fn session_hash(runs: &[SessionRun]) -> String {
    let mut hashes: Vec<&str> = runs.iter().map(|r| r.hash.as_str()).collect();
    hashes.sort_unstable();
    fingerprint(&hashes)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Hex-encode bytes without any separator.
fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Stamp used in `CX_` file names, without colons: `2026-02-15T013000Z`.
pub(crate) fn file_timestamp() -> String {
    utc_stamp(since_epoch(), "")
}

/// UTC ISO-8601 stamp with `time_sep` between hours, minutes and seconds.
fn utc_stamp(since_epoch: Duration, time_sep: &str) -> String {
    let (year, month, day, hour, min, sec) = secs_to_utc(since_epoch.as_secs());
    format!("{year:04}-{month:02}-{day:02}T{hour:02}{time_sep}{min:02}{time_sep}{sec:02}Z")
}

/// Convert seconds since Unix epoch to (year, month, day, hour, minute, second) UTC.
fn secs_to_utc(secs: u64) -> (u64, u64, u64, u64, u64, u64) {
    let sec = secs % 60;
    let min = (secs / 60) % 60;
    let hour = (secs / 3600) % 24;

    let mut days = secs / 86400;
    let mut year = 1970u64;
    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let months_days: [u64; 12] = if is_leap(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 0u64;
    for (i, &md) in months_days.iter().enumerate() {
        if days < md {
            month = i as u64 + 1;
            break;
        }
        days -= md;
    }

    (year, month, days + 1, hour, min, sec)
}

fn is_leap(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::telemetry_line;

    fn lines(schema: SchemaVersion, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                telemetry_line(schema, "game.exe", 9, "0x1", 100.0 + i as f64 * 0.016, 16.0)
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Machine info tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_detect_machine_info() {
        let info = detect_machine_info();
        assert!(!info.os.is_empty());
        assert!(!info.arch.is_empty());
        assert!(info.cores > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_system_file_value() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("os-release");
        std::fs::write(&path, "NAME=\"Test\"\nPRETTY_NAME=\"Test OS 1.0\"\n").unwrap();
        let path = path.to_str().unwrap();
        assert_eq!(
            system_file_value(path, "PRETTY_NAME", '='),
            Some("Test OS 1.0".to_string())
        );
        assert_eq!(system_file_value(path, "VERSION", '='), None);
        assert_eq!(system_file_value("/nonexistent/os-release", "NAME", '='), None);
    }

    // -----------------------------------------------------------------------
    // Timestamp tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_utc_stamp_epoch() {
        assert_eq!(utc_stamp(Duration::ZERO, ":"), "1970-01-01T00:00:00Z");
        assert_eq!(utc_stamp(Duration::ZERO, ""), "1970-01-01T000000Z");
    }

    #[test]
    fn test_utc_stamp_leap_day() {
        // 2024-02-29 12:00:00 UTC
        assert_eq!(
            utc_stamp(Duration::from_secs(1_709_208_000), ":"),
            "2024-02-29T12:00:00Z"
        );
    }

    // -----------------------------------------------------------------------
    // Fingerprint tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_hex_encode_basic() {
        assert_eq!(hex_encode(&[0xab, 0xcd, 0x01]), "abcd01");
        assert_eq!(hex_encode(&[]), "");
    }

    #[test]
    fn test_fingerprint_known_value() {
        // sha256("a,b")
        assert_eq!(
            fingerprint(&["a", "b"]),
            "1eb7c54d52831bbfe8942af0b1c56b7409523a59ed6ca99c1174fef7eb32c1b5"
        );
        assert_eq!(fingerprint(&["a", "b"]), fingerprint(&["a,b"]));
        assert_ne!(fingerprint(&["a", "b"]), fingerprint(&["b", "a"]));
    }

    #[test]
    fn test_session_hash_ignores_run_order() {
        let builder = SessionRunBuilder::default();
        let a = builder.build(&lines(SchemaVersion::Current, 3));
        let b = builder.build(&lines(SchemaVersion::Current, 4));
        assert_eq!(
            session_hash(&[a.clone(), b.clone()]),
            session_hash(&[b, a])
        );
    }

    // -----------------------------------------------------------------------
    // Builder tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_present_mode_codes() {
        assert_eq!(present_mode_code("Hardware: Legacy Flip"), 1);
        assert_eq!(present_mode_code("Hardware: Independent Flip"), 3);
        assert_eq!(present_mode_code("Composed: Composition Atlas"), 8);
        assert_eq!(present_mode_code("Other"), 0);
    }

    #[test]
    fn test_build_default_schema() {
        let input = lines(SchemaVersion::Current, 10);
        let run = SessionRunBuilder::new(SchemaVersion::Current).build(&input);
        let data = &run.capture_data;

        assert_eq!(data.len(), 10);
        assert!(data.is_aligned());
        assert_eq!(data.time_in_seconds[0], 0.0);
        assert!(data.time_in_seconds.windows(2).all(|w| w[0] <= w[1]));
        assert!((data.duration_secs() - 0.144).abs() < 1e-6);
        assert_eq!(data.ms_between_presents[3], 16.0);
        assert_eq!(data.present_mode[0], 3);
        assert_eq!(data.allows_tearing[0], 1);
        assert_eq!(run.runtime, "DXGI");
        assert_eq!(run.hash, fingerprint(&input));
        assert!(data.pc_latency.is_some());
    }

    #[test]
    fn test_build_uses_leading_header() {
        let mut input = vec![SchemaVersion::Legacy.header()];
        input.extend(lines(SchemaVersion::Legacy, 5));
        // Default schema does not match the lines; the header wins.
        let run = SessionRunBuilder::new(SchemaVersion::Current).build(&input);
        assert_eq!(run.capture_data.len(), 5);
        assert!(run.capture_data.pc_latency.is_none());
        assert_eq!(run.capture_data.ms_between_presents[0], 16.0);
        assert_eq!(run.hash, fingerprint(&input[1..]));
    }

    #[test]
    fn test_build_frametime_only_uses_cumulative_time() {
        let input = vec!["fps,frametime", "60,10", "60,20", "60,30"];
        let run = SessionRunBuilder::default().build(&input);
        let times = &run.capture_data.time_in_seconds;
        assert_eq!(times.len(), 3);
        assert_eq!(times[0], 0.0);
        assert!((times[1] - 0.020).abs() < 1e-12);
        assert!((times[2] - 0.050).abs() < 1e-12);
        assert_eq!(run.runtime, "unknown");
    }

    #[test]
    fn test_build_parse_failures_fall_back_to_defaults() {
        let input = vec![
            "Application,Dropped,MsBetweenPresents,SyncInterval,MsPCLatency,TimeInSeconds",
            "game.exe,x,abc,?,n/a,1.0",
            "game.exe,1,16.5,1,4.2,1.5",
        ];
        let run = SessionRunBuilder::default().build(&input);
        let data = &run.capture_data;
        assert_eq!(data.dropped, vec![false, true]);
        assert_eq!(data.ms_between_presents, vec![0.0, 16.5]);
        assert_eq!(data.sync_interval, vec![0, 1]);
        let latency = data.pc_latency.as_ref().unwrap();
        assert!(latency[0].is_nan());
        assert_eq!(latency[1], 4.2);
        assert_eq!(data.time_in_seconds, vec![0.0, 0.5]);
    }

    #[test]
    fn test_build_keeps_quoted_separator() {
        let mut input = vec![SchemaVersion::Legacy.header()];
        input.push(telemetry_line(
            SchemaVersion::Legacy,
            "\"Game, Deluxe.exe\"",
            1,
            "0x1",
            1.0,
            12.5,
        ));
        let run = SessionRunBuilder::default().build(&input);
        assert_eq!(run.capture_data.ms_between_presents, vec![12.5]);
    }

    #[test]
    fn test_build_empty_input() {
        let run = SessionRunBuilder::default().build::<&str>(&[]);
        assert!(run.capture_data.is_empty());
        assert!(run.capture_data.is_aligned());
    }

    // -----------------------------------------------------------------------
    // Serialization tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_session_json_uses_pascal_case_and_null_latency() {
        let input = vec![
            "Application,MsPCLatency,TimeInSeconds",
            "game.exe,n/a,1.0",
        ];
        let run = SessionRunBuilder::default().build(&input);
        let session = Session::new(SessionInfo::new("game", "test"), vec![run]);
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"TimeInSeconds\""));
        assert!(json.contains("\"MsInPresentAPI\""));
        assert!(json.contains("\"PcLatency\":[null]"));

        let back: Session = serde_json::from_str(&json).unwrap();
        assert!(back.runs[0].capture_data.pc_latency.as_ref().unwrap()[0].is_nan());
        assert_eq!(back.hash, session.hash);
        assert_eq!(back.info.process_name, "game");
    }
}
