pub mod capture;
pub mod merge;
pub mod parse;
pub mod sessions;
pub mod simulate;

use std::path::Path;
use std::time::Duration;

use framecap_core::{CaptureConfig, CaptureFileMode, SchemaVersion};

/// Print an error and exit with status 1.
pub fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

/// Build the tokio runtime the async commands run on.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap_or_else(|e| fail(format!("cannot start runtime: {e}")))
}

/// Config from `path` or defaults, with `schema` overriding.
pub fn load_config(path: Option<&str>, schema: Option<&str>) -> CaptureConfig {
    let mut config = match path {
        Some(path) => CaptureConfig::load(Path::new(path)).unwrap_or_else(|e| fail(e)),
        None => CaptureConfig::default(),
    };
    if let Some(schema) = schema {
        config.schema = parse_schema(schema);
    }
    config
}

pub fn parse_schema(s: &str) -> SchemaVersion {
    s.parse().unwrap_or_else(|e| fail(e))
}

pub fn parse_file_mode(s: &str) -> CaptureFileMode {
    s.parse().unwrap_or_else(|e| fail(e))
}

/// Parse a duration string like "5m", "30s", "1h", "100ms". A bare number
/// is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        (s, 1000)
    };

    let value: u64 = numeric
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {s}"))?;
    value
        .checked_mul(multiplier)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("invalid duration: {s}"))
}

pub fn format_duration_secs(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{secs:.1}s")
    } else if secs < 3600.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
