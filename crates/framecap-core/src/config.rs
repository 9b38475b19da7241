//! Capture service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::archive::DEFAULT_ARCHIVE_CAPACITY;
use crate::error::StoreError;
use crate::record::SchemaVersion;

/// Wait after a stop request before the live buffer is snapshotted.
pub const DEFAULT_DRAIN_OFFSET_MS: u64 = 2500;

/// How far the elapsed wall time may undershoot the requested duration
/// before a timed capture is treated as stopped early.
pub const DEFAULT_EARLY_STOP_TOLERANCE_SECS: f64 = 0.2;

/// Tunables of the capture service. Every field has a default, so a config
/// file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub archive_capacity: usize,
    pub drain_offset_ms: u64,
    pub early_stop_tolerance_secs: f64,
    pub schema: SchemaVersion,
    pub record_directory: PathBuf,
    /// Initial capacity of the live buffer.
    pub live_buffer_hint: usize,
    /// Processes not seen in telemetry for this long are reported as gone.
    pub process_staleness_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            archive_capacity: DEFAULT_ARCHIVE_CAPACITY,
            drain_offset_ms: DEFAULT_DRAIN_OFFSET_MS,
            early_stop_tolerance_secs: DEFAULT_EARLY_STOP_TOLERANCE_SECS,
            schema: SchemaVersion::Current,
            record_directory: PathBuf::from("captures"),
            live_buffer_hint: 20_000,
            process_staleness_secs: 5,
        }
    }
}

impl CaptureConfig {
    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| StoreError::json(path, e))
    }

    pub fn drain_offset(&self) -> Duration {
        Duration::from_millis(self.drain_offset_ms)
    }

    pub fn process_staleness(&self) -> Duration {
        Duration::from_secs(self.process_staleness_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.archive_capacity, 500);
        assert_eq!(config.drain_offset(), Duration::from_millis(2500));
        assert_eq!(config.early_stop_tolerance_secs, 0.2);
        assert_eq!(config.schema, SchemaVersion::Current);
    }

    #[test]
    fn test_load_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("framecap.json");
        std::fs::write(&path, r#"{ "archive_capacity": 1000, "schema": "legacy" }"#).unwrap();

        let config = CaptureConfig::load(&path).unwrap();
        assert_eq!(config.archive_capacity, 1000);
        assert_eq!(config.schema, SchemaVersion::Legacy);
        assert_eq!(config.drain_offset_ms, DEFAULT_DRAIN_OFFSET_MS);
    }

    #[test]
    fn test_load_malformed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{ archive_capacity: ").unwrap();
        assert!(matches!(
            CaptureConfig::load(&path),
            Err(StoreError::Json { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = CaptureConfig::load(Path::new("/nonexistent/framecap.json")).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
