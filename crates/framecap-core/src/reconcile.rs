//! Archive/live reconciliation.
//!
//! Given the pre-roll archive, the live buffer, the counter value taken at
//! the start request and the wall time the capture actually ran, select the
//! ordered records that belong to the captured interval of one process.
//!
//! Every failure is returned as a [`ReconcileError`] value. Nothing here
//! performs I/O or blocks.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::capture::CaptureOptions;
use crate::config::DEFAULT_EARLY_STOP_TOLERANCE_SECS;
use crate::error::ReconcileError;
use crate::record::RawRecord;

/// How the end of the interval is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationMode {
    /// Cut at the elapsed wall time of the capture.
    Explicit,
    /// Cut at the requested duration, corrected by the boundary offset.
    Fixed,
}

/// Pick the termination mode for a capture.
///
/// A timed capture whose elapsed wall time undershot the requested duration
/// by more than `tolerance` was stopped early and is cut like an explicit one.
/// A non-positive elapsed time means the wall time is unknown.
pub fn termination_mode(requested_secs: f64, elapsed_secs: f64, tolerance: f64) -> TerminationMode {
    if requested_secs <= 0.0 {
        return TerminationMode::Explicit;
    }
    if elapsed_secs > 0.0 && elapsed_secs < requested_secs - tolerance {
        return TerminationMode::Explicit;
    }
    TerminationMode::Fixed
}

/// Reconcile with the default early-stop tolerance.
pub fn reconcile(
    archive: &[RawRecord],
    live: &[RawRecord],
    options: &CaptureOptions,
    qpc_start: f64,
    elapsed_secs: f64,
) -> Result<Vec<RawRecord>, ReconcileError> {
    Reconciler::default().reconcile(archive, live, options, qpc_start, elapsed_secs)
}

/// Reconciliation with a configurable early-stop tolerance.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    tolerance: f64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_EARLY_STOP_TOLERANCE_SECS)
    }
}

impl Reconciler {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn reconcile(
        &self,
        archive: &[RawRecord],
        live: &[RawRecord],
        options: &CaptureOptions,
        qpc_start: f64,
        elapsed_secs: f64,
    ) -> Result<Vec<RawRecord>, ReconcileError> {
        if live.is_empty() {
            return Err(ReconcileError::NoCaptureData);
        }

        let requested = options.capture_time.as_secs_f64();
        let mode = termination_mode(requested, elapsed_secs, self.tolerance);
        let target = options.process.name.as_str();

        check_single_instance(archive, live, target)?;

        debug!(
            "raw counts: archive {} frames, live {} frames",
            archive.len(),
            live.len()
        );

        let mut archive: Vec<&RawRecord> =
            archive.iter().filter(|r| r.process_name() == target).collect();
        let mut live: Vec<&RawRecord> =
            live.iter().filter(|r| r.process_name() == target).collect();

        debug!(
            "after process filter ('{target}'): archive {} frames, live {} frames",
            archive.len(),
            live.len()
        );

        keep_dominant_swap_chain(&mut archive, &mut live);

        let Some(last_archive) = archive.last().map(|r| r.time()) else {
            return Err(ReconcileError::EmptyArchive);
        };

        let union = join_at_seam(&archive, &live, last_archive)?;
        let start_time = find_start_time(&union, qpc_start)?;

        debug!(
            "union spans {:.2}s, {:.2}s from start boundary",
            union_span(&union),
            union.last().map(|r| r.time() - start_time).unwrap_or(0.0)
        );

        let interval: Vec<RawRecord> = match mode {
            TerminationMode::Explicit => union
                .iter()
                .filter(|r| r.time() >= qpc_start && r.time() - start_time <= elapsed_secs)
                .map(|r| (*r).clone())
                .collect(),
            TerminationMode::Fixed => select_fixed(&union, start_time, requested),
        };

        if interval.is_empty() {
            return Err(ReconcileError::EmptyInterval);
        }
        Ok(interval)
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn check_single_instance(
    archive: &[RawRecord],
    live: &[RawRecord],
    target: &str,
) -> Result<(), ReconcileError> {
    let mut ids: BTreeMap<&str, BTreeSet<u32>> = BTreeMap::new();
    for record in archive.iter().chain(live) {
        ids.entry(record.process_name())
            .or_default()
            .insert(record.process_id());
    }

    for (name, pids) in &ids {
        if pids.len() > 1 {
            debug!("multiple instances of '{name}' in telemetry: {pids:?}");
        }
    }

    match ids.get(target) {
        Some(pids) if pids.len() > 1 => Err(ReconcileError::MultipleInstances {
            process: target.to_string(),
            ids: pids.iter().copied().collect(),
        }),
        _ => Ok(()),
    }
}

/// Keep only the swap chain with the most records across archive and live.
fn keep_dominant_swap_chain(archive: &mut Vec<&RawRecord>, live: &mut Vec<&RawRecord>) {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for record in archive.iter().chain(live.iter()) {
        match counts.iter_mut().find(|(key, _)| *key == record.swap_chain()) {
            Some((_, count)) => *count += 1,
            None => counts.push((record.swap_chain(), 1)),
        }
    }
    if counts.len() <= 1 {
        return;
    }

    let mut dominant = counts[0];
    for &entry in &counts[1..] {
        if entry.1 > dominant.1 {
            dominant = entry;
        }
    }
    let dominant = dominant.0.to_string();

    let total: usize = counts.iter().map(|(_, n)| n).sum();
    let distribution: Vec<String> = counts.iter().map(|(k, n)| format!("'{k}': {n}")).collect();
    warn!(
        "multiple swap chains detected [{}], keeping '{}' and dropping {} frames",
        distribution.join(", "),
        dominant,
        total - counts.iter().find(|(k, _)| *k == dominant).map_or(0, |(_, n)| *n)
    );

    let archive_before = archive.len();
    archive.retain(|r| r.swap_chain() == dominant);
    live.retain(|r| r.swap_chain() == dominant);
    if archive.is_empty() && archive_before > 0 {
        warn!("swap chain filter emptied the archive ({archive_before} frames before)");
    }
}

/// Concatenate archive and the part of live that lies beyond the archive.
fn join_at_seam<'a>(
    archive: &[&'a RawRecord],
    live: &[&'a RawRecord],
    last_archive: f64,
) -> Result<Vec<&'a RawRecord>, ReconcileError> {
    let skip = live.iter().take_while(|r| r.time() <= last_archive).count();
    if skip == 0 {
        let first_live = live.first().map(|r| r.time()).unwrap_or(f64::NAN);
        return Err(ReconcileError::NoOverlap {
            first_live,
            last_archive,
        });
    }

    debug!("seam: skipping {skip} live frames already archived");
    let mut union = Vec::with_capacity(archive.len() + live.len() - skip);
    union.extend_from_slice(archive);
    union.extend_from_slice(&live[skip..]);
    Ok(union)
}

/// Time of the last record before the first one at or after `qpc_start`.
fn find_start_time(union: &[&RawRecord], qpc_start: f64) -> Result<f64, ReconcileError> {
    union
        .windows(2)
        .find(|pair| pair[1].time() >= qpc_start)
        .map(|pair| pair[0].time())
        .ok_or(ReconcileError::NoStartBoundary { qpc_start })
}

fn select_fixed(union: &[&RawRecord], start_time: f64, requested: f64) -> Vec<RawRecord> {
    let mut interval = Vec::new();
    let mut offset = 0.0;

    for record in union {
        let relative = round3(record.time() - start_time);
        let ceiling = round3(requested + offset);
        if record.time() >= start_time && relative <= ceiling {
            interval.push((*record).clone());
            if interval.len() == 2 {
                offset = interval[1].time() - start_time;
            }
        }
    }
    interval
}

fn union_span(union: &[&RawRecord]) -> f64 {
    match (union.first(), union.last()) {
        (Some(first), Some(last)) => last.time() - first.time(),
        _ => 0.0,
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::record::tests::{record_at, telemetry_line};
    use crate::record::{ColumnMap, ProcessInfo, SchemaVersion};

    fn options(capture_secs: f64) -> CaptureOptions {
        CaptureOptions {
            capture_time: Duration::from_secs_f64(capture_secs),
            ..CaptureOptions::new(ProcessInfo::new("game", 1))
        }
    }

    fn series(app: &str, pid: u32, start: f64, end: f64, count: usize) -> Vec<RawRecord> {
        let step = (end - start) / (count - 1) as f64;
        (0..count)
            .map(|i| record_at(app, pid, start + i as f64 * step))
            .collect()
    }

    fn with_swap_chain(time: f64, swap_chain: &str) -> RawRecord {
        let line = telemetry_line(SchemaVersion::Current, "game.exe", 1, swap_chain, time, 10.0);
        RawRecord::parse(&line, &ColumnMap::for_schema(SchemaVersion::Current)).unwrap()
    }

    // -----------------------------------------------------------------------
    // Termination mode tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_zero_duration_is_explicit() {
        assert_eq!(termination_mode(0.0, 12.0, 0.2), TerminationMode::Explicit);
    }

    #[test]
    fn test_early_stop_selects_explicit() {
        assert_eq!(termination_mode(10.0, 9.7, 0.2), TerminationMode::Explicit);
        assert_eq!(termination_mode(10.0, 9.9, 0.2), TerminationMode::Fixed);
        assert_eq!(termination_mode(10.0, 10.4, 0.2), TerminationMode::Fixed);
    }

    #[test]
    fn test_unknown_elapsed_stays_fixed() {
        assert_eq!(termination_mode(5.0, 0.0, 0.2), TerminationMode::Fixed);
    }

    // -----------------------------------------------------------------------
    // Seam tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_seam_skips_exactly_k_records() {
        let archive = series("game", 1, 0.0, 1.0, 11);
        let refs: Vec<&RawRecord> = archive.iter().collect();
        for k in 1..5 {
            let mut live: Vec<RawRecord> =
                (0..k).map(|i| record_at("game", 1, 1.0 - i as f64 * 0.1)).rev().collect();
            live.extend((1..=5).map(|i| record_at("game", 1, 1.0 + i as f64 * 0.1)));
            let live_refs: Vec<&RawRecord> = live.iter().collect();

            let union = join_at_seam(&refs, &live_refs, 1.0).unwrap();
            assert_eq!(union.len(), archive.len() + live.len() - k);
            assert!(union.windows(2).all(|w| w[0].time() < w[1].time()));
        }
    }

    #[test]
    fn test_seam_without_overlap_aborts() {
        let archive = series("game", 1, 0.0, 1.0, 11);
        let live = series("game", 1, 1.5, 2.0, 6);
        let err = reconcile(&archive, &live, &options(0.0), 1.6, 0.3).unwrap_err();
        assert!(matches!(err, ReconcileError::NoOverlap { .. }));
    }

    // -----------------------------------------------------------------------
    // Failure path tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_empty_live_is_no_capture_data() {
        let archive = series("game", 1, 0.0, 1.0, 11);
        let err = reconcile(&archive, &[], &options(0.0), 0.5, 1.0).unwrap_err();
        assert_eq!(err, ReconcileError::NoCaptureData);
    }

    #[test]
    fn test_multiple_instances_fail() {
        let archive = series("game", 1, 0.0, 1.0, 11);
        let mut live = series("game", 1, 0.9, 2.0, 12);
        live.push(record_at("game", 2, 2.1));
        let err = reconcile(&archive, &live, &options(0.0), 1.2, 0.5).unwrap_err();
        assert_eq!(
            err,
            ReconcileError::MultipleInstances {
                process: "game".to_string(),
                ids: vec![1, 2],
            }
        );
    }

    #[test]
    fn test_other_process_instances_do_not_matter() {
        let mut archive = series("game", 1, 0.0, 1.0, 11);
        archive.push(record_at("launcher", 7, 1.0));
        archive.push(record_at("launcher", 8, 1.0));
        let live = series("game", 1, 0.9, 2.0, 12);
        let interval = reconcile(&archive, &live, &options(0.0), 1.2, 0.5).unwrap();
        assert!(interval.iter().all(|r| r.process_name() == "game"));
    }

    #[test]
    fn test_archive_of_other_process_is_empty_archive() {
        let archive = series("launcher", 3, 0.0, 1.0, 11);
        let live = series("game", 1, 0.9, 2.0, 12);
        let err = reconcile(&archive, &live, &options(0.0), 1.2, 0.5).unwrap_err();
        assert_eq!(err, ReconcileError::EmptyArchive);
    }

    #[test]
    fn test_start_after_all_data_has_no_boundary() {
        let archive = series("game", 1, 0.0, 1.0, 11);
        let live = series("game", 1, 0.9, 2.0, 12);
        let err = reconcile(&archive, &live, &options(0.0), 5.0, 0.5).unwrap_err();
        assert_eq!(err, ReconcileError::NoStartBoundary { qpc_start: 5.0 });
    }

    #[test]
    fn test_zero_elapsed_explicit_is_empty_interval() {
        let archive = series("game", 1, 0.0, 1.0, 11);
        let live = series("game", 1, 0.9, 2.0, 12);
        // Start lands between frames, so no frame is within 0s of the boundary.
        let err = reconcile(&archive, &live, &options(0.0), 1.45, 0.0).unwrap_err();
        assert_eq!(err, ReconcileError::EmptyInterval);
    }

    // -----------------------------------------------------------------------
    // Interval selection tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_explicit_mode_gates_on_counter_and_elapsed() {
        let archive = series("game", 1, 0.0, 1.0, 11);
        let live = series("game", 1, 0.9, 2.0, 12);
        let interval = reconcile(&archive, &live, &options(0.0), 1.2, 0.5).unwrap();

        // Start boundary is 1.1, so the cut is at 1.6.
        let times: Vec<f64> = interval.iter().map(RawRecord::time).collect();
        assert!((times[0] - 1.2).abs() < 1e-9);
        assert!((times.last().unwrap() - 1.6).abs() < 1e-9);
        assert_eq!(times.len(), 5);
    }

    #[test]
    fn test_fixed_mode_includes_frame_before_start() {
        let archive = series("game", 1, 0.0, 1.0, 11);
        let live = series("game", 1, 0.9, 3.0, 22);
        let interval = reconcile(&archive, &live, &options(1.0), 1.2, 1.05).unwrap();
        let first = interval.first().unwrap().time();
        let last = interval.last().unwrap().time();
        assert!((first - 1.1).abs() < 1e-9);
        // Ceiling is duration plus the first frame delta.
        assert!((last - 2.2).abs() < 1e-9);
    }

    #[test]
    fn test_early_stopped_timed_capture_uses_elapsed() {
        let archive = series("game", 1, 0.0, 1.0, 11);
        let live = series("game", 1, 0.9, 3.0, 22);
        let interval = reconcile(&archive, &live, &options(10.0), 1.2, 0.5).unwrap();
        let last = interval.last().unwrap().time();
        assert!((last - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_scenario_archive_500_live_50() {
        let archive = series("game", 1, 0.0, 5.0, 500);
        let live = series("game", 1, 4.8, 6.0, 50);
        let qpc_start = archive
            .iter()
            .map(RawRecord::time)
            .find(|t| *t >= 4.9)
            .unwrap();

        let interval = reconcile(&archive, &live, &options(1.0), qpc_start, 1.05).unwrap();
        let first = interval.first().unwrap().time();
        let last = interval.last().unwrap().time();
        assert!((first - 4.9).abs() < 0.02, "first = {first}");
        assert!((last - 5.9).abs() < 0.05, "last = {last}");
        assert!(interval.windows(2).all(|w| w[0].time() < w[1].time()));
    }

    // -----------------------------------------------------------------------
    // Swap chain tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_dominant_swap_chain_kept() {
        let mut archive: Vec<RawRecord> =
            (0..11).map(|i| with_swap_chain(i as f64 * 0.1, "0xA")).collect();
        archive.push(with_swap_chain(1.0, "0xB"));
        let live: Vec<RawRecord> = (0..12)
            .map(|i| with_swap_chain(0.9 + i as f64 * 0.1, "0xA"))
            .collect();

        let interval = reconcile(&archive, &live, &options(0.0), 1.2, 0.5).unwrap();
        assert!(interval.iter().all(|r| r.swap_chain() == "0xA"));
    }

    #[test]
    fn test_swap_chain_filter_can_empty_archive() {
        let archive: Vec<RawRecord> =
            (0..5).map(|i| with_swap_chain(i as f64 * 0.1, "0xB")).collect();
        let live: Vec<RawRecord> = (0..20)
            .map(|i| with_swap_chain(0.3 + i as f64 * 0.1, "0xA"))
            .collect();
        let err = reconcile(&archive, &live, &options(0.0), 1.0, 1.0).unwrap_err();
        assert_eq!(err, ReconcileError::EmptyArchive);
    }
}
