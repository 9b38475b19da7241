//! Continuous timeline over concatenated runs.

use crate::session::{Session, SessionInfo, SessionRun};

/// Rewrite the time axis of `runs` as one continuous timeline.
///
/// Each frame's time is the running sum of all preceding frame durations
/// across the run set, so the first frame of the first run is at 0 and later
/// runs continue where the previous one ended. Sensor timelines are rebuilt
/// the same way from their between-measure intervals when every run has one;
/// otherwise they are dropped for all runs.
pub fn normalize_run_times(runs: &mut [SessionRun]) {
    let mut frame_time = 0.0;
    for run in runs.iter_mut() {
        let data = &mut run.capture_data;
        for (t, ms) in data
            .time_in_seconds
            .iter_mut()
            .zip(data.ms_between_presents.iter())
        {
            *t = frame_time;
            frame_time += ms * 1e-3;
        }
    }

    if runs.iter().all(|r| r.sensor_data.is_some()) {
        let mut measure_time = 0.0;
        for sensor in runs.iter_mut().filter_map(|r| r.sensor_data.as_mut()) {
            sensor.measure_time = sensor
                .between_measure_times
                .iter()
                .map(|dt| {
                    measure_time += dt;
                    measure_time
                })
                .collect();
        }
    } else {
        for run in runs.iter_mut() {
            run.sensor_data = None;
        }
    }
}

/// Concatenate the runs of `sessions` into one new session on a continuous
/// timeline. The process name is taken from the first session.
pub fn merge_sessions(sessions: &[Session], comment: &str) -> Option<Session> {
    let first = sessions.first()?;
    let mut runs: Vec<SessionRun> = sessions.iter().flat_map(|s| s.runs.iter().cloned()).collect();
    normalize_run_times(&mut runs);

    let mut info = SessionInfo::new(&first.info.process_name, comment);
    info.game_name = first.info.game_name.clone();
    info.metadata.insert("MergedSessions".to_string(), sessions.len().to_string());
    Some(Session::new(info, runs))
}
