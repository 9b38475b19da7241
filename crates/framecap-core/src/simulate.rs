//! Synthetic telemetry source.
//!
//! Produces schema-conformant telemetry lines for one or more processes with
//! scenario-shaped frame timing. Every process presents on its own frame
//! clock, so lines of different processes interleave the way a real
//! telemetry stream does. Seeded runs are reproducible. Used by the
//! `simulate` command and for exercising the pipeline without a live
//! telemetry tool.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::counter::ManualCounter;
use crate::record::{Column, ColumnMap, FIELD_SEPARATOR, ProcessInfo, SchemaVersion};

const MIN_FRAME_MS: f64 = 1.0;
const REFRESH_60HZ_MS: f64 = 1000.0 / 60.0;

/// Frame timing profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scenario {
    #[default]
    Stable60,
    Stable144,
    Unstable,
    GpuBound,
    CpuBound,
    Stuttering,
    HighFps,
    VSync60,
}

struct Profile {
    frame_ms: f64,
    variance: f64,
    spike_chance: f64,
    cpu_ms: f64,
    gpu_ms: f64,
}

impl Scenario {
    pub const ALL: [Scenario; 8] = [
        Scenario::Stable60,
        Scenario::Stable144,
        Scenario::Unstable,
        Scenario::GpuBound,
        Scenario::CpuBound,
        Scenario::Stuttering,
        Scenario::HighFps,
        Scenario::VSync60,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Stable60 => "stable-60",
            Self::Stable144 => "stable-144",
            Self::Unstable => "unstable",
            Self::GpuBound => "gpu-bound",
            Self::CpuBound => "cpu-bound",
            Self::Stuttering => "stuttering",
            Self::HighFps => "high-fps",
            Self::VSync60 => "vsync-60",
        }
    }

    fn profile(self, rng: &mut StdRng) -> (Profile, bool) {
        let p = |frame_ms, variance, spike_chance, cpu_ms, gpu_ms| Profile {
            frame_ms,
            variance,
            spike_chance,
            cpu_ms,
            gpu_ms,
        };
        match self {
            Self::Stable60 => (p(16.67, 0.5, 0.02, 4.0, 12.0), false),
            Self::Stable144 => (p(6.94, 0.3, 0.03, 2.5, 5.5), false),
            Self::Unstable => {
                let base = 16.67 + rng.random::<f64>() * 16.67;
                (p(base, 5.0, 0.15, 8.0, 20.0), false)
            }
            Self::GpuBound => (p(20.0, 2.0, 0.05, 3.0, 18.5), false),
            Self::CpuBound => (p(25.0, 3.0, 0.08, 22.0, 8.0), false),
            Self::Stuttering => {
                if rng.random::<f64>() < 0.033 {
                    let base = 50.0 + rng.random::<f64>() * 100.0;
                    (p(base, 20.0, 0.0, 40.0, 45.0), true)
                } else {
                    (p(16.67, 1.0, 0.0, 5.0, 12.0), false)
                }
            }
            Self::HighFps => (p(4.17, 0.2, 0.01, 1.5, 3.0), false),
            Self::VSync60 => (p(16.67, 0.1, 0.005, 5.0, 10.0), false),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|s| s.name()).collect();
                format!("unknown scenario '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

#[derive(Debug, Clone)]
struct SimulatedProcess {
    info: ProcessInfo,
    swap_chain: String,
    /// Frame-time multiplier against the scenario.
    frame_scale: f64,
    phase_secs: f64,
    next_secs: f64,
}

struct FrameMetrics {
    frame_ms: f64,
    display_ms: f64,
    cpu_ms: f64,
    gpu_ms: f64,
    stutter: bool,
}

impl FrameMetrics {
    fn scaled(self, scale: f64) -> Self {
        if scale == 1.0 {
            return self;
        }
        Self {
            frame_ms: (self.frame_ms * scale).max(MIN_FRAME_MS),
            display_ms: self.display_ms * scale,
            cpu_ms: self.cpu_ms * scale,
            gpu_ms: self.gpu_ms * scale,
            stutter: self.stutter,
        }
    }
}

/// Generator of telemetry lines.
///
/// The synthetic clock always points at the next due frame of any process.
pub struct TelemetrySimulator {
    rng: StdRng,
    scenario: Scenario,
    schema: SchemaVersion,
    columns: ColumnMap,
    processes: Vec<SimulatedProcess>,
    clock_secs: f64,
    emitted: u64,
}

impl TelemetrySimulator {
    /// A `None` seed draws one from the OS.
    pub fn new(schema: SchemaVersion, scenario: Scenario, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            scenario,
            schema,
            columns: ColumnMap::for_schema(schema),
            processes: Vec::new(),
            clock_secs: 0.0,
            emitted: 0,
        }
    }

    /// Start the synthetic clock at `secs` instead of 0.
    pub fn with_clock(mut self, secs: f64) -> Self {
        self.clock_secs = secs;
        for process in &mut self.processes {
            process.next_secs = secs + process.phase_secs;
        }
        self.sync_clock();
        self
    }

    /// Add a process presenting at the scenario's frame rate.
    ///
    /// The first process starts on the clock; later ones get a random phase
    /// within one frame.
    pub fn add_process(&mut self, process: ProcessInfo, swap_chain: impl Into<String>) {
        self.add_process_scaled(process, swap_chain, 1.0);
    }

    /// Add a process whose frame times are the scenario's times `frame_scale`
    /// (0.1 presents ten times as often).
    pub fn add_process_scaled(
        &mut self,
        process: ProcessInfo,
        swap_chain: impl Into<String>,
        frame_scale: f64,
    ) {
        let frame_scale = if frame_scale > 0.0 { frame_scale } else { 1.0 };
        let phase_secs = if self.processes.is_empty() {
            0.0
        } else {
            self.rng.random::<f64>() * self.metrics().frame_ms * frame_scale / 1000.0
        };
        self.processes.push(SimulatedProcess {
            info: process,
            swap_chain: swap_chain.into(),
            frame_scale,
            phase_secs,
            next_secs: self.clock_secs + phase_secs,
        });
        self.sync_clock();
    }

    pub fn remove_process(&mut self, pid: u32) {
        self.processes.retain(|p| p.info.pid != pid);
        self.sync_clock();
    }

    fn sync_clock(&mut self) {
        if let Some(next) = self.next_due() {
            self.clock_secs = next;
        }
    }

    fn next_due(&self) -> Option<f64> {
        self.processes.iter().map(|p| p.next_secs).reduce(f64::min)
    }

    pub fn set_scenario(&mut self, scenario: Scenario) {
        self.scenario = scenario;
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn schema(&self) -> SchemaVersion {
        self.schema
    }

    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.processes.iter().map(|p| p.info.clone()).collect()
    }

    /// Current synthetic time, in seconds.
    pub fn clock(&self) -> f64 {
        self.clock_secs
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Frames of every process due at the current clock.
    ///
    /// Returns the lines and the time until the next due frame. With no
    /// processes the clock still advances by one scenario frame.
    pub fn tick(&mut self) -> (Vec<String>, Duration) {
        let stamp = self.clock_secs;
        let mut lines = Vec::new();

        for idx in 0..self.processes.len() {
            if self.processes[idx].next_secs > stamp {
                continue;
            }
            let metrics = self.metrics().scaled(self.processes[idx].frame_scale);
            let process = self.processes[idx].clone();
            lines.push(self.format_line(&process, stamp, &metrics));
            self.processes[idx].next_secs = stamp + metrics.frame_ms / 1000.0;
        }

        self.clock_secs = match self.next_due() {
            Some(next) => next,
            None => stamp + self.metrics().frame_ms / 1000.0,
        };
        self.emitted += lines.len() as u64;
        (lines, Duration::from_secs_f64((self.clock_secs - stamp).max(0.0)))
    }

    /// Generate `count` ticks without pacing.
    pub fn take_lines(&mut self, count: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..count {
            out.extend(self.tick().0);
        }
        out
    }

    fn gaussian(&mut self) -> f64 {
        let u1 = 1.0 - self.rng.random::<f64>();
        let u2 = 1.0 - self.rng.random::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).sin()
    }

    fn metrics(&mut self) -> FrameMetrics {
        let (profile, mut stutter) = self.scenario.profile(&mut self.rng);
        let g = self.gaussian();

        let mut frame_ms = profile.frame_ms + g * profile.variance;
        if self.rng.random::<f64>() < profile.spike_chance {
            frame_ms *= 1.5 + self.rng.random::<f64>();
            stutter = true;
        }
        let frame_ms = frame_ms.max(MIN_FRAME_MS);

        let cpu_ms = (profile.cpu_ms + g * profile.cpu_ms * 0.15).clamp(0.1, frame_ms * 0.95);
        let gpu_ms = (profile.gpu_ms + g * profile.gpu_ms * 0.2).clamp(0.1, frame_ms * 0.98);

        let display_ms = if self.scenario == Scenario::VSync60 {
            (frame_ms / REFRESH_60HZ_MS).ceil().max(1.0) * REFRESH_60HZ_MS
        } else {
            (frame_ms + self.rng.random_range(-0.25..0.25)).max(0.0)
        };

        FrameMetrics {
            frame_ms,
            display_ms,
            cpu_ms,
            gpu_ms,
            stutter,
        }
    }

    fn format_line(&self, process: &SimulatedProcess, stamp: f64, m: &FrameMetrics) -> String {
        let vsync = self.scenario == Scenario::VSync60;
        let mut fields = vec!["0".to_string(); self.columns.width()];
        let mut set = |column: Column, value: String| {
            if let Some(idx) = self.columns.index(column) {
                fields[idx] = value;
            }
        };

        set(Column::Application, format!("{}.exe", process.info.name));
        set(Column::ProcessId, process.info.pid.to_string());
        set(Column::SwapChainAddress, process.swap_chain.clone());
        set(Column::Runtime, "DXGI".to_string());
        set(Column::SyncInterval, if vsync { "1" } else { "0" }.to_string());
        set(Column::AllowsTearing, if vsync { "0" } else { "1" }.to_string());
        set(
            Column::PresentMode,
            if vsync {
                "Hardware: Legacy Flip"
            } else {
                "Hardware: Independent Flip"
            }
            .to_string(),
        );
        set(Column::TimeInSeconds, format!("{stamp:.6}"));
        set(Column::CpuStartQpcTimeMs, format!("{:.4}", stamp * 1000.0));
        set(Column::QpcTime, format!("{}", (stamp * 1.0e7).round() as u64));
        set(Column::MsBetweenPresents, format!("{:.4}", m.frame_ms));
        set(Column::MsBetweenDisplayChange, format!("{:.4}", m.display_ms));
        set(Column::MsInPresentApi, format!("{:.4}", m.cpu_ms * 0.05));
        set(Column::MsUntilDisplayed, format!("{:.4}", m.gpu_ms + 1.0));
        set(Column::Dropped, if m.stutter { "1" } else { "0" }.to_string());
        set(Column::MsPcLatency, format!("{:.4}", m.cpu_ms + m.gpu_ms + 2.0));
        set(Column::MsGpuActive, format!("{:.4}", m.gpu_ms));

        fields.join(&FIELD_SEPARATOR.to_string())
    }
}

/// Drive `simulator` in real time, feeding `lines` and keeping `counter` on
/// the synthetic clock.
///
/// Runs until `shutdown` fires or the receiver is dropped, then hands the
/// simulator back.
pub fn spawn_simulator(
    mut simulator: TelemetrySimulator,
    counter: ManualCounter,
    lines: mpsc::Sender<String>,
    shutdown: CancellationToken,
) -> JoinHandle<TelemetrySimulator> {
    tokio::spawn(async move {
        // Deadlines are absolute so timer rounding does not accumulate.
        let origin = tokio::time::Instant::now();
        let origin_clock = simulator.clock();
        loop {
            let stamp = simulator.clock();
            let (batch, _) = simulator.tick();
            for line in batch {
                if lines.send(line).await.is_err() {
                    return simulator;
                }
            }
            counter.set(stamp);

            let due = origin + Duration::from_secs_f64((simulator.clock() - origin_clock).max(0.0));
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(due) => {}
            }
        }
        simulator
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureOptions;
    use crate::counter::{PerformanceCounter, SystemCounter};
    use crate::reconcile::reconcile;
    use crate::record::RawRecord;

    fn simulator(scenario: Scenario, seed: u64) -> TelemetrySimulator {
        let mut sim = TelemetrySimulator::new(SchemaVersion::Current, scenario, Some(seed));
        sim.add_process(ProcessInfo::new("game", 42), "0x0000001");
        sim
    }

    // -----------------------------------------------------------------------
    // Generator tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_lines_parse_under_schema() {
        let mut sim = simulator(Scenario::Stable60, 7);
        let columns = ColumnMap::for_schema(SchemaVersion::Current);
        for line in sim.take_lines(50) {
            let record = RawRecord::parse(&line, &columns).unwrap();
            assert_eq!(record.process_name(), "game");
            assert_eq!(record.process_id(), 42);
            assert_eq!(record.swap_chain(), "0x0000001");
        }
        assert_eq!(sim.emitted(), 50);
    }

    #[test]
    fn test_legacy_schema_width() {
        let mut sim = TelemetrySimulator::new(SchemaVersion::Legacy, Scenario::GpuBound, Some(1));
        sim.add_process(ProcessInfo::new("game", 1), "0x1");
        let line = sim.take_lines(1).remove(0);
        assert_eq!(line.split(',').count(), SchemaVersion::Legacy.columns().len());
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = simulator(Scenario::Unstable, 99).take_lines(20);
        let b = simulator(Scenario::Unstable, 99).take_lines(20);
        let c = simulator(Scenario::Unstable, 100).take_lines(20);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_clock_is_monotonic_and_matches_frame_times() {
        let mut sim = simulator(Scenario::Stuttering, 3);
        let columns = ColumnMap::for_schema(SchemaVersion::Current);
        let records: Vec<RawRecord> = sim
            .take_lines(200)
            .iter()
            .map(|l| RawRecord::parse(l, &columns).unwrap())
            .collect();
        assert!(records.windows(2).all(|w| w[0].time() < w[1].time()));
        assert!(sim.clock() > records.last().unwrap().time());
    }

    #[test]
    fn test_vsync_display_quantized() {
        let mut sim = simulator(Scenario::VSync60, 5);
        let idx = ColumnMap::for_schema(SchemaVersion::Current)
            .index(Column::MsBetweenDisplayChange)
            .unwrap();
        for line in sim.take_lines(30) {
            let display: f64 = line.split(',').nth(idx).unwrap().parse().unwrap();
            let refreshes = display / REFRESH_60HZ_MS;
            assert!((refreshes - refreshes.round()).abs() < 1e-3, "{display}");
        }
    }

    #[test]
    fn test_processes_run_on_their_own_clocks() {
        let mut sim = simulator(Scenario::Stable60, 11);
        sim.add_process_scaled(ProcessInfo::new("launcher", 7), "0x2", 0.25);
        let columns = ColumnMap::for_schema(SchemaVersion::Current);
        let records: Vec<RawRecord> = sim
            .take_lines(400)
            .iter()
            .map(|l| RawRecord::parse(l, &columns).unwrap())
            .collect();

        assert!(records.windows(2).all(|w| w[0].time() <= w[1].time()));
        let game: Vec<f64> = records
            .iter()
            .filter(|r| r.process_name() == "game")
            .map(RawRecord::time)
            .collect();
        let launcher: Vec<f64> = records
            .iter()
            .filter(|r| r.process_name() == "launcher")
            .map(RawRecord::time)
            .collect();
        assert!(launcher.len() > 3 * game.len(), "{} vs {}", launcher.len(), game.len());
        assert!(game.windows(2).all(|w| w[0] < w[1]));
        assert!(launcher.windows(2).all(|w| w[0] < w[1]));
        // Independent clocks: the launcher is not stamped in step with the game.
        assert!(launcher.iter().any(|t| !game.contains(t)));
    }

    #[test]
    fn test_remove_process() {
        let mut sim = simulator(Scenario::Stable144, 11);
        sim.add_process(ProcessInfo::new("launcher", 7), "0x2");
        assert_eq!(sim.processes().len(), 2);
        assert!(sim.take_lines(10).len() >= 10);

        sim.remove_process(7);
        assert_eq!(sim.tick().0.len(), 1);
        assert_eq!(sim.processes(), vec![ProcessInfo::new("game", 42)]);
    }

    #[test]
    fn test_with_clock_anchors_every_process() {
        let base = SystemCounter.now_secs();
        let mut sim = simulator(Scenario::Stable60, 4);
        sim.add_process(ProcessInfo::new("launcher", 7), "0x2");
        let mut sim = sim.with_clock(base);
        assert!(sim.clock() >= base);

        let columns = ColumnMap::for_schema(SchemaVersion::Current);
        let records: Vec<RawRecord> = sim
            .take_lines(120)
            .iter()
            .map(|l| RawRecord::parse(l, &columns).unwrap())
            .collect();
        // Parsed stamps carry six decimals.
        assert!(records.iter().all(|r| r.time() >= base - 1e-6));
        assert!(records.iter().any(|r| r.process_name() == "launcher"));

        let qpc_start = base + 0.5;
        let (archive, live): (Vec<RawRecord>, Vec<RawRecord>) = (
            records.iter().filter(|r| r.time() < base + 0.3).cloned().collect(),
            records.iter().filter(|r| r.time() >= base + 0.25).cloned().collect(),
        );
        let options = CaptureOptions::new(ProcessInfo::new("game", 42));
        let interval = reconcile(&archive, &live, &options, qpc_start, 0.5).unwrap();
        assert!(!interval.is_empty());
        assert!(interval.iter().all(|r| r.time() >= qpc_start));
    }

    #[test]
    fn test_scenario_names_round_trip() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>().unwrap(), scenario);
        }
        assert!("warp-speed".parse::<Scenario>().is_err());
    }

    // -----------------------------------------------------------------------
    // Driver tests
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_driver_feeds_lines_and_counter() {
        let (tx, mut rx) = mpsc::channel(64);
        let counter = ManualCounter::new(0.0);
        let shutdown = CancellationToken::new();
        let task = spawn_simulator(
            simulator(Scenario::Stable60, 2).with_clock(10.0),
            counter.clone(),
            tx,
            shutdown.clone(),
        );

        let mut received = 0;
        while received < 30 {
            rx.recv().await.unwrap();
            received += 1;
        }
        assert!(counter.now_secs() >= 10.0);

        shutdown.cancel();
        let sim = task.await.unwrap();
        assert!(sim.emitted() >= 30);
        assert!(sim.clock() > 10.3);
    }
}
