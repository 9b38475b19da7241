//! Monotonic high-resolution counter used to anchor the capture start.
//!
//! The telemetry source stamps each frame with a CPU counter value. The
//! capture service reads the same clock at the instant a start is requested
//! so reconciliation can find the first frame after that instant.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the start-trigger counter value, in seconds.
pub trait PerformanceCounter: Send + Sync {
    fn now_secs(&self) -> f64;
}

/// The platform monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCounter;

impl PerformanceCounter for SystemCounter {
    fn now_secs(&self) -> f64 {
        monotonic_secs()
    }
}

#[cfg(unix)]
fn monotonic_secs() -> f64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime writes into the timespec we own and
    // CLOCK_MONOTONIC is available on every supported unix.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return fallback_secs();
    }
    ts.tv_sec as f64 + ts.tv_nsec as f64 * 1e-9
}

#[cfg(not(unix))]
fn monotonic_secs() -> f64 {
    fallback_secs()
}

fn fallback_secs() -> f64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_secs_f64()
}

/// Counter that only moves when told to. Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct ManualCounter {
    bits: Arc<AtomicU64>,
}

impl ManualCounter {
    pub fn new(secs: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(secs.to_bits())),
        }
    }

    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        let _ = self
            .bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + secs).to_bits())
            });
    }
}

impl PerformanceCounter for ManualCounter {
    fn now_secs(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
