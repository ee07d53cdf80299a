//! Progress reporting from the update run to its host.
//!
//! The host implements [`UpdateObserver`]; the core only ever calls it
//! through the rate-limited helpers in this module so that a UI is never
//! flooded with sub-100ms updates.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::apply::{ApplyStage, Changelog};

/// Byte-level download progress callback.
///
/// # Arguments
///
/// * `bytes_since_last` - Bytes received since the previous invocation
/// * `bytes_so_far` - Bytes received for this download so far
/// * `total` - Total expected bytes (declared or fallback length)
pub type DownloadCallback<'a> = dyn Fn(u64, u64, u64) + Send + Sync + 'a;

/// Minimum interval between two progress reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Receives progress and lifecycle notifications from an update run.
///
/// Every method has a no-op default so hosts only implement what they
/// display. Methods may be called from download worker threads.
pub trait UpdateObserver: Send + Sync {
    /// A version entered a new pipeline stage.
    fn on_stage(&self, _version: &str, _stage: ApplyStage) {}

    /// Free-form status text.
    fn on_label(&self, _label: &str) {}

    /// Download progress, see [`DownloadCallback`].
    fn on_progress(&self, _bytes_since_last: u64, _bytes_so_far: u64, _total: u64) {}

    /// Polled cooperatively; returning `true` cancels the run.
    fn should_interrupt(&self) -> bool {
        false
    }

    /// Changelogs of every applied version, delivered once per run.
    fn on_changelogs(&self, _changelogs: &[Changelog]) {}

    /// Delivered once when the run succeeds.
    fn on_finished(&self, _has_updates: bool) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl UpdateObserver for NullObserver {}

#[derive(Debug)]
struct ThrottleState {
    last_report: Instant,
    /// Highest running total handed out so far.
    reported: u64,
}

/// Coalesces frequent progress updates into bounded-rate reports.
///
/// Fed with the running total rather than increments, so bytes taken back
/// after a failed attempt are never reported twice. Safe to share between
/// download workers.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    state: Mutex<ThrottleState>,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_INTERVAL)
    }
}

impl ProgressThrottle {
    /// Create a throttle that reports at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ThrottleState {
                last_report: Instant::now(),
                reported: 0,
            }),
        }
    }

    /// Observe the running total `so_far`; returns the bytes not yet
    /// reported when a report is due.
    pub fn update(&self, so_far: u64) -> Option<u64> {
        let mut state = self.state.lock();
        if state.last_report.elapsed() < self.interval {
            return None;
        }
        state.last_report = Instant::now();
        Some(Self::advance(&mut state, so_far))
    }

    /// Report whatever `so_far` holds beyond the last report.
    pub fn flush(&self, so_far: u64) -> u64 {
        let mut state = self.state.lock();
        state.last_report = Instant::now();
        Self::advance(&mut state, so_far)
    }

    fn advance(state: &mut ThrottleState, so_far: u64) -> u64 {
        let delta = so_far.saturating_sub(state.reported);
        state.reported = state.reported.max(so_far);
        delta
    }
}

/// Rolling transfer-rate estimate over a fixed window.
#[derive(Debug)]
pub struct SpeedSampler {
    window: Duration,
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl SpeedSampler {
    /// Create a sampler averaging over `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Record `bytes` transferred now.
    pub fn feed(&self, bytes: u64) {
        let now = Instant::now();
        let mut samples = self.samples.lock();
        samples.push_back((now, bytes));
        while let Some((at, _)) = samples.front() {
            if now.duration_since(*at) > self.window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes per second over the window.
    pub fn speed(&self) -> u64 {
        let samples = self.samples.lock();
        let Some((oldest, _)) = samples.front() else {
            return 0;
        };
        let total: u64 = samples.iter().map(|(_, b)| b).sum();
        let elapsed = oldest.elapsed().max(Duration::from_millis(100));
        (total as f64 / elapsed.as_secs_f64()) as u64
    }
}

impl Default for SpeedSampler {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

/// Format a byte count for display (e.g. "1.50 MiB").
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
