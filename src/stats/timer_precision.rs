//! Timer precision estimation
//!
//! Measures the achievable resolution of the monotonic clock by spinning until
//! its reading changes. The resulting [`TimerEpsilon`] is the floor under every
//! latency error reported later: an error smaller than what the clock can
//! resolve carries no information.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use lazy_static::lazy_static;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{BenchError, Result};
use crate::stats::measure::Measure;
use crate::stats::online::OnlineMoments;

/// Clock ticks sampled when no count is requested.
pub const DEFAULT_TIMER_SAMPLES: usize = 100;
/// Fewer valid ticks than this and the clock is not trusted.
pub const MIN_VALID_SAMPLES: usize = 100;
/// Ticks longer than this are scheduler preemption, not clock granularity.
pub const SANITY_WINDOW_NS: f64 = 1_000_000.0;
/// Upper bound on clock reads, as a multiple of the requested sample count.
const MAX_ATTEMPT_FACTOR: usize = 4;

/// Calibrated clock resolution, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimerEpsilon {
    pub resolution_ns: f64,
    /// 95% half width on `resolution_ns`.
    pub error_ns: f64,
}

impl TimerEpsilon {
    /// Uncertainty on a single measured interval, in milliseconds.
    ///
    /// An interval is two clock reads, so the worst-case resolution
    /// (resolution plus its error) counts twice.
    pub fn epsilon_ms(&self) -> f64 {
        2.0 * (self.resolution_ns + self.error_ns) / 1_000_000.0
    }

    pub fn as_measure(&self) -> Measure {
        Measure::new(self.resolution_ns, self.error_ns, "ns")
    }
}

/// Accumulates tick deltas and turns them into a [`TimerEpsilon`].
#[derive(Debug, Clone)]
pub struct Calibration {
    moments: OnlineMoments,
    wanted: usize,
    discarded: usize,
}

impl Calibration {
    pub fn new(wanted: usize) -> Self {
        Self {
            moments: OnlineMoments::new(),
            wanted,
            discarded: 0,
        }
    }

    /// Record one tick delta. Zero, negative, non-finite and out-of-window
    /// deltas are counted as discarded.
    pub fn observe(&mut self, delta_ns: f64) {
        if delta_ns.is_finite() && delta_ns > 0.0 && delta_ns <= SANITY_WINDOW_NS {
            self.moments.push(delta_ns);
        } else {
            self.discarded += 1;
        }
    }

    pub fn valid(&self) -> usize {
        self.moments.count() as usize
    }

    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn is_complete(&self) -> bool {
        self.valid() >= self.wanted
    }

    pub fn finish(self) -> Result<TimerEpsilon> {
        let valid = self.valid();
        if valid < MIN_VALID_SAMPLES {
            return Err(BenchError::Calibration {
                valid,
                required: MIN_VALID_SAMPLES,
            });
        }
        let error_ns = self
            .moments
            .mean_half_width()
            .ok_or(BenchError::Calibration {
                valid,
                required: MIN_VALID_SAMPLES,
            })?;

        Ok(TimerEpsilon {
            resolution_ns: self.moments.mean(),
            error_ns,
        })
    }
}

/// Build an epsilon from already collected deltas.
pub fn from_deltas<I>(deltas: I) -> Result<TimerEpsilon>
where
    I: IntoIterator<Item = f64>,
{
    let mut calibration = Calibration::new(MIN_VALID_SAMPLES);
    for delta in deltas {
        calibration.observe(delta);
    }
    calibration.finish()
}

/// Spin until the monotonic clock moves and return the step in nanoseconds.
fn next_tick_ns() -> f64 {
    let start = Instant::now();
    let mut current = Instant::now();
    while current == start {
        current = Instant::now();
    }
    current.duration_since(start).as_secs_f64() * 1e9
}

/// Sample the clock until `sample_count` valid ticks are collected.
///
/// Counts below [`MIN_VALID_SAMPLES`] are raised to it. Fails with
/// [`BenchError::Calibration`] if too many ticks fall outside the window.
pub fn estimate(sample_count: usize) -> Result<TimerEpsilon> {
    let wanted = sample_count.max(MIN_VALID_SAMPLES);
    let mut calibration = Calibration::new(wanted);

    for _ in 0..wanted * MAX_ATTEMPT_FACTOR {
        if calibration.is_complete() {
            break;
        }
        calibration.observe(next_tick_ns());
    }

    if calibration.discarded() > 0 {
        warn!(
            discarded = calibration.discarded(),
            valid = calibration.valid(),
            "clock ticks outside the sanity window were discarded"
        );
    }
    calibration.finish()
}

lazy_static! {
    static ref TIMER_EPSILON: Mutex<Option<TimerEpsilon>> = Mutex::new(None);
}

/// Process-wide calibration. The first call measures, later calls return the
/// cached value.
pub fn calibrate_once(sample_count: usize) -> Result<TimerEpsilon> {
    let mut cached = TIMER_EPSILON.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(epsilon) = *cached {
        debug!(resolution_ns = epsilon.resolution_ns, "timer epsilon (cached)");
        return Ok(epsilon);
    }

    let epsilon = estimate(sample_count)?;
    info!(
        resolution_ns = epsilon.resolution_ns,
        error_ns = epsilon.error_ns,
        "timer granularity calibrated"
    );
    *cached = Some(epsilon);
    Ok(epsilon)
}
