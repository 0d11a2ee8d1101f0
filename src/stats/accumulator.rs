//! Statistics accumulator for per-iteration latencies
//!
//! Two passes over the data: the raw pass tracks moments, extremes and tail
//! quantiles; the log pass tracks moments of the log-transformed samples, with
//! the transform fixed from the raw pass (see [`LogTransform::select`]).

use serde::Serialize;

use crate::error::{BenchError, Result};
use crate::stats::goodness_of_fit::{ks_statistic, Hypothesis};
use crate::stats::online::OnlineMoments;
use crate::stats::quantiles::TailQuantiles;

/// Log transform applied to latencies before the log-domain moments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTransform {
    Log,
    Log1p,
}

impl LogTransform {
    /// `log1p` for sub-unit means, where `log` loses precision near zero, and
    /// whenever a sample is not strictly positive. `log` otherwise.
    pub fn select(raw_mean: f64, raw_min: f64) -> Self {
        if raw_mean < 1.0 || raw_min <= 0.0 {
            LogTransform::Log1p
        } else {
            LogTransform::Log
        }
    }

    /// Transform chosen from the samples themselves.
    pub fn for_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return LogTransform::Log;
        }
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        Self::select(mean, min)
    }

    pub fn forward(self, x: f64) -> f64 {
        match self {
            LogTransform::Log => x.ln(),
            LogTransform::Log1p => x.ln_1p(),
        }
    }

    pub fn inverse(self, y: f64) -> f64 {
        match self {
            LogTransform::Log => y.exp(),
            LogTransform::Log1p => y.exp_m1(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogDomainStatistics {
    pub transform: LogTransform,
    pub mean: f64,
    pub variance: f64,
    /// Back-transformed log-domain mean.
    pub geometric_mean: f64,
    /// Back-transformed log-domain standard deviation.
    pub geometric_stddev: f64,
    pub geometric_mean_half_width: f64,
    pub geometric_stddev_half_width: f64,
}

/// Kolmogorov-Smirnov D statistics of the pooled samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FitStatistics {
    pub ks_normal: f64,
    pub ks_lognormal: f64,
}

impl FitStatistics {
    pub fn compute(samples: &[f64]) -> Self {
        Self {
            ks_normal: ks_statistic(samples, Hypothesis::Normal),
            ks_lognormal: ks_statistic(samples, Hypothesis::LogNormal),
        }
    }

    pub fn difference(&self) -> f64 {
        (self.ks_normal - self.ks_lognormal).abs()
    }
}

/// Snapshot of an accumulator. Only produced for two samples or more.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStatistics {
    pub count: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub sample_variance: f64,
    pub p95: f64,
    pub p98: f64,
    pub p99: f64,
    pub log: LogDomainStatistics,
    pub fit: Option<FitStatistics>,
}

impl AggregateStatistics {
    pub fn stddev(&self) -> f64 {
        self.sample_variance.sqrt()
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    /// 95% half width on the mean (two standard errors).
    pub fn mean_half_width(&self) -> f64 {
        2.0 * (self.sample_variance / self.count as f64).sqrt()
    }

    /// 95% half width on the standard deviation, `2 s / sqrt(2 (n - 1))`.
    pub fn stddev_half_width(&self) -> f64 {
        2.0 * self.stddev() / (2.0 * (self.count - 1) as f64).sqrt()
    }
}

/// Two-pass accumulator over one pool of samples.
///
/// Feed every sample to [`observe`](Self::observe), then call
/// [`begin_log_pass`](Self::begin_log_pass) and feed the same samples again to
/// [`observe_log`](Self::observe_log). The transform is fixed from the raw mean
/// and minimum, so the log pass cannot start before the raw pass ends.
/// [`snapshot`](Self::snapshot) fails with [`BenchError::LogPassMismatch`] until
/// both passes have seen the same count. [`analyze`] runs both passes and the
/// fit tests over a slice and is the usual entry point.
#[derive(Debug, Clone)]
pub struct StatisticsAccumulator {
    raw: OnlineMoments,
    min: f64,
    max: f64,
    tail: TailQuantiles,
    log: Option<(LogTransform, OnlineMoments)>,
}

impl Default for StatisticsAccumulator {
    fn default() -> Self {
        Self {
            raw: OnlineMoments::new(),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            tail: TailQuantiles::default(),
            log: None,
        }
    }
}

impl StatisticsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw pass.
    pub fn observe(&mut self, x: f64) {
        self.raw.push(x);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
        self.tail.observe(x);
    }

    pub fn count(&self) -> u64 {
        self.raw.count()
    }

    /// Fix the log transform from what the raw pass has seen. Idempotent.
    pub fn begin_log_pass(&mut self) -> LogTransform {
        let (raw_mean, raw_min) = (self.raw.mean(), self.min);
        self.log
            .get_or_insert_with(|| (LogTransform::select(raw_mean, raw_min), OnlineMoments::new()))
            .0
    }

    /// Log pass. Starts the pass on first use.
    pub fn observe_log(&mut self, x: f64) {
        let transform = self.begin_log_pass();
        if let Some((_, moments)) = self.log.as_mut() {
            moments.push(transform.forward(x));
        }
    }

    pub fn snapshot(&self) -> Result<AggregateStatistics> {
        let count = self.raw.count();
        let sample_variance = self.raw.sample_variance().ok_or(BenchError::InsufficientSamples {
            count,
            required: 2,
        })?;

        let (transform, log_moments) = match &self.log {
            Some((transform, moments)) if moments.count() == count => (*transform, moments),
            Some((_, moments)) => {
                return Err(BenchError::LogPassMismatch {
                    seen: moments.count(),
                    expected: count,
                })
            }
            None => {
                return Err(BenchError::LogPassMismatch {
                    seen: 0,
                    expected: count,
                })
            }
        };

        let log_variance = log_moments.sample_variance().unwrap_or(0.0);
        let log_stddev = log_variance.sqrt();
        let n = count as f64;
        // d/dy of exp(y) and expm1(y) are both exp(y)
        let geometric_mean_half_width = log_moments.mean().exp() * 2.0 * (log_variance / n).sqrt();
        let geometric_stddev_half_width =
            log_stddev.exp() * 2.0 * log_stddev / (2.0 * (n - 1.0)).sqrt();

        let log = LogDomainStatistics {
            transform,
            mean: log_moments.mean(),
            variance: log_variance,
            geometric_mean: transform.inverse(log_moments.mean()),
            geometric_stddev: transform.inverse(log_stddev),
            geometric_mean_half_width,
            geometric_stddev_half_width,
        };

        let quantile = |q: Option<f64>| q.unwrap_or(self.max);

        Ok(AggregateStatistics {
            count,
            mean: self.raw.mean(),
            min: self.min,
            max: self.max,
            sample_variance,
            p95: quantile(self.tail.p95()),
            p98: quantile(self.tail.p98()),
            p99: quantile(self.tail.p99()),
            log,
            fit: None,
        })
    }
}

/// Run both passes over `samples`, then the goodness-of-fit tests.
pub fn analyze(samples: &[f64]) -> Result<AggregateStatistics> {
    let mut acc = StatisticsAccumulator::new();
    samples.iter().for_each(|&x| acc.observe(x));
    acc.begin_log_pass();
    samples.iter().for_each(|&x| acc.observe_log(x));

    let mut stats = acc.snapshot()?;
    stats.fit = Some(FitStatistics::compute(samples));
    Ok(stats)
}
