//! Statistics for benchmark measurements
//!
//! Online moments, significant-digit aware measures, timer calibration,
//! tail quantiles and distribution-fit diagnostics.

pub mod accumulator;
pub mod goodness_of_fit;
pub mod measure;
pub mod online;
pub mod quantiles;
pub mod timer_precision;

pub use accumulator::{analyze, AggregateStatistics, FitStatistics, LogTransform, StatisticsAccumulator};
pub use goodness_of_fit::{ks_statistic, Hypothesis};
pub use measure::Measure;
pub use timer_precision::TimerEpsilon;
