//! Error taxonomy for the benchmark core
//!
//! Recoverable per-operation failures are not errors at this level: they travel
//! as [`crate::operation::FailureKind`] through each thread's result. Everything
//! in [`BenchError`] aborts the run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    /// Not enough usable clock ticks were observed to trust the timer.
    #[error("timer calibration failed: {valid} valid samples, {required} required")]
    Calibration { valid: usize, required: usize },

    #[error("statistics need at least {required} samples, got {count}")]
    InsufficientSamples { count: u64, required: u64 },

    #[error("log-domain pass saw {seen} samples, raw pass saw {expected}")]
    LogPassMismatch { seen: u64, expected: u64 },

    #[error("invalid benchmark parameters: {0}")]
    InvalidParameters(String),

    /// An operation hook panicked inside a worker thread.
    #[error("operation '{operation}' panicked in worker thread {thread}")]
    WorkerPanic { operation: String, thread: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("plot rendering failed: {0}")]
    Plot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, BenchError>;
