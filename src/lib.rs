//! Security Token Benchmark Library
//!
//! Multi-threaded latency and throughput measurement of cryptographic token
//! operations, with clock calibration and distribution diagnostics.

pub mod core;
pub mod error;
pub mod executor;
pub mod operation;
pub mod operations;
pub mod report;
pub mod stats;
pub mod ui;
pub mod utils;

pub use core::run_benchmark;
pub use error::{BenchError, Result};
pub use executor::Executor;
pub use operation::{BenchmarkOperation, FailureKind, Outcome, TestVector};
pub use report::ResultReport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
