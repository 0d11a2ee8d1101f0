//! Concurrent executor
//!
//! Runs one benchmark operation over a list of test vectors. For every vector
//! the operation is duplicated once per thread, each worker prepares its copy
//! and checks in at the start barrier, all workers are released together, and
//! the per-iteration latencies of every thread are pooled into one set of
//! statistics.
//!
//! A single failing thread invalidates the whole vector: its error code is
//! reported, the wall clock is zeroed and no latency figure is derived.

pub mod barrier;

use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{BenchError, Result};
use crate::operation::{outcome_code, BenchmarkOperation, FailureKind, Outcome, TestVector};
use crate::report::{ReportValue, ResultReport};
use crate::stats::accumulator::{analyze, AggregateStatistics, LogTransform};
use crate::stats::measure::Measure;
use crate::stats::timer_precision::TimerEpsilon;

pub use barrier::StartBarrier;

// ============================================================================
// PER-THREAD RESULTS
// ============================================================================

/// What one worker hands back: latencies in milliseconds and its outcome.
/// On failure the samples are void.
#[derive(Debug, Clone, PartialEq)]
pub struct PerThreadResult {
    pub samples: Vec<f64>,
    pub outcome: Outcome,
}

impl PerThreadResult {
    pub fn succeeded(samples: Vec<f64>) -> Self {
        Self {
            samples,
            outcome: Ok(()),
        }
    }

    pub fn failed(kind: FailureKind) -> Self {
        Self {
            samples: Vec::new(),
            outcome: Err(kind),
        }
    }
}

/// The worker body: prepare, check in, timed loop, teardown.
fn run_worker<S: ?Sized>(
    operation: &mut dyn BenchmarkOperation<S>,
    session: &S,
    vector: &TestVector,
    iterations: usize,
    skip: usize,
    thread: Option<usize>,
    barrier: &StartBarrier,
) -> PerThreadResult {
    let arrival = barrier.arrival();
    if let Err(kind) = operation.prepare(session, vector, thread) {
        drop(arrival);
        return PerThreadResult::failed(kind);
    }
    arrival.wait();

    let mut samples = Vec::with_capacity(iterations);
    let looped = timed_loop(operation, session, iterations, skip, &mut samples);
    let torn_down = operation.teardown(session, vector, thread);

    match looped.and(torn_down) {
        Ok(()) => PerThreadResult::succeeded(samples),
        Err(kind) => PerThreadResult::failed(kind),
    }
}

/// `iterations + skip` passes; only the last `iterations` are recorded.
/// Cleanup runs outside the timed window.
fn timed_loop<S: ?Sized>(
    operation: &mut dyn BenchmarkOperation<S>,
    session: &S,
    iterations: usize,
    skip: usize,
    samples: &mut Vec<f64>,
) -> Outcome {
    for pass in 0..iterations + skip {
        let started = Instant::now();
        let result = operation.run_once(session);
        let elapsed = started.elapsed();
        result?;
        if pass >= skip {
            samples.push(elapsed.as_secs_f64() * 1e3);
        }
        operation.cleanup(session)?;
    }
    Ok(())
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Pooled outcome of all threads for one test vector.
#[derive(Debug, Clone)]
pub struct PooledRun {
    pub outcome: Outcome,
    pub wallclock_ms: f64,
    /// Samples per thread, in thread order. Empty when the run failed.
    pub per_thread: Vec<Vec<f64>>,
    pub statistics: Option<AggregateStatistics>,
}

impl PooledRun {
    /// Every sample of every thread, thread after thread.
    pub fn samples(&self) -> Vec<f64> {
        self.per_thread.iter().flatten().copied().collect()
    }
}

/// Pool thread results. The first failing thread (in thread order) sets the
/// outcome and voids the wall clock and the statistics.
pub fn pool(results: Vec<PerThreadResult>, wallclock_ms: f64) -> Result<PooledRun> {
    if let Some(kind) = results.iter().find_map(|r| r.outcome.err()) {
        return Ok(PooledRun {
            outcome: Err(kind),
            wallclock_ms: 0.0,
            per_thread: Vec::new(),
            statistics: None,
        });
    }

    let per_thread: Vec<Vec<f64>> = results.into_iter().map(|r| r.samples).collect();
    let pooled: Vec<f64> = per_thread.iter().flatten().copied().collect();
    let statistics = analyze(&pooled)?;

    Ok(PooledRun {
        outcome: Ok(()),
        wallclock_ms,
        per_thread,
        statistics: Some(statistics),
    })
}

/// One row of the results table.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub title: &'static str,
    pub key: &'static str,
    pub measure: Measure,
}

impl ResultRow {
    fn new(title: &'static str, key: &'static str, measure: Measure) -> Self {
        Self { title, key, measure }
    }
}

/// `scale / mean` and its propagated error, or zeros for a null mean.
fn per_second(scale: f64, mean_ms: f64, error_ms: f64) -> (f64, f64) {
    if mean_ms > 0.0 && mean_ms.is_finite() {
        (scale / mean_ms, scale * error_ms / (mean_ms * mean_ms))
    } else {
        (0.0, 0.0)
    }
}

/// Turn pooled statistics into reported measures.
///
/// Errors on latency figures never go below the timer epsilon; TPS and
/// throughput inherit that floor through the latency error.
///
/// The geometric std. deviation depends on the log transform. Under `log` it
/// is `exp(s)`, a dimensionless factor, so its error is not floored. Under
/// `log1p` it is `expm1(s)`, an additive spread in ms, floored like the other
/// latency figures.
pub fn derive_measures(
    stats: &AggregateStatistics,
    wallclock_ms: f64,
    timer: &TimerEpsilon,
    threads: usize,
    vector_size: usize,
) -> Vec<ResultRow> {
    let epsilon = timer.epsilon_ms();
    let threads_f = threads as f64;

    let latency_avg = Measure::floored(stats.mean, stats.mean_half_width(), epsilon, "ms");
    let latency_err = latency_avg.raw_error();

    let (tps_val, tps_err) = per_second(1000.0, stats.mean, latency_err);
    let (tput_val, tput_err) = per_second(1000.0 * vector_size as f64, stats.mean, latency_err);

    let fit = stats.fit.unwrap_or_default();

    vec![
        ResultRow::new("timer resolution", "timerresolution", timer.as_measure()),
        ResultRow::new("latency, average", "latency.average", latency_avg),
        ResultRow::new("latency, minimum", "latency.minimum", Measure::floored(stats.min, 0.0, epsilon, "ms")),
        ResultRow::new("latency, maximum", "latency.maximum", Measure::floored(stats.max, 0.0, epsilon, "ms")),
        ResultRow::new(
            "latency, std. deviation",
            "latency.stddev",
            Measure::floored(stats.stddev(), stats.stddev_half_width(), epsilon, "ms"),
        ),
        ResultRow::new("latency, 95th percentile", "latency.p95", Measure::floored(stats.p95, 0.0, epsilon, "ms")),
        ResultRow::new("latency, 98th percentile", "latency.p98", Measure::floored(stats.p98, 0.0, epsilon, "ms")),
        ResultRow::new("latency, 99th percentile", "latency.p99", Measure::floored(stats.p99, 0.0, epsilon, "ms")),
        ResultRow::new(
            "latency, geometric average",
            "latency.geomean",
            Measure::floored(stats.log.geometric_mean, stats.log.geometric_mean_half_width, epsilon, "ms"),
        ),
        ResultRow::new("latency, geometric std. dev.", "latency.geostddev", geometric_stddev(stats, epsilon)),
        ResultRow::new("TPS/thread, average", "tps.thread", Measure::new(tps_val, tps_err, "Tnx/s")),
        ResultRow::new(
            "global TPS, average",
            "tps.global",
            Measure::new(tps_val * threads_f, tps_err * threads_f, "Tnx/s"),
        ),
        ResultRow::new("throughput/thread, average", "throughput.thread", Measure::new(tput_val, tput_err, "Byte/s")),
        ResultRow::new(
            "global throughput, average",
            "throughput.global",
            Measure::new(tput_val * threads_f, tput_err * threads_f, "Byte/s"),
        ),
        ResultRow::new("wall clock", "wallclock", Measure::new(wallclock_ms, epsilon, "ms")),
        ResultRow::new("KS statistic, normal", "ks.normal", Measure::exact(fit.ks_normal, "D")),
        ResultRow::new("KS statistic, log-normal", "ks.lognormal", Measure::exact(fit.ks_lognormal, "D")),
        ResultRow::new("KS statistic, difference", "ks.difference", Measure::exact(fit.difference(), "D")),
    ]
}

fn geometric_stddev(stats: &AggregateStatistics, epsilon: f64) -> Measure {
    let log = &stats.log;
    match log.transform {
        LogTransform::Log => Measure::new(log.geometric_stddev, log.geometric_stddev_half_width, "factor"),
        LogTransform::Log1p => Measure::floored(log.geometric_stddev, log.geometric_stddev_half_width, epsilon, "ms"),
    }
}

/// Rows reported for an invalidated vector.
fn failure_measures(timer: &TimerEpsilon) -> Vec<ResultRow> {
    vec![
        ResultRow::new("timer resolution", "timerresolution", timer.as_measure()),
        ResultRow::new("wall clock", "wallclock", Measure::new(0.0, timer.epsilon_ms(), "ms")),
    ]
}

// ============================================================================
// TEST CASE RESULTS
// ============================================================================

/// A fact about the test case: table title, report key, value.
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub title: &'static str,
    pub key: &'static str,
    pub value: ReportValue,
}

/// Everything measured for one (operation, test vector) pair.
#[derive(Debug, Clone)]
pub struct TestCaseResult {
    pub operation: String,
    pub label: String,
    pub vector: String,
    pub facts: Vec<Fact>,
    pub rows: Vec<ResultRow>,
    pub run: PooledRun,
    pub capture_datapoints: bool,
}

impl TestCaseResult {
    pub fn is_success(&self) -> bool {
        self.run.outcome.is_ok()
    }

    pub fn error_code(&self) -> String {
        outcome_code(&self.run.outcome)
    }

    /// Prefix of every report key of this case: `<label>.<vector>`. The label
    /// is one key even when it contains dots.
    pub fn key_prefix(&self) -> [&str; 2] {
        [&self.label, &self.vector]
    }

    pub fn row(&self, key: &str) -> Option<&ResultRow> {
        self.rows.iter().find(|r| r.key == key)
    }

    /// Append this case to `report`.
    pub fn record(&self, report: &mut ResultReport) {
        let prefix = self.key_prefix();
        for fact in &self.facts {
            report.add_under(&prefix, fact.key, fact.value.clone());
        }
        for row in &self.rows {
            report.add_measure_under(&prefix, row.key, &row.measure);
        }
        if let Some(stats) = &self.run.statistics {
            let transform = match stats.log.transform {
                LogTransform::Log => "log",
                LogTransform::Log1p => "log1p",
            };
            report.add_under(&prefix, "latency.logtransform", transform);
        }
        if self.capture_datapoints && self.is_success() {
            report.add_under(&prefix, "datapoints", self.run.samples());
        }
        report.add_under(&prefix, "errorcode", self.error_code());
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

pub struct Executor<'a, S> {
    sessions: &'a [S],
    threads: usize,
    timer: TimerEpsilon,
    session_keys_per_thread: bool,
    capture_datapoints: bool,
}

impl<'a, S: Sync> Executor<'a, S> {
    /// `sessions[i]` is handed to thread `i`.
    pub fn new(sessions: &'a [S], threads: usize, timer: TimerEpsilon) -> Result<Self> {
        if threads == 0 {
            return Err(BenchError::InvalidParameters("at least one thread is required".to_string()));
        }
        if sessions.len() < threads {
            return Err(BenchError::InvalidParameters(format!(
                "{} thread(s) need as many sessions, got {}",
                threads,
                sessions.len()
            )));
        }
        Ok(Self {
            sessions,
            threads,
            timer,
            session_keys_per_thread: false,
            capture_datapoints: false,
        })
    }

    /// Pass the thread index to `prepare`, for per-thread key labels.
    pub fn with_session_keys(mut self, enabled: bool) -> Self {
        self.session_keys_per_thread = enabled;
        self
    }

    /// Keep every latency sample in the report.
    pub fn with_datapoints(mut self, enabled: bool) -> Self {
        self.capture_datapoints = enabled;
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn timer(&self) -> &TimerEpsilon {
        &self.timer
    }

    /// Run `operation` over `vectors` and build the report.
    pub fn benchmark(
        &self,
        operation: &dyn BenchmarkOperation<S>,
        iterations: usize,
        skip: usize,
        vectors: &[TestVector],
    ) -> Result<ResultReport> {
        let mut report = ResultReport::new();
        self.benchmark_with(operation, iterations, skip, vectors, |case| case.record(&mut report))?;
        Ok(report)
    }

    /// Run `operation` over `vectors`, handing each finished case to `on_case`.
    pub fn benchmark_with<F>(
        &self,
        operation: &dyn BenchmarkOperation<S>,
        iterations: usize,
        skip: usize,
        vectors: &[TestVector],
        mut on_case: F,
    ) -> Result<()>
    where
        F: FnMut(&TestCaseResult),
    {
        if iterations.saturating_mul(self.threads) < 2 {
            return Err(BenchError::InvalidParameters(format!(
                "{} iteration(s) on {} thread(s) give fewer than 2 samples",
                iterations, self.threads
            )));
        }

        for vector in vectors {
            let case = self.run_case(operation, iterations, skip, vector)?;
            on_case(&case);
        }
        Ok(())
    }

    fn facts(&self, operation: &dyn BenchmarkOperation<S>, vector: &TestVector, iterations: usize, skip: usize) -> Vec<Fact> {
        let fact = |title, key, value: ReportValue| Fact { title, key, value };
        vec![
            fact("algorithm", "algorithm", operation.name().into()),
            fact("vector size", "vector.size", vector.len().into()),
            fact("vector unit", "vector.unit", "Byte".into()),
            fact("key label", "label", operation.label().into()),
            fact("number of threads", "threads", self.threads.into()),
            fact("iterations/thread", "iterations", iterations.into()),
            fact("skipped iterations/thread", "skipiterations", skip.into()),
            fact("total of iterations", "totaliterations", (iterations * self.threads).into()),
        ]
    }

    fn run_case(
        &self,
        operation: &dyn BenchmarkOperation<S>,
        iterations: usize,
        skip: usize,
        vector: &TestVector,
    ) -> Result<TestCaseResult> {
        info!(
            operation = operation.name(),
            label = operation.label(),
            vector = vector.name(),
            threads = self.threads,
            "starting test case"
        );

        let (results, wallclock_ms) = self.dispatch(operation, iterations, skip, vector)?;
        let run = pool(results, wallclock_ms)?;

        let rows = match (&run.outcome, &run.statistics) {
            (Ok(()), Some(stats)) => derive_measures(stats, run.wallclock_ms, &self.timer, self.threads, vector.len()),
            (Err(kind), _) => {
                warn!(
                    operation = operation.name(),
                    vector = vector.name(),
                    error = %kind,
                    "test case invalidated by a failing thread"
                );
                failure_measures(&self.timer)
            }
            (Ok(()), None) => failure_measures(&self.timer),
        };

        debug!(vector = vector.name(), wallclock_ms = run.wallclock_ms, "test case done");

        Ok(TestCaseResult {
            operation: operation.name().to_string(),
            label: operation.label().to_string(),
            vector: vector.name().to_string(),
            facts: self.facts(operation, vector, iterations, skip),
            rows,
            run,
            capture_datapoints: self.capture_datapoints,
        })
    }

    /// Spawn the workers, release them together and join them. Returns the
    /// thread results and the wall clock from release to the last join.
    fn dispatch(
        &self,
        operation: &dyn BenchmarkOperation<S>,
        iterations: usize,
        skip: usize,
        vector: &TestVector,
    ) -> Result<(Vec<PerThreadResult>, f64)> {
        let barrier = StartBarrier::new();

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.threads);
            for th in 0..self.threads {
                let mut copy = operation.duplicate();
                let session = &self.sessions[th];
                let thread_index = self.session_keys_per_thread.then_some(th);
                let barrier = &barrier;

                let spawned = thread::Builder::new()
                    .name(format!("bench-worker-{th}"))
                    .spawn_scoped(scope, move || {
                        run_worker(copy.as_mut(), session, vector, iterations, skip, thread_index, barrier)
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        barrier.release();
                        return Err(BenchError::Io(e));
                    }
                }
            }

            barrier.await_arrivals(self.threads);
            let start = barrier.release();

            let mut results = Vec::with_capacity(self.threads);
            let mut panicked = None;
            for (th, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(result) => {
                        if let Err(kind) = &result.outcome {
                            warn!(operation = operation.name(), thread = th, error = %kind, "worker failed");
                        }
                        results.push(result);
                    }
                    Err(_) => {
                        panicked.get_or_insert(th);
                    }
                }
            }
            let wallclock_ms = start.elapsed().as_secs_f64() * 1e3;

            if let Some(thread) = panicked {
                return Err(BenchError::WorkerPanic {
                    operation: operation.name().to_string(),
                    thread,
                });
            }
            Ok((results, wallclock_ms))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn timer() -> TimerEpsilon {
        TimerEpsilon {
            resolution_ns: 20.0,
            error_ns: 1.0,
        }
    }

    #[test]
    fn one_failing_thread_voids_the_vector() {
        let results = vec![
            PerThreadResult::succeeded(vec![10.0, 11.0]),
            PerThreadResult::succeeded(vec![11.0, 9.0]),
            PerThreadResult::succeeded(vec![9.0, 10.0]),
            PerThreadResult::succeeded(vec![10.0, 10.0]),
            PerThreadResult::failed(FailureKind::Token(0x30)),
        ];
        let run = pool(results, 42.0).unwrap();
        assert_eq!(run.outcome, Err(FailureKind::Token(0x30)));
        assert_eq!(run.wallclock_ms, 0.0);
        assert!(run.statistics.is_none());
        assert!(run.samples().is_empty());
    }

    #[test]
    fn first_failure_in_thread_order_wins() {
        let results = vec![
            PerThreadResult::succeeded(vec![1.0, 2.0]),
            PerThreadResult::failed(FailureKind::ObjectNotFound),
            PerThreadResult::failed(FailureKind::InvalidSize),
        ];
        assert_eq!(pool(results, 1.0).unwrap().outcome, Err(FailureKind::ObjectNotFound));
    }

    #[test]
    fn success_pools_every_thread() {
        let results = vec![
            PerThreadResult::succeeded(vec![10.0, 11.0]),
            PerThreadResult::succeeded(vec![9.0, 10.0]),
        ];
        let run = pool(results, 25.0).unwrap();
        let stats = run.statistics.as_ref().unwrap();
        assert_eq!(stats.count, 4);
        assert_relative_eq!(stats.mean, 10.0);
        assert_eq!(run.samples(), vec![10.0, 11.0, 9.0, 10.0]);
        assert_eq!(run.wallclock_ms, 25.0);
    }

    #[test]
    fn derived_errors_respect_the_epsilon_floor() {
        let stats = analyze(&[1.0; 16]).unwrap();
        let timer = timer();
        let rows = derive_measures(&stats, 8.0, &timer, 2, 64);
        let eps = timer.epsilon_ms();

        for key in ["latency.average", "latency.minimum", "latency.maximum", "latency.p99", "wallclock"] {
            let row = rows.iter().find(|r| r.key == key).unwrap();
            assert_eq!(row.measure.raw_error(), eps, "{key}");
        }

        let tps = rows.iter().find(|r| r.key == "tps.global").unwrap();
        assert_relative_eq!(tps.measure.raw_value(), 2000.0);
        let tput = rows.iter().find(|r| r.key == "throughput.thread").unwrap();
        assert_relative_eq!(tput.measure.raw_value(), 64_000.0);
        assert_relative_eq!(tput.measure.raw_error(), 64_000.0 * eps);
    }

    #[test]
    fn statistical_error_wins_over_small_epsilon() {
        let stats = analyze(&[1.0, 3.0, 1.0, 3.0]).unwrap();
        let rows = derive_measures(&stats, 1.0, &timer(), 1, 8);
        let avg = rows.iter().find(|r| r.key == "latency.average").unwrap();
        assert_relative_eq!(avg.measure.raw_error(), stats.mean_half_width());
        assert!(avg.measure.raw_error() > timer().epsilon_ms());
    }

    #[test]
    fn geostddev_unit_follows_the_log_transform() {
        let timer = timer();
        let eps = timer.epsilon_ms();

        let slow = analyze(&[1.0, 3.0, 1.0, 3.0]).unwrap();
        let rows = derive_measures(&slow, 1.0, &timer, 1, 8);
        let geo = rows.iter().find(|r| r.key == "latency.geostddev").unwrap();
        assert_eq!(geo.measure.unit(), "factor");
        assert_relative_eq!(geo.measure.raw_error(), slow.log.geometric_stddev_half_width);

        let fast = analyze(&[0.001, 0.001, 0.001, 0.001]).unwrap();
        let rows = derive_measures(&fast, 1.0, &timer, 1, 8);
        let geo = rows.iter().find(|r| r.key == "latency.geostddev").unwrap();
        assert_eq!(geo.measure.unit(), "ms");
        assert_eq!(geo.measure.raw_error(), eps);
    }

    #[test]
    fn zero_mean_does_not_divide_by_zero() {
        assert_eq!(per_second(1000.0, 0.0, 0.1), (0.0, 0.0));
    }
}
