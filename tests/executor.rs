use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use token_bench::executor::TestCaseResult;
use token_bench::operations::{FixedLatencyOperation, GenerateRandomOperation, SoftSession, XorDeriveOperation};
use token_bench::stats::timer_precision::calibrate_once;
use token_bench::stats::TimerEpsilon;
use token_bench::{BenchError, BenchmarkOperation, Executor, FailureKind, Outcome, TestVector};

fn timer() -> TimerEpsilon {
    calibrate_once(100).unwrap()
}

/// Fails `prepare` on one thread and counts timed calls on the others.
#[derive(Clone)]
struct Scripted {
    failing_thread: Option<usize>,
    prepare_delay: Duration,
    panic_in_run: bool,
    runs: Arc<AtomicUsize>,
}

impl Scripted {
    fn new() -> Self {
        Self {
            failing_thread: None,
            prepare_delay: Duration::ZERO,
            panic_in_run: false,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl BenchmarkOperation<()> for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn label(&self) -> &str {
        "scripted-key"
    }

    fn duplicate(&self) -> Box<dyn BenchmarkOperation<()>> {
        Box::new(self.clone())
    }

    fn prepare(&mut self, _session: &(), _vector: &TestVector, thread: Option<usize>) -> Outcome {
        thread::sleep(self.prepare_delay);
        if thread.is_some() && thread == self.failing_thread {
            return Err(FailureKind::Token(0x30));
        }
        Ok(())
    }

    fn run_once(&mut self, _session: &()) -> Outcome {
        if self.panic_in_run {
            panic!("device removed");
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every prepare/teardown with its thread index.
#[derive(Clone, Default)]
struct Lifecycle {
    cleanup_delay: Duration,
    run_failure: Option<FailureKind>,
    teardown_failure: Option<(usize, FailureKind)>,
    calls: Arc<Mutex<Vec<(&'static str, Option<usize>)>>>,
}

impl Lifecycle {
    fn calls(&self, hook: &str) -> Vec<Option<usize>> {
        let mut threads: Vec<_> = self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| *h == hook)
            .map(|&(_, th)| th)
            .collect();
        threads.sort();
        threads
    }
}

impl BenchmarkOperation<()> for Lifecycle {
    fn name(&self) -> &str {
        "lifecycle"
    }

    fn label(&self) -> &str {
        "lifecycle-key"
    }

    fn duplicate(&self) -> Box<dyn BenchmarkOperation<()>> {
        Box::new(self.clone())
    }

    fn prepare(&mut self, _session: &(), _vector: &TestVector, thread: Option<usize>) -> Outcome {
        self.calls.lock().unwrap().push(("prepare", thread));
        Ok(())
    }

    fn run_once(&mut self, _session: &()) -> Outcome {
        match self.run_failure {
            Some(kind) => Err(kind),
            None => Ok(()),
        }
    }

    fn cleanup(&mut self, _session: &()) -> Outcome {
        thread::sleep(self.cleanup_delay);
        Ok(())
    }

    fn teardown(&mut self, _session: &(), _vector: &TestVector, thread: Option<usize>) -> Outcome {
        self.calls.lock().unwrap().push(("teardown", thread));
        match self.teardown_failure {
            Some((th, kind)) if thread == Some(th) => Err(kind),
            _ => Ok(()),
        }
    }
}

#[test]
fn sleeping_operation_matches_expected_throughput() {
    let sessions = [(), ()];
    let executor = Executor::new(&sessions, 2, timer()).unwrap();
    let op = FixedLatencyOperation::new(Duration::from_millis(1));

    let mut cases = Vec::new();
    executor
        .benchmark_with(&op, 100, 0, &[TestVector::zeroed(8)], |case| cases.push(case.clone()))
        .unwrap();

    let case = &cases[0];
    assert!(case.is_success());
    let avg = case.row("latency.average").unwrap().measure.raw_value();
    assert!((1.0..2.5).contains(&avg), "average latency {avg} ms");

    let tps = case.row("tps.global").unwrap().measure.raw_value();
    assert!((800.0..=2000.0).contains(&tps), "global TPS {tps}");

    let wallclock = case.row("wallclock").unwrap().measure.raw_value();
    assert!(wallclock >= 100.0, "wall clock {wallclock} ms");
    assert_eq!(case.run.statistics.as_ref().unwrap().count, 200);
}

#[test]
fn one_failing_thread_invalidates_the_vector() {
    let sessions = [(); 5];
    let executor = Executor::new(&sessions, 5, timer()).unwrap().with_session_keys(true);
    let op = Scripted {
        failing_thread: Some(4),
        ..Scripted::new()
    };

    let report = executor.benchmark(&op, 10, 0, &[TestVector::zeroed(16)]).unwrap();

    assert_eq!(report.get_text("scripted-key.testvec0016.errorcode"), Some("CKR_0x00000030"));
    assert_eq!(report.get_number("scripted-key.testvec0016.wallclock.value"), Some(0.0));
    assert!(report.get("scripted-key.testvec0016.latency").is_none());
    assert!(report.get("scripted-key.testvec0016.tps").is_none());
}

#[test]
fn skipped_iterations_are_run_but_not_recorded() {
    let sessions = [(), (), ()];
    let executor = Executor::new(&sessions, 3, timer()).unwrap();
    let op = Scripted::new();

    let mut cases: Vec<TestCaseResult> = Vec::new();
    executor
        .benchmark_with(&op, 20, 5, &[TestVector::zeroed(8)], |case| cases.push(case.clone()))
        .unwrap();

    assert_eq!(op.runs.load(Ordering::SeqCst), 3 * 25);
    assert!(cases[0].run.per_thread.iter().all(|samples| samples.len() == 20));
}

#[test]
fn prepare_time_stays_out_of_the_wall_clock() {
    let sessions = [(), ()];
    let executor = Executor::new(&sessions, 2, timer()).unwrap();
    let op = Scripted {
        prepare_delay: Duration::from_millis(200),
        ..Scripted::new()
    };

    let mut cases = Vec::new();
    executor
        .benchmark_with(&op, 5, 0, &[TestVector::zeroed(8)], |case| cases.push(case.clone()))
        .unwrap();

    let wallclock = cases[0].row("wallclock").unwrap().measure.raw_value();
    assert!(wallclock < 150.0, "wall clock {wallclock} ms");
}

#[test]
fn panicking_hook_aborts_the_run() {
    let sessions = [(), ()];
    let executor = Executor::new(&sessions, 2, timer()).unwrap();
    let op = Scripted {
        panic_in_run: true,
        ..Scripted::new()
    };

    let err = executor.benchmark(&op, 5, 0, &[TestVector::zeroed(8)]).unwrap_err();
    assert!(matches!(err, BenchError::WorkerPanic { ref operation, .. } if operation == "scripted"));
}

#[test]
fn invalid_parameters_are_rejected() {
    let sessions = [(), ()];
    assert!(matches!(Executor::new(&sessions, 0, timer()), Err(BenchError::InvalidParameters(_))));
    assert!(matches!(Executor::new(&sessions, 3, timer()), Err(BenchError::InvalidParameters(_))));

    let executor = Executor::new(&sessions[..1], 1, timer()).unwrap();
    let err = executor.benchmark(&Scripted::new(), 1, 0, &[TestVector::zeroed(8)]).unwrap_err();
    assert!(matches!(err, BenchError::InvalidParameters(_)));
}

#[test]
fn soft_token_operations_run_on_every_vector() {
    let sessions = SoftSession::open_many(2, 5);
    for (th, session) in sessions.iter().enumerate() {
        session.generate_key(&format!("xor-key-th-{th:05}"), 32);
    }
    let executor = Executor::new(&sessions, 2, timer()).unwrap().with_session_keys(true);
    let vectors: Vec<TestVector> = [8, 64, 1024].into_iter().map(TestVector::zeroed).collect();

    let xor = XorDeriveOperation::new("xor-key");
    let report = executor.benchmark(&xor, 20, 2, &vectors).unwrap();
    for vector in &vectors {
        let code = report.get_text(&format!("xor-key.{}.errorcode", vector.name()));
        assert_eq!(code, Some("CKR_OK"));
    }
    // derived keys are cleaned up after every iteration
    assert!(sessions.iter().all(|s| s.object_count() == 1));

    let rand = GenerateRandomOperation::new("rng");
    let report = executor.benchmark(&rand, 20, 0, &vectors).unwrap();
    assert_eq!(report.get_text("rng.testvec1024.errorcode"), Some("CKR_OK"));
    assert_eq!(report.get_number("rng.testvec1024.vector.size"), Some(1024.0));
}

#[test]
fn missing_thread_key_is_reported_not_fatal() {
    let sessions = SoftSession::open_many(2, 5);
    sessions[0].generate_key("xor-key-th-00000", 32);
    let executor = Executor::new(&sessions, 2, timer()).unwrap().with_session_keys(true);

    let report = executor
        .benchmark(&XorDeriveOperation::new("xor-key"), 10, 0, &[TestVector::zeroed(32)])
        .unwrap();
    assert_eq!(report.get_text("xor-key.testvec0032.errorcode"), Some("CKR_OBJECT_NOT_FOUND"));
}

#[test]
fn cleanup_is_not_timed() {
    let sessions = [()];
    let executor = Executor::new(&sessions, 1, timer()).unwrap();
    let op = Lifecycle {
        cleanup_delay: Duration::from_millis(20),
        ..Lifecycle::default()
    };

    let mut cases = Vec::new();
    executor
        .benchmark_with(&op, 5, 0, &[TestVector::zeroed(8)], |case| cases.push(case.clone()))
        .unwrap();

    let case = &cases[0];
    assert!(case.is_success());
    let maximum = case.row("latency.maximum").unwrap().measure.raw_value();
    assert!(maximum < 5.0, "maximum latency {maximum} ms includes cleanup");
    let wallclock = case.row("wallclock").unwrap().measure.raw_value();
    assert!(wallclock >= 100.0, "wall clock {wallclock} ms, cleanup did not run");
}

#[test]
fn teardown_runs_once_per_thread_with_the_prepare_index() {
    let sessions = [(), (), ()];
    let executor = Executor::new(&sessions, 3, timer()).unwrap().with_session_keys(true);
    let op = Lifecycle::default();
    let vectors = [TestVector::zeroed(8), TestVector::zeroed(16)];

    let report = executor.benchmark(&op, 4, 1, &vectors).unwrap();

    let expected = vec![Some(0), Some(0), Some(1), Some(1), Some(2), Some(2)];
    assert_eq!(op.calls("prepare"), expected);
    assert_eq!(op.calls("teardown"), expected);
    assert_eq!(report.get_text("lifecycle-key.testvec0016.errorcode"), Some("CKR_OK"));
}

#[test]
fn teardown_without_session_keys_gets_no_index() {
    let sessions = [(), ()];
    let executor = Executor::new(&sessions, 2, timer()).unwrap();
    let op = Lifecycle::default();

    executor.benchmark(&op, 3, 0, &[TestVector::zeroed(8)]).unwrap();
    assert_eq!(op.calls("teardown"), vec![None, None]);
}

#[test]
fn failing_teardown_invalidates_the_vector() {
    let sessions = [(), ()];
    let executor = Executor::new(&sessions, 2, timer()).unwrap().with_session_keys(true);
    let op = Lifecycle {
        teardown_failure: Some((1, FailureKind::Token(0x54))),
        ..Lifecycle::default()
    };

    let report = executor.benchmark(&op, 5, 0, &[TestVector::zeroed(8)]).unwrap();
    assert_eq!(report.get_text("lifecycle-key.testvec0008.errorcode"), Some("CKR_0x00000054"));
    assert_eq!(report.get_number("lifecycle-key.testvec0008.wallclock.value"), Some(0.0));
    assert!(report.get("lifecycle-key.testvec0008.latency").is_none());
}

#[test]
fn loop_failure_takes_precedence_over_teardown_failure() {
    let sessions = [()];
    let executor = Executor::new(&sessions, 1, timer()).unwrap().with_session_keys(true);
    let op = Lifecycle {
        run_failure: Some(FailureKind::ObjectNotFound),
        teardown_failure: Some((0, FailureKind::Token(0x54))),
        ..Lifecycle::default()
    };

    let report = executor.benchmark(&op, 5, 0, &[TestVector::zeroed(8)]).unwrap();
    assert_eq!(report.get_text("lifecycle-key.testvec0008.errorcode"), Some("CKR_OBJECT_NOT_FOUND"));
    // teardown still ran after the failed loop
    assert_eq!(op.calls("teardown"), vec![Some(0)]);
}
