//! Reference operations
//!
//! Software stand-ins for token algorithms. They let the binary and the
//! integration tests drive the executor end to end.

pub mod session;

use std::thread;
use std::time::Duration;

use crate::operation::{BenchmarkOperation, FailureKind, Outcome, TestVector};
use crate::utils::helpers::threaded_label;

pub use session::{ObjectHandle, SoftSession};

/// Names accepted in the coverage list.
pub const FIXED: &str = "fixed";
pub const XORDER: &str = "xorder";
pub const RAND: &str = "rand";

// ============================================================================
// FIXED LATENCY
// ============================================================================

/// Sleeps for a fixed time on every iteration. Works with any session type.
#[derive(Debug, Clone)]
pub struct FixedLatencyOperation {
    label: String,
    latency: Duration,
}

impl FixedLatencyOperation {
    pub fn new(latency: Duration) -> Self {
        Self {
            label: format!("sleep-{}us", latency.as_micros()),
            latency,
        }
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }
}

impl<S: ?Sized> BenchmarkOperation<S> for FixedLatencyOperation {
    fn name(&self) -> &str {
        FIXED
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn duplicate(&self) -> Box<dyn BenchmarkOperation<S>> {
        Box::new(self.clone())
    }

    fn prepare(&mut self, _session: &S, _vector: &TestVector, _thread: Option<usize>) -> Outcome {
        Ok(())
    }

    fn run_once(&mut self, _session: &S) -> Outcome {
        thread::sleep(self.latency);
        Ok(())
    }
}

// ============================================================================
// XOR KEY DERIVATION
// ============================================================================

/// Derives a transient key as `payload XOR base key` and stores it in the
/// session. The derived object is destroyed after every iteration.
#[derive(Debug, Clone)]
pub struct XorDeriveOperation {
    label: String,
    key: Vec<u8>,
    payload: Vec<u8>,
    derived: Option<ObjectHandle>,
}

impl XorDeriveOperation {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: Vec::new(),
            payload: Vec::new(),
            derived: None,
        }
    }
}

impl BenchmarkOperation<SoftSession> for XorDeriveOperation {
    fn name(&self) -> &str {
        XORDER
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn duplicate(&self) -> Box<dyn BenchmarkOperation<SoftSession>> {
        Box::new(Self::new(self.label.clone()))
    }

    fn prepare(&mut self, session: &SoftSession, vector: &TestVector, thread: Option<usize>) -> Outcome {
        if vector.is_empty() {
            return Err(FailureKind::InvalidSize);
        }
        let handle = session.find_object(&threaded_label(&self.label, thread))?;
        self.key = session.object_value(handle)?;
        if self.key.is_empty() {
            return Err(FailureKind::InvalidSize);
        }
        self.payload = vector.payload().to_vec();
        Ok(())
    }

    fn run_once(&mut self, session: &SoftSession) -> Outcome {
        let derived: Vec<u8> = self
            .payload
            .iter()
            .zip(self.key.iter().cycle())
            .map(|(p, k)| p ^ k)
            .collect();
        self.derived = Some(session.create_object("derived", derived));
        Ok(())
    }

    fn cleanup(&mut self, session: &SoftSession) -> Outcome {
        match self.derived.take() {
            Some(handle) => session.destroy_object(handle),
            None => Ok(()),
        }
    }

    /// Drops a derived key left behind by an interrupted loop and wipes the
    /// copied key material.
    fn teardown(&mut self, session: &SoftSession, _vector: &TestVector, _thread: Option<usize>) -> Outcome {
        let leftover = self.cleanup(session);
        self.key.fill(0);
        self.key.clear();
        self.payload.clear();
        leftover
    }
}

// ============================================================================
// RANDOM GENERATION
// ============================================================================

/// Fills a payload-sized buffer from the session generator.
#[derive(Debug, Clone)]
pub struct GenerateRandomOperation {
    label: String,
    buffer: Vec<u8>,
}

impl GenerateRandomOperation {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            buffer: Vec::new(),
        }
    }
}

impl BenchmarkOperation<SoftSession> for GenerateRandomOperation {
    fn name(&self) -> &str {
        RAND
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn duplicate(&self) -> Box<dyn BenchmarkOperation<SoftSession>> {
        Box::new(Self::new(self.label.clone()))
    }

    fn prepare(&mut self, _session: &SoftSession, vector: &TestVector, _thread: Option<usize>) -> Outcome {
        self.buffer = vec![0u8; vector.len()];
        Ok(())
    }

    fn run_once(&mut self, session: &SoftSession) -> Outcome {
        session.generate_random(&mut self.buffer)
    }
}
