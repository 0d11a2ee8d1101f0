//! Benchmark operation capability
//!
//! Each cryptographic test case implements [`BenchmarkOperation`]. The executor
//! never looks inside the session type `S`; it only hands a reference to every
//! hook. Recoverable failures come back as [`FailureKind`] and are reported per
//! test vector. A panic in a hook is treated as unrecoverable.

use std::fmt;

use serde::Serialize;

use crate::utils::helpers::test_vector_name;

/// Reported error code of a successful test vector.
pub const SUCCESS_CODE: &str = "CKR_OK";

/// Named payload driving an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestVector {
    name: String,
    payload: Vec<u8>,
}

impl TestVector {
    pub fn new(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// `testvecNNNN` made of `size` zero bytes.
    pub fn zeroed(size: usize) -> Self {
        Self::new(test_vector_name(size), vec![0u8; size])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Closed set of recoverable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// No object matches the (possibly thread-scoped) label.
    ObjectNotFound,
    /// More than one object matches the label.
    AmbiguousObject,
    /// Payload size not accepted by the algorithm.
    InvalidSize,
    /// Return value reported by the token library.
    Token(u64),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::ObjectNotFound => write!(f, "CKR_OBJECT_NOT_FOUND"),
            FailureKind::AmbiguousObject => write!(f, "CKR_AMBIGUOUS_OBJECT"),
            FailureKind::InvalidSize => write!(f, "CKR_DATA_LEN_RANGE"),
            FailureKind::Token(rv) => write!(f, "CKR_0x{rv:08X}"),
        }
    }
}

pub type Outcome = Result<(), FailureKind>;

/// Error code string of an outcome.
pub fn outcome_code(outcome: &Outcome) -> String {
    match outcome {
        Ok(()) => SUCCESS_CODE.to_string(),
        Err(kind) => kind.to_string(),
    }
}

/// Lifecycle of one measured operation.
///
/// `duplicate` gives each worker thread its own instance, so hooks may keep
/// mutable per-thread state without locking.
pub trait BenchmarkOperation<S: ?Sized>: Send {
    fn name(&self) -> &str;

    /// Label of the key or object the operation works with.
    fn label(&self) -> &str;

    fn duplicate(&self) -> Box<dyn BenchmarkOperation<S>>;

    /// Untimed setup. `thread` is set when per-thread keys were generated.
    fn prepare(&mut self, session: &S, vector: &TestVector, thread: Option<usize>) -> Outcome;

    /// The timed body.
    fn run_once(&mut self, session: &S) -> Outcome;

    /// Untimed, after every iteration (e.g. destroy a derived key).
    fn cleanup(&mut self, _session: &S) -> Outcome {
        Ok(())
    }

    /// Untimed, after the last iteration.
    fn teardown(&mut self, _session: &S, _vector: &TestVector, _thread: Option<usize>) -> Outcome {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_vector_naming() {
        let v = TestVector::zeroed(64);
        assert_eq!(v.name(), "testvec0064");
        assert_eq!(v.len(), 64);
        assert!(v.payload().iter().all(|&b| b == 0));
        assert!(TestVector::zeroed(0).is_empty());
    }

    #[test]
    fn outcome_codes() {
        assert_eq!(outcome_code(&Ok(())), "CKR_OK");
        assert_eq!(outcome_code(&Err(FailureKind::ObjectNotFound)), "CKR_OBJECT_NOT_FOUND");
        assert_eq!(outcome_code(&Err(FailureKind::Token(0x82))), "CKR_0x00000082");
    }
}
