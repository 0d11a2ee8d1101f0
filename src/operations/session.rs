//! In-memory token session
//!
//! Holds labelled objects the way a token does and answers searches with the
//! same failure kinds, so the reference operations run without hardware.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::debug;

use crate::operation::{FailureKind, Outcome};

/// Opaque object handle, unique within one session.
pub type ObjectHandle = u64;

#[derive(Debug, Clone)]
struct SoftObject {
    handle: ObjectHandle,
    label: String,
    value: Vec<u8>,
}

#[derive(Debug)]
struct SessionState {
    objects: Vec<SoftObject>,
    next_handle: ObjectHandle,
    rng: StdRng,
}

#[derive(Debug)]
pub struct SoftSession {
    state: Mutex<SessionState>,
}

impl SoftSession {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(SessionState {
                objects: Vec::new(),
                next_handle: 1,
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    /// One session per thread, seeded from `seed` onwards.
    pub fn open_many(count: usize, seed: u64) -> Vec<Self> {
        (0..count as u64).map(|i| Self::new(seed.wrapping_add(i))).collect()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under `label`.
    pub fn create_object(&self, label: &str, value: Vec<u8>) -> ObjectHandle {
        let mut state = self.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.objects.push(SoftObject {
            handle,
            label: label.to_string(),
            value,
        });
        handle
    }

    /// Random secret key of `len` bytes.
    pub fn generate_key(&self, label: &str, len: usize) -> ObjectHandle {
        let mut value = vec![0u8; len];
        self.lock().rng.fill_bytes(&mut value);
        let handle = self.create_object(label, value);
        debug!(label, handle, len, "session key generated");
        handle
    }

    /// Exactly one object must carry `label`.
    pub fn find_object(&self, label: &str) -> Result<ObjectHandle, FailureKind> {
        let state = self.lock();
        let mut found = state.objects.iter().filter(|o| o.label == label);
        match (found.next(), found.next()) {
            (None, _) => Err(FailureKind::ObjectNotFound),
            (Some(object), None) => Ok(object.handle),
            (Some(_), Some(_)) => Err(FailureKind::AmbiguousObject),
        }
    }

    pub fn object_value(&self, handle: ObjectHandle) -> Result<Vec<u8>, FailureKind> {
        self.lock()
            .objects
            .iter()
            .find(|o| o.handle == handle)
            .map(|o| o.value.clone())
            .ok_or(FailureKind::ObjectNotFound)
    }

    pub fn destroy_object(&self, handle: ObjectHandle) -> Outcome {
        let mut state = self.lock();
        let before = state.objects.len();
        state.objects.retain(|o| o.handle != handle);
        if state.objects.len() == before {
            return Err(FailureKind::ObjectNotFound);
        }
        Ok(())
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn generate_random(&self, buffer: &mut [u8]) -> Outcome {
        self.lock().rng.fill_bytes(buffer);
        Ok(())
    }
}
