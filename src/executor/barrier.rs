//! Start barrier ("green light")
//!
//! Workers check in once their operation is prepared and then block until the
//! orchestrator releases them all at once. The orchestrator waits for every
//! check-in first, so prepare time never leaks into the wall clock.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    released: bool,
}

#[derive(Debug, Default)]
pub struct StartBarrier {
    state: Mutex<BarrierState>,
    arrivals: Condvar,
    green_light: Condvar,
}

impl StartBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle for one worker. Dropping it without [`Arrival::wait`] still
    /// counts as a check-in, so a failed or panicking prepare cannot leave the
    /// orchestrator waiting.
    pub fn arrival(&self) -> Arrival<'_> {
        Arrival {
            barrier: self,
            checked_in: false,
        }
    }

    fn check_in(&self) -> MutexGuard<'_, BarrierState> {
        let mut state = self.lock();
        state.arrived += 1;
        self.arrivals.notify_all();
        state
    }

    /// Block until `count` workers have checked in.
    pub fn await_arrivals(&self, count: usize) {
        let state = self.lock();
        let _state = self
            .arrivals
            .wait_while(state, |s| s.arrived < count && !s.released)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Turn the light green and wake every waiting worker. Returns the instant
    /// taken under the lock, which is the wall-clock start.
    pub fn release(&self) -> Instant {
        let mut state = self.lock();
        let start = Instant::now();
        state.released = true;
        self.green_light.notify_all();
        start
    }

    pub fn arrived(&self) -> usize {
        self.lock().arrived
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }
}

pub struct Arrival<'a> {
    barrier: &'a StartBarrier,
    checked_in: bool,
}

impl Arrival<'_> {
    /// Check in and block until released.
    pub fn wait(mut self) {
        self.checked_in = true;
        let state = self.barrier.check_in();
        let _state = self
            .barrier
            .green_light
            .wait_while(state, |s| !s.released)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

impl Drop for Arrival<'_> {
    fn drop(&mut self) {
        if !self.checked_in {
            drop(self.barrier.check_in());
        }
    }
}
