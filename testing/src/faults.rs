//! Failure injection shared by the in-memory stores.
//!
//! A [`Faults`] handle is cloned into a store and kept by the test. The test
//! can take the whole store down, arm a number of failures for one named
//! operation, or add latency to every call.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use actionstream_core::StoreError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Kind of injected failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Fail with [`StoreError::Unavailable`]
    Unavailable,
    /// Fail with [`StoreError::Corrupt`]
    Corrupt,
}

#[derive(Debug, Default)]
struct FaultState {
    down: bool,
    delay: Option<Duration>,
    armed: HashMap<&'static str, VecDeque<Fault>>,
    calls: HashMap<&'static str, usize>,
}

/// Shared failure switchboard for one store.
#[derive(Clone, Debug, Default)]
pub struct Faults {
    state: Arc<Mutex<FaultState>>,
}

impl Faults {
    /// Create a switchboard with nothing armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `Unavailable` until cleared.
    pub fn set_down(&self, down: bool) {
        self.state.lock().unwrap().down = down;
    }

    /// Sleep this long before every operation.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Fail the next `times` calls to `operation` with `Unavailable`.
    pub fn fail_next(&self, operation: &'static str, times: usize) {
        self.arm(operation, Fault::Unavailable, times);
    }

    /// Fail the next `times` calls to `operation` with `Corrupt`.
    pub fn corrupt_next(&self, operation: &'static str, times: usize) {
        self.arm(operation, Fault::Corrupt, times);
    }

    /// How many times `operation` has been called, failed calls included.
    #[must_use]
    pub fn calls(&self, operation: &'static str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    fn arm(&self, operation: &'static str, fault: Fault, times: usize) {
        let mut state = self.state.lock().unwrap();
        let queue = state.armed.entry(operation).or_default();
        queue.extend(std::iter::repeat_n(fault, times));
    }

    /// Apply configured latency and failures for one call.
    ///
    /// # Errors
    ///
    /// Returns the injected [`StoreError`], if any.
    pub async fn check(&self, store: &'static str, operation: &'static str) -> Result<(), StoreError> {
        let delay = self.state.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        *state.calls.entry(operation).or_default() += 1;

        if state.down {
            return Err(StoreError::unavailable(store, "injected outage"));
        }

        match state.armed.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(Fault::Unavailable) => Err(StoreError::unavailable(
                store,
                format!("injected failure in {operation}"),
            )),
            Some(Fault::Corrupt) => Err(StoreError::corrupt(
                store,
                format!("injected corruption in {operation}"),
            )),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn armed_failures_are_consumed_in_order() {
        let faults = Faults::new();
        faults.fail_next("insert", 1);
        faults.corrupt_next("insert", 1);

        assert!(matches!(
            faults.check("history", "insert").await,
            Err(StoreError::Unavailable { .. })
        ));
        assert!(matches!(
            faults.check("history", "insert").await,
            Err(StoreError::Corrupt { .. })
        ));
        assert!(faults.check("history", "insert").await.is_ok());
        assert!(faults.check("history", "lookup").await.is_ok());
        assert_eq!(faults.calls("insert"), 3);
    }

    #[tokio::test]
    async fn outage_fails_every_operation() {
        let faults = Faults::new();
        faults.set_down(true);
        assert!(faults.check("counter", "get").await.is_err());
        faults.set_down(false);
        assert!(faults.check("counter", "get").await.is_ok());
    }
}
