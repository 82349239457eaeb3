//! Shared fixtures for the integration suite, mirroring how `sched_sim`'s
//! dev-only test helpers are kept separate from the library's own inline
//! `#[cfg(test)]` modules.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use activity_scheduler::{Action, Outcome};

/// Performs once per invocation, returning a fixed outcome and recording its
/// name into a shared log so tests can assert on execution order.
pub struct RecordingAction {
    name: String,
    outcome: Outcome,
    can_retry: bool,
    pub calls: AtomicU32,
    log: std::sync::Arc<Mutex<Vec<String>>>,
}

impl RecordingAction {
    pub fn new(name: &str, outcome: Outcome, log: std::sync::Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            can_retry: false,
            calls: AtomicU32::new(0),
            log,
        }
    }

    pub fn with_retry(name: &str, outcome: Outcome, log: std::sync::Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            can_retry: true,
            ..Self::new(name, outcome, log)
        }
    }
}

impl Action for RecordingAction {
    fn perform(&self) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(self.name.clone());
        self.outcome
    }

    fn can_retry(&self) -> bool {
        self.can_retry
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Fails on its first call, then succeeds, recording each attempt.
pub struct FlakyAction {
    name: String,
    pub calls: AtomicU32,
    log: std::sync::Arc<Mutex<Vec<String>>>,
}

impl FlakyAction {
    pub fn new(name: &str, log: std::sync::Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicU32::new(0),
            log,
        }
    }
}

impl Action for FlakyAction {
    fn perform(&self) -> Outcome {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(self.name.clone());
        if n == 0 {
            Outcome::Failure
        } else {
            Outcome::Success
        }
    }

    fn can_retry(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Blocks on a barrier before reporting its outcome, so tests can force two
/// chains to compete for one pool worker (spec.md §8, scenario 7).
pub struct BarrierAction {
    name: String,
    outcome: Outcome,
    barrier: std::sync::Arc<std::sync::Barrier>,
    log: std::sync::Arc<Mutex<Vec<String>>>,
}

impl BarrierAction {
    pub fn new(
        name: &str,
        outcome: Outcome,
        barrier: std::sync::Arc<std::sync::Barrier>,
        log: std::sync::Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            barrier,
            log,
        }
    }
}

impl Action for BarrierAction {
    fn perform(&self) -> Outcome {
        self.barrier.wait();
        self.log.lock().unwrap().push(self.name.clone());
        self.outcome
    }

    fn name(&self) -> &str {
        &self.name
    }
}
