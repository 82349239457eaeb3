//! The scheduler's wrapper around a user action (spec.md §3, §4.4).
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{debug, warn};

use crate::action::{Action, Outcome};
use crate::config::SchedulerConfig;
use crate::tag::Tag;

/// Stable identity used for equality, hashing, and as the graph's vertex
/// payload (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TaskId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct TaskState {
    enabled: bool,
    executing: bool,
    /// Set when the most recent disable came from a `DisableOnce` outcome,
    /// so the scheduler can restore `enabled` between passes (spec.md §9,
    /// Open Questions).
    disabled_once: bool,
}

/// The scheduler's wrapper around an `Action`.
///
/// Enforces at most one concurrent `execute()` and drives the retry loop.
/// Mutable state is guarded by the wrapper's own lock, independent of the
/// scheduler's lock (spec.md §3, "Ownership").
pub struct TaskHandle {
    id: TaskId,
    action: Box<dyn Action>,
    state: Mutex<TaskState>,
    tags: Mutex<HashSet<Tag>>,
}

/// Internal-bug condition: caller violated the "at most one concurrent
/// `execute()`" contract. Not part of `SchedulerError` because it can only
/// be triggered by a defect in the scheduler itself, never by a caller.
#[derive(Debug)]
pub struct ReentrantExecuteError;

impl TaskHandle {
    pub fn new(action: Box<dyn Action>) -> Self {
        // `Action::tags()` returns plain names; the registry-backed `Tag`
        // values are attached by the scheduler via `Task::tag`, since only
        // the scheduler holds a `TagRegistry` reference.
        Self {
            id: TaskId::next(),
            action,
            state: Mutex::new(TaskState {
                enabled: true,
                executing: false,
                disabled_once: false,
            }),
            tags: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn action(&self) -> &dyn Action {
        self.action.as_ref()
    }

    pub fn name(&self) -> &str {
        self.action.name()
    }

    pub fn tag(&self, tags: impl IntoIterator<Item = Tag>) {
        self.tags.lock().unwrap().extend(tags);
    }

    pub fn untag(&self, tags: impl IntoIterator<Item = Tag>) {
        let mut held = self.tags.lock().unwrap();
        for tag in tags {
            held.remove(&tag);
        }
    }

    pub fn tags(&self) -> HashSet<Tag> {
        self.tags.lock().unwrap().clone()
    }

    /// The action's own default tags (spec.md §6, `getActionTags()`),
    /// distinct from `tags()`, which returns the registry-backed `Tag`
    /// values attached via `Scheduler::tag`.
    pub fn action_tags(&self) -> Vec<String> {
        self.action.tags()
    }

    pub fn is_executing(&self) -> bool {
        self.state.lock().unwrap().executing
    }

    /// Combines the wrapper's own `enabled` flag with the action's
    /// enablement (spec.md §3): both must be true.
    pub fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled && self.action.is_enabled()
    }

    /// Sets `enabled = false` iff the task is not currently executing.
    /// Returns whether the task is disabled after the call, so a caller can
    /// tell a successful disable from one deferred because the task was
    /// mid-execution (spec.md §4.7).
    pub fn disable(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.executing {
            state.enabled = false;
            state.disabled_once = false;
        }
        !state.enabled
    }

    /// Restores `enabled` for a task that was disabled only for the
    /// duration of the previous pass via a `DisableOnce` outcome.
    pub fn restore_after_pass(&self) {
        let mut state = self.state.lock().unwrap();
        if state.disabled_once {
            state.enabled = true;
            state.disabled_once = false;
        }
    }

    /// Runs the execute-once-at-a-time, retry-enforcing wrapper around the
    /// action (spec.md §4.4).
    ///
    /// # Panics
    /// If `execute()` is called while another invocation on the same task is
    /// already in progress — this is always a scheduler bug, never a
    /// condition a caller can hit through the public API.
    pub fn execute(&self, config: &SchedulerConfig) -> Outcome {
        {
            let mut state = self.state.lock().unwrap();
            if state.executing {
                drop(state);
                panic!(
                    "task {:?} ({}): execute() called while already executing",
                    self.id,
                    self.name()
                );
            }
            if !(state.enabled && self.action.is_enabled()) {
                debug!("task {} is disabled; skipping perform()", self.name());
                return Outcome::Disable;
            }
            state.executing = true;
        }

        // Guaranteed-release guard: clears `executing` on every exit path,
        // including an unwinding panic from `perform`, mirroring the
        // latch-release discipline spec.md §4.5/§7 requires of the pool.
        struct ExecutingGuard<'a>(&'a Mutex<TaskState>);
        impl Drop for ExecutingGuard<'_> {
            fn drop(&mut self) {
                self.0.lock().unwrap().executing = false;
            }
        }
        let _guard = ExecutingGuard(&self.state);

        let mut outcome = self.action.perform();
        let mut retries = 0u32;
        while matches!(outcome, Outcome::Failure)
            && self.action.can_retry()
            && retries < config.max_activity_retry
        {
            warn!(
                "task {} failed, retrying ({}/{})",
                self.name(),
                retries + 1,
                config.max_activity_retry
            );
            outcome = self.action.perform();
            retries += 1;
        }

        if matches!(outcome, Outcome::Failure | Outcome::Disable | Outcome::DisableOnce) {
            let mut state = self.state.lock().unwrap();
            state.enabled = false;
            state.disabled_once = matches!(outcome, Outcome::DisableOnce);
        }

        outcome
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskHandle({:?}, {})", self.id, self.name())
    }
}
