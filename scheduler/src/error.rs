//! Error taxonomy for the scheduler's public surface.
use thiserror::Error;

use crate::task::TaskId;

/// Errors an external caller can legitimately trigger.
///
/// Internal-bug conditions (§4.4 step 1 of the design: re-entrant `execute()`
/// on a task that is already executing) remain `panic!`s, matching the
/// teacher's convention of treating invariant violations as programmer error
/// rather than as a typed `Result`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("action given to create() was null/invalid")]
    InvalidAction,

    #[error("cyclic dependency detected involving task {task_id:?}")]
    CyclicDependencies { task_id: TaskId },

    #[error("execution pass was cancelled")]
    Cancelled,

    #[error("task {task_id:?} failed: {source}")]
    TaskFailed {
        task_id: TaskId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
