//! Task and worker vocabulary shared by both executor backends.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::TaskFailure;

/// A unit of work submitted for asynchronous execution.
///
/// Ownership moves to the worker that runs it; the executor never calls it on
/// the submitting thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executor-local worker identifier.
///
/// Ids increase monotonically per executor and are never reused, even after
/// the worker has been reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Terminal outcome of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    /// The task returned normally (thread) or the child exited with status 0.
    Completed,
    /// The task terminated abnormally.
    Failed(TaskFailure),
}

impl WorkerStatus {
    /// Whether the task finished without failure.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Lifecycle state of a tracked worker: running → {completed, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// The task body is still executing.
    Running,
    /// The task finished successfully; the worker awaits reaping.
    Completed,
    /// The task failed; the worker awaits reaping.
    Failed,
}

impl From<&WorkerStatus> for WorkerState {
    fn from(status: &WorkerStatus) -> Self {
        match status {
            WorkerStatus::Completed => Self::Completed,
            WorkerStatus::Failed(_) => Self::Failed,
        }
    }
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
