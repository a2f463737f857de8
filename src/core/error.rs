//! Error types for executor operations.

use thiserror::Error;

/// Errors produced by executor operations.
///
/// Task-body failures are never reported through this type; they only show up
/// as a worker's terminal [`TaskFailure`] during reaping.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor has been shut down and no longer accepts tasks.
    #[error("rejected execution: executor has been shut down")]
    RejectedExecution,
    /// The worker process or thread could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ExecutorError {
    /// Whether this is the rejection returned after shutdown.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::RejectedExecution)
    }
}

/// Abnormal termination of a task body, observed while reaping its worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure {
    /// The worker process exited with a non-zero status.
    #[error("exited with status {0}")]
    ExitCode(i32),
    /// The worker process was terminated by a signal.
    #[error("terminated by signal {0}")]
    Signaled(i32),
    /// The task panicked on its worker thread.
    #[error("panicked: {0}")]
    Panicked(String),
    /// The terminal status could not be collected.
    #[error("exit status lost: {0}")]
    Lost(String),
}

/// Result alias for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;
