//! The contract shared by both executor backends.

use std::time::Duration;

use super::error::ExecutorResult;
use super::task::{Task, WorkerId};
use super::worker_pool::{ExecutorStats, ShutdownReport};

/// Bounded-concurrency executor contract.
///
/// Implemented by [`ProcessPoolExecutor`](super::ProcessPoolExecutor) and
/// [`ThreadPoolExecutor`](super::ThreadPoolExecutor). The trait is object
/// safe so callers can hold either backend as `Box<dyn Executor>`.
///
/// # Example
///
/// ```rust,ignore
/// use prometheus_task_executor::builders::build_executor;
/// use prometheus_task_executor::config::ExecutorConfig;
///
/// let executor = build_executor(&ExecutorConfig::from_env()?)?;
/// executor.execute(|| run_work_item())?;
/// let report = executor.shutdown(Duration::from_secs(30));
/// ```
pub trait Executor: Send + Sync {
    /// Submit a boxed task.
    ///
    /// # Errors
    ///
    /// - `ExecutorError::RejectedExecution` once the executor is shut down
    /// - `ExecutorError::Spawn` if the worker could not be started
    fn submit(&self, task: Task) -> ExecutorResult<WorkerId>;

    /// Stop accepting tasks and wait a bounded time for workers to finish.
    fn shutdown(&self, timeout: Duration) -> ShutdownReport;

    /// Whether shutdown has begun.
    fn is_shutdown(&self) -> bool;

    /// Get current executor statistics.
    fn stats(&self) -> ExecutorStats;
}

impl dyn Executor {
    /// Submit a closure without boxing it at the call site.
    ///
    /// # Errors
    ///
    /// Same as [`Executor::submit`].
    pub fn execute<F>(&self, task: F) -> ExecutorResult<WorkerId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(task))
    }
}
