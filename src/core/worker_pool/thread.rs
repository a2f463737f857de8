//! Thread-backed executor: one named OS thread per task.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::ThreadPoolConfig;
use crate::core::error::{ExecutorError, ExecutorResult, TaskFailure};
use crate::core::executor::Executor;
use crate::core::task::{panic_message, Task, WorkerId, WorkerStatus};

use super::{
    pause_budget, Completion, ExecutorStats, OsWorker, ReapedWorker, ShutdownReport, Spawn,
    WorkerPool, WorkerSnapshot,
};

pub(crate) struct ThreadSpawner {
    name_prefix: String,
    stack_size: Option<usize>,
}

pub(crate) struct ThreadHandle {
    name: String,
    thread: JoinHandle<()>,
}

impl Spawn for ThreadSpawner {
    type Handle = ThreadHandle;

    fn spawn(&self, id: WorkerId, task: Task, done: Completion) -> ExecutorResult<ThreadHandle> {
        let name = format!("{}-{}", self.name_prefix, id.0);
        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        let thread = builder
            .spawn(move || {
                let status = match panic::catch_unwind(AssertUnwindSafe(task)) {
                    Ok(()) => WorkerStatus::Completed,
                    Err(payload) => WorkerStatus::Failed(TaskFailure::Panicked(panic_message(&*payload))),
                };
                done.complete(status);
            })
            .map_err(|e| ExecutorError::Spawn(format!("thread {name}: {e}")))?;

        Ok(ThreadHandle { name, thread })
    }

    fn describe(&self, handle: &ThreadHandle) -> OsWorker {
        OsWorker::Thread {
            name: handle.name.clone(),
        }
    }

    fn release(&self, handle: ThreadHandle) {
        // The task's panic was caught, so a join error means the completion
        // report itself panicked.
        if handle.thread.join().is_err() {
            warn!(thread = %handle.name, "Worker thread panicked outside its task");
        }
    }
}

/// Executor that runs every task on its own thread.
///
/// By default admission is unbounded: `execute` always spawns immediately and
/// `max_workers` is informational. With
/// [`ThreadPoolConfig::with_enforce_max_workers`] it becomes a hard bound with
/// the same blocking admission as [`ProcessPoolExecutor`](super::ProcessPoolExecutor).
///
/// Shutdown polls worker status a bounded number of times and abandons
/// threads that are still running; threads are never cancelled.
#[derive(Clone)]
pub struct ThreadPoolExecutor {
    pool: Arc<WorkerPool<ThreadSpawner>>,
    config: Arc<ThreadPoolConfig>,
}

impl ThreadPoolExecutor {
    /// Create an executor from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: ThreadPoolConfig) -> ExecutorResult<Self> {
        config.validate().map_err(ExecutorError::InvalidConfig)?;

        let spawner = ThreadSpawner {
            name_prefix: config.thread_name_prefix.clone(),
            stack_size: config.thread_stack_size,
        };

        info!(
            max_workers = config.max_workers,
            bounded = config.enforce_max_workers,
            poll_interval_ms = config.poll_interval_ms,
            "ThreadPoolExecutor initialized"
        );

        Ok(Self {
            pool: Arc::new(WorkerPool::new(
                spawner,
                config.max_workers,
                config.enforce_max_workers,
            )),
            config: Arc::new(config),
        })
    }

    /// Create an unbounded executor with default settings.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::InvalidConfig` if `max_workers` is zero.
    pub fn with_max_workers(max_workers: usize) -> ExecutorResult<Self> {
        Self::new(ThreadPoolConfig::new().with_max_workers(max_workers))
    }

    /// Run `task` on a new thread and return without waiting for it.
    ///
    /// Blocks only when `enforce_max_workers` is set and the pool is full.
    ///
    /// # Errors
    ///
    /// - `ExecutorError::RejectedExecution` if the executor is shut down
    /// - `ExecutorError::Spawn` if the thread could not be created
    pub fn execute<F>(&self, task: F) -> ExecutorResult<WorkerId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.submit(Box::new(task))
    }

    /// Tracked workers in submission order.
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        self.pool.snapshot()
    }

    /// Remove workers that already finished, without waiting.
    pub fn reap_finished(&self) -> Vec<ReapedWorker> {
        self.pool.reap(false)
    }

    /// Configured worker limit.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.pool.max_workers()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }

    /// Get current executor statistics.
    #[must_use]
    pub fn stats(&self) -> ExecutorStats {
        self.pool.stats()
    }

    /// Stop accepting tasks and poll workers until none is running.
    ///
    /// The budget is `timeout` divided into `poll_interval` pauses (rounded
    /// up); no more pauses than that are taken, and none once every worker
    /// has finished. Threads still running afterwards are abandoned and stay
    /// listed in [`workers`](Self::workers).
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let started = Instant::now();
        self.pool.begin_shutdown();

        let interval = self.config.poll_interval();
        let drain = self.pool.drain_polling(pause_budget(timeout, interval), interval);
        self.pool.report(drain, Vec::new(), started)
    }

    /// Async variant of [`execute`](Self::execute); admission waits run on
    /// tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    #[cfg(feature = "tokio-runtime")]
    pub async fn execute_async<F>(&self, task: F) -> ExecutorResult<WorkerId>
    where
        F: FnOnce() + Send + 'static,
    {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.execute(task)).await {
            Ok(result) => result,
            Err(e) => Err(ExecutorError::Spawn(format!("admission task failed: {e}"))),
        }
    }

    /// Async variant of [`shutdown`](Self::shutdown).
    #[cfg(feature = "tokio-runtime")]
    pub async fn shutdown_async(&self, timeout: Duration) -> ShutdownReport {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.shutdown(timeout))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Shutdown task failed");
                ShutdownReport::default()
            })
    }
}

impl Executor for ThreadPoolExecutor {
    fn submit(&self, task: Task) -> ExecutorResult<WorkerId> {
        self.pool.submit(task)
    }

    fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        Self::shutdown(self, timeout)
    }

    fn is_shutdown(&self) -> bool {
        Self::is_shutdown(self)
    }

    fn stats(&self) -> ExecutorStats {
        Self::stats(self)
    }
}
