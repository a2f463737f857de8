//! Process-backed executor: one forked child per task.
//!
//! Every child gets a dedicated reaper thread that blocks on that single pid,
//! so an executor never collects children it did not fork. On Linux the
//! reaper first observes the exit without reaping (`waitid` + `WNOWAIT`) and
//! only collects the zombie after the pool has recorded the status; until
//! then the pid cannot be recycled, which keeps forced termination from
//! hitting an unrelated process.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{info, warn};

use crate::config::{ProcessPoolConfig, TimeoutPolicy};
use crate::core::error::{ExecutorError, ExecutorResult, TaskFailure};
use crate::core::executor::Executor;
use crate::core::task::{Task, WorkerId, WorkerStatus};

use super::{
    deadline_after, Completion, ExecutorStats, OsWorker, ReapedWorker, ShutdownReport, Spawn, WorkerPool,
    WorkerSnapshot,
};

/// Exit status of a child whose task panicked (matches the Rust runtime's).
const PANIC_EXIT_CODE: i32 = 101;

pub(crate) struct ProcessSpawner;

pub(crate) struct ProcessHandle {
    pid: Pid,
    reaper: Option<JoinHandle<()>>,
}

impl Spawn for ProcessSpawner {
    type Handle = ProcessHandle;

    fn spawn(&self, id: WorkerId, task: Task, done: Completion) -> ExecutorResult<ProcessHandle> {
        let pid = fork_task(task)?;

        let reaper = thread::Builder::new()
            .name(format!("pl-reaper-{pid}"))
            .spawn(move || {
                let status = observe_exit(pid);
                done.complete(status);
                collect_zombie(pid);
            });

        match reaper {
            Ok(reaper) => Ok(ProcessHandle {
                pid,
                reaper: Some(reaper),
            }),
            Err(e) => {
                // Nobody would ever wait for this child.
                let _ = kill(pid, Signal::SIGKILL);
                let _ = waitpid(pid, None);
                Err(ExecutorError::Spawn(format!(
                    "reaper thread for {id} (pid {pid}): {e}"
                )))
            }
        }
    }

    fn describe(&self, handle: &ProcessHandle) -> OsWorker {
        OsWorker::Process {
            pid: handle.pid.as_raw(),
        }
    }

    fn terminate(&self, handle: &ProcessHandle) -> bool {
        match kill(handle.pid, Signal::SIGKILL) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(errno) => {
                warn!(pid = handle.pid.as_raw(), error = %errno, "Failed to kill worker process");
                false
            }
        }
    }

    fn release(&self, mut handle: ProcessHandle) {
        if let Some(reaper) = handle.reaper.take() {
            if reaper.join().is_err() {
                warn!(pid = handle.pid.as_raw(), "Reaper thread panicked");
            }
        }
    }
}

/// Fork a child that runs `task` and exits.
#[allow(unsafe_code)]
fn fork_task(task: Task) -> ExecutorResult<Pid> {
    // SAFETY: the child only runs the task and leaves through `_exit`, so it
    // never returns into the parent's frames or runs the parent's
    // destructors. Only the parent's forking thread survives in the child;
    // any lock another parent thread held at fork time stays locked. The
    // task body and the panic hook (which locks stderr and allocates) are
    // the paths that can still touch such locks.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => Ok(child),
        Ok(ForkResult::Child) => {
            let code = match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(()) => 0,
                Err(_) => PANIC_EXIT_CODE,
            };
            // SAFETY: terminates the child without running atexit handlers
            // or flushing stdio buffers inherited from the parent.
            unsafe { nix::libc::_exit(code) }
        }
        Err(errno) => Err(ExecutorError::Spawn(format!("fork failed: {errno}"))),
    }
}

/// Block until `pid` terminates and translate its wait status.
fn observe_exit(pid: Pid) -> WorkerStatus {
    loop {
        match wait_for_exit(pid) {
            Ok(WaitStatus::Exited(_, 0)) => return WorkerStatus::Completed,
            Ok(WaitStatus::Exited(_, code)) => {
                return WorkerStatus::Failed(TaskFailure::ExitCode(code));
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return WorkerStatus::Failed(TaskFailure::Signaled(signal as i32));
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(errno) => return WorkerStatus::Failed(TaskFailure::Lost(errno.to_string())),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn wait_for_exit(pid: Pid) -> nix::Result<WaitStatus> {
    use nix::sys::wait::{waitid, Id, WaitPidFlag};

    waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn wait_for_exit(pid: Pid) -> nix::Result<WaitStatus> {
    waitpid(pid, None)
}

/// Collect the zombie left behind by a `WNOWAIT` observation.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn collect_zombie(pid: Pid) {
    while let Err(Errno::EINTR) = waitpid(pid, None) {}
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const fn collect_zombie(_pid: Pid) {}

/// Executor that runs every task in its own forked child process.
///
/// At most `max_workers` children are alive at once; `execute` blocks the
/// caller while the pool is saturated. Clones share the same pool.
///
/// # Example
///
/// ```rust,no_run
/// use prometheus_task_executor::ProcessPoolExecutor;
/// use std::time::Duration;
///
/// let executor = ProcessPoolExecutor::with_max_workers(2)?;
/// executor.execute(|| std::fs::write("/tmp/marker", b"done").unwrap())?;
/// let report = executor.shutdown(Duration::from_secs(5));
/// assert!(report.is_drained());
/// # Ok::<(), prometheus_task_executor::ExecutorError>(())
/// ```
#[derive(Clone)]
pub struct ProcessPoolExecutor {
    pool: Arc<WorkerPool<ProcessSpawner>>,
    config: Arc<ProcessPoolConfig>,
}

impl ProcessPoolExecutor {
    /// Create an executor from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: ProcessPoolConfig) -> ExecutorResult<Self> {
        config.validate().map_err(ExecutorError::InvalidConfig)?;

        info!(
            max_workers = config.max_workers,
            on_timeout = ?config.on_timeout,
            "ProcessPoolExecutor initialized"
        );

        Ok(Self {
            pool: Arc::new(WorkerPool::new(ProcessSpawner, config.max_workers, true)),
            config: Arc::new(config),
        })
    }

    /// Create an executor with default settings and the given worker limit.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::InvalidConfig` if `max_workers` is zero.
    pub fn with_max_workers(max_workers: usize) -> ExecutorResult<Self> {
        Self::new(ProcessPoolConfig::new().with_max_workers(max_workers))
    }

    /// Run `task` in a new child process.
    ///
    /// Blocks while `max_workers` children are alive, reaping at least one
    /// finished child before forking.
    ///
    /// # Errors
    ///
    /// - `ExecutorError::RejectedExecution` if the executor is shut down
    /// - `ExecutorError::Spawn` if `fork` or the reaper thread fails
    pub fn execute<F>(&self, task: F) -> ExecutorResult<WorkerId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.submit(Box::new(task))
    }

    /// Remove finished children from the active set.
    ///
    /// Without `blocking` this is a single probe that only takes what has
    /// already terminated. With `blocking` it first waits for at least one
    /// child to terminate, then drains everything finished by then.
    pub fn remove_completed_pids(&self, blocking: bool) -> Vec<ReapedWorker> {
        self.pool.reap(blocking)
    }

    /// Pids of the tracked children, in submission order.
    #[must_use]
    pub fn active_pids(&self) -> Vec<i32> {
        self.pool
            .map_workers(|_, worker, _| match worker {
                OsWorker::Process { pid } => Some(pid),
                OsWorker::Thread { .. } => None,
            })
            .into_iter()
            .flatten()
            .collect()
    }

    /// Snapshots of the tracked children, in submission order.
    #[must_use]
    pub fn active_workers(&self) -> Vec<WorkerSnapshot> {
        self.pool.snapshot()
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

    /// Stop accepting tasks and wait up to `timeout` for children to finish.
    ///
    /// Children still alive afterwards are left running, or killed with
    /// `SIGKILL` under [`TimeoutPolicy::Kill`] (then given the configured
    /// grace period to be reaped). A timeout too large to form a deadline
    /// (such as `Duration::MAX`) waits for every child.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let started = Instant::now();
        self.pool.begin_shutdown();

        let mut drain = self.pool.drain_until(started.checked_add(timeout));
        let mut terminated = Vec::new();
        if self.config.on_timeout == TimeoutPolicy::Kill && self.pool.has_running() {
            terminated = self.pool.terminate_running();
            drain.absorb(self.pool.drain_until(deadline_after(self.config.kill_grace())));
        }

        self.pool.report(drain, terminated, started)
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

impl Executor for ProcessPoolExecutor {
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
