//! Shared pool core behind both executor backends.
//!
//! The pool owns the bookkeeping (tracked workers, completion order, shutdown
//! flag) and the admission algorithm. Backends only know how to start a worker
//! for a task and report its terminal status through a [`Completion`]; the
//! process backend forks a child per task, the thread backend spawns a named
//! OS thread.
//!
//! # Design
//!
//! - **Single lock**: one `parking_lot::Mutex` guards all bookkeeping, paired
//!   with a `Condvar` signalled on every completion and on shutdown
//! - **Blocking admission**: a bounded pool parks the submitting thread on the
//!   condvar until a worker finishes, then reaps it before starting the next
//! - **Completion order**: finished workers are reaped in the order the OS
//!   reported them, not submission order
//! - **Bounded shutdown**: draining never waits past the caller's budget

#[cfg(unix)]
mod process;
mod thread;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::{ExecutorError, ExecutorResult, TaskFailure};
use super::task::{Task, WorkerId, WorkerState, WorkerStatus};

#[cfg(unix)]
pub use process::ProcessPoolExecutor;
pub use thread::ThreadPoolExecutor;

/// OS-level identity of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OsWorker {
    /// A forked child process.
    Process {
        /// Raw process id.
        pid: i32,
    },
    /// A thread of the current process.
    Thread {
        /// Thread name assigned at spawn time.
        name: String,
    },
}

impl fmt::Display for OsWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process { pid } => write!(f, "pid {pid}"),
            Self::Thread { name } => write!(f, "thread {name}"),
        }
    }
}

/// Point-in-time view of a tracked worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    /// Executor-local id.
    pub id: WorkerId,
    /// Process or thread behind the worker.
    pub worker: OsWorker,
    /// Current lifecycle state.
    pub state: WorkerState,
}

/// A worker removed from the pool after reaching a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapedWorker {
    /// Executor-local id.
    pub id: WorkerId,
    /// Process or thread that ran the task.
    pub worker: OsWorker,
    /// How the task ended.
    pub status: WorkerStatus,
    /// Time from start to observed termination.
    pub runtime: Duration,
}

/// Outcome of a `shutdown` call.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Workers reaped while draining, in completion order.
    pub reaped: Vec<ReapedWorker>,
    /// Workers forcibly terminated after the budget ran out.
    pub terminated: Vec<WorkerId>,
    /// Workers still tracked when shutdown returned.
    pub outstanding: Vec<WorkerId>,
    /// Number of waiting pauses taken while draining.
    pub pauses: u32,
    /// Wall-clock time spent in shutdown.
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Number of reaped workers whose task completed successfully.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.reaped.iter().filter(|w| w.status.is_success()).count()
    }

    /// Number of reaped workers whose task failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.reaped.len() - self.completed()
    }

    /// Whether every worker was reaped before shutdown returned.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Statistics about executor utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    /// Configured worker limit.
    pub max_workers: usize,
    /// Whether `max_workers` is enforced at admission.
    pub bounded: bool,
    /// Workers currently tracked (running or awaiting reaping).
    pub active_workers: usize,
    /// Tasks admitted.
    pub submitted: u64,
    /// Submissions rejected after shutdown.
    pub rejected: u64,
    /// Tasks that completed successfully.
    pub completed: u64,
    /// Tasks that terminated abnormally.
    pub failed: u64,
    /// Workers forcibly terminated at shutdown.
    pub terminated: u64,
}

/// Internal counters for executor statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub terminated: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, max_workers: usize, bounded: bool, active_workers: usize) -> ExecutorStats {
        ExecutorStats {
            max_workers,
            bounded,
            active_workers,
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            terminated: self.terminated.load(Ordering::Relaxed),
        }
    }
}

/// Worker substrate: how a task is started, observed and stopped.
pub(crate) trait Spawn: Send + Sync + 'static {
    /// Substrate handle kept while the worker is tracked.
    type Handle: Send + 'static;

    /// Start a worker running `task`. The worker must call `done.complete`
    /// exactly once when the task reaches a terminal state.
    fn spawn(&self, id: WorkerId, task: Task, done: Completion) -> ExecutorResult<Self::Handle>;

    /// OS identity of a handle.
    fn describe(&self, handle: &Self::Handle) -> OsWorker;

    /// Forcibly stop a running worker. Returns `false` when the substrate
    /// cannot do this or the worker is already gone.
    fn terminate(&self, _handle: &Self::Handle) -> bool {
        false
    }

    /// Release substrate resources of a reaped worker.
    fn release(&self, _handle: Self::Handle) {}
}

/// Receives terminal statuses reported by workers.
trait CompletionSink: Send + Sync {
    fn complete(&self, id: WorkerId, status: WorkerStatus);
}

/// One-shot completion report handed to each spawned worker.
pub(crate) struct Completion {
    id: WorkerId,
    sink: Arc<dyn CompletionSink>,
}

impl Completion {
    /// Record the worker's terminal status and wake anyone waiting on the pool.
    pub fn complete(self, status: WorkerStatus) {
        self.sink.complete(self.id, status);
    }
}

struct Outcome {
    status: WorkerStatus,
    at: Instant,
}

struct Tracked<H> {
    id: WorkerId,
    handle: H,
    started: Instant,
    outcome: Option<Outcome>,
}

struct PoolState<H> {
    /// Tracked workers in submission order.
    workers: Vec<Tracked<H>>,
    /// Terminated but not yet reaped, in completion order.
    finished: VecDeque<WorkerId>,
    shutdown: bool,
    next_id: u64,
}

impl<H> PoolState<H> {
    fn has_running(&self) -> bool {
        self.workers.iter().any(|w| w.outcome.is_none())
    }

    /// Remove every finished worker. An empty result means nothing has
    /// terminated since the last probe.
    fn take_finished(&mut self) -> Vec<Tracked<H>> {
        let mut reaped = Vec::with_capacity(self.finished.len());
        while let Some(id) = self.finished.pop_front() {
            if let Some(pos) = self.workers.iter().position(|w| w.id == id) {
                reaped.push(self.workers.remove(pos));
            }
        }
        reaped
    }
}

struct Shared<H> {
    state: Mutex<PoolState<H>>,
    changed: Condvar,
    counters: PoolCounters,
}

impl<H: Send + 'static> CompletionSink for Shared<H> {
    fn complete(&self, id: WorkerId, status: WorkerStatus) {
        if status.is_success() {
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(worker) = state.workers.iter_mut().find(|w| w.id == id) {
            worker.outcome = Some(Outcome {
                status,
                at: Instant::now(),
            });
            state.finished.push_back(id);
        } else {
            warn!(worker_id = %id, "Completion reported for untracked worker");
        }
        drop(guard);

        self.changed.notify_all();
    }
}

/// Result of one drain pass.
pub(crate) struct Drain {
    pub reaped: Vec<ReapedWorker>,
    pub pauses: u32,
}

/// Pool core shared by both executors.
pub(crate) struct WorkerPool<S: Spawn> {
    spawner: S,
    max_workers: usize,
    bounded: bool,
    shared: Arc<Shared<S::Handle>>,
}

impl<S: Spawn> WorkerPool<S> {
    pub fn new(spawner: S, max_workers: usize, bounded: bool) -> Self {
        Self {
            spawner,
            max_workers,
            bounded,
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    workers: Vec::with_capacity(max_workers),
                    finished: VecDeque::new(),
                    shutdown: false,
                    next_id: 0,
                }),
                changed: Condvar::new(),
                counters: PoolCounters::default(),
            }),
        }
    }

    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Admit a task, blocking while a bounded pool is saturated.
    ///
    /// # Errors
    ///
    /// - `ExecutorError::RejectedExecution` if the pool is (or becomes, while
    ///   waiting for capacity) shut down
    /// - `ExecutorError::Spawn` if the worker could not be started
    pub fn submit(&self, task: Task) -> ExecutorResult<WorkerId> {
        let mut reaped = Vec::new();
        let result = self.admit(task, &mut reaped);
        // Handles are released outside the lock; releasing may join threads.
        self.finish_reap(reaped);
        result
    }

    fn admit(&self, task: Task, reaped: &mut Vec<Tracked<S::Handle>>) -> ExecutorResult<WorkerId> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(self.reject());
        }

        if self.bounded {
            while state.workers.len() >= self.max_workers {
                if state.finished.is_empty() {
                    debug!(
                        active = state.workers.len(),
                        max_workers = self.max_workers,
                        "Pool saturated, waiting for a worker to finish"
                    );
                    self.shared.changed.wait(&mut state);
                    if state.shutdown {
                        return Err(self.reject());
                    }
                    continue;
                }
                reaped.extend(state.take_finished());
            }
        }

        let id = WorkerId(state.next_id);
        state.next_id += 1;

        let sink: Arc<dyn CompletionSink> = self.shared.clone();
        let handle = self
            .spawner
            .spawn(id, task, Completion { id, sink })
            .inspect_err(|e| warn!(worker_id = %id, error = %e, "Failed to start worker"))?;

        debug!(
            worker_id = %id,
            worker = %self.spawner.describe(&handle),
            active = state.workers.len() + 1,
            "Worker started"
        );

        state.workers.push(Tracked {
            id,
            handle,
            started: Instant::now(),
            outcome: None,
        });
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn reject(&self) -> ExecutorError {
        self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
        debug!("Task rejected: executor is shut down");
        ExecutorError::RejectedExecution
    }

    /// Reap finished workers.
    ///
    /// With `blocking`, first waits until at least one tracked worker has
    /// terminated (returns at once if nothing is tracked).
    pub fn reap(&self, blocking: bool) -> Vec<ReapedWorker> {
        let finished = {
            let mut state = self.shared.state.lock();
            if blocking {
                while state.finished.is_empty() && !state.workers.is_empty() {
                    self.shared.changed.wait(&mut state);
                }
            }
            state.take_finished()
        };
        self.finish_reap(finished)
    }

    fn finish_reap(&self, finished: Vec<Tracked<S::Handle>>) -> Vec<ReapedWorker> {
        finished
            .into_iter()
            .map(|tracked| {
                let worker = self.spawner.describe(&tracked.handle);
                let (status, runtime) = match tracked.outcome {
                    Some(outcome) => (outcome.status, outcome.at.duration_since(tracked.started)),
                    None => (
                        WorkerStatus::Failed(TaskFailure::Lost("reaped before completion".into())),
                        tracked.started.elapsed(),
                    ),
                };

                match &status {
                    WorkerStatus::Completed => {
                        debug!(worker_id = %tracked.id, worker = %worker, ?runtime, "Worker reaped");
                    }
                    WorkerStatus::Failed(failure) => {
                        warn!(
                            worker_id = %tracked.id,
                            worker = %worker,
                            failure = %failure,
                            "Worker reaped after task failure"
                        );
                    }
                }

                self.spawner.release(tracked.handle);
                ReapedWorker {
                    id: tracked.id,
                    worker,
                    status,
                    runtime,
                }
            })
            .collect()
    }

    /// Stop accepting tasks and wake every blocked submitter.
    ///
    /// Returns `true` for the call that actually flipped the flag.
    pub fn begin_shutdown(&self) -> bool {
        let mut state = self.shared.state.lock();
        let first = !state.shutdown;
        state.shutdown = true;
        let active = state.workers.len();
        drop(state);

        self.shared.changed.notify_all();
        if first {
            info!(active = active, "Shutting down executor");
        }
        first
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Reap workers as they finish until the pool is empty or `deadline`
    /// passes. Without a deadline this waits for every tracked worker.
    pub fn drain_until(&self, deadline: Option<Instant>) -> Drain {
        let mut finished = Vec::new();
        let mut pauses = 0;
        {
            let mut state = self.shared.state.lock();
            loop {
                finished.extend(state.take_finished());
                if state.workers.is_empty() {
                    break;
                }
                match deadline {
                    Some(deadline) if Instant::now() >= deadline => break,
                    Some(deadline) => {
                        pauses += 1;
                        let _ = self.shared.changed.wait_until(&mut state, deadline);
                    }
                    None => {
                        pauses += 1;
                        self.shared.changed.wait(&mut state);
                    }
                }
            }
        }
        Drain {
            reaped: self.finish_reap(finished),
            pauses,
        }
    }

    /// Inspect the pool up to `max_pauses + 1` times, pausing `interval`
    /// between inspections. A pause ends early only when no worker is left
    /// running.
    pub fn drain_polling(&self, max_pauses: u32, interval: Duration) -> Drain {
        let mut finished = Vec::new();
        let mut pauses = 0;
        {
            let mut state = self.shared.state.lock();
            loop {
                finished.extend(state.take_finished());
                if state.workers.is_empty() || pauses >= max_pauses {
                    break;
                }
                pauses += 1;
                let pause_end = deadline_after(interval);
                while state.has_running() {
                    match pause_end {
                        Some(end) => {
                            if self.shared.changed.wait_until(&mut state, end).timed_out() {
                                break;
                            }
                        }
                        None => self.shared.changed.wait(&mut state),
                    }
                }
            }
        }
        Drain {
            reaped: self.finish_reap(finished),
            pauses,
        }
    }

    /// Forcibly stop every worker still running.
    pub fn terminate_running(&self) -> Vec<WorkerId> {
        let state = self.shared.state.lock();
        let mut terminated = Vec::new();
        for worker in state.workers.iter().filter(|w| w.outcome.is_none()) {
            if self.spawner.terminate(&worker.handle) {
                warn!(
                    worker_id = %worker.id,
                    worker = %self.spawner.describe(&worker.handle),
                    "Worker terminated after shutdown timeout"
                );
                self.shared.counters.terminated.fetch_add(1, Ordering::Relaxed);
                terminated.push(worker.id);
            }
        }
        terminated
    }

    pub fn has_running(&self) -> bool {
        self.shared.state.lock().has_running()
    }

    /// Ids of every tracked worker, in submission order.
    pub fn outstanding(&self) -> Vec<WorkerId> {
        self.shared.state.lock().workers.iter().map(|w| w.id).collect()
    }

    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.map_workers(|id, worker, state| WorkerSnapshot { id, worker, state })
    }

    /// Map every tracked worker, in submission order.
    pub fn map_workers<T>(&self, mut f: impl FnMut(WorkerId, OsWorker, WorkerState) -> T) -> Vec<T> {
        let state = self.shared.state.lock();
        state
            .workers
            .iter()
            .map(|w| {
                let worker_state = w
                    .outcome
                    .as_ref()
                    .map_or(WorkerState::Running, |o| WorkerState::from(&o.status));
                f(w.id, self.spawner.describe(&w.handle), worker_state)
            })
            .collect()
    }

    pub fn stats(&self) -> ExecutorStats {
        let active = self.shared.state.lock().workers.len();
        self.shared
            .counters
            .snapshot(self.max_workers, self.bounded, active)
    }

    /// Assemble the shutdown report and log its summary.
    pub fn report(&self, drain: Drain, terminated: Vec<WorkerId>, started: Instant) -> ShutdownReport {
        let report = ShutdownReport {
            reaped: drain.reaped,
            terminated,
            outstanding: self.outstanding(),
            pauses: drain.pauses,
            elapsed: started.elapsed(),
        };

        if report.is_drained() {
            info!(
                reaped = report.reaped.len(),
                failed = report.failed(),
                elapsed = ?report.elapsed,
                "Executor shut down complete"
            );
        } else {
            warn!(
                reaped = report.reaped.len(),
                outstanding = report.outstanding.len(),
                terminated = report.terminated.len(),
                "Executor shut down with workers still outstanding"
            );
        }
        report
    }
}

impl Drain {
    /// Fold a follow-up drain pass into this one.
    pub fn absorb(&mut self, other: Self) {
        self.reaped.extend(other.reaped);
        self.pauses += other.pauses;
    }
}

impl<S: Spawn> Drop for WorkerPool<S> {
    fn drop(&mut self) {
        // Flag shutdown but never wait here; live workers are detached.
        let mut state = self.shared.state.lock();
        if !state.shutdown {
            state.shutdown = true;
            debug!(
                active = state.workers.len(),
                "Executor dropped without explicit shutdown - workers will be detached"
            );
        }
        drop(state);
        self.shared.changed.notify_all();
    }
}

/// `now + timeout`, or `None` when that is past the representable range
/// (treated as "no deadline").
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Number of whole `interval` pauses that fit in `timeout`, rounded up.
pub(crate) fn pause_budget(timeout: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 0;
    }
    let pauses = timeout.as_nanos().div_ceil(interval.as_nanos());
    u32::try_from(pauses).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::{self, JoinHandle};

    /// Minimal thread substrate used to exercise the pool core directly.
    struct TestSpawner;

    impl Spawn for TestSpawner {
        type Handle = JoinHandle<()>;

        fn spawn(&self, _id: WorkerId, task: Task, done: Completion) -> ExecutorResult<Self::Handle> {
            Ok(thread::spawn(move || {
                task();
                done.complete(WorkerStatus::Completed);
            }))
        }

        fn describe(&self, _handle: &Self::Handle) -> OsWorker {
            OsWorker::Thread { name: "test".into() }
        }

        fn release(&self, handle: Self::Handle) {
            let _ = handle.join();
        }
    }

    #[test]
    fn test_pause_budget() {
        assert_eq!(pause_budget(Duration::from_secs(5), Duration::from_secs(1)), 5);
        assert_eq!(pause_budget(Duration::from_millis(1500), Duration::from_secs(1)), 2);
        assert_eq!(pause_budget(Duration::ZERO, Duration::from_secs(1)), 0);
        assert_eq!(pause_budget(Duration::from_secs(1), Duration::ZERO), 0);
    }

    #[test]
    fn test_deadline_after_saturates_to_none() {
        assert!(deadline_after(Duration::from_secs(1)).is_some());
        assert!(deadline_after(Duration::MAX).is_none());
    }

    #[test]
    fn test_drain_without_deadline_waits_for_everything() {
        let pool = WorkerPool::new(TestSpawner, 2, true);
        pool.submit(Box::new(|| thread::sleep(Duration::from_millis(50))))
            .unwrap();
        pool.submit(Box::new(|| {})).unwrap();
        pool.begin_shutdown();

        let drain = pool.drain_until(None);
        assert_eq!(drain.reaped.len(), 2);
        assert!(pool.outstanding().is_empty());
    }

    #[test]
    fn test_polling_drain_with_huge_interval() {
        let pool = WorkerPool::new(TestSpawner, 1, false);
        pool.submit(Box::new(|| thread::sleep(Duration::from_millis(20))))
            .unwrap();
        pool.begin_shutdown();

        let drain = pool.drain_polling(1, Duration::MAX);
        assert_eq!(drain.pauses, 1);
        assert_eq!(drain.reaped.len(), 1);
    }

    #[test]
    fn test_pool_counters_snapshot() {
        let counters = PoolCounters::default();
        counters.submitted.fetch_add(10, Ordering::Relaxed);
        counters.completed.fetch_add(7, Ordering::Relaxed);
        counters.failed.fetch_add(2, Ordering::Relaxed);

        let stats = counters.snapshot(4, true, 1);
        assert_eq!(stats.max_workers, 4);
        assert!(stats.bounded);
        assert_eq!(stats.active_workers, 1);
        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.completed, 7);
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let pool = WorkerPool::new(TestSpawner, 1, true);
        let first = pool.submit(Box::new(|| {})).unwrap();
        let second = pool.submit(Box::new(|| {})).unwrap();
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[test]
    fn test_blocking_reap_on_empty_pool_returns_immediately() {
        let pool = WorkerPool::new(TestSpawner, 2, true);
        assert!(pool.reap(true).is_empty());
    }

    #[test]
    fn test_shutdown_wakes_blocked_submitter() {
        let pool = Arc::new(WorkerPool::new(TestSpawner, 1, true));
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        pool.submit(Box::new(move || {
            let _ = release_rx.recv();
        }))
        .unwrap();

        let blocked = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.submit(Box::new(|| {})))
        };

        thread::sleep(Duration::from_millis(50));
        pool.begin_shutdown();
        let result = blocked.join().unwrap();
        assert!(matches!(result, Err(ExecutorError::RejectedExecution)));

        release_tx.send(()).unwrap();
        let drain = pool.drain_until(deadline_after(Duration::from_secs(5)));
        assert_eq!(drain.reaped.len(), 1);
        assert_eq!(pool.stats().rejected, 1);
    }
}
