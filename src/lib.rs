//! # Prometheus Task Executor
//!
//! Bounded-concurrency task executors with two interchangeable backends.
//!
//! Callers hand the executor zero-argument tasks; the executor starts one
//! worker per task, keeps the number of live workers under a configured
//! limit, reaps workers as they finish, and refuses new work once shut down.
//! It does not interpret task results or retry failed tasks.
//!
//! ## Backends
//!
//! - **[`ProcessPoolExecutor`]**: forks a child process per task. `execute`
//!   blocks while `max_workers` children are alive, reaping at least one
//!   finished child before forking the next.
//! - **[`ThreadPoolExecutor`]**: spawns a named thread per task. Unbounded by
//!   default; `max_workers` can be turned into a hard bound.
//!
//! Both share one pool core (admission, completion tracking, draining) and
//! the object-safe [`Executor`] trait.
//!
//! ## Example
//!
//! ```rust,no_run
//! use prometheus_task_executor::{ExecutorError, ProcessPoolExecutor};
//! use std::time::Duration;
//!
//! let executor = ProcessPoolExecutor::with_max_workers(4)?;
//! for i in 0..16 {
//!     // Blocks while four children are running.
//!     executor.execute(move || println!("work item {i}"))?;
//! }
//!
//! let report = executor.shutdown(Duration::from_secs(30));
//! println!("reaped {} workers, {} failed", report.reaped.len(), report.failed());
//!
//! assert!(matches!(executor.execute(|| {}), Err(ExecutorError::RejectedExecution)));
//! # Ok::<(), ExecutorError>(())
//! ```
//!
//! ## Shutdown
//!
//! `shutdown(timeout)` flips the executor into its terminal state (racing and
//! later submissions fail with [`ExecutorError::RejectedExecution`]) and then
//! waits a bounded time for outstanding workers. The process backend can be
//! configured to kill children that outlive the budget
//! ([`config::TimeoutPolicy::Kill`]); threads are always abandoned.
//!
//! For complete examples, see:
//! - `tests/process_pool_test.rs` - process backend integration tests
//! - `tests/thread_pool_test.rs` - thread backend integration tests

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Executor backends, pool core, and error types.
pub mod core;
/// Configuration models for executors and backends.
pub mod config;
/// Builders to construct executors from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;

#[cfg(unix)]
pub use crate::core::ProcessPoolExecutor;
pub use crate::core::{
    Executor, ExecutorError, ExecutorResult, ExecutorStats, ReapedWorker, ShutdownReport, Task,
    TaskFailure, ThreadPoolExecutor, WorkerId, WorkerSnapshot, WorkerState, WorkerStatus,
};
