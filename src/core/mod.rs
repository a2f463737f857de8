//! Executor backends, the shared pool core, and their error types.

pub mod error;
pub mod executor;
pub mod task;
pub mod worker_pool;

pub use error::{ExecutorError, ExecutorResult, TaskFailure};
pub use executor::Executor;
pub use task::{Task, WorkerId, WorkerState, WorkerStatus};
#[cfg(unix)]
pub use worker_pool::ProcessPoolExecutor;
pub use worker_pool::{
    ExecutorStats, OsWorker, ReapedWorker, ShutdownReport, ThreadPoolExecutor, WorkerSnapshot,
};
