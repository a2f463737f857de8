//! Builder that constructs an executor backend from configuration.

use tracing::debug;

use crate::config::{BackendKind, ExecutorConfig};
use crate::core::{Executor, ExecutorError, ExecutorResult, ThreadPoolExecutor};

/// Build the executor selected by `cfg.backend`.
///
/// # Errors
///
/// - `ExecutorError::InvalidConfig` if the configuration is invalid, or the
///   process backend is requested on a platform without `fork`
pub fn build_executor(cfg: &ExecutorConfig) -> ExecutorResult<Box<dyn Executor>> {
    cfg.validate().map_err(ExecutorError::InvalidConfig)?;
    debug!(backend = ?cfg.backend, "Building executor");

    match cfg.backend {
        BackendKind::Thread => Ok(Box::new(ThreadPoolExecutor::new(cfg.thread.clone())?)),
        BackendKind::Process => build_process(cfg),
    }
}

#[cfg(unix)]
fn build_process(cfg: &ExecutorConfig) -> ExecutorResult<Box<dyn Executor>> {
    Ok(Box::new(crate::core::ProcessPoolExecutor::new(cfg.process.clone())?))
}

#[cfg(not(unix))]
fn build_process(_cfg: &ExecutorConfig) -> ExecutorResult<Box<dyn Executor>> {
    Err(ExecutorError::InvalidConfig(
        "process backend requires a unix platform".into(),
    ))
}
