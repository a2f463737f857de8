//! Configuration models for executors, backends, and timeouts.

pub mod executor;

pub use executor::{BackendKind, ExecutorConfig, ProcessPoolConfig, ThreadPoolConfig, TimeoutPolicy, ENV_PREFIX};
