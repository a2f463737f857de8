//! Executor configuration structures.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix of every environment variable read by [`ExecutorConfig::from_env`].
pub const ENV_PREFIX: &str = "PROMETHEUS_EXECUTOR_";

/// Which worker substrate an executor uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// One forked child process per task.
    #[default]
    Process,
    /// One thread per task.
    Thread,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(Self::Process),
            "thread" => Ok(Self::Thread),
            other => Err(format!("unknown backend `{other}` (expected `process` or `thread`)")),
        }
    }
}

/// What shutdown does with workers still alive when its budget runs out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Stop waiting and leave the workers running.
    #[default]
    Abandon,
    /// Kill the workers, then wait a grace period for them to be reaped.
    Kill,
}

impl FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abandon" => Ok(Self::Abandon),
            "kill" => Ok(Self::Kill),
            other => Err(format!("unknown timeout policy `{other}` (expected `abandon` or `kill`)")),
        }
    }
}

fn default_max_workers() -> usize {
    num_cpus::get().max(1)
}

/// Process backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessPoolConfig {
    /// Maximum number of live child processes.
    pub max_workers: usize,
    /// Shutdown behavior once the timeout is exhausted.
    pub on_timeout: TimeoutPolicy,
    /// How long to wait for killed children to be reaped, in milliseconds.
    pub kill_grace_ms: u64,
}

impl Default for ProcessPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            on_timeout: TimeoutPolicy::Abandon,
            kill_grace_ms: 1_000,
        }
    }
}

impl ProcessPoolConfig {
    /// Configuration with defaults (one worker per logical CPU).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker limit.
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the shutdown timeout policy.
    #[must_use]
    pub const fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.on_timeout = policy;
        self
    }

    /// Set the grace period granted to killed children.
    #[must_use]
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Grace period granted to killed children.
    #[must_use]
    pub const fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if `max_workers` is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".into());
        }
        Ok(())
    }
}

/// Thread backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    /// Worker limit; only enforced when `enforce_max_workers` is set.
    pub max_workers: usize,
    /// Block submissions while `max_workers` threads are tracked.
    pub enforce_max_workers: bool,
    /// Length of one shutdown polling pause, in milliseconds.
    pub poll_interval_ms: u64,
    /// Worker threads are named `{prefix}-{worker id}`.
    pub thread_name_prefix: String,
    /// Stack size for worker threads; platform default when unset.
    pub thread_stack_size: Option<usize>,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            enforce_max_workers: false,
            poll_interval_ms: 1_000,
            thread_name_prefix: "pl-worker".into(),
            thread_stack_size: None,
        }
    }
}

impl ThreadPoolConfig {
    /// Configuration with defaults (unbounded, one-second polling pauses).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker limit.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Enforce `max_workers` as a hard admission bound.
    #[must_use]
    pub fn with_enforce_max_workers(mut self, enforce: bool) -> Self {
        self.enforce_max_workers = enforce;
        self
    }

    /// Set the shutdown polling pause.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the worker thread stack size in bytes.
    #[must_use]
    pub fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = Some(size);
        self
    }

    /// Shutdown polling pause.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field: zero `max_workers`,
    /// zero `poll_interval_ms`, an empty `thread_name_prefix`, or a zero
    /// `thread_stack_size`.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.thread_name_prefix.is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        if self.thread_stack_size == Some(0) {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root executor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Backend built by [`build_executor`](crate::builders::build_executor).
    pub backend: BackendKind,
    /// Process backend settings.
    pub process: ProcessPoolConfig,
    /// Thread backend settings.
    pub thread: ThreadPoolConfig,
}

impl ExecutorConfig {
    /// Validate the section of the selected backend. The other section is
    /// never used to build an executor and is not checked.
    ///
    /// # Errors
    ///
    /// Returns the selected section's validation error, prefixed with its name.
    pub fn validate(&self) -> Result<(), String> {
        match self.backend {
            BackendKind::Process => self
                .process
                .validate()
                .map_err(|e| format!("process config invalid: {e}")),
            BackendKind::Thread => self
                .thread
                .validate()
                .map_err(|e| format!("thread config invalid: {e}")),
        }
    }

    /// Parse executor configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid JSON for this structure or
    /// the selected backend's section fails [`validate`](Self::validate).
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the environment, reading `.env` first if present.
    ///
    /// Recognized variables (all prefixed with [`ENV_PREFIX`]): `BACKEND`,
    /// `MAX_WORKERS` (applies to both backends), `ON_TIMEOUT`,
    /// `KILL_GRACE_MS`, `ENFORCE_MAX_WORKERS`, `POLL_INTERVAL_MS`,
    /// `THREAD_NAME_PREFIX`. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Same as [`from_vars`](Self::from_vars).
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    /// Build configuration from `(name, value)` pairs; see [`from_env`](Self::from_env).
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable if a value cannot be parsed, or
    /// the validation error of the resulting configuration.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut cfg = Self::default();
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match name {
                "BACKEND" => cfg.backend = value.parse()?,
                "MAX_WORKERS" => {
                    let max_workers = parse_number(name, value)?;
                    cfg.process.max_workers = max_workers;
                    cfg.thread.max_workers = max_workers;
                }
                "ON_TIMEOUT" => cfg.process.on_timeout = value.parse()?,
                "KILL_GRACE_MS" => cfg.process.kill_grace_ms = parse_number(name, value)?,
                "ENFORCE_MAX_WORKERS" => {
                    cfg.thread.enforce_max_workers = value
                        .trim()
                        .parse()
                        .map_err(|_| format!("{ENV_PREFIX}{name}: expected `true` or `false`, got `{value}`"))?;
                }
                "POLL_INTERVAL_MS" => cfg.thread.poll_interval_ms = parse_number(name, value)?,
                "THREAD_NAME_PREFIX" => cfg.thread.thread_name_prefix = value.to_string(),
                _ => {}
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("{ENV_PREFIX}{name}: expected a non-negative integer, got `{value}`"))
}
