//! Job manager configuration.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    (num_cpus::get() * 2).max(4)
}

const fn default_idle_timeout_ms() -> u64 {
    60_000
}

const fn default_thread_stack_size() -> usize {
    2 * 1024 * 1024
}

fn default_thread_name_prefix() -> String {
    "jobs-worker".to_string()
}

const fn default_shutdown_timeout_ms() -> u64 {
    2_000
}

/// Worker pool sizing and lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManagerConfig {
    /// Workers kept alive once started, even when idle.
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    /// Upper bound on workers running jobs at the same time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// How long a surplus worker stays idle before exiting.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Stack size of worker threads in bytes.
    #[serde(default = "default_thread_stack_size")]
    pub thread_stack_size: usize,
    /// Worker thread name prefix; the worker id is appended.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// Per-worker join timeout during shutdown.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            idle_timeout_ms: default_idle_timeout_ms(),
            thread_stack_size: default_thread_stack_size(),
            thread_name_prefix: default_thread_name_prefix(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl JobManagerConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resident worker count.
    #[must_use]
    pub const fn with_min_workers(mut self, count: usize) -> Self {
        self.min_workers = count;
        self
    }

    /// Set the worker cap.
    #[must_use]
    pub const fn with_max_workers(mut self, count: usize) -> Self {
        self.max_workers = count;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the worker stack size in bytes.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the per-worker join timeout used by shutdown.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Shutdown join timeout as a `Duration`.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".into());
        }
        if self.min_workers > self.max_workers {
            return Err(format!(
                "min_workers ({}) must not exceed max_workers ({})",
                self.min_workers, self.max_workers
            ));
        }
        if self.idle_timeout_ms == 0 {
            return Err("idle_timeout_ms must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.thread_name_prefix.is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the environment, reading a `.env` file first
    /// if present. Unset variables keep their defaults.
    ///
    /// Recognised variables: `JOBS_MIN_WORKERS`, `JOBS_MAX_WORKERS`,
    /// `JOBS_IDLE_TIMEOUT_MS`, `JOBS_THREAD_STACK_SIZE`.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        let mut cfg = Self::default();
        if let Some(v) = env_parse("JOBS_MIN_WORKERS")? {
            cfg.min_workers = v;
        }
        if let Some(v) = env_parse("JOBS_MAX_WORKERS")? {
            cfg.max_workers = v;
        }
        if let Some(v) = env_parse("JOBS_IDLE_TIMEOUT_MS")? {
            cfg.idle_timeout_ms = v;
        }
        if let Some(v) = env_parse("JOBS_THREAD_STACK_SIZE")? {
            cfg.thread_stack_size = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, String> {
    match env::var(key).ok().filter(|s| !s.trim().is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{key}: cannot parse `{raw}`")),
    }
}
