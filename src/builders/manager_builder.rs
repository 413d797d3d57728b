//! Builder for [`JobManager`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::JobManagerConfig;
use crate::core::error::{JobError, Result};
use crate::core::listener::JobChangeListener;
use crate::core::report::{FailureReporter, TracingReporter};
use crate::lock::{LockManager, VictimPolicy};
use crate::manager::JobManager;

/// Assembles a [`JobManager`] from a configuration, a failure reporter,
/// listeners and a lock manager.
///
/// ```no_run
/// use std::time::Duration;
/// use prometheus_jobs::JobManagerBuilder;
///
/// let manager = JobManagerBuilder::new()
///     .with_max_workers(4)
///     .with_idle_timeout(Duration::from_secs(30))
///     .build()?;
/// # Ok::<(), prometheus_jobs::JobError>(())
/// ```
#[derive(Default)]
pub struct JobManagerBuilder {
    config: JobManagerConfig,
    reporter: Option<Arc<dyn FailureReporter>>,
    listeners: Vec<Arc<dyn JobChangeListener>>,
    policy: Option<Box<dyn VictimPolicy>>,
    locks: Option<Arc<LockManager>>,
}

impl JobManagerBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn with_config(mut self, config: JobManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Workers kept alive while idle.
    #[must_use]
    pub fn with_min_workers(mut self, count: usize) -> Self {
        self.config = self.config.with_min_workers(count);
        self
    }

    /// Cap on concurrently active workers.
    #[must_use]
    pub fn with_max_workers(mut self, count: usize) -> Self {
        self.config = self.config.with_max_workers(count);
        self
    }

    /// How long an idle worker above the minimum lingers.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_idle_timeout(timeout);
        self
    }

    /// Where job failures go. Defaults to [`TracingReporter`].
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Register a listener before any job is scheduled.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn JobChangeListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Victim policy for a lock manager created by this builder.
    #[must_use]
    pub fn with_victim_policy(mut self, policy: impl VictimPolicy + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    /// Share an existing lock manager instead of creating one.
    #[must_use]
    pub fn with_lock_manager(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Validate the configuration and create the manager.
    ///
    /// # Errors
    /// [`JobError::InvalidConfig`] for an invalid configuration, or when a
    /// victim policy is combined with a shared lock manager.
    pub fn build(self) -> Result<JobManager> {
        let locks = match (self.locks, self.policy) {
            (Some(_), Some(_)) => {
                return Err(JobError::InvalidConfig(
                    "a victim policy cannot be applied to a shared lock manager".to_string(),
                ))
            }
            (Some(locks), None) => locks,
            (None, Some(policy)) => Arc::new(LockManager::with_boxed_policy(policy)),
            (None, None) => Arc::new(LockManager::new()),
        };
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(TracingReporter));
        JobManager::from_parts(self.config, locks, reporter, self.listeners)
    }
}

impl std::fmt::Debug for JobManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManagerBuilder")
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .field("policy", &self.policy)
            .field("shared_locks", &self.locks.is_some())
            .finish_non_exhaustive()
    }
}
