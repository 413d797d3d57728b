//! # Prometheus Jobs
//!
//! A cooperative job scheduler for long-running background work inside a
//! host application.
//!
//! Jobs are prioritized units of work executed by an elastic pool of worker
//! threads. A job may carry a [`SchedulingRule`]; two jobs whose rules
//! conflict never run at the same time, and rule-less jobs never conflict.
//! Threads may also take rules explicitly with
//! [`JobManager::begin_rule`]/[`JobManager::end_rule`], and take
//! [`OrderedLock`]s. Every blocking acquisition goes through a
//! deadlock-detecting [`LockManager`] that fails exactly one participant of a
//! wait cycle with [`JobError::Deadlock`].
//!
//! ## Key Features
//!
//! - **Priority dispatch**: `Interactive > Short > Long > Build > Decorate`,
//!   FIFO within a class
//! - **Conflict rules**: hierarchical [`PathRule`]s, [`IdentityRule`]s and
//!   composite [`MultiRule`]s
//! - **Cooperative cancellation**: jobs poll [`JobContext::check_cancelled`]
//! - **Yielding**: a long job can hand its rule to a waiting conflicting job
//!   and resume afterwards
//! - **Sleeping and delayed jobs**, job families, suspend/resume
//! - **Listeners** receive every lifecycle transition in order
//! - **Elastic pool**: workers spawn on demand and retire when idle
//!
//! ## Example
//!
//! ```no_run
//! use prometheus_jobs::{JobBuilder, JobManager, JobManagerConfig, PathRule, Priority};
//!
//! let manager = JobManager::new(JobManagerConfig::default().with_max_workers(2))?;
//!
//! let build = JobBuilder::new("build")
//!     .with_priority(Priority::Build)
//!     .with_rule(PathRule::shared("/workspace/app"))
//!     .with_family("builds")
//!     .build(|ctx| {
//!         ctx.begin_task(10);
//!         for _ in 0..10 {
//!             ctx.check_cancelled()?;
//!             ctx.worked(1);
//!         }
//!         Ok(())
//!     });
//! manager.schedule(&build)?;
//!
//! let result = manager.join(&build)?;
//! assert!(result.is_ok());
//! manager.shutdown();
//! # Ok::<(), prometheus_jobs::JobError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Rules, errors, listeners and failure reporting.
pub mod core;
/// Configuration models for the manager and its worker pool.
pub mod config;
/// Builders assembling a manager from configuration and hooks.
pub mod builders;
/// Jobs, job bodies and the job queue.
pub mod job;
/// Deadlock-detecting lock manager and ordered locks.
pub mod lock;
/// The job manager.
pub mod manager;
/// Worker threads.
pub mod pool;
/// Shared utilities.
pub mod util;

pub use builders::JobManagerBuilder;
pub use config::JobManagerConfig;
pub use crate::core::{
    AppResult, FailureReporter, IdentityRule, InMemoryEventLog, JobChangeListener, JobError,
    JobEvent, JobEventKind, MultiRule, PathRule, ProgrammingError, RuleRef, SchedulingRule,
    TracingReporter,
};
#[cfg(feature = "tokio-runtime")]
pub use job::{AsyncJob, AsyncJobBody};
pub use job::{
    Job, JobBody, JobBuilder, JobContext, JobId, JobProgress, JobResult, JobState, Priority,
};
pub use lock::{LightestHolder, LockManager, OrderedLock, OrderedLockGuard, RequesterVictim, VictimPolicy};
pub use manager::{JobManager, ManagerStats};
pub use pool::WorkerAbort;
