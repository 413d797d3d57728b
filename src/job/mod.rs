//! Jobs: the unit of work handed to the scheduler.
//!
//! A [`Job`] is a cheap, cloneable handle to shared job state. The scheduler
//! owns every state transition; clients only observe them through
//! [`Job::state`], [`Job::result`] and the manager's join operations.
//!
//! A job is single use: once it reaches [`JobState::Done`] or
//! [`JobState::Cancelled`] it can never be scheduled again.

pub mod context;
pub mod queue;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::core::rule::RuleRef;

pub use context::{JobBody, JobContext};
#[cfg(feature = "tokio-runtime")]
pub use context::{AsyncJob, AsyncJobBody};
pub use queue::{JobQueue, QueueCounts, ScanOutcome, Verdict};

/// Unique job identifier.
pub type JobId = u64;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Scheduling priority. Higher variants are dispatched first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Cosmetic background work.
    Decorate,
    /// Builds and other bulk processing.
    Build,
    /// Long running work.
    #[default]
    Long,
    /// Short work the user will notice soon.
    Short,
    /// Work the user is actively waiting on.
    Interactive,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Built but never scheduled.
    Created,
    /// Queued and waiting for a worker.
    Waiting,
    /// Queued but its rule conflicts with a held rule.
    Blocked,
    /// Parked until woken or until its delay elapses.
    Sleeping,
    /// Executing on a worker thread.
    Running,
    /// Finished, successfully or not.
    Done,
    /// Cancelled before or during execution.
    Cancelled,
}

impl JobState {
    /// True for states a job never leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    /// True while the job sits in one of the queue partitions.
    #[must_use]
    pub const fn is_queued(self) -> bool {
        matches!(self, Self::Waiting | Self::Blocked | Self::Sleeping)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use JobState::{Blocked, Cancelled, Created, Done, Running, Sleeping, Waiting};
        matches!(
            (self, next),
            (Created, Waiting | Sleeping | Cancelled)
                | (Waiting, Blocked | Running | Sleeping | Cancelled)
                | (Blocked, Waiting | Sleeping | Cancelled)
                | (Sleeping, Waiting | Cancelled)
                | (Running, Waiting | Done | Cancelled)
        )
    }
}

/// Final outcome of a job.
#[derive(Debug, Clone)]
pub enum JobResult {
    /// The body returned `Ok(())`.
    Completed,
    /// The job was cancelled, before running or cooperatively while running.
    Cancelled,
    /// The body returned an error or panicked.
    Failed(Arc<anyhow::Error>),
}

impl JobResult {
    /// True for [`JobResult::Completed`].
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// True for [`JobResult::Failed`].
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// True for [`JobResult::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The failure cause, if any.
    #[must_use]
    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Snapshot of a job's reported progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Units of work announced by `begin_task`; zero when unknown.
    pub total: u64,
    /// Units reported through `worked`.
    pub done: u64,
}

impl JobProgress {
    /// Completed fraction in `0.0..=1.0`, or `None` if no total was announced.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        (self.total > 0).then(|| (self.done.min(self.total) as f64) / (self.total as f64))
    }
}

/// Mutable job state. Written only while the owning manager's state lock is
/// held, so readers holding that lock see a consistent view.
#[derive(Debug)]
pub(crate) struct JobStatus {
    pub state: JobState,
    pub result: Option<JobResult>,
    pub thread: Option<ThreadId>,
    pub manager: Option<u64>,
}

pub(crate) struct JobCore {
    id: JobId,
    name: String,
    priority: Priority,
    rule: Option<RuleRef>,
    family: Option<String>,
    body: Arc<dyn JobBody>,
    cancel: AtomicBool,
    total: AtomicU64,
    done: AtomicU64,
    status: Mutex<JobStatus>,
}

/// Handle to a unit of work.
///
/// Cloning is cheap and every clone refers to the same job. Equality and
/// hashing use the job identifier.
#[derive(Clone)]
pub struct Job {
    core: Arc<JobCore>,
}

impl Job {
    /// Start building a job with the given name.
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name)
    }

    /// Build a job with default priority and no rule from a closure.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&JobContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        JobBuilder::new(name).build(body)
    }

    /// Unique identifier.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.core.id
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Scheduling priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.core.priority
    }

    /// Scheduling rule, if any.
    #[must_use]
    pub fn rule(&self) -> Option<&RuleRef> {
        self.core.rule.as_ref()
    }

    /// Family name, if any.
    #[must_use]
    pub fn family(&self) -> Option<&str> {
        self.core.family.as_deref()
    }

    /// True if the job belongs to `family`.
    #[must_use]
    pub fn belongs_to(&self, family: &str) -> bool {
        self.core.family.as_deref() == Some(family)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.core.status.lock().state
    }

    /// Final result once the job is terminal.
    #[must_use]
    pub fn result(&self) -> Option<JobResult> {
        self.core.status.lock().result.clone()
    }

    /// True once cancellation has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.core.cancel.load(Ordering::Acquire)
    }

    /// Thread currently running the job.
    #[must_use]
    pub fn thread(&self) -> Option<ThreadId> {
        self.core.status.lock().thread
    }

    /// Latest progress snapshot.
    #[must_use]
    pub fn progress(&self) -> JobProgress {
        JobProgress {
            total: self.core.total.load(Ordering::Relaxed),
            done: self.core.done.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn body(&self) -> Arc<dyn JobBody> {
        Arc::clone(&self.core.body)
    }

    pub(crate) fn request_cancel(&self) -> bool {
        !self.core.cancel.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn status(&self) -> MutexGuard<'_, JobStatus> {
        self.core.status.lock()
    }

    /// Move to `next`, which must be a legal transition.
    pub(crate) fn transition(&self, next: JobState) {
        let mut status = self.core.status.lock();
        debug_assert!(
            status.state.can_transition_to(next),
            "illegal job transition {:?} -> {next:?}",
            status.state
        );
        status.state = next;
    }

    pub(crate) fn begin_task(&self, total: u64) {
        self.core.done.store(0, Ordering::Relaxed);
        self.core.total.store(total, Ordering::Relaxed);
    }

    pub(crate) fn worked(&self, units: u64) {
        self.core.done.fetch_add(units, Ordering::Relaxed);
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}

impl Eq for Job {}

impl Hash for Job {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.id.hash(state);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("priority", &self.core.priority)
            .field("rule", &self.core.rule)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.core.name, self.core.id)
    }
}

/// Builder for [`Job`].
#[derive(Debug)]
pub struct JobBuilder {
    name: String,
    priority: Priority,
    rule: Option<RuleRef>,
    family: Option<String>,
}

impl JobBuilder {
    /// Start a builder with default priority and no rule.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: Priority::default(),
            rule: None,
            family: None,
        }
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the scheduling rule.
    #[must_use]
    pub fn with_rule(mut self, rule: RuleRef) -> Self {
        self.rule = Some(rule);
        self
    }

    /// Set an optional scheduling rule.
    #[must_use]
    pub fn with_optional_rule(mut self, rule: Option<RuleRef>) -> Self {
        self.rule = rule;
        self
    }

    /// Tag the job with a family name.
    #[must_use]
    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    /// Finish with a closure body.
    pub fn build<F>(self, body: F) -> Job
    where
        F: Fn(&JobContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.build_body(Arc::new(body))
    }

    /// Finish with a shared body trait object.
    pub fn build_body(self, body: Arc<dyn JobBody>) -> Job {
        Job {
            core: Arc::new(JobCore {
                id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
                name: self.name,
                priority: self.priority,
                rule: self.rule,
                family: self.family,
                body,
                cancel: AtomicBool::new(false),
                total: AtomicU64::new(0),
                done: AtomicU64::new(0),
                status: Mutex::new(JobStatus {
                    state: JobState::Created,
                    result: None,
                    thread: None,
                    manager: None,
                }),
            }),
        }
    }
}
