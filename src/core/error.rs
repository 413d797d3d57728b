//! Error types for job scheduling and lock operations.

use thiserror::Error;

use crate::job::{JobId, JobState};

/// Misuse of the scheduling API, signaled synchronously to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgrammingError {
    /// `end_rule` was called with a rule other than the innermost begun rule.
    #[error("end_rule({ended}) does not match the innermost begun rule {expected}")]
    RuleMismatch {
        /// Rule passed to `end_rule`.
        ended: String,
        /// Innermost rule actually begun on this thread.
        expected: String,
    },
    /// `end_rule` was called on a thread with no begun rule.
    #[error("end_rule({0}) called without a matching begin_rule")]
    RuleNotBegun(String),
    /// `end_rule` tried to end the rule owned by the running job itself.
    #[error("end_rule({rule}) would end the scheduling rule of running job {job}")]
    JobRuleEnded {
        /// The job rule.
        rule: String,
        /// The running job.
        job: JobId,
    },
    /// A lock was released by a thread that does not hold it.
    #[error("lock {0} released by a thread that does not hold it")]
    LockNotHeld(String),
    /// A job was scheduled while active or after reaching a terminal state.
    #[error("job {id} cannot be scheduled in state {state:?}")]
    NotSchedulable {
        /// The job.
        id: JobId,
        /// Its state at the time of the call.
        state: JobState,
    },
    /// A job was joined or queried before ever being scheduled.
    #[error("job {0} has not been scheduled")]
    NotScheduled(JobId),
    /// A job tried to join itself.
    #[error("job {0} cannot join itself")]
    JoinSelf(JobId),
    /// A job was handed to a manager other than the one it was scheduled on.
    #[error("job {0} belongs to a different job manager")]
    ForeignJob(JobId),
    /// A job yielded while still holding nested begun rules.
    #[error("job {job} yielded while holding nested rule {rule}")]
    YieldWithNestedRule {
        /// The yielding job.
        job: JobId,
        /// Innermost nested rule still begun.
        rule: String,
    },
    /// A job finished while still holding rules or locks it acquired.
    #[error("job {job} finished while still holding {resource}")]
    LeakedResource {
        /// The finished job.
        job: JobId,
        /// Description of the leaked rule or lock.
        resource: String,
    },
}

/// Errors produced by the job manager, worker pool and lock manager.
#[derive(Debug, Error)]
pub enum JobError {
    /// The API was misused.
    #[error("programming error: {0}")]
    Programming(#[from] ProgrammingError),
    /// The calling thread was chosen as the victim of a lock cycle.
    #[error("deadlock detected while acquiring {resource}")]
    Deadlock {
        /// Resource the victim was waiting for.
        resource: String,
    },
    /// The operation observed a cancellation request.
    #[error("operation cancelled")]
    Cancelled,
    /// A bounded wait elapsed.
    #[error("operation timed out")]
    Timeout,
    /// The job manager has been shut down.
    #[error("job manager has been shut down")]
    ShutDown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl JobError {
    /// True when `err` carries a [`JobError::Cancelled`], the cooperative
    /// cancellation signal a job body returns from `check_cancelled()?`.
    #[must_use]
    pub fn is_cancellation(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<Self>(), Some(Self::Cancelled))
    }
}

/// Result alias for job manager operations.
pub type Result<T> = std::result::Result<T, JobError>;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = std::result::Result<T, anyhow::Error>;
