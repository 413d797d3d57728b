//! Job bodies and the context they run with.

use std::cell::RefCell;
use std::sync::Arc;

use crate::core::error::{JobError, Result};
use crate::core::rule::RuleRef;
use crate::manager::Inner;

use super::Job;

/// The work a job performs.
///
/// Closures `Fn(&JobContext) -> anyhow::Result<()>` implement this trait.
/// Returning `Err` marks the job failed and reports it; returning
/// [`JobError::Cancelled`] (usually via [`JobContext::check_cancelled`]) marks
/// it cancelled without reporting.
pub trait JobBody: Send + Sync {
    /// Execute the job on the calling worker thread.
    fn run(&self, ctx: &JobContext) -> anyhow::Result<()>;
}

impl<F> JobBody for F
where
    F: Fn(&JobContext) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, ctx: &JobContext) -> anyhow::Result<()> {
        self(ctx)
    }
}

/// Handle given to a running job body.
#[derive(Clone)]
pub struct JobContext {
    job: Job,
    manager: Arc<Inner>,
}

impl JobContext {
    pub(crate) const fn new(job: Job, manager: Arc<Inner>) -> Self {
        Self { job, manager }
    }

    /// The running job.
    #[must_use]
    pub const fn job(&self) -> &Job {
        &self.job
    }

    /// True once cancellation of this job was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.job.is_cancel_requested()
    }

    /// `Err(JobError::Cancelled)` once cancellation was requested, for use
    /// with `?` at cooperative cancellation points.
    ///
    /// # Errors
    /// [`JobError::Cancelled`] when the job has been cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Temporarily give up this job's rule to the first waiting job that
    /// conflicts with it. Blocks until this job is selected again and returns
    /// `true` if it actually yielded.
    ///
    /// # Errors
    /// [`ProgrammingError::YieldWithNestedRule`](crate::ProgrammingError::YieldWithNestedRule)
    /// if rules begun by the body are still active.
    pub fn yield_rule(&self) -> Result<bool> {
        self.manager.yield_rule(&self.job)
    }

    /// Begin a nested rule on this job's thread.
    ///
    /// # Errors
    /// See [`JobManager::begin_rule`](crate::JobManager::begin_rule).
    pub fn begin_rule(&self, rule: &RuleRef) -> Result<()> {
        self.manager.begin_rule(rule)
    }

    /// End the innermost nested rule.
    ///
    /// # Errors
    /// See [`JobManager::end_rule`](crate::JobManager::end_rule).
    pub fn end_rule(&self, rule: &RuleRef) -> Result<()> {
        self.manager.end_rule(rule)
    }

    /// Announce the total units of work; resets completed units.
    pub fn begin_task(&self, total: u64) {
        self.job.begin_task(total);
    }

    /// Report `units` of completed work.
    pub fn worked(&self, units: u64) {
        self.job.worked(units);
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext").field("job", &self.job).finish_non_exhaustive()
    }
}

thread_local! {
    static CURRENT_JOB: RefCell<Option<Job>> = const { RefCell::new(None) };
}

/// The job running on the calling thread, if any.
#[must_use]
pub fn current_job() -> Option<Job> {
    CURRENT_JOB.with(|slot| slot.borrow().clone())
}

/// Binds a job to the current thread until dropped.
pub(crate) struct CurrentJobScope {
    previous: Option<Job>,
}

impl CurrentJobScope {
    pub fn enter(job: &Job) -> Self {
        let previous = CURRENT_JOB.with(|slot| slot.borrow_mut().replace(job.clone()));
        Self { previous }
    }
}

impl Drop for CurrentJobScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_JOB.with(|slot| *slot.borrow_mut() = previous);
    }
}

#[cfg(feature = "tokio-runtime")]
mod async_body {
    use std::cell::RefCell;
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{JobBody, JobContext};
    use crate::job::{Job, JobBuilder};

    /// An asynchronous job body.
    ///
    /// Runs to completion on a current-thread Tokio runtime owned by the
    /// worker thread, so the body may await timers and channels while the
    /// scheduler still sees one running job per worker.
    #[async_trait]
    pub trait AsyncJobBody: Send + Sync + 'static {
        /// Execute the job.
        async fn run(&self, ctx: JobContext) -> anyhow::Result<()>;
    }

    /// Adapter running an [`AsyncJobBody`] as a [`JobBody`].
    #[derive(Debug)]
    pub struct AsyncJob<B>(pub B);

    thread_local! {
        static RUNTIME: RefCell<Option<tokio::runtime::Runtime>> = const { RefCell::new(None) };
    }

    impl<B: AsyncJobBody> JobBody for AsyncJob<B> {
        fn run(&self, ctx: &JobContext) -> anyhow::Result<()> {
            RUNTIME.with(|slot| {
                let mut slot = slot.borrow_mut();
                if let Some(rt) = slot.as_ref() {
                    return rt.block_on(self.0.run(ctx.clone()));
                }
                let rt = slot.insert(
                    tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()?,
                );
                rt.block_on(self.0.run(ctx.clone()))
            })
        }
    }

    impl JobBuilder {
        /// Finish with an asynchronous body.
        pub fn build_async<B: AsyncJobBody>(self, body: B) -> Job {
            self.build_body(Arc::new(AsyncJob(body)))
        }
    }
}

#[cfg(feature = "tokio-runtime")]
pub use async_body::{AsyncJob, AsyncJobBody};
