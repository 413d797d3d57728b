//! Worker thread loop.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error};

use crate::core::error::JobError;
use crate::job::context::{CurrentJobScope, JobContext};
use crate::job::{Job, JobResult};
use crate::manager::Inner;

/// Panic payload that takes the worker thread down with the job.
///
/// An ordinary panic in a job body fails that job and the worker carries on.
/// Panicking with `WorkerAbort` (see [`WorkerAbort::raise`]) fails the job and
/// then lets the worker thread die; the pool replaces it if work remains.
#[derive(Debug, Clone)]
pub struct WorkerAbort {
    reason: String,
}

impl WorkerAbort {
    /// Create an abort with a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Why the worker is aborting.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Abort the calling worker thread.
    pub fn raise(reason: impl Into<String>) -> ! {
        panic::panic_any(Self::new(reason))
    }
}

impl fmt::Display for WorkerAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker aborted: {}", self.reason)
    }
}

pub(crate) struct Worker {
    pub id: usize,
    inner: Arc<Inner>,
    pub started: bool,
    pub retired: bool,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Worker {
    pub const fn new(id: usize, inner: Arc<Inner>) -> Self {
        Self {
            id,
            inner,
            started: false,
            retired: false,
        }
    }

    pub fn run(mut self) {
        debug!(worker_id = self.id, "worker thread started");
        let inner = Arc::clone(&self.inner);
        while let Some(job) = inner.start_job(&mut self) {
            self.execute(&job);
        }
    }

    fn execute(&self, job: &Job) {
        let ctx = JobContext::new(job.clone(), Arc::clone(&self.inner));
        let body = job.body();
        let outcome = {
            let _scope = CurrentJobScope::enter(job);
            panic::catch_unwind(AssertUnwindSafe(|| body.run(&ctx)))
        };
        let result = match outcome {
            Ok(Ok(())) => JobResult::Completed,
            Ok(Err(err)) if JobError::is_cancellation(&err) => JobResult::Cancelled,
            Ok(Err(err)) => JobResult::Failed(Arc::new(err)),
            Err(payload) => {
                if let Some(abort) = payload.downcast_ref::<WorkerAbort>() {
                    error!(worker_id = self.id, job_id = job.id(), reason = abort.reason(), "job aborted its worker");
                    self.inner
                        .end_job(job, JobResult::Failed(Arc::new(anyhow!("{abort}"))));
                    panic::resume_unwind(payload);
                }
                JobResult::Failed(Arc::new(anyhow!(
                    "job panicked: {}",
                    panic_message(payload.as_ref())
                )))
            }
        };
        self.inner.end_job(job, result);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let inner = Arc::clone(&self.inner);
        inner.end_worker(self);
    }
}
