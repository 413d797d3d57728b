//! Failure reporting hook.

use tracing::error;

use crate::job::JobId;

/// Host hook receiving job failures and leaked resources.
///
/// Cooperative cancellation is a normal outcome and is never reported here.
pub trait FailureReporter: Send + Sync {
    /// Called after a job body returned an error, panicked, or left rules or
    /// locks behind.
    fn report_failure(&self, job_id: JobId, name: &str, cause: &anyhow::Error);
}

/// Default reporter that logs failures through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl FailureReporter for TracingReporter {
    fn report_failure(&self, job_id: JobId, name: &str, cause: &anyhow::Error) {
        error!(job_id, job = name, error = %cause, "job failed");
    }
}
