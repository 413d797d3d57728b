//! Manager statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of manager and pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Live worker threads, including idle and parked ones.
    pub worker_count: usize,
    /// Workers waiting for a job.
    pub idle_workers: usize,
    /// Workers running a job.
    pub busy_workers: usize,
    /// Workers whose job is parked in `yield_rule` or `join`.
    pub parked_workers: usize,
    /// Jobs waiting for a worker.
    pub waiting_jobs: usize,
    /// Jobs blocked by a rule conflict.
    pub blocked_jobs: usize,
    /// Sleeping jobs.
    pub sleeping_jobs: usize,
    /// Running jobs.
    pub running_jobs: usize,
    /// Jobs accepted by `schedule`.
    pub submitted_jobs: u64,
    /// Jobs that completed normally.
    pub completed_jobs: u64,
    /// Jobs that failed or panicked.
    pub failed_jobs: u64,
    /// Jobs cancelled before or while running.
    pub cancelled_jobs: u64,
    /// Workers that terminated through a fatal abort.
    pub aborted_workers: u64,
    /// True while dispatching is suspended.
    pub suspended: bool,
}

/// Lifetime counters (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct ManagerCounters {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub aborted_workers: AtomicU64,
}

impl ManagerCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fill(&self, stats: &mut ManagerStats) {
        stats.submitted_jobs = self.submitted.load(Ordering::Relaxed);
        stats.completed_jobs = self.completed.load(Ordering::Relaxed);
        stats.failed_jobs = self.failed.load(Ordering::Relaxed);
        stats.cancelled_jobs = self.cancelled.load(Ordering::Relaxed);
        stats.aborted_workers = self.aborted_workers.load(Ordering::Relaxed);
    }
}
