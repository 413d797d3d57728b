//! Elastic worker pool.
//!
//! Workers are plain OS threads spawned on demand, up to `max_workers`
//! active at a time. A worker parked in `yield_rule` or `join` does not
//! count toward that cap, so a replacement may be spawned while it waits.
//! Idle workers above `min_workers` retire after `idle_timeout`.
//!
//! Accounting invariant, maintained under the manager's state lock:
//! `threads == starting + idle + busy + parked`.

mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::core::error::{JobError, ProgrammingError};
use crate::core::listener::JobEventKind;
use crate::job::{Job, JobResult, JobState};
use crate::manager::stats::ManagerCounters;
use crate::manager::{Inner, ManagerState};

pub(crate) use worker::Worker;
pub use worker::WorkerAbort;

#[derive(Debug, Default)]
pub(crate) struct WorkerPool {
    pub threads: usize,
    /// Spawned but not yet looking for work.
    pub starting: usize,
    pub idle: usize,
    pub busy: usize,
    pub parked: usize,
    pub next_id: usize,
    pub handles: HashMap<usize, JoinHandle<()>>,
}

impl WorkerPool {
    /// Workers counted against `max_workers`.
    pub const fn active(&self) -> usize {
        self.threads - self.parked
    }
}

impl Inner {
    /// Spawn workers for `eligible` jobs nobody is free to take, and keep one
    /// worker around while a timed sleeper is pending.
    pub(crate) fn ensure_worker(self: &Arc<Self>, st: &mut ManagerState, eligible: usize) {
        if st.shutdown {
            return;
        }
        let free = st.pool.idle + st.pool.starting;
        let mut wanted = eligible.saturating_sub(free);
        if wanted == 0 && free == 0 && st.queue.next_wake().is_some() {
            wanted = 1;
        }
        while wanted > 0 && st.pool.active() < self.config.max_workers {
            if !self.spawn_worker(st) {
                break;
            }
            wanted -= 1;
        }
    }

    fn spawn_worker(self: &Arc<Self>, st: &mut ManagerState) -> bool {
        let worker_id = st.pool.next_id;
        st.pool.next_id += 1;
        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-{worker_id}", self.config.thread_name_prefix))
            .stack_size(self.config.thread_stack_size)
            .spawn(move || Worker::new(worker_id, inner).run());
        match spawned {
            Ok(handle) => {
                st.pool.threads += 1;
                st.pool.starting += 1;
                st.pool.handles.insert(worker_id, handle);
                debug!(worker_id, threads = st.pool.threads, "spawned worker");
                true
            }
            Err(err) => {
                error!(worker_id, error = %err, "failed to spawn worker thread");
                false
            }
        }
    }

    /// Block the calling worker until a job is handed to it. Returns `None`
    /// when the worker should exit.
    pub(crate) fn start_job(self: &Arc<Self>, worker: &mut Worker) -> Option<Job> {
        let me = thread::current().id();
        let idle_timeout = self.config.idle_timeout();
        let mut st = self.state.lock();
        if worker.started {
            st.pool.busy -= 1;
        } else {
            st.pool.starting -= 1;
            worker.started = true;
        }
        st.pool.idle += 1;

        let mut idle_deadline = Instant::now() + idle_timeout;
        let job = loop {
            if st.shutdown {
                break None;
            }
            // On success dispatch moves this worker from idle to busy.
            if let Some(job) = self.dispatch(&mut st, Some(me)) {
                break Some(job);
            }
            let deadline = st
                .queue
                .next_wake()
                .map_or(idle_deadline, |at| at.min(idle_deadline));
            let timed_out = self.work_available.wait_until(&mut st, deadline).timed_out();
            if timed_out && Instant::now() >= idle_deadline {
                let timer_duty = st.pool.idle == 1 && st.queue.next_wake().is_some();
                if st.pool.threads > self.config.min_workers && !timer_duty {
                    break None;
                }
                idle_deadline = Instant::now() + idle_timeout;
            }
        };
        if job.is_none() {
            st.pool.idle -= 1;
            st.pool.threads -= 1;
            worker.retired = true;
            debug!(worker_id = worker.id, threads = st.pool.threads, "worker retiring");
        }
        drop(st);
        self.flush_events();
        job
    }

    /// Record a finished job, release whatever it left behind, and let
    /// blocked jobs through.
    pub(crate) fn end_job(self: &Arc<Self>, job: &Job, result: JobResult) {
        let me = thread::current().id();
        let mut st = self.state.lock();
        let terminal = match &result {
            JobResult::Completed => {
                ManagerCounters::bump(&self.counters.completed);
                JobState::Done
            }
            JobResult::Failed(_) => {
                ManagerCounters::bump(&self.counters.failed);
                JobState::Done
            }
            JobResult::Cancelled => {
                ManagerCounters::bump(&self.counters.cancelled);
                JobState::Cancelled
            }
        };
        // The terminal state is visible before anyone can see the rule free.
        {
            let mut status = job.status();
            status.result = Some(result.clone());
            status.thread = None;
        }
        job.transition(terminal);
        st.queue.finish(job.id());
        let leaked = {
            let mut graph = self.locks.graph();
            graph.remove_job_rule(me, job.id());
            let leaked = graph.release_thread(me);
            self.locks.notify_all();
            leaked
        };
        debug!(job_id = job.id(), job = job.name(), state = ?terminal, "job finished");
        self.events.emit(job, JobEventKind::Done, Some(result.clone()));
        self.events.finalize(job.clone());
        self.dispatch(&mut st, None);
        drop(st);

        if !leaked.is_empty() {
            warn!(job_id = job.id(), job = job.name(), "job finished holding rules or locks");
        }
        if let JobResult::Failed(cause) = &result {
            self.reporter.report_failure(job.id(), job.name(), cause);
        }
        for resource in leaked.descriptions() {
            let cause = anyhow::Error::new(JobError::from(ProgrammingError::LeakedResource {
                job: job.id(),
                resource,
            }));
            self.reporter.report_failure(job.id(), job.name(), &cause);
        }
        self.flush_events();
    }

    /// Worker thread exit. An aborted worker keeps its handle so shutdown
    /// can observe the panic.
    pub(crate) fn end_worker(self: &Arc<Self>, worker: &Worker) {
        let aborted = thread::panicking();
        let mut st = self.state.lock();
        if !worker.retired {
            st.pool.threads -= 1;
            if worker.started {
                st.pool.busy -= 1;
            } else {
                st.pool.starting -= 1;
            }
        }
        if aborted {
            ManagerCounters::bump(&self.counters.aborted_workers);
            error!(worker_id = worker.id, "worker aborted");
            // Replace the lost worker if jobs are waiting.
            self.dispatch(&mut st, None);
        } else {
            st.pool.handles.remove(&worker.id);
        }
        drop(st);
        if aborted {
            self.flush_events();
        }
        debug!(worker_id = worker.id, "worker thread exiting");
    }
}
