//! Priority queue of pending jobs with waiting, blocked, sleeping and running
//! partitions.
//!
//! Pending jobs are keyed by `(priority desc, arrival seq asc)`, so iterating
//! a partition yields jobs in dispatch order. Each job sits in exactly one
//! partition; the queue performs the matching [`JobState`] transition on every
//! move. The queue is not synchronized; the manager guards it with its state
//! lock.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::core::rule::{self, SchedulingRule};

use super::{Job, JobId, JobState, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct QueueKey {
    urgency: Reverse<Priority>,
    seq: u64,
}

#[derive(Debug)]
struct Sleeper {
    job: Job,
    wake_at: Option<Instant>,
}

/// Decision returned by the scan callback for one pending job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Runnable, but left waiting for a worker. Counted in
    /// [`ScanOutcome::eligible`].
    Eligible,
    /// Left waiting without being counted.
    Hold,
    /// Conflicts with a held rule; moved to the blocked partition.
    Blocked,
    /// Taken by the scanning worker; moved to running.
    Take,
    /// A yielded job resumed on its own thread; moved to running.
    Resume,
}

/// Result of [`JobQueue::scan`].
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Job taken by the scanning worker.
    pub taken: Option<Job>,
    /// Yielded jobs resumed during the scan.
    pub resumed: Vec<Job>,
    /// Jobs judged runnable but left waiting.
    pub eligible: usize,
}

/// Partition sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Jobs waiting for a worker.
    pub waiting: usize,
    /// Jobs blocked by a rule conflict.
    pub blocked: usize,
    /// Sleeping jobs.
    pub sleeping: usize,
    /// Running jobs, including yielded jobs parked on their thread.
    pub running: usize,
}

/// Pending and running jobs of one manager.
#[derive(Debug, Default)]
pub struct JobQueue {
    waiting: BTreeMap<QueueKey, Job>,
    blocked: BTreeMap<QueueKey, Job>,
    keys: HashMap<JobId, QueueKey>,
    sleeping: HashMap<JobId, Sleeper>,
    running: HashMap<JobId, Job>,
    next_seq: u64,
}

impl JobQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_key(&mut self, priority: Priority) -> QueueKey {
        let seq = self.next_seq;
        self.next_seq += 1;
        QueueKey {
            urgency: Reverse(priority),
            seq,
        }
    }

    fn insert_waiting(&mut self, job: Job) {
        let key = self.next_key(job.priority());
        self.keys.insert(job.id(), key);
        self.waiting.insert(key, job);
    }

    /// Append a new or sleeping job at the tail of its priority class.
    pub fn enqueue(&mut self, job: Job) {
        job.transition(JobState::Waiting);
        self.insert_waiting(job);
    }

    /// Put a newly scheduled job straight to sleep until `wake_at`, or until
    /// explicitly woken when `None`.
    pub fn enqueue_sleeping(&mut self, job: Job, wake_at: Option<Instant>) {
        job.transition(JobState::Sleeping);
        self.sleeping.insert(job.id(), Sleeper { job, wake_at });
    }

    /// Move a running job back to the tail of its priority class.
    pub fn requeue(&mut self, job: &Job) {
        if self.running.remove(&job.id()).is_some() {
            self.enqueue(job.clone());
        }
    }

    /// Move a waiting or blocked job to sleep. Returns `true` if the job is
    /// sleeping afterwards.
    pub fn sleep(&mut self, id: JobId, wake_at: Option<Instant>) -> bool {
        if self.sleeping.contains_key(&id) {
            return true;
        }
        let Some(job) = self.take_pending(id) else {
            return false;
        };
        self.enqueue_sleeping(job, wake_at);
        true
    }

    /// Wake a sleeping job. With a future `wake_at` only its deadline is
    /// moved; otherwise it returns to the waiting partition. Returns the job
    /// when it was moved to waiting.
    pub fn wake(&mut self, id: JobId, wake_at: Option<Instant>) -> Option<Job> {
        let now = Instant::now();
        let sleeper = self.sleeping.get_mut(&id)?;
        if let Some(at) = wake_at.filter(|at| *at > now) {
            sleeper.wake_at = Some(at);
            return None;
        }
        let sleeper = self.sleeping.remove(&id)?;
        self.enqueue(sleeper.job.clone());
        Some(sleeper.job)
    }

    /// Move every sleeper whose deadline has passed to waiting.
    pub fn promote_due(&mut self, now: Instant) -> Vec<Job> {
        let due: Vec<JobId> = self
            .sleeping
            .iter()
            .filter(|(_, s)| s.wake_at.is_some_and(|at| at <= now))
            .map(|(id, _)| *id)
            .collect();
        let mut woken: Vec<Job> = due
            .into_iter()
            .filter_map(|id| self.sleeping.remove(&id))
            .map(|s| s.job)
            .collect();
        woken.sort_by_key(Job::id);
        for job in &woken {
            self.enqueue(job.clone());
        }
        woken
    }

    /// Earliest sleeper deadline.
    #[must_use]
    pub fn next_wake(&self) -> Option<Instant> {
        self.sleeping.values().filter_map(|s| s.wake_at).min()
    }

    fn take_pending(&mut self, id: JobId) -> Option<Job> {
        let key = self.keys.remove(&id)?;
        self.waiting
            .remove(&key)
            .or_else(|| self.blocked.remove(&key))
    }

    /// Remove a waiting, blocked or sleeping job without changing its state.
    pub fn remove_queued(&mut self, id: JobId) -> Option<Job> {
        self.take_pending(id)
            .or_else(|| self.sleeping.remove(&id).map(|s| s.job))
    }

    /// Remove a running job.
    pub fn finish(&mut self, id: JobId) -> Option<Job> {
        self.running.remove(&id)
    }

    /// True while `id` is waiting or blocked.
    #[must_use]
    pub fn is_pending(&self, id: JobId) -> bool {
        self.keys.contains_key(&id)
    }

    /// Visit waiting and blocked jobs in dispatch order and apply the verdict
    /// returned for each.
    pub fn scan<F>(&mut self, mut verdict: F) -> ScanOutcome
    where
        F: FnMut(&Job) -> Verdict,
    {
        let mut order: Vec<(QueueKey, bool)> = self
            .waiting
            .keys()
            .map(|k| (*k, false))
            .chain(self.blocked.keys().map(|k| (*k, true)))
            .collect();
        order.sort_unstable();

        let mut outcome = ScanOutcome::default();
        for (key, was_blocked) in order {
            let partition = if was_blocked {
                &mut self.blocked
            } else {
                &mut self.waiting
            };
            let Some(job) = partition.get(&key).cloned() else {
                continue;
            };
            match verdict(&job) {
                v @ (Verdict::Eligible | Verdict::Hold) => {
                    if was_blocked {
                        self.blocked.remove(&key);
                        job.transition(JobState::Waiting);
                        self.waiting.insert(key, job);
                    }
                    if v == Verdict::Eligible {
                        outcome.eligible += 1;
                    }
                }
                Verdict::Blocked => {
                    if !was_blocked {
                        self.waiting.remove(&key);
                        job.transition(JobState::Blocked);
                        self.blocked.insert(key, job);
                    }
                }
                v @ (Verdict::Take | Verdict::Resume) => {
                    self.keys.remove(&job.id());
                    if was_blocked {
                        self.blocked.remove(&key);
                        job.transition(JobState::Waiting);
                    } else {
                        self.waiting.remove(&key);
                    }
                    job.transition(JobState::Running);
                    self.running.insert(job.id(), job.clone());
                    if v == Verdict::Take {
                        outcome.taken = Some(job);
                    } else {
                        outcome.resumed.push(job);
                    }
                }
            }
        }
        outcome
    }

    /// First waiting or blocked job, other than `exclude`, whose rule
    /// conflicts with `rule`.
    #[must_use]
    pub fn first_conflicting(&self, rule: &dyn SchedulingRule, exclude: JobId) -> Option<Job> {
        let mut pending: Vec<(&QueueKey, &Job)> =
            self.waiting.iter().chain(self.blocked.iter()).collect();
        pending.sort_unstable_by_key(|(k, _)| **k);
        pending
            .into_iter()
            .map(|(_, job)| job)
            .filter(|job| job.id() != exclude)
            .find(|job| job.rule().is_some_and(|r| rule::conflicts(r.as_ref(), rule)))
            .cloned()
    }

    /// Remove every pending job except those `keep` selects.
    pub fn drain_queued<F>(&mut self, keep: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let ids: Vec<JobId> = self
            .waiting
            .values()
            .chain(self.blocked.values())
            .filter(|job| !keep(job))
            .map(Job::id)
            .chain(self.sleeping.keys().copied())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.remove_queued(id))
            .collect()
    }

    /// Partition sizes.
    #[must_use]
    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            waiting: self.waiting.len(),
            blocked: self.blocked.len(),
            sleeping: self.sleeping.len(),
            running: self.running.len(),
        }
    }

    /// True when nothing is pending or running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
            && self.blocked.is_empty()
            && self.sleeping.is_empty()
            && self.running.is_empty()
    }
}
