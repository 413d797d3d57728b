//! Job change listeners.
//!
//! Listeners observe job lifecycle transitions. Events are built while the
//! scheduler holds its state lock and delivered after it is released, so a
//! listener may call back into the manager (for example to schedule a
//! follow-up job from a `Done` event).

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::job::{JobId, JobResult};
use crate::util::clock::now_ms;

/// Lifecycle transition reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
    /// The job entered the waiting queue.
    Scheduled,
    /// The job was put to sleep or scheduled with a delay.
    Sleeping,
    /// A sleeping job returned to the waiting queue.
    Awake,
    /// A worker started running the job.
    Running,
    /// The job reached a terminal state; `result` is set.
    Done,
}

/// A single lifecycle event.
#[derive(Debug, Clone)]
pub struct JobEvent {
    /// Job identifier.
    pub job_id: JobId,
    /// Job name.
    pub job_name: String,
    /// Transition observed.
    pub kind: JobEventKind,
    /// Final result, present only for [`JobEventKind::Done`].
    pub result: Option<JobResult>,
    /// Wall-clock timestamp in milliseconds.
    pub at_ms: u128,
}

/// Receives job lifecycle events.
pub trait JobChangeListener: Send + Sync {
    /// Called once per transition, outside any scheduler lock.
    fn on_event(&self, event: &JobEvent);
}

/// Bounded in-memory event log for diagnostics and tests.
pub struct InMemoryEventLog {
    events: Mutex<VecDeque<JobEvent>>,
    max_events: usize,
}

impl InMemoryEventLog {
    /// Create a log that keeps at most `max_events` of the newest events.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events: max_events.max(1),
        }
    }

    /// Snapshot of stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Kinds of the stored events for one job, oldest first.
    #[must_use]
    pub fn kinds_for(&self, job_id: JobId) -> Vec<JobEventKind> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.job_id == job_id)
            .map(|e| e.kind)
            .collect()
    }

    /// Drop every stored event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl JobChangeListener for InMemoryEventLog {
    fn on_event(&self, event: &JobEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

/// Build an event stamped with the current time.
pub fn build_event(
    job_id: JobId,
    job_name: impl Into<String>,
    kind: JobEventKind,
    result: Option<JobResult>,
) -> JobEvent {
    JobEvent {
        job_id,
        job_name: job_name.into(),
        kind,
        result,
        at_ms: now_ms(),
    }
}
