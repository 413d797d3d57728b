//! Ordered delivery of job events to listeners.
//!
//! Notices are pushed while the manager's state lock is held, so their order
//! matches the order of the transitions. Delivery happens after the lock is
//! released, by one thread at a time: whichever thread finds the bus idle
//! drains it, and a thread that finds it busy (including a listener calling
//! back into the manager) leaves its notices to the current drainer.
//!
//! Job states are not published here: they change under the state lock.
//! Only removal from the live registry, which releases joiners, waits for
//! the job's `Done` event to be delivered.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::core::listener::{build_event, JobChangeListener, JobEvent, JobEventKind};
use crate::job::{Job, JobResult};

pub(crate) enum Notice {
    Event(JobEvent),
    /// Retire a finished job once every earlier event has been delivered.
    Finalize(Job),
}

#[derive(Default)]
struct Pending {
    notices: VecDeque<Notice>,
    draining: bool,
}

#[derive(Default)]
pub(crate) struct EventBus {
    pending: Mutex<Pending>,
    listeners: RwLock<Vec<Arc<dyn JobChangeListener>>>,
}

impl EventBus {
    pub fn add_listener(&self, listener: Arc<dyn JobChangeListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn JobChangeListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn emit(&self, job: &Job, kind: JobEventKind, result: Option<JobResult>) {
        self.pending
            .lock()
            .notices
            .push_back(Notice::Event(build_event(job.id(), job.name(), kind, result)));
    }

    pub fn finalize(&self, job: Job) {
        self.pending.lock().notices.push_back(Notice::Finalize(job));
    }

    /// Claim the bus and pop the next notice. Returns `None` when another
    /// thread is draining or nothing is pending.
    pub fn next(&self, claimed: &mut bool) -> Option<Notice> {
        let mut pending = self.pending.lock();
        if !*claimed {
            if pending.draining {
                return None;
            }
            pending.draining = true;
            *claimed = true;
        }
        let notice = pending.notices.pop_front();
        if notice.is_none() {
            pending.draining = false;
            *claimed = false;
        }
        notice
    }

    pub fn deliver(&self, event: &JobEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if outcome.is_err() {
                warn!(job_id = event.job_id, kind = ?event.kind, "job listener panicked");
            }
        }
    }
}
