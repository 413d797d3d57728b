//! Deadlock-detecting lock manager.
//!
//! The [`LockManager`] tracks which thread holds which resource: explicit
//! [`OrderedLock`]s, rules begun with `begin_rule`, and the rules of running
//! jobs. Every blocking acquisition records a waits-for edge and searches for a
//! cycle through the waiting thread. When one is found the configured
//! [`VictimPolicy`] names a single thread whose acquisition fails with
//! [`JobError::Deadlock`]; the victim keeps whatever it already holds and is
//! expected to back out.
//!
//! Lock order: a caller holding the job manager's state lock may take the
//! graph lock, never the reverse.

pub(crate) mod graph;
pub mod ordered;
pub mod policy;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::core::error::{JobError, ProgrammingError, Result};
use crate::core::rule::RuleRef;
use crate::job::context;

use graph::{Resource, RuleFrame, WaitGraph};

pub use graph::LockId;
pub use ordered::{OrderedLock, OrderedLockGuard};
pub use policy::{LightestHolder, RequesterVictim, VictimCandidate, VictimPolicy};

/// Owner of the waits-for graph shared by locks, begun rules and running jobs.
#[derive(Debug)]
pub struct LockManager {
    graph: Mutex<WaitGraph>,
    changed: Condvar,
    policy: Box<dyn VictimPolicy>,
    next_lock_id: AtomicU64,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// Create a manager using the [`LightestHolder`] victim policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(LightestHolder)
    }

    /// Create a manager with a custom victim policy.
    pub fn with_policy(policy: impl VictimPolicy + 'static) -> Self {
        Self::with_boxed_policy(Box::new(policy))
    }

    /// Create a manager with an already boxed victim policy.
    #[must_use]
    pub fn with_boxed_policy(policy: Box<dyn VictimPolicy>) -> Self {
        Self {
            graph: Mutex::new(WaitGraph::default()),
            changed: Condvar::new(),
            policy,
            next_lock_id: AtomicU64::new(1),
        }
    }

    /// Create a new reentrant lock tracked by this manager.
    pub fn new_lock(self: &Arc<Self>, name: impl Into<String>) -> OrderedLock {
        let id = self.next_lock_id.fetch_add(1, Ordering::Relaxed);
        OrderedLock::new(id, Arc::from(name.into()), Arc::clone(self))
    }

    pub(crate) fn graph(&self) -> MutexGuard<'_, WaitGraph> {
        self.graph.lock()
    }

    /// Wake every waiter. Call after changing the graph; the change must be
    /// made under the graph lock so no wakeup is lost.
    pub(crate) fn notify_all(&self) {
        self.changed.notify_all();
    }

    /// Wake every waiter so it re-checks conditions that live outside the
    /// graph, such as a job's cancellation flag.
    pub(crate) fn wake_waiters(&self) {
        let _graph = self.graph.lock();
        self.changed.notify_all();
    }

    pub(crate) fn acquire(
        &self,
        id: LockId,
        name: &Arc<str>,
        deadline: Option<Instant>,
    ) -> Result<bool> {
        let me = thread::current().id();
        let mut graph = self.graph.lock();
        let resource = Resource::Lock {
            id,
            name: Arc::clone(name),
        };
        if !self.wait_for(&mut graph, me, &resource, deadline)? {
            return Ok(false);
        }
        graph.hold_lock(id, name, me);
        Ok(true)
    }

    pub(crate) fn release(&self, id: LockId, name: &Arc<str>) -> Result<()> {
        let me = thread::current().id();
        let mut graph = self.graph.lock();
        match graph.release_lock(id, me) {
            None => Err(ProgrammingError::LockNotHeld(name.to_string()).into()),
            Some(true) => {
                self.changed.notify_all();
                Ok(())
            }
            Some(false) => Ok(()),
        }
    }

    pub(crate) fn depth(&self, id: LockId) -> usize {
        self.graph.lock().lock_depth(id, thread::current().id())
    }

    pub(crate) fn is_locked(&self, id: LockId) -> bool {
        self.graph.lock().lock_holder(id).is_some()
    }

    /// Register `rule` for the calling thread, blocking while another thread
    /// holds a conflicting rule. A rule already covered by one the thread
    /// holds is recorded without waiting.
    pub(crate) fn begin_rule(&self, rule: &RuleRef) -> Result<()> {
        let me = thread::current().id();
        let mut graph = self.graph.lock();
        if graph.covers(me, rule) {
            graph.push_rule(
                me,
                RuleFrame {
                    rule: Arc::clone(rule),
                    acquired: false,
                    job: None,
                },
            );
            return Ok(());
        }
        let resource = Resource::Rule(Arc::clone(rule));
        self.wait_for(&mut graph, me, &resource, None)?;
        graph.push_rule(
            me,
            RuleFrame {
                rule: Arc::clone(rule),
                acquired: true,
                job: None,
            },
        );
        Ok(())
    }

    /// Block until `me` may take `resource`. Returns `Ok(false)` only when
    /// `deadline` passes first.
    fn wait_for(
        &self,
        graph: &mut MutexGuard<'_, WaitGraph>,
        me: ThreadId,
        resource: &Resource,
        deadline: Option<Instant>,
    ) -> Result<bool> {
        if graph.can_acquire(resource, me) {
            return Ok(true);
        }
        debug!(resource = %resource.describe(), "waiting for resource");
        graph.begin_wait(me, resource.clone());
        let outcome = loop {
            if graph.take_victim(me) {
                break Err(JobError::Deadlock {
                    resource: resource.describe(),
                });
            }
            if context::current_job().is_some_and(|job| job.is_cancel_requested()) {
                break Err(JobError::Cancelled);
            }
            if graph.can_acquire(resource, me) {
                break Ok(true);
            }
            if self.resolve_cycle(graph, me) {
                continue;
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(graph, deadline).timed_out()
                        && !graph.can_acquire(resource, me)
                    {
                        break Ok(false);
                    }
                }
                None => self.changed.wait(graph),
            }
        };
        graph.end_wait(me);
        outcome
    }

    /// Look for a cycle through `me` and mark a victim. Returns `true` when
    /// `me` itself was chosen.
    fn resolve_cycle(&self, graph: &mut WaitGraph, me: ThreadId) -> bool {
        let Some(cycle) = graph.find_cycle(me) else {
            return false;
        };
        let candidates = graph.candidates(&cycle, me);
        let Some(victim) = self.policy.select(&candidates) else {
            return false;
        };
        warn!(
            cycle_len = cycle.len(),
            victim = ?victim,
            requester = ?me,
            "deadlock detected, failing victim acquisition"
        );
        graph.mark_victim(victim);
        self.changed.notify_all();
        victim == me
    }
}
