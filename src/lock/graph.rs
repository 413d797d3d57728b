//! Waits-for graph between threads and the resources they hold.
//!
//! Nodes are threads. A thread holds explicit locks (with a reentrancy depth)
//! and a stack of rule frames; it waits for at most one resource at a time.
//! An edge `A -> B` exists while `A` waits for a resource `B` holds. The graph
//! is acyclic except while a detected cycle is being resolved, and a thread
//! marked as victim is no longer treated as waiting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::ThreadId;

use crate::core::rule::{self, RuleRef};
use crate::job::JobId;

use super::policy::VictimCandidate;

/// Identifier of an [`OrderedLock`](super::OrderedLock).
pub type LockId = u64;

/// Something a thread can hold or wait for.
#[derive(Debug, Clone)]
pub(crate) enum Resource {
    Lock { id: LockId, name: Arc<str> },
    Rule(RuleRef),
}

impl Resource {
    pub fn describe(&self) -> String {
        match self {
            Self::Lock { name, .. } => format!("lock `{name}`"),
            Self::Rule(rule) => format!("rule {}", rule::describe(rule.as_ref())),
        }
    }
}

/// One `begin_rule` on a thread. Frames covered by an outer frame are kept
/// only to match `end_rule` calls and do not hold anything.
#[derive(Debug, Clone)]
pub(crate) struct RuleFrame {
    pub rule: RuleRef,
    pub acquired: bool,
    /// Set for the frame carrying a running job's own rule.
    pub job: Option<JobId>,
}

#[derive(Debug)]
struct Wait {
    resource: Resource,
    seq: u64,
}

#[derive(Debug, Default)]
struct ThreadNode {
    rules: Vec<RuleFrame>,
    waiting: Option<Wait>,
    victim: bool,
}

impl ThreadNode {
    fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.waiting.is_none() && !self.victim
    }
}

#[derive(Debug)]
struct LockOwner {
    thread: ThreadId,
    depth: usize,
    name: Arc<str>,
}

/// Resources released on behalf of a thread whose job left them behind.
#[derive(Debug, Default)]
pub(crate) struct Leaked {
    pub rules: Vec<RuleFrame>,
    pub locks: Vec<Arc<str>>,
}

impl Leaked {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.locks.is_empty()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.rules
            .iter()
            .map(|f| format!("rule {}", rule::describe(f.rule.as_ref())))
            .chain(self.locks.iter().map(|name| format!("lock `{name}`")))
            .collect()
    }
}

#[derive(Debug, Default)]
pub(crate) struct WaitGraph {
    threads: HashMap<ThreadId, ThreadNode>,
    locks: HashMap<LockId, LockOwner>,
    next_seq: u64,
}

impl WaitGraph {
    fn node(&mut self, thread: ThreadId) -> &mut ThreadNode {
        self.threads.entry(thread).or_default()
    }

    fn prune(&mut self, thread: ThreadId) {
        if self.threads.get(&thread).is_some_and(ThreadNode::is_empty) {
            self.threads.remove(&thread);
        }
    }

    /// Threads other than `thread` holding an acquired rule that conflicts
    /// with `wanted`.
    fn rule_holders(&self, wanted: &RuleRef, thread: ThreadId) -> Vec<ThreadId> {
        self.threads
            .iter()
            .filter(|(t, _)| **t != thread)
            .filter(|(_, node)| {
                node.rules
                    .iter()
                    .any(|f| f.acquired && rule::conflicts(f.rule.as_ref(), wanted.as_ref()))
            })
            .map(|(t, _)| *t)
            .collect()
    }

    fn blockers(&self, thread: ThreadId) -> Vec<ThreadId> {
        let Some(wait) = self.threads.get(&thread).and_then(|n| n.waiting.as_ref()) else {
            return Vec::new();
        };
        match &wait.resource {
            Resource::Lock { id, .. } => self
                .locks
                .get(id)
                .map(|owner| owner.thread)
                .filter(|owner| *owner != thread)
                .into_iter()
                .collect(),
            Resource::Rule(wanted) => self.rule_holders(wanted, thread),
        }
    }

    fn is_waiting(&self, thread: ThreadId) -> bool {
        self.threads
            .get(&thread)
            .is_some_and(|n| n.waiting.is_some() && !n.victim)
    }

    /// Whether `thread` could take `resource` right now.
    pub fn can_acquire(&self, resource: &Resource, thread: ThreadId) -> bool {
        match resource {
            Resource::Lock { id, .. } => self.locks.get(id).is_none_or(|o| o.thread == thread),
            Resource::Rule(wanted) => self.rule_holders(wanted, thread).is_empty(),
        }
    }

    /// Whether a job rule may be granted at dispatch: no thread at all holds
    /// a conflicting rule. Dispatch targets are idle workers or yielded job
    /// threads, neither of which holds rule frames of its own.
    pub fn rule_available(&self, wanted: &RuleRef) -> bool {
        !self.threads.values().any(|node| {
            node.rules
                .iter()
                .any(|f| f.acquired && rule::conflicts(f.rule.as_ref(), wanted.as_ref()))
        })
    }

    pub fn hold_lock(&mut self, id: LockId, name: &Arc<str>, thread: ThreadId) {
        let owner = self.locks.entry(id).or_insert_with(|| LockOwner {
            thread,
            depth: 0,
            name: Arc::clone(name),
        });
        owner.depth += 1;
    }

    /// Drop one level of `thread`'s hold on `id`. Returns `Some(true)` when
    /// the lock became free, `None` when `thread` does not hold it.
    pub fn release_lock(&mut self, id: LockId, thread: ThreadId) -> Option<bool> {
        let owner = self.locks.get_mut(&id).filter(|o| o.thread == thread)?;
        owner.depth -= 1;
        if owner.depth == 0 {
            self.locks.remove(&id);
            Some(true)
        } else {
            Some(false)
        }
    }

    pub fn lock_depth(&self, id: LockId, thread: ThreadId) -> usize {
        self.locks
            .get(&id)
            .filter(|o| o.thread == thread)
            .map_or(0, |o| o.depth)
    }

    pub fn lock_holder(&self, id: LockId) -> Option<ThreadId> {
        self.locks.get(&id).map(|o| o.thread)
    }

    /// True if an acquired frame of `thread` already contains `wanted`.
    pub fn covers(&self, thread: ThreadId, wanted: &RuleRef) -> bool {
        self.threads.get(&thread).is_some_and(|node| {
            node.rules
                .iter()
                .any(|f| f.acquired && rule::contains(f.rule.as_ref(), wanted.as_ref()))
        })
    }

    pub fn push_rule(&mut self, thread: ThreadId, frame: RuleFrame) {
        self.node(thread).rules.push(frame);
    }

    pub fn top_rule(&self, thread: ThreadId) -> Option<&RuleFrame> {
        self.threads.get(&thread).and_then(|n| n.rules.last())
    }

    pub fn pop_rule(&mut self, thread: ThreadId) -> Option<RuleFrame> {
        let frame = self.threads.get_mut(&thread).and_then(|n| n.rules.pop());
        self.prune(thread);
        frame
    }

    /// Number of rule frames on `thread`.
    #[cfg(test)]
    pub fn rule_depth(&self, thread: ThreadId) -> usize {
        self.threads.get(&thread).map_or(0, |n| n.rules.len())
    }

    /// Remove the frame carrying `job`'s own rule from `thread`.
    pub fn remove_job_rule(&mut self, thread: ThreadId, job: JobId) -> Option<RuleFrame> {
        let node = self.threads.get_mut(&thread)?;
        let idx = node.rules.iter().position(|f| f.job == Some(job))?;
        let frame = node.rules.remove(idx);
        self.prune(thread);
        Some(frame)
    }

    /// Strip every rule frame and lock still held by `thread`.
    pub fn release_thread(&mut self, thread: ThreadId) -> Leaked {
        let rules = self
            .threads
            .get_mut(&thread)
            .map(|n| std::mem::take(&mut n.rules))
            .unwrap_or_default();
        let lock_ids: Vec<LockId> = self
            .locks
            .iter()
            .filter(|(_, o)| o.thread == thread)
            .map(|(id, _)| *id)
            .collect();
        let locks = lock_ids
            .into_iter()
            .filter_map(|id| self.locks.remove(&id))
            .map(|o| o.name)
            .collect();
        self.prune(thread);
        Leaked { rules, locks }
    }

    pub fn begin_wait(&mut self, thread: ThreadId, resource: Resource) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.node(thread).waiting = Some(Wait { resource, seq });
    }

    pub fn end_wait(&mut self, thread: ThreadId) {
        if let Some(node) = self.threads.get_mut(&thread) {
            node.waiting = None;
            node.victim = false;
        }
        self.prune(thread);
    }

    /// Clear and return the victim flag of `thread`.
    pub fn take_victim(&mut self, thread: ThreadId) -> bool {
        self.threads
            .get_mut(&thread)
            .is_some_and(|n| std::mem::take(&mut n.victim))
    }

    pub fn mark_victim(&mut self, thread: ThreadId) {
        self.node(thread).victim = true;
    }

    /// Locks held (with depth) plus acquired rule frames.
    pub fn total_depth(&self, thread: ThreadId) -> usize {
        let locks: usize = self
            .locks
            .values()
            .filter(|o| o.thread == thread)
            .map(|o| o.depth)
            .sum();
        let rules = self
            .threads
            .get(&thread)
            .map_or(0, |n| n.rules.iter().filter(|f| f.acquired).count());
        locks + rules
    }

    /// Search for a waits-for cycle passing through `start`. Returns the
    /// threads on the cycle, starting with `start`.
    pub fn find_cycle(&self, start: ThreadId) -> Option<Vec<ThreadId>> {
        if !self.is_waiting(start) {
            return None;
        }
        let mut path = vec![start];
        let mut visited = HashSet::from([start]);
        self.walk(start, start, &mut path, &mut visited).then_some(path)
    }

    fn walk(
        &self,
        current: ThreadId,
        start: ThreadId,
        path: &mut Vec<ThreadId>,
        visited: &mut HashSet<ThreadId>,
    ) -> bool {
        for next in self.blockers(current) {
            if next == start {
                return true;
            }
            if !self.is_waiting(next) || !visited.insert(next) {
                continue;
            }
            path.push(next);
            if self.walk(next, start, path, visited) {
                return true;
            }
            path.pop();
        }
        false
    }

    pub fn candidates(&self, cycle: &[ThreadId], requester: ThreadId) -> Vec<VictimCandidate> {
        cycle
            .iter()
            .map(|t| VictimCandidate {
                thread: *t,
                held_depth: self.total_depth(*t),
                wait_seq: self
                    .threads
                    .get(t)
                    .and_then(|n| n.waiting.as_ref())
                    .map_or(0, |w| w.seq),
                is_requester: *t == requester,
            })
            .collect()
    }

    #[cfg(test)]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}
