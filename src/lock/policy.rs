//! Deadlock victim selection.

use std::fmt;
use std::thread::ThreadId;

/// A thread on a detected waits-for cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VictimCandidate {
    /// The waiting thread.
    pub thread: ThreadId,
    /// Total reentrant lock depth plus acquired rules held by the thread.
    pub held_depth: usize,
    /// Order in which the thread started waiting; larger is more recent.
    pub wait_seq: u64,
    /// True for the thread whose wait closed the cycle.
    pub is_requester: bool,
}

/// Chooses which thread on a cycle has its acquisition fail.
pub trait VictimPolicy: Send + Sync + fmt::Debug {
    /// Pick one of `candidates`. Must be deterministic for a given input.
    fn select(&self, candidates: &[VictimCandidate]) -> Option<ThreadId>;
}

/// Fail the thread holding the least, breaking ties towards the most recent
/// waiter.
#[derive(Debug, Default, Clone, Copy)]
pub struct LightestHolder;

impl VictimPolicy for LightestHolder {
    fn select(&self, candidates: &[VictimCandidate]) -> Option<ThreadId> {
        candidates
            .iter()
            .min_by(|a, b| {
                a.held_depth
                    .cmp(&b.held_depth)
                    .then_with(|| b.wait_seq.cmp(&a.wait_seq))
            })
            .map(|c| c.thread)
    }
}

/// Always fail the thread whose wait closed the cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequesterVictim;

impl VictimPolicy for RequesterVictim {
    fn select(&self, candidates: &[VictimCandidate]) -> Option<ThreadId> {
        candidates
            .iter()
            .find(|c| c.is_requester)
            .or_else(|| candidates.first())
            .map(|c| c.thread)
    }
}
