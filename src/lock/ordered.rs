//! Reentrant lock with deadlock detection.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::core::error::Result;

use super::graph::LockId;
use super::LockManager;

/// A reentrant lock whose waits are tracked by a [`LockManager`].
///
/// The same thread may acquire it repeatedly; it is released once every
/// acquisition has a matching release. Clones refer to the same lock.
#[derive(Clone)]
pub struct OrderedLock {
    id: LockId,
    name: Arc<str>,
    manager: Arc<LockManager>,
}

impl OrderedLock {
    pub(crate) const fn new(id: LockId, name: Arc<str>, manager: Arc<LockManager>) -> Self {
        Self { id, name, manager }
    }

    /// Lock identifier, unique within its manager.
    #[must_use]
    pub const fn id(&self) -> LockId {
        self.id
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the lock is held by the calling thread.
    ///
    /// # Errors
    /// [`JobError::Deadlock`](crate::JobError::Deadlock) when this thread is
    /// chosen as the victim of a cycle, [`JobError::Cancelled`](crate::JobError::Cancelled)
    /// when the job running on this thread is cancelled while waiting.
    pub fn acquire(&self) -> Result<()> {
        self.manager.acquire(self.id, &self.name, None).map(|_| ())
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`, returning
    /// `Ok(false)`.
    ///
    /// # Errors
    /// Same as [`acquire`](Self::acquire).
    pub fn try_acquire_for(&self, timeout: Duration) -> Result<bool> {
        self.manager
            .acquire(self.id, &self.name, Some(Instant::now() + timeout))
    }

    /// Release one level of the calling thread's hold.
    ///
    /// # Errors
    /// [`ProgrammingError::LockNotHeld`](crate::ProgrammingError::LockNotHeld)
    /// when the calling thread does not hold the lock.
    pub fn release(&self) -> Result<()> {
        self.manager.release(self.id, &self.name)
    }

    /// Acquire and return a guard that releases on drop.
    ///
    /// # Errors
    /// Same as [`acquire`](Self::acquire).
    pub fn lock(&self) -> Result<OrderedLockGuard<'_>> {
        self.acquire()?;
        Ok(OrderedLockGuard { lock: self })
    }

    /// Reentrancy depth held by the calling thread.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.manager.depth(self.id)
    }

    /// True while any thread holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.manager.is_locked(self.id)
    }
}

impl fmt::Debug for OrderedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedLock")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Releases one level of an [`OrderedLock`] when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct OrderedLockGuard<'a> {
    lock: &'a OrderedLock,
}

impl Drop for OrderedLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release() {
            warn!(lock = %self.lock.name, error = %err, "failed to release lock guard");
        }
    }
}
