//! The job manager: submission, conflict-aware dispatch, cancellation, joins
//! and implicit rules.
//!
//! All scheduling state (the [`JobQueue`], the live-job registry, yielded
//! jobs and worker accounting) sits behind one `parking_lot::Mutex`. Dispatch
//! and completion also touch the [`LockManager`] graph, always after taking the
//! state lock. Neither lock is held while a job body or a listener runs.
//!
//! ```no_run
//! use std::sync::Arc;
//! use prometheus_jobs::{JobManager, JobManagerConfig, PathRule, Priority};
//!
//! let manager = JobManager::new(JobManagerConfig::default().with_max_workers(2))?;
//! let rule = PathRule::shared("/project");
//! let job = manager.submit(Priority::Long, Some(rule), |ctx| {
//!     ctx.check_cancelled()?;
//!     Ok(())
//! })?;
//! assert!(manager.join(&job)?.is_ok());
//! manager.shutdown();
//! # Ok::<(), prometheus_jobs::JobError>(())
//! ```

mod events;
pub(crate) mod stats;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::builders::JobManagerBuilder;
use crate::config::JobManagerConfig;
use crate::core::error::{JobError, ProgrammingError, Result};
use crate::core::listener::{JobChangeListener, JobEventKind};
use crate::core::report::FailureReporter;
use crate::core::rule::{self, RuleRef};
use crate::job::context::{self, JobContext};
use crate::job::queue::{JobQueue, Verdict};
use crate::job::{Job, JobId, JobResult, JobState, Priority};
use crate::lock::graph::RuleFrame;
use crate::lock::{LockManager, OrderedLock};
use crate::pool::WorkerPool;

use events::{EventBus, Notice};
use stats::ManagerCounters;

pub use stats::ManagerStats;

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Where a yielded job resumes and what it yielded to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResumeTicket {
    pub thread: ThreadId,
    /// The yielder is held back while this job is still waiting.
    pub yield_to: Option<JobId>,
}

pub(crate) struct ManagerState {
    pub queue: JobQueue,
    /// Jobs scheduled and not yet finalized.
    pub live: HashMap<JobId, Job>,
    pub yielded: HashMap<JobId, ResumeTicket>,
    pub pool: WorkerPool,
    pub suspended: bool,
    pub shutdown: bool,
}

pub(crate) struct Inner {
    pub(crate) id: u64,
    pub(crate) config: JobManagerConfig,
    pub(crate) state: Mutex<ManagerState>,
    /// Signalled when idle workers should re-scan the queue.
    pub(crate) work_available: Condvar,
    /// Signalled when a job is resumed or finalized.
    pub(crate) job_changed: Condvar,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) reporter: Arc<dyn FailureReporter>,
    pub(crate) events: EventBus,
    pub(crate) counters: ManagerCounters,
}

fn same_rule(a: &RuleRef, b: &RuleRef) -> bool {
    Arc::ptr_eq(a, b) || (rule::contains(a.as_ref(), b.as_ref()) && rule::contains(b.as_ref(), a.as_ref()))
}

impl Inner {
    /// Promote due sleepers, then scan the queue. With a `taker`, the first
    /// eligible job is handed to that idle worker and returned. Yielded jobs
    /// whose rule is free again are resumed on their own threads.
    pub(crate) fn dispatch(self: &Arc<Self>, st: &mut ManagerState, taker: Option<ThreadId>) -> Option<Job> {
        for job in st.queue.promote_due(Instant::now()) {
            debug!(job_id = job.id(), "sleeping job woke up");
            self.events.emit(&job, JobEventKind::Awake, None);
        }

        let mut taker = taker;
        let mut taken = None;
        loop {
            let ManagerState {
                queue,
                yielded,
                pool,
                suspended,
                ..
            } = &mut *st;
            let held_back: HashSet<JobId> = yielded
                .iter()
                .filter(|(_, t)| t.yield_to.is_some_and(|target| queue.is_pending(target)))
                .map(|(id, _)| *id)
                .collect();
            let suspended = *suspended;
            let taker_thread = taker;
            let mut claimed: Vec<RuleRef> = Vec::new();
            let mut graph = self.locks.graph();

            let outcome = queue.scan(|job| {
                let ticket = yielded.get(&job.id());
                if (ticket.is_none() && suspended) || held_back.contains(&job.id()) {
                    return Verdict::Hold;
                }
                if let Some(rule) = job.rule() {
                    if !graph.rule_available(rule) {
                        return Verdict::Blocked;
                    }
                    if claimed.iter().any(|c| rule::conflicts(c.as_ref(), rule.as_ref())) {
                        return Verdict::Hold;
                    }
                }
                let thread = match (ticket, taker) {
                    (Some(ticket), _) => ticket.thread,
                    (None, Some(thread)) => thread,
                    (None, None) => {
                        if let Some(rule) = job.rule() {
                            claimed.push(Arc::clone(rule));
                        }
                        return Verdict::Eligible;
                    }
                };
                if let Some(rule) = job.rule() {
                    graph.push_rule(
                        thread,
                        RuleFrame {
                            rule: Arc::clone(rule),
                            acquired: true,
                            job: Some(job.id()),
                        },
                    );
                }
                if ticket.is_some() {
                    Verdict::Resume
                } else {
                    taker = None;
                    Verdict::Take
                }
            });
            drop(graph);

            let progressed = outcome.taken.is_some() || !outcome.resumed.is_empty();
            if let Some(job) = outcome.taken {
                job.status().thread = taker_thread;
                pool.idle -= 1;
                pool.busy += 1;
                debug!(job_id = job.id(), job = job.name(), "dispatching job");
                self.events.emit(&job, JobEventKind::Running, None);
                taken = Some(job);
            }
            if !outcome.resumed.is_empty() {
                for job in &outcome.resumed {
                    yielded.remove(&job.id());
                    pool.parked -= 1;
                    pool.busy += 1;
                    debug!(job_id = job.id(), "resuming yielded job");
                }
                self.job_changed.notify_all();
            }
            if outcome.eligible > 0 {
                self.work_available.notify_all();
                self.ensure_worker(st, outcome.eligible);
            }
            if !progressed || held_back.is_empty() {
                break;
            }
        }
        if st.queue.next_wake().is_some() {
            self.ensure_worker(st, 0);
        }
        taken
    }

    pub(crate) fn schedule(self: &Arc<Self>, job: &Job, delay: Option<Duration>) -> Result<()> {
        let mut st = self.state.lock();
        if st.shutdown {
            return Err(JobError::ShutDown);
        }
        {
            let mut status = job.status();
            if status.manager.is_some_and(|owner| owner != self.id) {
                return Err(ProgrammingError::ForeignJob(job.id()).into());
            }
            if status.state != JobState::Created || st.live.contains_key(&job.id()) {
                return Err(ProgrammingError::NotSchedulable {
                    id: job.id(),
                    state: status.state,
                }
                .into());
            }
            status.manager = Some(self.id);
        }
        ManagerCounters::bump(&self.counters.submitted);
        st.live.insert(job.id(), job.clone());
        self.events.emit(job, JobEventKind::Scheduled, None);

        if job.is_cancel_requested() {
            self.cancel_unstarted(job);
        } else {
            match delay.filter(|d| !d.is_zero()) {
                Some(delay) => {
                    st.queue.enqueue_sleeping(job.clone(), Some(Instant::now() + delay));
                    self.events.emit(job, JobEventKind::Sleeping, None);
                    self.work_available.notify_all();
                }
                None => st.queue.enqueue(job.clone()),
            }
            debug!(
                job_id = job.id(),
                job = job.name(),
                priority = ?job.priority(),
                delay = ?delay,
                "job scheduled"
            );
            self.dispatch(&mut st, None);
        }
        drop(st);
        self.flush_events();
        Ok(())
    }

    /// Record a job as cancelled without it ever running. The job must
    /// already be out of the queue.
    pub(crate) fn cancel_unstarted(&self, job: &Job) {
        job.request_cancel();
        job.status().result = Some(JobResult::Cancelled);
        job.transition(JobState::Cancelled);
        ManagerCounters::bump(&self.counters.cancelled);
        self.events
            .emit(job, JobEventKind::Done, Some(JobResult::Cancelled));
        self.events.finalize(job.clone());
    }

    fn cancel(self: &Arc<Self>, job: &Job) -> bool {
        let mut st = self.state.lock();
        let owner = job.status().manager;
        let Some(owner) = owner else {
            job.request_cancel();
            return true;
        };
        if owner != self.id || !st.live.contains_key(&job.id()) {
            return false;
        }
        let stopped = !st.yielded.contains_key(&job.id())
            && st.queue.remove_queued(job.id()).is_some();
        if stopped {
            debug!(job_id = job.id(), "cancelled queued job");
            self.cancel_unstarted(job);
            self.dispatch(&mut st, None);
        } else {
            job.request_cancel();
            debug!(job_id = job.id(), "cancellation requested for running job");
        }
        drop(st);
        if !stopped {
            self.locks.wake_waiters();
        }
        self.flush_events();
        stopped
    }

    /// Deliver pending events and retire finished jobs, unless another
    /// thread is already doing so. Must not be called with the state lock held.
    pub(crate) fn flush_events(&self) {
        let mut claimed = false;
        while let Some(notice) = self.events.next(&mut claimed) {
            match notice {
                Notice::Event(event) => self.events.deliver(&event),
                Notice::Finalize(job) => {
                    let mut st = self.state.lock();
                    st.live.remove(&job.id());
                    self.job_changed.notify_all();
                }
            }
        }
    }

    pub(crate) fn join(self: &Arc<Self>, job: &Job, deadline: Option<Instant>) -> Result<JobResult> {
        match job.status().manager {
            None => return Err(ProgrammingError::NotScheduled(job.id()).into()),
            Some(owner) if owner != self.id => {
                return Err(ProgrammingError::ForeignJob(job.id()).into())
            }
            Some(_) => {}
        }
        let current = context::current_job();
        if current.as_ref() == Some(job) {
            return Err(ProgrammingError::JoinSelf(job.id()).into());
        }

        let mut st = self.state.lock();
        // A worker blocked in join does not count toward the worker cap.
        let parks = st.live.contains_key(&job.id())
            && current
                .as_ref()
                .is_some_and(|c| c.thread() == Some(thread::current().id()) && st.live.contains_key(&c.id()));
        if parks {
            st.pool.busy -= 1;
            st.pool.parked += 1;
            self.dispatch(&mut st, None);
        }
        // Joiners are released once the job's `Done` event has been delivered,
        // which is when the job leaves `live`.
        let outcome = loop {
            if !st.live.contains_key(&job.id()) {
                break Ok(job.result().unwrap_or(JobResult::Cancelled));
            }
            match deadline {
                Some(deadline) => {
                    if self.job_changed.wait_until(&mut st, deadline).timed_out()
                        && st.live.contains_key(&job.id())
                    {
                        break Err(JobError::Timeout);
                    }
                }
                None => self.job_changed.wait(&mut st),
            }
        };
        if parks {
            st.pool.parked -= 1;
            st.pool.busy += 1;
        }
        drop(st);
        self.flush_events();
        outcome
    }

    pub(crate) fn yield_rule(self: &Arc<Self>, job: &Job) -> Result<bool> {
        let me = thread::current().id();
        let Some(rule) = job.rule().cloned() else {
            return Ok(false);
        };
        let mut st = self.state.lock();
        if job.thread() != Some(me) || job.state() != JobState::Running {
            return Ok(false);
        }
        if let Some(top) = self.locks.graph().top_rule(me) {
            if top.job != Some(job.id()) {
                return Err(ProgrammingError::YieldWithNestedRule {
                    job: job.id(),
                    rule: rule::describe(top.rule.as_ref()),
                }
                .into());
            }
        }
        let Some(target) = st.queue.first_conflicting(rule.as_ref(), job.id()) else {
            return Ok(false);
        };
        {
            let mut graph = self.locks.graph();
            graph.remove_job_rule(me, job.id());
            self.locks.notify_all();
        }
        st.queue.requeue(job);
        st.yielded.insert(
            job.id(),
            ResumeTicket {
                thread: me,
                yield_to: Some(target.id()),
            },
        );
        st.pool.busy -= 1;
        st.pool.parked += 1;
        debug!(job_id = job.id(), yield_to = target.id(), "job yielded its rule");
        self.dispatch(&mut st, None);
        while st.yielded.contains_key(&job.id()) {
            self.job_changed.wait(&mut st);
        }
        drop(st);
        self.flush_events();
        Ok(true)
    }

    pub(crate) fn begin_rule(&self, rule: &RuleRef) -> Result<()> {
        self.locks.begin_rule(rule)
    }

    pub(crate) fn end_rule(self: &Arc<Self>, rule: &RuleRef) -> Result<()> {
        let me = thread::current().id();
        let mut st = self.state.lock();
        let freed = {
            let mut graph = self.locks.graph();
            let Some(top) = graph.top_rule(me) else {
                return Err(ProgrammingError::RuleNotBegun(rule::describe(rule.as_ref())).into());
            };
            if let Some(job) = top.job {
                return Err(if same_rule(&top.rule, rule) {
                    ProgrammingError::JobRuleEnded {
                        rule: rule::describe(rule.as_ref()),
                        job,
                    }
                } else {
                    ProgrammingError::RuleNotBegun(rule::describe(rule.as_ref()))
                }
                .into());
            }
            if !same_rule(&top.rule, rule) {
                return Err(ProgrammingError::RuleMismatch {
                    ended: rule::describe(rule.as_ref()),
                    expected: rule::describe(top.rule.as_ref()),
                }
                .into());
            }
            let freed = graph.pop_rule(me).is_some_and(|frame| frame.acquired);
            if freed {
                self.locks.notify_all();
            }
            freed
        };
        if freed {
            self.dispatch(&mut st, None);
        }
        drop(st);
        self.flush_events();
        Ok(())
    }

    /// Flag shutdown, cancel queued jobs and hand back the worker handles to
    /// join. Later calls return whatever handles are left.
    fn begin_shutdown(self: &Arc<Self>) -> Vec<(usize, JoinHandle<()>)> {
        let mut st = self.state.lock();
        if !st.shutdown {
            st.shutdown = true;
            info!(manager = self.id, "shutting down job manager");
            let ManagerState { queue, yielded, .. } = &mut *st;
            let drained = queue.drain_queued(|job| yielded.contains_key(&job.id()));
            for job in &drained {
                self.cancel_unstarted(job);
            }
            for job in st.live.values() {
                job.request_cancel();
            }
            self.dispatch(&mut st, None);
            self.work_available.notify_all();
            self.job_changed.notify_all();
        }
        let handles = st.pool.handles.drain().collect();
        drop(st);
        self.locks.wake_waiters();
        self.flush_events();
        handles
    }
}

/// Cooperative job scheduler with conflict rules and an elastic worker pool.
///
/// Dropping the manager signals shutdown without waiting for workers; call
/// [`shutdown`](Self::shutdown) to join them.
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    /// Create a manager with the given configuration and default hooks.
    ///
    /// # Errors
    /// [`JobError::InvalidConfig`] when the configuration does not validate.
    pub fn new(config: JobManagerConfig) -> Result<Self> {
        JobManagerBuilder::new().with_config(config).build()
    }

    /// Start a builder.
    #[must_use]
    pub fn builder() -> JobManagerBuilder {
        JobManagerBuilder::new()
    }

    pub(crate) fn from_parts(
        config: JobManagerConfig,
        locks: Arc<LockManager>,
        reporter: Arc<dyn FailureReporter>,
        listeners: Vec<Arc<dyn JobChangeListener>>,
    ) -> Result<Self> {
        config.validate().map_err(JobError::InvalidConfig)?;
        let events = EventBus::default();
        for listener in listeners {
            events.add_listener(listener);
        }
        let id = NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            manager = id,
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            "job manager started"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                config,
                state: Mutex::new(ManagerState {
                    queue: JobQueue::new(),
                    live: HashMap::new(),
                    yielded: HashMap::new(),
                    pool: WorkerPool::default(),
                    suspended: false,
                    shutdown: false,
                }),
                work_available: Condvar::new(),
                job_changed: Condvar::new(),
                locks,
                reporter,
                events,
                counters: ManagerCounters::default(),
            }),
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &JobManagerConfig {
        &self.inner.config
    }

    /// Build a job from a closure and schedule it.
    ///
    /// # Errors
    /// [`JobError::ShutDown`] after shutdown.
    pub fn submit<F>(&self, priority: Priority, rule: Option<RuleRef>, body: F) -> Result<Job>
    where
        F: Fn(&JobContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let job = Job::builder("job")
            .with_priority(priority)
            .with_optional_rule(rule)
            .build(body);
        self.schedule(&job)?;
        Ok(job)
    }

    /// Queue a job for execution.
    ///
    /// # Errors
    /// [`ProgrammingError::NotSchedulable`] if the job was scheduled before,
    /// [`ProgrammingError::ForeignJob`] if another manager owns it,
    /// [`JobError::ShutDown`] after shutdown.
    pub fn schedule(&self, job: &Job) -> Result<()> {
        self.inner.schedule(job, None)
    }

    /// Queue a job that becomes eligible once `delay` has elapsed.
    ///
    /// # Errors
    /// Same as [`schedule`](Self::schedule).
    pub fn schedule_after(&self, job: &Job, delay: Duration) -> Result<()> {
        self.inner.schedule(job, Some(delay))
    }

    /// Request cancellation. Returns `true` if the job was stopped before it
    /// ran; a running job only has its flag set and `false` is returned.
    pub fn cancel(&self, job: &Job) -> bool {
        self.inner.cancel(job)
    }

    /// Cancel every live job of `family`. Returns how many were stopped
    /// before running.
    pub fn cancel_family(&self, family: &str) -> usize {
        self.find(family)
            .iter()
            .filter(|job| self.inner.cancel(job))
            .count()
    }

    /// Block until the job has finished and its `Done` event was delivered.
    ///
    /// # Errors
    /// [`ProgrammingError::NotScheduled`], [`ProgrammingError::ForeignJob`]
    /// or [`ProgrammingError::JoinSelf`] on misuse.
    pub fn join(&self, job: &Job) -> Result<JobResult> {
        self.inner.join(job, None)
    }

    /// Like [`join`](Self::join) but gives up after `timeout`.
    ///
    /// # Errors
    /// [`JobError::Timeout`] when the job is still live after `timeout`.
    pub fn join_timeout(&self, job: &Job, timeout: Duration) -> Result<JobResult> {
        self.inner.join(job, Some(Instant::now() + timeout))
    }

    /// Block until no job of `family` is live. The calling job, if it
    /// belongs to the family, is ignored.
    ///
    /// # Errors
    /// Never fails today; kept fallible for parity with [`join`](Self::join).
    pub fn join_family(&self, family: &str) -> Result<()> {
        let current = context::current_job();
        let mut st = self.inner.state.lock();
        while st
            .live
            .values()
            .any(|job| job.belongs_to(family) && Some(job) != current.as_ref())
        {
            self.inner.job_changed.wait(&mut st);
        }
        Ok(())
    }

    /// Await a job's completion from async code.
    ///
    /// # Errors
    /// Same as [`join`](Self::join); [`JobError::Cancelled`] if the blocking
    /// task could not complete.
    #[cfg(feature = "tokio-runtime")]
    pub async fn join_async(&self, job: &Job) -> Result<JobResult> {
        let inner = Arc::clone(&self.inner);
        let job = job.clone();
        tokio::task::spawn_blocking(move || inner.join(&job, None))
            .await
            .map_err(|_| JobError::Cancelled)?
    }

    /// Put a waiting or blocked job to sleep until [`wake_up`](Self::wake_up).
    /// Returns `true` if the job is sleeping afterwards.
    pub fn sleep(&self, job: &Job) -> bool {
        let mut st = self.inner.state.lock();
        if !st.live.contains_key(&job.id()) || st.yielded.contains_key(&job.id()) {
            return false;
        }
        let was_sleeping = job.state() == JobState::Sleeping;
        let sleeping = st.queue.sleep(job.id(), None);
        if sleeping && !was_sleeping {
            debug!(job_id = job.id(), "job put to sleep");
            self.inner.events.emit(job, JobEventKind::Sleeping, None);
            self.inner.dispatch(&mut st, None);
        }
        drop(st);
        self.inner.flush_events();
        sleeping
    }

    /// Return a sleeping job to the queue, after `delay` if non-zero.
    /// Returns `true` if the job was sleeping.
    pub fn wake_up(&self, job: &Job, delay: Duration) -> bool {
        let mut st = self.inner.state.lock();
        if job.state() != JobState::Sleeping || !st.live.contains_key(&job.id()) {
            return false;
        }
        let at = (!delay.is_zero()).then(|| Instant::now() + delay);
        if st.queue.wake(job.id(), at).is_some() {
            self.inner.events.emit(job, JobEventKind::Awake, None);
            self.inner.dispatch(&mut st, None);
        } else {
            self.inner.work_available.notify_all();
            self.inner.ensure_worker(&mut st, 0);
        }
        drop(st);
        self.inner.flush_events();
        true
    }

    /// Stop dispatching queued jobs. Running jobs continue and yielded jobs
    /// may still resume.
    pub fn suspend(&self) {
        self.inner.state.lock().suspended = true;
        info!(manager = self.inner.id, "job manager suspended");
    }

    /// Restart dispatching after [`suspend`](Self::suspend).
    pub fn resume(&self) {
        let mut st = self.inner.state.lock();
        st.suspended = false;
        info!(manager = self.inner.id, "job manager resumed");
        self.inner.dispatch(&mut st, None);
        drop(st);
        self.inner.flush_events();
    }

    /// True while dispatching is suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.inner.state.lock().suspended
    }

    /// Unfinished jobs of `family`, ordered by id.
    #[must_use]
    pub fn find(&self, family: &str) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .state
            .lock()
            .live
            .values()
            .filter(|job| job.belongs_to(family) && !job.state().is_terminal())
            .cloned()
            .collect();
        jobs.sort_by_key(Job::id);
        jobs
    }

    /// The job of this manager running on the calling thread.
    #[must_use]
    pub fn current_job(&self) -> Option<Job> {
        context::current_job().filter(|job| job.status().manager == Some(self.inner.id))
    }

    /// Begin `rule` on the calling thread, blocking while it conflicts with a
    /// rule held by another thread or running job. Nested calls must be
    /// balanced by [`end_rule`](Self::end_rule) in reverse order.
    ///
    /// # Errors
    /// [`JobError::Deadlock`] if the wait closes a cycle and this thread is
    /// the victim; [`JobError::Cancelled`] if the calling job is cancelled
    /// while waiting.
    pub fn begin_rule(&self, rule: &RuleRef) -> Result<()> {
        self.inner.begin_rule(rule)
    }

    /// End the innermost rule begun on the calling thread.
    ///
    /// # Errors
    /// [`ProgrammingError::RuleMismatch`], [`ProgrammingError::RuleNotBegun`]
    /// or [`ProgrammingError::JobRuleEnded`] on unbalanced calls.
    pub fn end_rule(&self, rule: &RuleRef) -> Result<()> {
        self.inner.end_rule(rule)
    }

    /// Create a lock tracked by this manager's lock manager.
    #[must_use]
    pub fn new_lock(&self, name: impl Into<String>) -> OrderedLock {
        self.inner.locks.new_lock(name)
    }

    /// Acquire `lock` on the calling thread.
    ///
    /// # Errors
    /// See [`OrderedLock::acquire`].
    pub fn acquire_lock(&self, lock: &OrderedLock) -> Result<()> {
        lock.acquire()
    }

    /// Release one level of `lock`.
    ///
    /// # Errors
    /// See [`OrderedLock::release`].
    pub fn release_lock(&self, lock: &OrderedLock) -> Result<()> {
        lock.release()
    }

    /// The lock manager shared by this job manager.
    #[must_use]
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.inner.locks
    }

    /// Register a job change listener.
    pub fn add_listener(&self, listener: Arc<dyn JobChangeListener>) {
        self.inner.events.add_listener(listener);
    }

    /// Remove a previously added listener. Returns `true` if it was found.
    pub fn remove_listener(&self, listener: &Arc<dyn JobChangeListener>) -> bool {
        self.inner.events.remove_listener(listener)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        let st = self.inner.state.lock();
        let counts = st.queue.counts();
        let mut stats = ManagerStats {
            worker_count: st.pool.threads,
            idle_workers: st.pool.idle,
            busy_workers: st.pool.busy,
            parked_workers: st.pool.parked,
            waiting_jobs: counts.waiting,
            blocked_jobs: counts.blocked,
            sleeping_jobs: counts.sleeping,
            running_jobs: counts.running,
            suspended: st.suspended,
            ..ManagerStats::default()
        };
        drop(st);
        self.inner.counters.fill(&mut stats);
        stats
    }

    /// True once shutdown has begun.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// Cancel queued jobs, flag running ones, and join every worker with the
    /// configured per-worker timeout. Workers that do not exit in time are
    /// detached.
    pub fn shutdown(&self) {
        let handles = self.inner.begin_shutdown();
        let me = thread::current().id();
        let timeout = self.inner.config.shutdown_timeout();
        let worker_count = handles.len();

        for (worker_id, handle) in handles {
            if handle.thread().id() == me {
                warn!(worker_id, "shutdown called from a worker thread, not joining itself");
                continue;
            }
            let (tx, rx) = crossbeam_channel::bounded(1);
            let join_thread = thread::spawn(move || {
                let _ = tx.send(handle.join().is_ok());
            });
            match rx.recv_timeout(timeout) {
                Ok(true) => {
                    debug!(worker_id, "worker joined");
                    let _ = join_thread.join();
                }
                Ok(false) => {
                    warn!(worker_id, "worker panicked");
                    let _ = join_thread.join();
                }
                Err(_) => {
                    warn!(worker_id, "worker did not exit within timeout, detaching");
                }
            }
        }
        info!(worker_count, "job manager shut down");
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        if !self.inner.state.lock().shutdown {
            debug!(manager = self.inner.id, "job manager dropped without shutdown, detaching workers");
        }
        drop(self.inner.begin_shutdown());
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
