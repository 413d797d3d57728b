//! Integration tests for the job manager
//!
//! These tests drive real worker threads through:
//! - Parallel execution and rule conflicts
//! - Priority and FIFO dispatch order
//! - Cancellation of queued and running jobs
//! - Failure reporting, panics and worker aborts
//! - Sleeping, delayed jobs, yielding and families
//! - Suspend/resume, listeners, progress, statistics and shutdown

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use prometheus_jobs::{
    FailureReporter, InMemoryEventLog, Job, JobBuilder, JobChangeListener, JobContext, JobError,
    JobEvent, JobEventKind, JobId, JobManager, JobManagerConfig, JobResult, JobState, PathRule, Priority, ProgrammingError,
    RuleRef, WorkerAbort,
};
use rand::Rng;

// ============================================================================
// HELPERS
// ============================================================================

fn manager(max_workers: usize) -> JobManager {
    prometheus_jobs::util::init_tracing();
    JobManager::new(
        JobManagerConfig::new()
            .with_max_workers(max_workers)
            .with_idle_timeout(Duration::from_millis(250)),
    )
    .unwrap()
}

fn manager_with_reporter(max_workers: usize, reporter: Arc<RecordingReporter>) -> JobManager {
    JobManager::builder()
        .with_max_workers(max_workers)
        .with_idle_timeout(Duration::from_millis(250))
        .with_reporter(reporter)
        .build()
        .unwrap()
}

/// Tracks how many bodies run at once.
#[derive(Default)]
struct ConcurrencyProbe {
    current: AtomicUsize,
    max: AtomicUsize,
    runs: AtomicUsize,
}

impl ConcurrencyProbe {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

/// Reporter that keeps every failure message.
#[derive(Default)]
struct RecordingReporter {
    failures: Mutex<Vec<(JobId, String)>>,
}

impl RecordingReporter {
    fn messages(&self) -> Vec<String> {
        self.failures.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

impl FailureReporter for RecordingReporter {
    fn report_failure(&self, job_id: JobId, _name: &str, cause: &anyhow::Error) {
        self.failures.lock().push((job_id, cause.to_string()));
    }
}

fn probed_job(name: &str, rule: Option<RuleRef>, probe: &Arc<ConcurrencyProbe>, work: Duration) -> Job {
    let probe = Arc::clone(probe);
    JobBuilder::new(name)
        .with_optional_rule(rule)
        .build(move |_ctx: &JobContext| {
            probe.enter();
            thread::sleep(work);
            probe.exit();
            Ok(())
        })
}

/// A job that blocks until the gate sender is used or dropped.
fn gated_job(name: &str, rule: Option<RuleRef>, gate: Receiver<()>) -> Job {
    JobBuilder::new(name)
        .with_optional_rule(rule)
        .build(move |_ctx: &JobContext| {
            let _ = gate.recv_timeout(Duration::from_secs(5));
            Ok(())
        })
}

/// Listener that stalls on the `Done` event of jobs named `name`, first
/// signalling that it has started.
struct StallOnDone {
    name: &'static str,
    delay: Duration,
    entered: Sender<()>,
}

impl JobChangeListener for StallOnDone {
    fn on_event(&self, event: &JobEvent) {
        if event.kind == JobEventKind::Done && event.job_name == self.name {
            let _ = self.entered.try_send(());
            thread::sleep(self.delay);
        }
    }
}

/// Schedule `first` then a job sharing its rule, and return the state of
/// `first` as seen from inside the second body.
fn state_seen_by_successor(manager: &JobManager, first: &Job, rule: &RuleRef) -> Option<JobState> {
    let seen = Arc::new(Mutex::new(None));
    let record = Arc::clone(&seen);
    let predecessor = first.clone();
    let second = JobBuilder::new("second")
        .with_rule(Arc::clone(rule))
        .build(move |_ctx: &JobContext| {
            *record.lock() = Some(predecessor.state());
            Ok(())
        });
    manager.schedule(first).unwrap();
    manager.schedule(&second).unwrap();
    assert!(manager.join(&second).unwrap().is_ok());
    assert!(manager.join(first).unwrap().is_ok());
    let state = *seen.lock();
    state
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ============================================================================
// DISPATCH AND CONFLICTS
// ============================================================================

#[test]
fn test_rule_less_jobs_run_in_parallel_up_to_cap() {
    let manager = manager(2);
    let probe = Arc::new(ConcurrencyProbe::default());
    let jobs: Vec<Job> = (0..3)
        .map(|i| probed_job(&format!("free-{i}"), None, &probe, Duration::from_millis(150)))
        .collect();
    for job in &jobs {
        manager.schedule(job).unwrap();
    }
    for job in &jobs {
        assert!(manager.join(job).unwrap().is_ok());
        assert_eq!(job.state(), JobState::Done);
    }
    assert_eq!(probe.runs(), 3);
    assert_eq!(probe.max(), 2);
    manager.shutdown();
}

#[test]
fn test_conflicting_rule_jobs_never_overlap() {
    let manager = manager(4);
    let probe = Arc::new(ConcurrencyProbe::default());
    let parent = PathRule::shared("/project");
    let child = PathRule::shared("/project/src");
    let jobs: Vec<Job> = (0..5)
        .map(|i| {
            let rule = if i % 2 == 0 { &parent } else { &child };
            probed_job(&format!("locked-{i}"), Some(Arc::clone(rule)), &probe, Duration::from_millis(20))
        })
        .collect();
    for job in &jobs {
        manager.schedule(job).unwrap();
    }
    for job in &jobs {
        assert!(manager.join(job).unwrap().is_ok());
    }
    assert_eq!(probe.runs(), 5);
    assert_eq!(probe.max(), 1);
    manager.shutdown();
}

#[test]
fn test_conflicting_job_starts_after_predecessor_is_terminal() {
    let manager = manager(2);
    let rule = PathRule::shared("/r");
    for i in 0..100 {
        let first = JobBuilder::new(format!("first-{i}"))
            .with_rule(Arc::clone(&rule))
            .build(|_ctx: &JobContext| Ok(()));
        assert_eq!(
            state_seen_by_successor(&manager, &first, &rule),
            Some(JobState::Done),
            "iteration {i}"
        );
    }
    manager.shutdown();
}

#[test]
fn test_slow_listener_does_not_delay_terminal_state() {
    let manager = manager(2);
    let (entered, _entered_rx) = unbounded();
    manager.add_listener(Arc::new(StallOnDone {
        name: "first",
        delay: Duration::from_millis(300),
        entered,
    }));
    let rule = PathRule::shared("/r");
    let first = JobBuilder::new("first")
        .with_rule(Arc::clone(&rule))
        .build(|_ctx: &JobContext| Ok(()));
    assert_eq!(
        state_seen_by_successor(&manager, &first, &rule),
        Some(JobState::Done)
    );
    manager.shutdown();
}

#[test]
fn test_disjoint_rules_run_concurrently() {
    let manager = manager(2);
    let probe = Arc::new(ConcurrencyProbe::default());
    let a = probed_job("a", Some(PathRule::shared("/a")), &probe, Duration::from_millis(150));
    let b = probed_job("b", Some(PathRule::shared("/b")), &probe, Duration::from_millis(150));
    manager.schedule(&a).unwrap();
    manager.schedule(&b).unwrap();
    manager.join(&a).unwrap();
    manager.join(&b).unwrap();
    assert_eq!(probe.max(), 2);
    manager.shutdown();
}

#[test]
fn test_priority_then_fifo_order() {
    let manager = manager(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    manager.suspend();

    let plan = [
        ("decorate", Priority::Decorate),
        ("long-1", Priority::Long),
        ("build", Priority::Build),
        ("interactive", Priority::Interactive),
        ("long-2", Priority::Long),
        ("short", Priority::Short),
    ];
    let jobs: Vec<Job> = plan
        .iter()
        .map(|(name, priority)| {
            let order = Arc::clone(&order);
            let label = (*name).to_string();
            let job = JobBuilder::new(*name)
                .with_priority(*priority)
                .build(move |_ctx: &JobContext| {
                    order.lock().push(label.clone());
                    Ok(())
                });
            manager.schedule(&job).unwrap();
            job
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    assert!(order.lock().is_empty());
    assert!(jobs.iter().all(|j| j.state() == JobState::Waiting));

    manager.resume();
    for job in &jobs {
        manager.join(job).unwrap();
    }
    assert_eq!(
        *order.lock(),
        vec!["interactive", "short", "long-1", "long-2", "build", "decorate"]
    );
    manager.shutdown();
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[test]
fn test_cancel_waiting_job_never_runs() {
    let manager = manager(1);
    let (release, gate) = bounded::<()>(0);
    let blocker = gated_job("blocker", None, gate);
    manager.schedule(&blocker).unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let ran_flag = Arc::clone(&ran);
    let victim = Job::new("victim", move |_ctx: &JobContext| {
        ran_flag.store(true, Ordering::SeqCst);
        Ok(())
    });
    manager.schedule(&victim).unwrap();

    assert!(manager.cancel(&victim));
    drop(release);

    assert!(manager.join(&victim).unwrap().is_cancelled());
    assert!(manager.join(&blocker).unwrap().is_ok());
    assert_eq!(victim.state(), JobState::Cancelled);
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!manager.cancel(&victim));
    manager.shutdown();
}

#[test]
fn test_cancelled_job_state_is_immediate_while_events_drain() {
    let manager = manager(1);
    let (entered, entered_rx) = bounded::<()>(1);
    manager.add_listener(Arc::new(StallOnDone {
        name: "slow",
        delay: Duration::from_millis(300),
        entered,
    }));

    // The worker finishing `slow` owns event delivery while it stalls.
    let slow = Job::new("slow", |_ctx: &JobContext| Ok(()));
    manager.schedule(&slow).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(slow.state(), JobState::Done);

    let queued = Job::new("queued", |_ctx: &JobContext| Ok(()));
    let sleeper = Job::new("sleeper", |_ctx: &JobContext| Ok(()));
    manager.schedule(&queued).unwrap();
    manager.schedule_after(&sleeper, Duration::from_secs(30)).unwrap();
    assert_eq!(sleeper.state(), JobState::Sleeping);

    assert!(manager.cancel(&queued));
    assert_eq!(queued.state(), JobState::Cancelled);
    assert!(manager.cancel(&sleeper));
    assert_eq!(sleeper.state(), JobState::Cancelled);
    assert!(!manager.wake_up(&sleeper, Duration::ZERO));

    assert!(manager.join(&queued).unwrap().is_cancelled());
    assert!(manager.join(&sleeper).unwrap().is_cancelled());
    assert!(manager.join(&slow).unwrap().is_ok());
    manager.shutdown();
}

#[test]
fn test_cancel_before_schedule() {
    let manager = manager(1);
    let job = Job::new("early", |_ctx: &JobContext| Ok(()));
    assert!(manager.cancel(&job));
    manager.schedule(&job).unwrap();
    assert!(manager.join(&job).unwrap().is_cancelled());
    assert_eq!(manager.stats().cancelled_jobs, 1);
    manager.shutdown();
}

#[test]
fn test_cooperative_cancellation_of_running_job() {
    let reporter = Arc::new(RecordingReporter::default());
    let manager = manager_with_reporter(1, Arc::clone(&reporter));
    let (started_tx, started) = bounded::<()>(1);
    let job = Job::new("spinner", move |ctx: &JobContext| {
        let _ = started_tx.send(());
        loop {
            ctx.check_cancelled()?;
            thread::sleep(Duration::from_millis(5));
        }
    });
    manager.schedule(&job).unwrap();
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    assert!(!manager.cancel(&job));
    assert!(job.is_cancel_requested());
    assert!(manager.join(&job).unwrap().is_cancelled());
    assert_eq!(job.state(), JobState::Cancelled);
    assert!(reporter.messages().is_empty());
    manager.shutdown();
}

// ============================================================================
// FAILURES
// ============================================================================

#[test]
fn test_failed_job_is_reported() {
    let reporter = Arc::new(RecordingReporter::default());
    let manager = manager_with_reporter(2, Arc::clone(&reporter));
    let job = Job::new("broken", |_ctx: &JobContext| Err(anyhow!("disk full")));
    manager.schedule(&job).unwrap();

    let result = manager.join(&job).unwrap();
    assert!(result.is_failed());
    assert_eq!(result.error().unwrap().to_string(), "disk full");
    assert_eq!(job.state(), JobState::Done);
    assert_eq!(reporter.messages(), vec!["disk full".to_string()]);
    assert_eq!(manager.stats().failed_jobs, 1);
    manager.shutdown();
}

#[test]
fn test_panicking_job_fails_and_worker_keeps_going() {
    let manager = manager(1);
    let job = Job::new("panics", |_ctx: &JobContext| -> anyhow::Result<()> { panic!("kaboom") });
    manager.schedule(&job).unwrap();
    let result = manager.join(&job).unwrap();
    assert!(result.is_failed());
    assert!(result.error().unwrap().to_string().contains("kaboom"));

    let next = manager.submit(Priority::Short, None, |_ctx| Ok(())).unwrap();
    assert!(manager.join(&next).unwrap().is_ok());
    assert_eq!(manager.stats().aborted_workers, 0);
    manager.shutdown();
}

#[test]
fn test_worker_abort_replaces_worker() {
    let manager = manager(1);
    let job = Job::new("fatal", |_ctx: &JobContext| -> anyhow::Result<()> {
        WorkerAbort::raise("corrupted state")
    });
    manager.schedule(&job).unwrap();
    let result = manager.join(&job).unwrap();
    assert!(result.error().unwrap().to_string().contains("corrupted state"));
    assert!(wait_for(|| manager.stats().aborted_workers == 1));

    let next = manager.submit(Priority::Long, None, |_ctx| Ok(())).unwrap();
    assert!(manager.join(&next).unwrap().is_ok());
    manager.shutdown();
}

#[test]
fn test_leaked_rule_is_released_and_reported() {
    let reporter = Arc::new(RecordingReporter::default());
    let manager = manager_with_reporter(2, Arc::clone(&reporter));
    let rule = PathRule::shared("/leaky");
    let leaked_rule = Arc::clone(&rule);
    let leaker = Job::new("leaker", move |ctx: &JobContext| {
        ctx.begin_rule(&leaked_rule)?;
        Ok(())
    });
    manager.schedule(&leaker).unwrap();
    assert!(manager.join(&leaker).unwrap().is_ok());
    assert_eq!(reporter.messages().len(), 1);
    assert!(reporter.messages()[0].contains("leaky"));

    // The rule is free again for a conflicting job.
    let follower = manager.submit(Priority::Long, Some(rule), |_ctx| Ok(())).unwrap();
    assert!(manager
        .join_timeout(&follower, Duration::from_secs(5))
        .unwrap()
        .is_ok());
    manager.shutdown();
}

// ============================================================================
// JOIN
// ============================================================================

#[test]
fn test_join_misuse_is_rejected() {
    let other = manager(1);
    let manager = Arc::new(manager(2));

    let unscheduled = Job::new("idle", |_ctx: &JobContext| Ok(()));
    assert!(matches!(
        manager.join(&unscheduled),
        Err(JobError::Programming(ProgrammingError::NotScheduled(_)))
    ));

    let inner = Arc::clone(&manager);
    let self_join = Job::new("self-join", move |_ctx: &JobContext| {
        let me = inner.current_job().ok_or_else(|| anyhow!("no current job"))?;
        match inner.join(&me) {
            Err(JobError::Programming(ProgrammingError::JoinSelf(_))) => Ok(()),
            other => Err(anyhow!("unexpected join outcome: {other:?}")),
        }
    });
    manager.schedule(&self_join).unwrap();
    assert!(manager.join(&self_join).unwrap().is_ok());

    assert!(matches!(
        manager.schedule(&self_join),
        Err(JobError::Programming(ProgrammingError::NotSchedulable { .. }))
    ));
    assert!(matches!(
        other.schedule(&self_join),
        Err(JobError::Programming(ProgrammingError::ForeignJob(_)))
    ));
    assert!(matches!(
        other.join(&self_join),
        Err(JobError::Programming(ProgrammingError::ForeignJob(_)))
    ));
    other.shutdown();
    manager.shutdown();
}

#[test]
fn test_join_timeout_expires_then_succeeds() {
    let manager = manager(1);
    let (release, gate) = bounded::<()>(0);
    let job = gated_job("slow", None, gate);
    manager.schedule(&job).unwrap();

    assert!(matches!(
        manager.join_timeout(&job, Duration::from_millis(50)),
        Err(JobError::Timeout)
    ));
    drop(release);
    assert!(manager.join(&job).unwrap().is_ok());
    manager.shutdown();
}

#[test]
fn test_worker_joining_another_job_does_not_starve_pool() {
    let manager = Arc::new(manager(1));
    let inner = Arc::clone(&manager);
    let parent = Job::new("parent", move |_ctx: &JobContext| {
        let child = inner.submit(Priority::Short, None, |_ctx| Ok(()))?;
        let result = inner.join(&child)?;
        if result.is_ok() {
            Ok(())
        } else {
            Err(anyhow!("child did not complete"))
        }
    });
    manager.schedule(&parent).unwrap();
    assert!(manager
        .join_timeout(&parent, Duration::from_secs(5))
        .unwrap()
        .is_ok());
    manager.shutdown();
}

// ============================================================================
// SLEEP, DELAY AND YIELD
// ============================================================================

#[test]
fn test_sleep_and_wake_up() {
    let manager = manager(1);
    manager.suspend();
    let job = Job::new("napper", |_ctx: &JobContext| Ok(()));
    manager.schedule(&job).unwrap();
    assert!(manager.sleep(&job));
    assert_eq!(job.state(), JobState::Sleeping);
    manager.resume();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(job.state(), JobState::Sleeping);
    assert_eq!(manager.stats().sleeping_jobs, 1);

    assert!(manager.wake_up(&job, Duration::ZERO));
    assert!(manager.join(&job).unwrap().is_ok());
    assert!(!manager.wake_up(&job, Duration::ZERO));
    manager.shutdown();
}

#[test]
fn test_schedule_after_delays_start() {
    let log = Arc::new(InMemoryEventLog::new(64));
    let manager = JobManager::builder()
        .with_max_workers(1)
        .with_listener(Arc::clone(&log) as Arc<dyn prometheus_jobs::JobChangeListener>)
        .build()
        .unwrap();
    let started_at = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&started_at);
    let job = Job::new("delayed", move |_ctx: &JobContext| {
        *slot.lock() = Some(Instant::now());
        Ok(())
    });

    let scheduled_at = Instant::now();
    manager.schedule_after(&job, Duration::from_millis(100)).unwrap();
    assert_eq!(job.state(), JobState::Sleeping);
    assert!(manager.join(&job).unwrap().is_ok());

    let started = started_at.lock().take().unwrap();
    assert!(started.duration_since(scheduled_at) >= Duration::from_millis(100));
    assert_eq!(
        log.kinds_for(job.id()),
        vec![
            JobEventKind::Scheduled,
            JobEventKind::Sleeping,
            JobEventKind::Awake,
            JobEventKind::Running,
            JobEventKind::Done,
        ]
    );
    manager.shutdown();
}

#[test]
fn test_yield_rule_lets_conflicting_job_through() {
    let manager = manager(2);
    let rule = PathRule::shared("/shared");
    let order = Arc::new(Mutex::new(Vec::new()));
    let (started_tx, started) = bounded::<()>(1);
    let (go_tx, go) = bounded::<()>(1);

    let log = Arc::clone(&order);
    let long = JobBuilder::new("long")
        .with_rule(Arc::clone(&rule))
        .build(move |ctx: &JobContext| {
            log.lock().push("long-start");
            let _ = started_tx.send(());
            let _ = go.recv_timeout(Duration::from_secs(5));
            if !ctx.yield_rule()? {
                return Err(anyhow!("nothing to yield to"));
            }
            log.lock().push("long-resumed");
            Ok(())
        });
    manager.schedule(&long).unwrap();
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    let log = Arc::clone(&order);
    let short = JobBuilder::new("short")
        .with_rule(Arc::clone(&rule))
        .build(move |_ctx: &JobContext| {
            log.lock().push("short");
            Ok(())
        });
    manager.schedule(&short).unwrap();
    assert!(wait_for(|| short.state() == JobState::Blocked));
    go_tx.send(()).unwrap();

    assert!(manager.join(&long).unwrap().is_ok());
    assert!(manager.join(&short).unwrap().is_ok());
    assert_eq!(*order.lock(), vec!["long-start", "short", "long-resumed"]);
    manager.shutdown();
}

#[test]
fn test_yield_without_contention_returns_false() {
    let manager = manager(1);
    let job = JobBuilder::new("alone")
        .with_rule(PathRule::shared("/alone"))
        .build(|ctx: &JobContext| {
            if ctx.yield_rule()? {
                Err(anyhow!("yielded with nobody waiting"))
            } else {
                Ok(())
            }
        });
    manager.schedule(&job).unwrap();
    assert!(manager.join(&job).unwrap().is_ok());
    manager.shutdown();
}

// ============================================================================
// FAMILIES AND SUSPEND
// ============================================================================

#[test]
fn test_job_families() {
    let manager = manager(2);
    manager.suspend();
    let family: Vec<Job> = (0..3)
        .map(|i| {
            let job = JobBuilder::new(format!("indexer-{i}"))
                .with_family("indexing")
                .build(|_ctx: &JobContext| Ok(()));
            manager.schedule(&job).unwrap();
            job
        })
        .collect();
    let outsider = Job::new("outsider", |_ctx: &JobContext| Ok(()));
    manager.schedule(&outsider).unwrap();

    assert_eq!(manager.find("indexing"), family);
    assert_eq!(manager.cancel_family("indexing"), 3);
    manager.join_family("indexing").unwrap();
    assert!(manager.find("indexing").is_empty());
    assert!(family.iter().all(|j| j.state() == JobState::Cancelled));

    manager.resume();
    assert!(manager.join(&outsider).unwrap().is_ok());
    manager.shutdown();
}

#[test]
fn test_suspend_holds_queue_until_resume() {
    let manager = manager(2);
    manager.suspend();
    assert!(manager.is_suspended());
    let job = manager.submit(Priority::Interactive, None, |_ctx| Ok(())).unwrap();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(job.state(), JobState::Waiting);
    let stats = manager.stats();
    assert!(stats.suspended);
    assert_eq!(stats.waiting_jobs, 1);

    manager.resume();
    assert!(manager.join(&job).unwrap().is_ok());
    assert!(!manager.is_suspended());
    manager.shutdown();
}

// ============================================================================
// LISTENERS, PROGRESS AND STATS
// ============================================================================

#[test]
fn test_listener_sees_lifecycle_in_order() {
    let manager = manager(2);
    let log = Arc::new(InMemoryEventLog::new(64));
    let listener: Arc<dyn prometheus_jobs::JobChangeListener> = log.clone();
    manager.add_listener(Arc::clone(&listener));

    let job = manager
        .submit(Priority::Long, Some(PathRule::shared("/watched")), |_ctx| Ok(()))
        .unwrap();
    manager.join(&job).unwrap();
    assert_eq!(
        log.kinds_for(job.id()),
        vec![JobEventKind::Scheduled, JobEventKind::Running, JobEventKind::Done]
    );
    let done = log.events().into_iter().find(|e| e.kind == JobEventKind::Done).unwrap();
    assert!(done.result.unwrap().is_ok());

    assert!(manager.remove_listener(&listener));
    log.clear();
    let quiet = manager.submit(Priority::Long, None, |_ctx| Ok(())).unwrap();
    manager.join(&quiet).unwrap();
    assert!(log.events().is_empty());
    manager.shutdown();
}

#[test]
fn test_progress_is_reported() {
    let manager = manager(1);
    let job = Job::new("counter", |ctx: &JobContext| {
        ctx.begin_task(4);
        for _ in 0..4 {
            ctx.worked(1);
        }
        Ok(())
    });
    manager.schedule(&job).unwrap();
    manager.join(&job).unwrap();
    assert_eq!(job.progress().total, 4);
    assert_eq!(job.progress().fraction(), Some(1.0));
    manager.shutdown();
}

#[test]
fn test_stats_count_outcomes() {
    let manager = manager(2);
    let mut jobs = Vec::new();
    for _ in 0..3 {
        jobs.push(manager.submit(Priority::Short, None, |_ctx| Ok(())).unwrap());
    }
    jobs.push(
        manager
            .submit(Priority::Short, None, |_ctx| Err(anyhow!("nope")))
            .unwrap(),
    );
    for job in &jobs {
        manager.join(job).unwrap();
    }
    let stats = manager.stats();
    assert_eq!(stats.submitted_jobs, 4);
    assert_eq!(stats.completed_jobs, 3);
    assert_eq!(stats.failed_jobs, 1);
    assert!(stats.worker_count <= 2);
    assert_eq!(stats.running_jobs, 0);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["completed_jobs"], 3);
    manager.shutdown();
}

// ============================================================================
// WORKER POOL
// ============================================================================

#[test]
fn test_idle_workers_retire_down_to_min_workers() {
    let manager = JobManager::builder()
        .with_min_workers(1)
        .with_max_workers(3)
        .with_idle_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let (release, gate) = bounded::<()>(0);
    let jobs: Vec<Job> = (0..3)
        .map(|i| gated_job(&format!("held-{i}"), None, gate.clone()))
        .collect();
    for job in &jobs {
        manager.schedule(job).unwrap();
    }
    assert!(wait_for(|| manager.stats().busy_workers == 3));
    assert_eq!(manager.stats().worker_count, 3);

    drop(release);
    for job in &jobs {
        assert!(manager.join(job).unwrap().is_ok());
    }
    assert!(wait_for(|| manager.stats().worker_count == 1));

    // The resident worker outlives further idle periods.
    thread::sleep(Duration::from_millis(350));
    let stats = manager.stats();
    assert_eq!(stats.worker_count, 1);
    assert_eq!(stats.idle_workers, 1);
    manager.shutdown();
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_cancels_queued_and_running_jobs() {
    let manager = manager(1);
    let (started_tx, started) = bounded::<()>(1);
    let running = Job::new("running", move |ctx: &JobContext| {
        let _ = started_tx.send(());
        loop {
            ctx.check_cancelled()?;
            thread::sleep(Duration::from_millis(5));
        }
    });
    manager.schedule(&running).unwrap();
    started.recv_timeout(Duration::from_secs(5)).unwrap();
    let queued = Job::new("queued", |_ctx: &JobContext| Ok(()));
    manager.schedule(&queued).unwrap();

    manager.shutdown();
    assert!(manager.is_shut_down());
    assert_eq!(queued.state(), JobState::Cancelled);
    assert!(matches!(running.result(), Some(JobResult::Cancelled)));

    assert!(matches!(
        manager.submit(Priority::Long, None, |_ctx| Ok(())),
        Err(JobError::ShutDown)
    ));
}

// ============================================================================
// ASYNC
// ============================================================================

#[tokio::test]
async fn test_join_async() {
    let manager = manager(2);
    let jobs: Vec<Job> = (0..2)
        .map(|_| {
            manager
                .submit(Priority::Short, None, |_ctx| {
                    thread::sleep(Duration::from_millis(20));
                    Ok(())
                })
                .unwrap()
        })
        .collect();
    let results = futures::future::join_all(jobs.iter().map(|job| manager.join_async(job))).await;
    assert!(results.into_iter().all(|r| r.unwrap().is_ok()));
    manager.shutdown();
}

struct Ticker {
    ticks: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl prometheus_jobs::AsyncJobBody for Ticker {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
        for _ in 0..3 {
            ctx.check_cancelled()?;
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[test]
fn test_async_job_body_runs_on_worker() {
    let manager = manager(1);
    let ticks = Arc::new(AtomicUsize::new(0));
    let job = JobBuilder::new("ticker").build_async(Ticker {
        ticks: Arc::clone(&ticks),
    });
    manager.schedule(&job).unwrap();
    assert!(manager.join(&job).unwrap().is_ok());
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    manager.shutdown();
}

// ============================================================================
// STRESS
// ============================================================================

#[test]
fn test_random_conflicting_jobs_respect_rules() {
    const PATHS: [&str; 3] = ["/r0", "/r1", "/r2"];
    let manager = manager(4);
    let holders: Arc<Vec<AtomicUsize>> = Arc::new((0..PATHS.len()).map(|_| AtomicUsize::new(0)).collect());
    let (violations_tx, violations) = unbounded::<String>();
    let mut rng = rand::rng();

    let jobs: Vec<Job> = (0..40)
        .map(|i| {
            let slot = rng.random_range(0..=PATHS.len());
            let rule = PATHS.get(slot).map(|p| PathRule::shared(p));
            let holders = Arc::clone(&holders);
            let violations_tx = violations_tx.clone();
            let work = Duration::from_millis(rng.random_range(1..5));
            let job = JobBuilder::new(format!("stress-{i}"))
                .with_optional_rule(rule)
                .build(move |_ctx: &JobContext| {
                    if let Some(counter) = holders.get(slot) {
                        if counter.fetch_add(1, Ordering::SeqCst) != 0 {
                            let _ = violations_tx.send(format!("overlap on slot {slot}"));
                        }
                        thread::sleep(work);
                        counter.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        thread::sleep(work);
                    }
                    Ok(())
                });
            manager.schedule(&job).unwrap();
            job
        })
        .collect();

    for job in &jobs {
        assert!(manager.join(job).unwrap().is_ok());
    }
    drop(violations_tx);
    assert_eq!(violations.try_iter().collect::<Vec<_>>(), Vec::<String>::new());
    assert_eq!(manager.stats().completed_jobs, 40);
    manager.shutdown();
}
