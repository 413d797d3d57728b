//! Tests for the in-memory event log

use prometheus_jobs::core::build_event;
use prometheus_jobs::{InMemoryEventLog, JobChangeListener, JobEventKind, JobResult};

#[test]
fn test_event_log_is_bounded() {
    let log = InMemoryEventLog::new(2);
    log.on_event(&build_event(1, "a", JobEventKind::Scheduled, None));
    log.on_event(&build_event(1, "a", JobEventKind::Running, None));
    log.on_event(&build_event(1, "a", JobEventKind::Done, Some(JobResult::Completed)));

    let events = log.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, JobEventKind::Running);
    assert!(events[1].result.as_ref().is_some_and(JobResult::is_ok));
}

#[test]
fn test_kinds_for_filters_by_job() {
    let log = InMemoryEventLog::new(16);
    log.on_event(&build_event(1, "a", JobEventKind::Scheduled, None));
    log.on_event(&build_event(2, "b", JobEventKind::Scheduled, None));
    log.on_event(&build_event(1, "a", JobEventKind::Running, None));

    assert_eq!(
        log.kinds_for(1),
        vec![JobEventKind::Scheduled, JobEventKind::Running]
    );
    log.clear();
    assert!(log.kinds_for(2).is_empty());
}
