//! Tests for utility functions

use prometheus_jobs::util::now_ms;
use prometheus_jobs::{JobProgress, Priority};

#[test]
fn test_now_ms_is_monotonic_enough() {
    let first = now_ms();
    let second = now_ms();
    assert!(second >= first);
}

#[test]
fn test_progress_fraction() {
    let unknown = JobProgress::default();
    assert_eq!(unknown.fraction(), None);
    let half = JobProgress { total: 10, done: 5 };
    assert_eq!(half.fraction(), Some(0.5));
}

#[test]
fn test_priority_serde() {
    let json = serde_json::to_string(&Priority::Interactive).unwrap();
    let back: Priority = serde_json::from_str(&json).unwrap();
    assert_eq!(back, Priority::Interactive);
}
