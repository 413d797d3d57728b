//! Tests for error types

use prometheus_jobs::{JobError, ProgrammingError};

#[test]
fn test_deadlock_error() {
    let err = JobError::Deadlock {
        resource: "lock `db`".to_string(),
    };
    assert_eq!(format!("{err}"), "deadlock detected while acquiring lock `db`");
}

#[test]
fn test_simple_error_messages() {
    assert_eq!(JobError::Cancelled.to_string(), "operation cancelled");
    assert_eq!(JobError::Timeout.to_string(), "operation timed out");
    assert_eq!(JobError::ShutDown.to_string(), "job manager has been shut down");
}

#[test]
fn test_invalid_config_error() {
    let err = JobError::InvalidConfig("max_workers must be at least 1".to_string());
    assert_eq!(
        err.to_string(),
        "invalid configuration: max_workers must be at least 1"
    );
}

#[test]
fn test_programming_error_wraps() {
    let err: JobError = ProgrammingError::JoinSelf(7).into();
    assert_eq!(
        err.to_string(),
        "programming error: job 7 cannot join itself"
    );
    assert!(matches!(
        err,
        JobError::Programming(ProgrammingError::JoinSelf(7))
    ));
}

#[test]
fn test_cancellation_through_anyhow() {
    let cancelled: anyhow::Error = JobError::Cancelled.into();
    assert!(JobError::is_cancellation(&cancelled));
    let wrapped = cancelled.context("while indexing");
    assert!(JobError::is_cancellation(&wrapped));
    assert!(!JobError::is_cancellation(&anyhow::anyhow!("boom")));
}
