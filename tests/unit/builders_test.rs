//! Tests for the job manager builder

use std::sync::Arc;
use std::time::Duration;

use prometheus_jobs::{
    JobError, JobManagerBuilder, JobManagerConfig, LockManager, RequesterVictim,
};

#[test]
fn test_builder_applies_overrides() {
    let manager = JobManagerBuilder::new()
        .with_min_workers(0)
        .with_max_workers(3)
        .with_idle_timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    assert_eq!(manager.config().max_workers, 3);
    assert_eq!(manager.config().min_workers, 0);
    assert_eq!(manager.config().idle_timeout(), Duration::from_millis(500));
    manager.shutdown();
}

#[test]
fn test_builder_rejects_invalid_config() {
    let err = JobManagerBuilder::new()
        .with_config(JobManagerConfig::new().with_max_workers(0))
        .build()
        .unwrap_err();
    assert!(matches!(err, JobError::InvalidConfig(_)));
}

#[test]
fn test_shared_lock_manager() {
    let locks = Arc::new(LockManager::new());
    let a = JobManagerBuilder::new()
        .with_lock_manager(Arc::clone(&locks))
        .build()
        .unwrap();
    let b = JobManagerBuilder::new()
        .with_lock_manager(Arc::clone(&locks))
        .build()
        .unwrap();
    assert!(Arc::ptr_eq(a.lock_manager(), b.lock_manager()));
    a.shutdown();
    b.shutdown();
}

#[test]
fn test_policy_with_shared_lock_manager_is_rejected() {
    let err = JobManagerBuilder::new()
        .with_lock_manager(Arc::new(LockManager::new()))
        .with_victim_policy(RequesterVictim)
        .build()
        .unwrap_err();
    assert!(matches!(err, JobError::InvalidConfig(_)));
}
