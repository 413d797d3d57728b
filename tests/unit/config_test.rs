//! Tests for configuration validation

use std::time::Duration;

use prometheus_jobs::JobManagerConfig;

#[test]
fn test_default_config_is_valid() {
    let cfg = JobManagerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.min_workers, 1);
    assert!(cfg.max_workers >= 4);
    assert_eq!(cfg.idle_timeout(), Duration::from_secs(60));
    assert_eq!(cfg.thread_name_prefix, "jobs-worker");
}

#[test]
fn test_zero_max_workers_rejected() {
    let cfg = JobManagerConfig::new().with_max_workers(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_min_above_max_rejected() {
    let cfg = JobManagerConfig::new().with_min_workers(5).with_max_workers(2);
    assert_eq!(
        cfg.validate().unwrap_err(),
        "min_workers (5) must not exceed max_workers (2)"
    );
}

#[test]
fn test_zero_idle_timeout_rejected() {
    let cfg = JobManagerConfig::new().with_idle_timeout(Duration::ZERO);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_tiny_stack_rejected() {
    let cfg = JobManagerConfig::new().with_thread_stack_size(4096);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_empty_thread_prefix_rejected() {
    let cfg = JobManagerConfig::new().with_thread_name_prefix("");
    assert!(cfg.validate().is_err());
}

#[test]
fn test_json_config_with_defaults() {
    let cfg = JobManagerConfig::from_json_str(r#"{ "max_workers": 3, "idle_timeout_ms": 500 }"#)
        .unwrap();
    assert_eq!(cfg.max_workers, 3);
    assert_eq!(cfg.min_workers, 1);
    assert_eq!(cfg.idle_timeout(), Duration::from_millis(500));
    assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(2));
}

#[test]
fn test_json_config_invalid() {
    assert!(JobManagerConfig::from_json_str(r#"{ "max_workers": 0 }"#).is_err());
    assert!(JobManagerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_config_roundtrips_through_json() {
    let cfg = JobManagerConfig::new()
        .with_max_workers(6)
        .with_thread_name_prefix("indexer");
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(JobManagerConfig::from_json_str(&json).unwrap(), cfg);
}
