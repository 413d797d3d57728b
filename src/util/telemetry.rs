//! Telemetry helpers for structured logging.
//!
//! The crate only emits `tracing` events; installing a subscriber is left to
//! the host. [`init_tracing`] is a convenience for tests and small binaries.

/// Install a default `fmt` subscriber filtered by `RUST_LOG`, unless a global
/// subscriber is already set.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}
