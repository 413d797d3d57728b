//! Builders assembling a job manager from configuration and hooks.

pub mod manager_builder;

pub use manager_builder::JobManagerBuilder;
