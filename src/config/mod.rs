//! Configuration models for the job manager and its worker pool.

pub mod manager;

pub use manager::JobManagerConfig;
