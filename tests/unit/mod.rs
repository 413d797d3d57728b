//! Unit tests for individual components

mod builders_test;
mod config_test;
mod error_test;
mod listener_test;
mod rule_test;
mod util_test;
