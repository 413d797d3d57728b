//! Core scheduling abstractions: rules, errors, listeners and failure reporting.

pub mod error;
pub mod listener;
pub mod report;
pub mod rule;

pub use error::{AppResult, JobError, ProgrammingError, Result};
pub use listener::{build_event, InMemoryEventLog, JobChangeListener, JobEvent, JobEventKind};
pub use report::{FailureReporter, TracingReporter};
pub use rule::{IdentityRule, MultiRule, PathRule, RuleRef, SchedulingRule};
