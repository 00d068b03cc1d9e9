//! Error classification and reporting.
//!
//! [`ErrorClassifier`] is a pure function over error messages: an ordered
//! regex table where the first matching pattern decides category, severity
//! and retryability. [`ErrorReporter`] adds the side effects: rolling
//! counters, the windowed report, critical alerts and the audit sink.

pub mod patterns;
pub mod reporter;

pub use patterns::{ErrorClassifier, ErrorPattern};
pub use reporter::{ErrorContext, ErrorReport, ErrorReporter};
