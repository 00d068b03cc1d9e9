//! Shared domain types for Autoflow.
//!
//! Automations, executions, the error taxonomy, engine configuration and the
//! event type broadcast while executions run.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod automation;
pub mod classification;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
