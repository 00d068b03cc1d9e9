//! Repository trait definitions (ports) for the automation execution core.
//!
//! Infrastructure implementations live in autoflow-infra. The core only
//! depends on these traits.

pub mod audit;
pub mod automation;
pub mod execution;

pub use audit::{AuditEntry, AuditSink, AuditSinkDyn, BoxAuditSink};
pub use automation::AutomationRepository;
pub use execution::ExecutionRepository;

#[cfg(test)]
pub(crate) mod memory;
