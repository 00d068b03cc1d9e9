//! Automation execution core.
//!
//! Orchestration logic plus the port traits (repositories, audit sink,
//! browser driver, connectors) that the infrastructure layer implements.
//! Depends only on `autoflow-types`, never on `autoflow-infra` or any
//! database or process crate.

pub mod browser;
pub mod classifier;
pub mod event;
pub mod repository;
pub mod resilience;
pub mod scheduler;
pub mod step;
pub mod workflow;
