//! Workflow engine core: execution context, validation, durable recording and
//! the linear step runner.
//!
//! - `context` -- per-execution state: step results, variables, logs, templates
//! - `validation` -- structural and per-step checks before a run starts
//! - `recorder` -- status state machine and persistence of executions
//! - `engine` -- runs steps in order under the retry orchestrator

pub mod context;
pub mod engine;
pub mod recorder;
pub mod validation;

pub use context::WorkflowContext;
pub use engine::{EngineError, WorkflowEngine};
pub use recorder::{ExecutionHandle, ExecutionRecorder, Outcome, RecorderError};
pub use validation::validate_automation;
