//! Event types for the automation event bus.
//!
//! `AutomationEvent` is broadcast while executions run. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classification::{ErrorCategory, ErrorSeverity};
use crate::execution::{ExecutionStatus, TriggeredBy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutomationEvent {
    ExecutionStarted {
        execution_id: Uuid,
        automation_id: Uuid,
        triggered_by: TriggeredBy,
    },

    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        duration_ms: u64,
    },

    StepFailed {
        execution_id: Uuid,
        step_id: String,
        error: String,
    },

    /// A failed attempt will be retried after `delay_ms`.
    RetryScheduled {
        execution_id: Uuid,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    ExecutionFinished {
        execution_id: Uuid,
        automation_id: Uuid,
        status: ExecutionStatus,
        duration_ms: u64,
    },

    /// A classified error at critical severity.
    CriticalError {
        message: String,
        category: ErrorCategory,
        severity: ErrorSeverity,
    },

    /// A scheduled fire was dropped because the previous run was still live.
    ScheduleSkipped { automation_id: Uuid },
}

impl AutomationEvent {
    /// The execution this event belongs to, if any.
    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            AutomationEvent::ExecutionStarted { execution_id, .. }
            | AutomationEvent::StepCompleted { execution_id, .. }
            | AutomationEvent::StepFailed { execution_id, .. }
            | AutomationEvent::RetryScheduled { execution_id, .. }
            | AutomationEvent::ExecutionFinished { execution_id, .. } => Some(*execution_id),
            AutomationEvent::CriticalError { .. } | AutomationEvent::ScheduleSkipped { .. } => None,
        }
    }
}
