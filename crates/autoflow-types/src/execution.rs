//! Execution tracking types.
//!
//! An `Execution` row is created when a run starts (`running`) and mutated to
//! exactly one terminal status. Retry progress is persisted in between as a
//! serialized `RetryInfo` snapshot.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::automation::RetryStrategy;
use crate::classification::{ErrorAnalysis, ErrorCategory, ErrorSeverity};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    /// Status only ever moves from `running` to one terminal state.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        matches!(self, ExecutionStatus::Running) && next.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger origin
// ---------------------------------------------------------------------------

/// What started an execution. Serialized as `manual`, `scheduled`,
/// `webhook` or `retry_<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TriggeredBy {
    Manual,
    Scheduled,
    Webhook,
    Retry(u32),
}

impl std::fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggeredBy::Manual => f.write_str("manual"),
            TriggeredBy::Scheduled => f.write_str("scheduled"),
            TriggeredBy::Webhook => f.write_str("webhook"),
            TriggeredBy::Retry(n) => write!(f, "retry_{n}"),
        }
    }
}

impl FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggeredBy::Manual),
            "scheduled" => Ok(TriggeredBy::Scheduled),
            "webhook" => Ok(TriggeredBy::Webhook),
            other => other
                .strip_prefix("retry_")
                .and_then(|n| n.parse().ok())
                .map(TriggeredBy::Retry)
                .ok_or_else(|| format!("invalid trigger origin: '{other}'")),
        }
    }
}

impl From<TriggeredBy> for String {
    fn from(value: TriggeredBy) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for TriggeredBy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One entry of the append-only execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Errors and retry snapshots
// ---------------------------------------------------------------------------

/// Human-readable failure description stored on a failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub message: String,
    pub error_type: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

impl ErrorDetails {
    pub fn from_analysis(message: impl Into<String>, analysis: ErrorAnalysis, step_id: Option<String>) -> Self {
        Self {
            message: message.into(),
            error_type: analysis.error_type,
            category: analysis.category,
            severity: analysis.severity,
            retryable: analysis.retryable,
            suggestions: analysis.suggestions,
            step_id,
        }
    }
}

/// One failed attempt inside a retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    pub error: String,
    pub error_type: String,
    pub category: ErrorCategory,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
    /// Delay scheduled before the next attempt, 0 when none follows.
    pub delay_ms: u64,
}

/// Retry progress persisted on the execution after every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    pub attempts: u32,
    pub max_retries: u32,
    pub strategy: RetryStrategy,
    #[serde(default)]
    pub retry_history: Vec<RetryAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt: Option<DateTime<Utc>>,
}

impl RetryInfo {
    pub fn new(max_retries: u32, strategy: RetryStrategy) -> Self {
        Self {
            attempts: 0,
            max_retries,
            strategy,
            retry_history: Vec::new(),
            last_error: None,
            next_attempt: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// A persisted run of an automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub input_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<serde_json::Value>,
    /// Last result of each step that ran, keyed by step id.
    #[serde(default)]
    pub step_results: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_info: Option<RetryInfo>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub triggered_by: TriggeredBy,
}

impl Execution {
    /// A fresh `running` execution.
    pub fn start(automation_id: Uuid, input_data: serde_json::Value, triggered_by: TriggeredBy) -> Self {
        Self {
            id: Uuid::now_v7(),
            automation_id,
            status: ExecutionStatus::Running,
            input_data,
            output_data: None,
            step_results: BTreeMap::new(),
            logs: Vec::new(),
            error_details: None,
            retry_info: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            triggered_by,
        }
    }
}

/// What `Execute` hands back to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    pub duration_ms: u64,
}
