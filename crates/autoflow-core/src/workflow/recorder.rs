//! Durable execution records.
//!
//! `ExecutionRecorder` wraps an `ExecutionRepository` and owns the status
//! state machine of each live execution: one write at start, retry-progress
//! writes while attempts fail, and exactly one terminal write. A terminal
//! execution is never written again, so a late engine result cannot
//! overwrite a cancellation and vice versa.

use std::sync::Arc;

use autoflow_types::execution::{ErrorDetails, Execution, ExecutionStatus, LogEntry, RetryInfo};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::repository::ExecutionRepository;

/// Shared, lockable view of one live execution.
pub type ExecutionHandle = Arc<Mutex<Execution>>;

/// Everything the terminal write needs.
#[derive(Debug, Default)]
pub struct Outcome {
    pub output: Option<Value>,
    pub step_results: BTreeMap<String, Value>,
    pub logs: Vec<LogEntry>,
    pub error: Option<ErrorDetails>,
    pub duration_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("execution repository error: {0}")]
    Repository(String),
}

pub struct ExecutionRecorder<R: ExecutionRepository> {
    repo: Arc<R>,
}

impl<R: ExecutionRepository> ExecutionRecorder<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    /// Persist a new `running` execution.
    pub async fn begin(&self, execution: Execution) -> Result<ExecutionHandle, RecorderError> {
        self.repo
            .insert_execution(&execution)
            .await
            .map_err(|e| RecorderError::Repository(e.to_string()))?;
        tracing::debug!(execution_id = %execution.id, "execution recorded");
        Ok(Arc::new(Mutex::new(execution)))
    }

    /// Persist the retry snapshot. Ignored once the execution is terminal.
    pub async fn record_retry(&self, handle: &ExecutionHandle, info: &RetryInfo) -> Result<(), RecorderError> {
        let mut execution = handle.lock().await;
        if execution.status.is_terminal() {
            return Ok(());
        }
        execution.retry_info = Some(info.clone());
        self.repo
            .update_execution(&execution)
            .await
            .map_err(|e| RecorderError::Repository(e.to_string()))?;
        tracing::debug!(execution_id = %execution.id, attempts = info.attempts, "retry progress recorded");
        Ok(())
    }

    /// Move the execution to `status` and persist it.
    ///
    /// Returns the stored snapshot. When the execution already reached a
    /// terminal state, nothing is written and that state is returned.
    pub async fn finish(
        &self,
        handle: &ExecutionHandle,
        status: ExecutionStatus,
        outcome: Outcome,
    ) -> Result<Execution, RecorderError> {
        match self.transition(handle, status, outcome).await? {
            Some(execution) => Ok(execution),
            None => Ok(handle.lock().await.clone()),
        }
    }

    /// `None` when the transition was refused and nothing was written.
    async fn transition(
        &self,
        handle: &ExecutionHandle,
        status: ExecutionStatus,
        outcome: Outcome,
    ) -> Result<Option<Execution>, RecorderError> {
        let mut execution = handle.lock().await;
        if !execution.status.can_transition_to(status) {
            tracing::debug!(
                execution_id = %execution.id,
                current = %execution.status.as_str(),
                requested = %status.as_str(),
                "terminal write skipped, execution already finished"
            );
            return Ok(None);
        }

        execution.status = status;
        execution.output_data = outcome.output;
        execution.step_results = outcome.step_results;
        execution.logs = outcome.logs;
        execution.error_details = outcome.error;
        execution.completed_at = Some(Utc::now());
        execution.duration_ms = Some(outcome.duration_ms);
        if let Some(info) = execution.retry_info.as_mut() {
            info.next_attempt = None;
        }

        self.repo
            .update_execution(&execution)
            .await
            .map_err(|e| RecorderError::Repository(e.to_string()))?;
        tracing::debug!(execution_id = %execution.id, status = %status.as_str(), "execution finished");
        Ok(Some(execution.clone()))
    }

    /// Mark a live execution cancelled, keeping whatever it has logged.
    ///
    /// `false` when it had already reached a terminal state.
    pub async fn cancel(&self, handle: &ExecutionHandle) -> Result<bool, RecorderError> {
        let (logs, step_results, duration_ms) = {
            let execution = handle.lock().await;
            let elapsed = (Utc::now() - execution.started_at).num_milliseconds().max(0) as u64;
            (execution.logs.clone(), execution.step_results.clone(), elapsed)
        };
        let applied = self
            .transition(
                handle,
                ExecutionStatus::Cancelled,
                Outcome {
                    step_results,
                    logs,
                    duration_ms,
                    ..Default::default()
                },
            )
            .await?;
        Ok(applied.is_some())
    }
}
