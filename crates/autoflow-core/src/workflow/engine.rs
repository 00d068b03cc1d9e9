//! Workflow engine: runs an automation's steps in order and records the run.
//!
//! Each step receives the previous step's output as its input (the first
//! step receives the trigger input). A failing step stops the run. When the
//! automation has retries enabled, the whole step sequence is re-run by the
//! [`RetryOrchestrator`] with a fresh context per attempt; logs carry over
//! between attempts so the final record shows every try.
//!
//! # Execution flow
//!
//! 1. Persist a `running` execution and register its cancellation token.
//! 2. Validate the automation against the step registry.
//! 3. Run the steps (once, or under the retry loop).
//! 4. Classify any failure through the [`ErrorReporter`].
//! 5. Write the terminal state exactly once and publish the outcome.

use std::sync::Arc;

use autoflow_types::automation::{Automation, RetryConfig};
use autoflow_types::config::RetrySettings;
use autoflow_types::event::AutomationEvent;
use autoflow_types::execution::{
    ErrorDetails, Execution, ExecutionResult, ExecutionStatus, LogLevel, RetryInfo, TriggeredBy,
};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::context::WorkflowContext;
use super::recorder::{ExecutionHandle, ExecutionRecorder, Outcome, RecorderError};
use super::validation::validate_automation;
use crate::browser::BrowserPool;
use crate::classifier::{ErrorContext, ErrorReporter};
use crate::event::EventBus;
use crate::repository::ExecutionRepository;
use crate::resilience::{RetryError, RetryObserver, RetryOrchestrator, RetryPolicy};
use crate::step::{StepError, StepRegistry, ValidationResult};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the engine itself. Step failures are not errors here: they end
/// up in the returned [`ExecutionResult`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

/// Why one pass over the steps stopped early.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("{source}")]
    Step {
        step_id: String,
        #[source]
        source: StepError,
    },

    #[error("execution cancelled")]
    Cancelled,
}

impl AttemptError {
    fn step_id(&self) -> Option<String> {
        match self {
            AttemptError::Step { step_id, .. } => Some(step_id.clone()),
            AttemptError::Cancelled => None,
        }
    }
}

/// How the run ended, before it is written down.
enum RunEnd {
    Completed(Value),
    Cancelled,
    Failed {
        /// Stored on the execution.
        message: String,
        /// Fed to the classifier: the last underlying error.
        cause: String,
        step_id: Option<String>,
        attempt: u32,
    },
}

struct LiveExecution {
    token: CancellationToken,
    handle: ExecutionHandle,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

pub struct WorkflowEngine<R: ExecutionRepository> {
    registry: Arc<StepRegistry>,
    recorder: ExecutionRecorder<R>,
    retry: RetryOrchestrator,
    reporter: Arc<ErrorReporter>,
    events: EventBus,
    retry_settings: RetrySettings,
    browser_pool: Option<Arc<BrowserPool>>,
    live: DashMap<Uuid, LiveExecution>,
}

impl<R: ExecutionRepository> WorkflowEngine<R> {
    pub fn new(repo: Arc<R>, registry: Arc<StepRegistry>, reporter: Arc<ErrorReporter>, events: EventBus) -> Self {
        Self {
            registry,
            recorder: ExecutionRecorder::new(repo),
            retry: RetryOrchestrator::new(Arc::clone(reporter.classifier())),
            reporter,
            events,
            retry_settings: RetrySettings::default(),
            browser_pool: None,
            live: DashMap::new(),
        }
    }

    pub fn with_retry_settings(mut self, settings: RetrySettings) -> Self {
        self.retry_settings = settings;
        self
    }

    /// Close the execution's browser session after every attempt.
    pub fn with_browser_pool(mut self, pool: Arc<BrowserPool>) -> Self {
        self.browser_pool = Some(pool);
        self
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn repo(&self) -> &Arc<R> {
        self.recorder.repo()
    }

    /// Number of executions currently running.
    pub fn running(&self) -> usize {
        self.live.len()
    }

    pub fn validate(&self, automation: &Automation) -> ValidationResult {
        validate_automation(automation, &self.registry)
    }

    /// Run `automation` to completion and return its result.
    ///
    /// Only bookkeeping failures (the execution could not be persisted)
    /// surface as `Err`; a failed, cancelled or invalid run is an `Ok` result
    /// with `success == false`.
    pub async fn execute(
        &self,
        automation: &Automation,
        input: Value,
        triggered_by: TriggeredBy,
    ) -> Result<ExecutionResult, EngineError> {
        let execution = Execution::start(automation.id, input.clone(), triggered_by);
        let execution_id = execution.id;
        let span = tracing::info_span!(
            "automation.execute",
            automation_id = %automation.id,
            execution_id = %execution_id,
            triggered_by = %triggered_by,
        );

        async move {
            let handle = self.recorder.begin(execution).await?;
            let token = CancellationToken::new();
            self.live.insert(
                execution_id,
                LiveExecution {
                    token: token.clone(),
                    handle: Arc::clone(&handle),
                },
            );
            self.events.publish(AutomationEvent::ExecutionStarted {
                execution_id,
                automation_id: automation.id,
                triggered_by,
            });
            tracing::info!(steps = automation.steps.len(), "execution started");

            let mut ctx = WorkflowContext::new(execution_id, automation.id, &automation.owner_id, input);
            ctx.info(None, format!("execution of '{}' started ({triggered_by})", automation.name));

            let validation = self.validate(automation);
            let (ctx, end) = if !validation.valid {
                let message = format!("validation failed: {}", validation.errors.join("; "));
                ctx.error(None, message.clone());
                let end = RunEnd::Failed {
                    cause: message.clone(),
                    message,
                    step_id: None,
                    attempt: 1,
                };
                (ctx, end)
            } else if let Some(config) = automation.retry_config.as_ref().filter(|c| c.enabled) {
                self.run_with_retry(automation, config, ctx, &handle, &token).await
            } else {
                self.run_once(automation, ctx, &token).await
            };

            let result = self.finish(automation, &handle, ctx, end).await;
            self.live.remove(&execution_id);
            result
        }
        .instrument(span)
        .await
    }

    /// Cancel a running execution. Returns `false` when it is not running.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<bool, EngineError> {
        let Some((token, handle)) = self
            .live
            .get(&execution_id)
            .map(|live| (live.token.clone(), Arc::clone(&live.handle)))
        else {
            return Ok(false);
        };

        token.cancel();
        let cancelled = self.recorder.cancel(&handle).await?;
        if cancelled {
            tracing::info!(execution_id = %execution_id, "execution cancelled");
        }
        Ok(cancelled)
    }

    // -- running ------------------------------------------------------------

    async fn run_once(
        &self,
        automation: &Automation,
        mut ctx: WorkflowContext,
        token: &CancellationToken,
    ) -> (WorkflowContext, RunEnd) {
        let result = self.run_steps(automation, &mut ctx, token).await;
        self.end_attempt(&mut ctx).await;

        let end = match result {
            Ok(output) => RunEnd::Completed(output),
            Err(AttemptError::Cancelled) => RunEnd::Cancelled,
            Err(e) => RunEnd::Failed {
                message: e.to_string(),
                cause: e.to_string(),
                step_id: e.step_id(),
                attempt: 1,
            },
        };
        (ctx, end)
    }

    async fn run_with_retry(
        &self,
        automation: &Automation,
        config: &RetryConfig,
        ctx: WorkflowContext,
        handle: &ExecutionHandle,
        token: &CancellationToken,
    ) -> (WorkflowContext, RunEnd) {
        let policy = RetryPolicy::from_config(config, &self.retry_settings);
        let observer = RetryProgress {
            recorder: &self.recorder,
            handle,
            events: &self.events,
            execution_id: ctx.execution_id,
        };
        let shared = Mutex::new(ctx);
        let shared_ref = &shared;

        let result = self
            .retry
            .execute_with_retry(&policy, token, &observer, move |attempt| async move {
                let mut ctx = shared_ref.lock().await;
                if attempt > 1 {
                    let fresh = ctx.next_attempt();
                    *ctx = fresh;
                    ctx.info(None, format!("attempt {attempt} of {} started", policy.max_attempts()));
                }
                let result = self.run_steps(automation, &mut ctx, token).await;
                self.end_attempt(&mut ctx).await;
                result
            })
            .await;

        let ctx = shared.into_inner();
        let end = match result {
            Ok(output) => RunEnd::Completed(output),
            Err(RetryError::Cancelled { .. }) => RunEnd::Cancelled,
            Err(e) if matches!(e.cause(), Some(AttemptError::Cancelled)) => RunEnd::Cancelled,
            Err(e) => {
                let attempt = e.attempts();
                let message = e.to_string();
                let step_id = e.cause().and_then(AttemptError::step_id);
                let cause = e.cause().map(ToString::to_string).unwrap_or_else(|| message.clone());
                RunEnd::Failed {
                    message,
                    cause,
                    step_id,
                    attempt,
                }
            }
        };
        (ctx, end)
    }

    /// One pass over the steps. Returns the last step's output.
    async fn run_steps(
        &self,
        automation: &Automation,
        ctx: &mut WorkflowContext,
        token: &CancellationToken,
    ) -> Result<Value, AttemptError> {
        let mut data = ctx.input.clone();

        for step in &automation.steps {
            if token.is_cancelled() {
                ctx.warn(Some(&step.id), "execution cancelled before step started");
                return Err(AttemptError::Cancelled);
            }

            let Some(executor) = self.registry.get(&step.step_type) else {
                let source = StepError::UnknownType(step.step_type.clone());
                ctx.error(Some(&step.id), source.to_string());
                return Err(AttemptError::Step {
                    step_id: step.id.clone(),
                    source,
                });
            };

            let started = Instant::now();
            ctx.log(LogLevel::Debug, Some(&step.id), format!("step '{}' started", step.label()), None);

            match executor.execute(step, ctx, data).await {
                Ok(output) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    let meta = (!output.metadata.is_empty()).then(|| Value::Object(output.metadata.clone()));
                    ctx.set_step_result(&step.id, output.data.clone());
                    ctx.log(
                        LogLevel::Info,
                        Some(&step.id),
                        format!("step '{}' completed in {duration_ms}ms", step.label()),
                        meta,
                    );
                    tracing::debug!(step_id = %step.id, duration_ms, "step completed");
                    self.events.publish(AutomationEvent::StepCompleted {
                        execution_id: ctx.execution_id,
                        step_id: step.id.clone(),
                        duration_ms,
                    });
                    data = output.data;
                }
                Err(source) => {
                    ctx.error(Some(&step.id), format!("step '{}' failed: {source}", step.label()));
                    tracing::warn!(step_id = %step.id, "step failed: {source}");
                    self.events.publish(AutomationEvent::StepFailed {
                        execution_id: ctx.execution_id,
                        step_id: step.id.clone(),
                        error: source.to_string(),
                    });
                    return Err(AttemptError::Step {
                        step_id: step.id.clone(),
                        source,
                    });
                }
            }
        }

        Ok(data)
    }

    /// Release per-attempt resources.
    async fn end_attempt(&self, ctx: &mut WorkflowContext) {
        let Some(session) = ctx.browser_session.take() else {
            return;
        };
        if let Some(pool) = &self.browser_pool {
            if pool.close_session(session).await {
                ctx.log(
                    LogLevel::Debug,
                    None,
                    format!("browser session {session} closed"),
                    None,
                );
            }
        }
    }

    // -- recording ----------------------------------------------------------

    async fn finish(
        &self,
        automation: &Automation,
        handle: &ExecutionHandle,
        mut ctx: WorkflowContext,
        end: RunEnd,
    ) -> Result<ExecutionResult, EngineError> {
        let (status, output, error) = match end {
            RunEnd::Completed(output) => {
                ctx.info(None, "execution completed");
                (ExecutionStatus::Completed, Some(output), None)
            }
            RunEnd::Cancelled => {
                ctx.warn(None, "execution cancelled");
                (ExecutionStatus::Cancelled, None, None)
            }
            RunEnd::Failed {
                message,
                cause,
                step_id,
                attempt,
            } => {
                let analysis = self
                    .reporter
                    .report(
                        &cause,
                        &ErrorContext {
                            automation_id: Some(automation.id),
                            execution_id: Some(ctx.execution_id),
                            step_id: step_id.clone(),
                            attempt: Some(attempt),
                        },
                    )
                    .await;
                ctx.error(step_id.as_deref(), format!("execution failed: {message}"));
                (
                    ExecutionStatus::Failed,
                    None,
                    Some(ErrorDetails::from_analysis(message, analysis, step_id)),
                )
            }
        };

        let duration_ms = ctx.elapsed_ms();
        let snapshot = self
            .recorder
            .finish(
                handle,
                status,
                Outcome {
                    output,
                    step_results: ctx.step_results,
                    logs: ctx.logs,
                    error,
                    duration_ms,
                },
            )
            .await?;

        let duration_ms = snapshot.duration_ms.unwrap_or(duration_ms);
        self.events.publish(AutomationEvent::ExecutionFinished {
            execution_id: snapshot.id,
            automation_id: snapshot.automation_id,
            status: snapshot.status,
            duration_ms,
        });
        tracing::info!(status = %snapshot.status.as_str(), duration_ms, "execution finished");

        let success = snapshot.status == ExecutionStatus::Completed;
        Ok(ExecutionResult {
            success,
            execution_id: snapshot.id,
            status: snapshot.status,
            results: success.then(|| serde_json::json!(snapshot.step_results)),
            error: snapshot.error_details,
            logs: snapshot.logs,
            duration_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// Retry progress
// ---------------------------------------------------------------------------

/// Persists retry progress and announces the next attempt.
struct RetryProgress<'a, R: ExecutionRepository> {
    recorder: &'a ExecutionRecorder<R>,
    handle: &'a ExecutionHandle,
    events: &'a EventBus,
    execution_id: Uuid,
}

impl<R: ExecutionRepository> RetryObserver for RetryProgress<'_, R> {
    async fn on_attempt_failed(&self, info: &RetryInfo) {
        if let Err(e) = self.recorder.record_retry(self.handle, info).await {
            tracing::warn!(execution_id = %self.execution_id, "failed to record retry progress: {e}");
        }
        if info.next_attempt.is_none() {
            return;
        }
        if let Some(last) = info.retry_history.last() {
            self.events.publish(AutomationEvent::RetryScheduled {
                execution_id: self.execution_id,
                attempt: last.attempt,
                delay_ms: last.delay_ms,
                error: last.error.clone(),
            });
        }
    }
}
