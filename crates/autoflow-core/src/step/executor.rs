//! The step executor contract.
//!
//! [`StepExecutor`] uses RPITIT like the other ports in this crate. The
//! registry stores executors as [`BoxStepExecutor`], an object-safe wrapper
//! built from a `*Dyn` companion trait with a blanket impl.

use std::future::Future;

use autoflow_types::automation::Step;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};

use super::connector::ConnectorError;
use crate::browser::BrowserError;
use crate::workflow::context::WorkflowContext;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of validating one step's config. Collects every problem.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// What a step hands to the next one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutput {
    pub success: bool,
    pub data: Value,
    pub metadata: Map<String, Value>,
}

impl StepOutput {
    pub fn new(data: Value) -> Self {
        Self {
            success: true,
            data,
            metadata: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Why a step failed. The message is what the error classifier sees.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unknown step type '{0}'")]
    UnknownType(String),

    #[error("missing required input: {0}")]
    MissingInput(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("connector '{connector}' failed: {source}")]
    Connector {
        connector: String,
        #[source]
        source: ConnectorError,
    },

    #[error("expression error: {0}")]
    Script(String),

    #[error("file store error: {0}")]
    File(String),

    #[error("path escapes file store sandbox: {0}")]
    Sandbox(String),

    #[error("invalid input: {0}")]
    LimitExceeded(String),

    #[error("{0}")]
    Failed(String),
}

impl StepError {
    pub fn connector(name: &str, source: ConnectorError) -> Self {
        StepError::Connector {
            connector: name.to_string(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

pub trait StepExecutor: Send + Sync {
    /// The `type` tag this executor handles.
    fn step_type(&self) -> &'static str;

    /// Check a step's config without running it.
    fn validate(&self, config: &Value) -> ValidationResult;

    /// Run the step. Failures are returned, never swallowed.
    fn execute(
        &self,
        step: &Step,
        ctx: &mut WorkflowContext,
        input: Value,
    ) -> impl Future<Output = Result<StepOutput, StepError>> + Send;
}

pub trait StepExecutorDyn: Send + Sync {
    fn step_type(&self) -> &'static str;
    fn validate(&self, config: &Value) -> ValidationResult;
    fn execute_boxed<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a mut WorkflowContext,
        input: Value,
    ) -> BoxFuture<'a, Result<StepOutput, StepError>>;
}

impl<T: StepExecutor> StepExecutorDyn for T {
    fn step_type(&self) -> &'static str {
        StepExecutor::step_type(self)
    }

    fn validate(&self, config: &Value) -> ValidationResult {
        StepExecutor::validate(self, config)
    }

    fn execute_boxed<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a mut WorkflowContext,
        input: Value,
    ) -> BoxFuture<'a, Result<StepOutput, StepError>> {
        Box::pin(self.execute(step, ctx, input))
    }
}

/// Type-erased step executor held by the registry.
pub struct BoxStepExecutor {
    inner: Box<dyn StepExecutorDyn>,
}

impl BoxStepExecutor {
    pub fn new<T: StepExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub fn step_type(&self) -> &'static str {
        self.inner.step_type()
    }

    pub fn validate(&self, config: &Value) -> ValidationResult {
        self.inner.validate(config)
    }

    pub async fn execute(
        &self,
        step: &Step,
        ctx: &mut WorkflowContext,
        input: Value,
    ) -> Result<StepOutput, StepError> {
        self.inner.execute_boxed(step, ctx, input).await
    }
}

impl std::fmt::Debug for BoxStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStepExecutor")
            .field("step_type", &self.step_type())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Read a required string field from a step config.
pub(crate) fn require_str<'a>(config: &'a Value, key: &str) -> Result<&'a str, StepError> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StepError::InvalidConfig(format!("'{key}' is required")))
}

pub(crate) fn opt_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}

/// Optional per-step timeout, in milliseconds under `timeout`.
pub(crate) fn timeout_ms(config: &Value) -> Option<std::time::Duration> {
    config
        .get("timeout")
        .and_then(Value::as_u64)
        .map(std::time::Duration::from_millis)
}

/// Push `'key' is required` when the key is missing or not a non-empty string.
pub(crate) fn check_str(config: &Value, key: &str, errors: &mut Vec<String>) {
    if require_str(config, key).is_err() {
        errors.push(format!("'{key}' is required"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validation_result_tracks_errors() {
        assert!(ValidationResult::ok().valid);
        let r = ValidationResult::from_errors(vec!["'field' is required".into()]);
        assert!(!r.valid);
        assert_eq!(r.errors.len(), 1);
    }

    #[test]
    fn error_messages_classify_as_expected() {
        let classifier = crate::classifier::ErrorClassifier::new();
        let invalid = StepError::InvalidConfig("'url' is required".into());
        assert_eq!(classifier.analyze(&invalid.to_string()).error_type, "validation");
        let sandbox = StepError::Sandbox("../etc/passwd".into());
        assert_eq!(classifier.analyze(&sandbox.to_string()).error_type, "sandbox_violation");
        let limit = StepError::LimitExceeded("12000 records, at most 10000 allowed".into());
        assert!(!classifier.analyze(&limit.to_string()).retryable);
        let script = StepError::Script("parse error at 3".into());
        assert_eq!(classifier.analyze(&script.to_string()).error_type, "script");
    }

    #[test]
    fn config_helpers() {
        let config = json!({"url": "https://x", "empty": "", "timeout": 250});
        assert_eq!(require_str(&config, "url").unwrap(), "https://x");
        assert!(require_str(&config, "empty").is_err());
        assert_eq!(timeout_ms(&config), Some(std::time::Duration::from_millis(250)));
        let mut errors = Vec::new();
        check_str(&config, "missing", &mut errors);
        assert_eq!(errors, vec!["'missing' is required".to_string()]);
    }
}
