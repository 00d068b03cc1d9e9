//! Step type registry.
//!
//! Built once at process start with [`StepRegistryBuilder`] and frozen into a
//! [`StepRegistry`]. There is no removal API; the registry is shared by
//! `Arc` and only read afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use autoflow_types::automation::Step;
use autoflow_types::config::SandboxSettings;

use super::action::ActionExecutor;
use super::connector::ConnectorSet;
use super::destination::DestinationExecutor;
use super::executor::{BoxStepExecutor, StepExecutor, ValidationResult};
use super::files::FileStore;
use super::filter::FilterExecutor;
use super::interface::InterfaceExecutor;
use super::script::ScriptEngine;
use super::source::SourceExecutor;
use crate::browser::BrowserPool;

/// Shared dependencies of the built-in executors.
#[derive(Debug, Clone)]
pub struct BuiltinSteps {
    pub files: Arc<FileStore>,
    pub connectors: Arc<ConnectorSet>,
    pub browser_pool: Arc<BrowserPool>,
    pub sandbox: SandboxSettings,
}

#[derive(Debug, Default)]
pub struct StepRegistryBuilder {
    executors: HashMap<String, BoxStepExecutor>,
}

impl StepRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source`, `filter`, `action`, `interface` and `destination`.
    pub fn with_builtins(self, deps: BuiltinSteps) -> Self {
        let scripts = ScriptEngine::new(&deps.sandbox);
        self.register(SourceExecutor::new(
            Arc::clone(&deps.files),
            Arc::clone(&deps.connectors),
        ))
        .register(FilterExecutor::new(scripts.clone()))
        .register(ActionExecutor::new(Arc::clone(&deps.files), scripts))
        .register(InterfaceExecutor::new(deps.browser_pool))
        .register(DestinationExecutor::new(deps.files, deps.connectors))
    }

    /// Add an executor under its own type tag. A later registration for the
    /// same tag replaces the earlier one.
    pub fn register<E: StepExecutor + 'static>(mut self, executor: E) -> Self {
        let tag = executor.step_type();
        if self.executors.contains_key(tag) {
            tracing::warn!(step_type = tag, "step executor replaced");
        }
        self.executors
            .insert(tag.to_string(), BoxStepExecutor::new(executor));
        self
    }

    pub fn build(self) -> StepRegistry {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        tracing::info!(types = ?types, "step registry built");
        StepRegistry {
            executors: self.executors,
        }
    }
}

#[derive(Debug)]
pub struct StepRegistry {
    executors: HashMap<String, BoxStepExecutor>,
}

impl StepRegistry {
    pub fn get(&self, step_type: &str) -> Option<&BoxStepExecutor> {
        self.executors.get(step_type)
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.executors.contains_key(step_type)
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Validate one step: its type must be registered and its config must
    /// satisfy the executor.
    pub fn validate_step(&self, step: &Step) -> ValidationResult {
        match self.get(&step.step_type) {
            Some(executor) => executor.validate(&step.config),
            None => ValidationResult::from_errors(vec![format!("unknown step type '{}'", step.step_type)]),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BoxBrowserDriver;
    use crate::browser::fake::{FakeDriver, FakeState};
    use autoflow_types::config::BrowserSettings;
    use serde_json::json;

    fn builtins(dir: &tempfile::TempDir) -> BuiltinSteps {
        BuiltinSteps {
            files: Arc::new(FileStore::new(dir.path())),
            connectors: Arc::new(ConnectorSet::new()),
            browser_pool: Arc::new(BrowserPool::new(
                BoxBrowserDriver::new(FakeDriver::new(Arc::new(FakeState::default()))),
                BrowserSettings::default(),
            )),
            sandbox: SandboxSettings::default(),
        }
    }

    #[test]
    fn builtins_are_registered() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StepRegistryBuilder::new().with_builtins(builtins(&dir)).build();
        assert_eq!(
            registry.types(),
            vec!["action", "destination", "filter", "interface", "source"]
        );
    }

    #[test]
    fn unknown_type_fails_validation() {
        let registry = StepRegistryBuilder::new().register(testing::EchoExecutor).build();
        let step = Step::new("x", "teleport", json!({}));
        let result = registry.validate_step(&step);
        assert_eq!(result.errors, vec!["unknown step type 'teleport'"]);
        assert!(registry.validate_step(&Step::new("e", "echo", json!({}))).valid);
    }

    #[test]
    fn config_errors_come_from_the_executor() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StepRegistryBuilder::new().with_builtins(builtins(&dir)).build();
        let step = Step::new("f", "filter", json!({"filterType": "field"}));
        let result = registry.validate_step(&step);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
    }
}
