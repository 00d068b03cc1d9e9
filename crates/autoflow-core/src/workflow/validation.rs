//! Automation validation.
//!
//! Collects every problem instead of stopping at the first: step ids must be
//! unique and non-empty, every step type must resolve to a registered
//! executor whose config check passes, and every connection must point at an
//! existing step.

use std::collections::HashSet;

use autoflow_types::automation::Automation;

use crate::step::{StepRegistry, ValidationResult};

pub fn validate_automation(automation: &Automation, registry: &StepRegistry) -> ValidationResult {
    let mut errors = Vec::new();

    if automation.steps.is_empty() {
        errors.push("automation must have at least one step".to_string());
    }

    let mut seen = HashSet::new();
    for step in &automation.steps {
        if step.id.trim().is_empty() {
            errors.push("step id must be a non-empty string".to_string());
            continue;
        }
        if !seen.insert(step.id.as_str()) {
            errors.push(format!("duplicate step id '{}'", step.id));
        }
    }

    for step in &automation.steps {
        let result = registry.validate_step(step);
        errors.extend(result.errors.into_iter().map(|e| format!("step '{}': {e}", step.id)));

        for connection in &step.connections {
            if !seen.contains(connection.target_id.as_str()) {
                errors.push(format!(
                    "step '{}': connection target '{}' does not exist",
                    step.id, connection.target_id
                ));
            }
        }
    }

    ValidationResult::from_errors(errors)
}
