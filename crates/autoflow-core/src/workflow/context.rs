//! Execution-scoped context.
//!
//! `WorkflowContext` is the mutable state that flows through one attempt of
//! an automation run: the trigger input, per-step results, user variables,
//! the append-only log and the id of the execution's browser session.

use std::collections::{BTreeMap, HashMap};

use autoflow_types::execution::{LogEntry, LogLevel};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::time::Instant;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum size of a single step result (1 MB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

/// Maximum number of log entries kept per execution.
pub const MAX_LOG_ENTRIES: usize = 5_000;

// ---------------------------------------------------------------------------
// WorkflowContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub execution_id: Uuid,
    pub automation_id: Uuid,
    /// Owner of the automation; browser sessions are counted against it.
    pub owner_id: String,
    /// The input the run was triggered with.
    pub input: Value,
    /// Last result of each step, keyed by step id.
    pub step_results: BTreeMap<String, Value>,
    pub variables: HashMap<String, Value>,
    pub logs: Vec<LogEntry>,
    /// Browser session opened by an interface step of this execution.
    pub browser_session: Option<Uuid>,
    started: Instant,
}

impl WorkflowContext {
    pub fn new(execution_id: Uuid, automation_id: Uuid, owner_id: impl Into<String>, input: Value) -> Self {
        Self {
            execution_id,
            automation_id,
            owner_id: owner_id.into(),
            input,
            step_results: BTreeMap::new(),
            variables: HashMap::new(),
            logs: Vec::new(),
            browser_session: None,
            started: Instant::now(),
        }
    }

    /// Fresh context for the next attempt: results, variables and the
    /// browser session are reset, logs carry over.
    pub fn next_attempt(&self) -> Self {
        Self {
            execution_id: self.execution_id,
            automation_id: self.automation_id,
            owner_id: self.owner_id.clone(),
            input: self.input.clone(),
            step_results: BTreeMap::new(),
            variables: HashMap::new(),
            logs: self.logs.clone(),
            browser_session: None,
            started: self.started,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    // -----------------------------------------------------------------------
    // Logs
    // -----------------------------------------------------------------------

    pub fn log(&mut self, level: LogLevel, step_id: Option<&str>, message: impl Into<String>, data: Option<Value>) {
        if self.logs.len() >= MAX_LOG_ENTRIES {
            return;
        }
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            step_id: step_id.map(str::to_string),
            message: message.into(),
            data,
        });
    }

    pub fn info(&mut self, step_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Info, step_id, message, None);
    }

    pub fn warn(&mut self, step_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Warn, step_id, message, None);
    }

    pub fn error(&mut self, step_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Error, step_id, message, None);
    }

    // -----------------------------------------------------------------------
    // Step results
    // -----------------------------------------------------------------------

    /// Store a step's result. Oversized results are replaced by a marker.
    pub fn set_step_result(&mut self, step_id: &str, result: Value) {
        let size = serde_json::to_vec(&result).map(|v| v.len()).unwrap_or(0);
        if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(step_id, size, max = MAX_STEP_OUTPUT_SIZE, "step result exceeds size limit, truncating");
            self.step_results.insert(
                step_id.to_string(),
                json!({
                    "_truncated": true,
                    "_originalSize": size,
                }),
            );
        } else {
            self.step_results.insert(step_id.to_string(), result);
        }
    }

    pub fn step_result(&self, step_id: &str) -> Option<&Value> {
        self.step_results.get(step_id)
    }

    // -----------------------------------------------------------------------
    // Templates and expressions
    // -----------------------------------------------------------------------

    /// JSON object exposed to scripts: `input`, `steps`, `variables`.
    pub fn to_expression_context(&self) -> Value {
        json!({
            "input": self.input,
            "steps": self.step_results,
            "variables": self.variables,
        })
    }

    /// Replace `{{ path }}` placeholders with values from the context.
    ///
    /// Paths start with `input`, `steps` or `variables` and use dots for
    /// nesting (`{{ steps.fetch.items.0.url }}`). Unknown references are
    /// left as-is.
    pub fn resolve_template(&self, template: &str) -> String {
        if !template.contains("{{") {
            return template.to_string();
        }
        let root = self.to_expression_context();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                return out;
            };
            let path = after[..end].trim();
            match lookup_path(&root, path) {
                Some(value) => out.push_str(&value_to_string(value)),
                None => out.push_str(&rest[start..start + 2 + end + 2]),
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        out
    }

    /// Resolve templates in every string inside `value`.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.resolve_template(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Follow a dotted path through objects and arrays.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a value for string interpolation: strings verbatim, the rest as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
