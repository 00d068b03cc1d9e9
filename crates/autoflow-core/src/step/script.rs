//! Sandboxed custom scripts.
//!
//! Scripts are JEXL expressions evaluated by `jexl_eval`: pure, no I/O and no
//! host access. Expressions are capped in length and the record lists they
//! run over are capped in size. Data is always passed as evaluation context,
//! never spliced into expression text.
//!
//! A fresh evaluator is built for each call and never held across an
//! `.await`.

use autoflow_types::config::SandboxSettings;
use serde::Serialize;
use serde_json::{Value, json};

use super::executor::StepError;

/// Variables visible to a per-record script.
#[derive(Serialize)]
struct RecordScope<'a> {
    record: &'a Value,
    index: usize,
    input: &'a Value,
    steps: &'a Value,
    variables: &'a Value,
}

#[derive(Debug, Clone)]
pub struct ScriptEngine {
    max_expression_len: usize,
    max_records: usize,
}

impl ScriptEngine {
    pub fn new(settings: &SandboxSettings) -> Self {
        Self {
            max_expression_len: settings.max_expression_len,
            max_records: settings.max_records,
        }
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Static checks run at validation time.
    pub fn check(&self, expression: &str) -> Result<(), StepError> {
        if expression.trim().is_empty() {
            return Err(StepError::InvalidConfig("'expression' is required".into()));
        }
        if expression.len() > self.max_expression_len {
            return Err(StepError::InvalidConfig(format!(
                "expression must be at most {} bytes, got {}",
                self.max_expression_len,
                expression.len()
            )));
        }
        Ok(())
    }

    /// Evaluate against a context object.
    pub fn eval(&self, expression: &str, context: &Value) -> Result<Value, StepError> {
        self.check(expression)?;
        if !context.is_object() {
            return Err(StepError::Script("context must be a JSON object".into()));
        }
        evaluator()
            .eval_in_context(expression, context)
            .map_err(|e| StepError::Script(e.to_string()))
    }

    pub fn eval_bool(&self, expression: &str, context: &Value) -> Result<bool, StepError> {
        self.eval(expression, context).map(|v| truthy(&v))
    }

    /// Keep the records for which `expression` is truthy. `scope` is the
    /// workflow expression context (`input`, `steps`, `variables`).
    pub fn filter(&self, expression: &str, records: Vec<Value>, scope: &Value) -> Result<Vec<Value>, StepError> {
        self.check(expression)?;
        self.check_records(records.len())?;
        let evaluator = evaluator();
        let mut kept = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            let result = evaluator
                .eval_in_context(expression, record_scope(&record, index, scope))
                .map_err(|e| StepError::Script(format!("record {index}: {e}")))?;
            if truthy(&result) {
                kept.push(record);
            }
        }
        Ok(kept)
    }

    /// Replace every record by the value of `expression` evaluated on it.
    pub fn map(&self, expression: &str, records: &[Value], scope: &Value) -> Result<Vec<Value>, StepError> {
        self.check(expression)?;
        self.check_records(records.len())?;
        let evaluator = evaluator();
        records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                evaluator
                    .eval_in_context(expression, record_scope(record, index, scope))
                    .map_err(|e| StepError::Script(format!("record {index}: {e}")))
            })
            .collect()
    }

    fn check_records(&self, count: usize) -> Result<(), StepError> {
        if count > self.max_records {
            return Err(StepError::LimitExceeded(format!(
                "{count} records, at most {} allowed in a script step",
                self.max_records
            )));
        }
        Ok(())
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new(&SandboxSettings::default())
    }
}

fn record_scope<'a>(record: &'a Value, index: usize, scope: &'a Value) -> RecordScope<'a> {
    RecordScope {
        record,
        index,
        input: scope.get("input").unwrap_or(&Value::Null),
        steps: scope.get("steps").unwrap_or(&Value::Null),
        variables: scope.get("variables").unwrap_or(&Value::Null),
    }
}

/// JavaScript-like truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn evaluator() -> jexl_eval::Evaluator<'static> {
    jexl_eval::Evaluator::new()
        .with_transform("lower", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.to_lowercase()))
        })
        .with_transform("upper", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.to_uppercase()))
        })
        .with_transform("trim", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.trim()))
        })
        .with_transform("split", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
            Ok(json!(s.split(delimiter).collect::<Vec<_>>()))
        })
        .with_transform("not", |args: &[Value]| {
            Ok(json!(!truthy(args.first().unwrap_or(&Value::Null))))
        })
        .with_transform("contains", |args: &[Value]| {
            let found = match (args.first(), args.get(1)) {
                (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
                (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                _ => false,
            };
            Ok(json!(found))
        })
        .with_transform("startsWith", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.starts_with(prefix)))
        })
        .with_transform("endsWith", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.ends_with(suffix)))
        })
        .with_transform("length", |args: &[Value]| {
            let len = match args.first() {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
        .with_transform("number", |args: &[Value]| {
            let n = match args.first() {
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            Ok(n.map_or(Value::Null, |n| json!(n)))
        })
        .with_transform("string", |args: &[Value]| {
            Ok(json!(match args.first() {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }))
        })
}
