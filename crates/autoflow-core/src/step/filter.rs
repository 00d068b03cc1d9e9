//! `filter` steps: keep the records that match.

use std::cmp::Ordering;
use std::collections::HashSet;

use autoflow_types::automation::Step;
use regex::Regex;
use serde_json::Value;

use super::executor::{StepError, StepExecutor, StepOutput, ValidationResult, check_str, opt_str, require_str};
use super::records::{as_records, compare, field, loosely_equal, string_list};
use super::script::ScriptEngine;
use crate::workflow::context::{WorkflowContext, value_to_string};

pub const OPERATORS: [&str; 11] = [
    "equals",
    "not_equals",
    "greater_than",
    "less_than",
    "greater_or_equal",
    "less_or_equal",
    "contains",
    "starts_with",
    "ends_with",
    "exists",
    "not_exists",
];

pub struct FilterExecutor {
    scripts: ScriptEngine,
}

impl FilterExecutor {
    pub fn new(scripts: ScriptEngine) -> Self {
        Self { scripts }
    }
}

/// Evaluate one field condition against a record.
pub fn matches_condition(record: &Value, path: &str, operator: &str, expected: &Value) -> bool {
    let actual = field(record, path);
    match operator {
        "exists" => actual.is_some_and(|v| !v.is_null()),
        "not_exists" => actual.is_none_or(Value::is_null),
        _ => {
            let Some(actual) = actual else {
                return operator == "not_equals";
            };
            match operator {
                "equals" => loosely_equal(actual, expected),
                "not_equals" => !loosely_equal(actual, expected),
                "greater_than" => compare(actual, expected) == Some(Ordering::Greater),
                "less_than" => compare(actual, expected) == Some(Ordering::Less),
                "greater_or_equal" => matches!(compare(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
                "less_or_equal" => matches!(compare(actual, expected), Some(Ordering::Less | Ordering::Equal)),
                "contains" => match actual {
                    Value::Array(items) => items.iter().any(|item| loosely_equal(item, expected)),
                    other => value_to_string(other).contains(&value_to_string(expected)),
                },
                "starts_with" => value_to_string(actual).starts_with(&value_to_string(expected)),
                "ends_with" => value_to_string(actual).ends_with(&value_to_string(expected)),
                _ => false,
            }
        }
    }
}

/// Key for dedup: the listed fields, or the whole record when none are given.
fn dedup_key(record: &Value, fields: &[String]) -> String {
    if fields.is_empty() {
        return record.to_string();
    }
    fields
        .iter()
        .map(|f| field(record, f).map(Value::to_string).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

impl StepExecutor for FilterExecutor {
    fn step_type(&self) -> &'static str {
        "filter"
    }

    fn validate(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        match opt_str(config, "filterType") {
            None => errors.push("'filterType' is required".to_string()),
            Some("field") => {
                check_str(config, "field", &mut errors);
                match opt_str(config, "operator") {
                    None => errors.push("'operator' is required".to_string()),
                    Some(op) if !OPERATORS.contains(&op) => {
                        errors.push(format!("unsupported operator type '{op}'"));
                    }
                    Some(op) if !matches!(op, "exists" | "not_exists") && config.get("value").is_none() => {
                        errors.push(format!("'value' is required for operator '{op}'"));
                    }
                    Some(_) => {}
                }
            }
            Some("regex") => {
                check_str(config, "field", &mut errors);
                match opt_str(config, "pattern") {
                    None => errors.push("'pattern' is required".to_string()),
                    Some(p) => {
                        if let Err(e) = Regex::new(p) {
                            errors.push(format!("'pattern' must be a valid regex: {e}"));
                        }
                    }
                }
            }
            Some("dedup") => {}
            Some("expression") => match opt_str(config, "expression") {
                None => errors.push("'expression' is required".to_string()),
                Some(expr) => {
                    if let Err(e) = self.scripts.check(expr) {
                        errors.push(e.to_string());
                    }
                }
            },
            Some(other) => errors.push(format!("unsupported filter type '{other}'")),
        }
        ValidationResult::from_errors(errors)
    }

    async fn execute(&self, step: &Step, ctx: &mut WorkflowContext, input: Value) -> Result<StepOutput, StepError> {
        let config = &step.config;
        let filter_type = require_str(config, "filterType")?;
        let records = as_records(input, self.scripts.max_records())?;
        let before = records.len();

        let kept: Vec<Value> = match filter_type {
            "field" => {
                let path = require_str(config, "field")?;
                let operator = require_str(config, "operator")?;
                let expected = ctx.resolve_value(config.get("value").unwrap_or(&Value::Null));
                records
                    .into_iter()
                    .filter(|r| matches_condition(r, path, operator, &expected))
                    .collect()
            }
            "regex" => {
                let path = require_str(config, "field")?;
                let pattern = require_str(config, "pattern")?;
                let re = Regex::new(pattern)
                    .map_err(|e| StepError::InvalidConfig(format!("'pattern' must be a valid regex: {e}")))?;
                records
                    .into_iter()
                    .filter(|r| field(r, path).is_some_and(|v| re.is_match(&value_to_string(v))))
                    .collect()
            }
            "dedup" => {
                let fields = string_list(config, "fields");
                let mut seen = HashSet::new();
                records
                    .into_iter()
                    .filter(|r| seen.insert(dedup_key(r, &fields)))
                    .collect()
            }
            "expression" => {
                let expression = require_str(config, "expression")?;
                self.scripts
                    .filter(expression, records, &ctx.to_expression_context())?
            }
            other => {
                return Err(StepError::InvalidConfig(format!("unsupported filter type '{other}'")));
            }
        };

        let after = kept.len();
        tracing::debug!(step_id = %step.id, filter_type, before, after, "filter applied");
        ctx.info(Some(&step.id), format!("{filter_type} filter kept {after} of {before} records"));
        Ok(StepOutput::new(Value::Array(kept))
            .with_meta("inputCount", before)
            .with_meta("outputCount", after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(Uuid::now_v7(), Uuid::now_v7(), "owner", json!({"threshold": 15}))
    }

    fn rows() -> Value {
        json!([
            {"id": 1, "name": "Ada Lovelace", "email": "ada@example.com", "amount": 10, "tags": ["vip"]},
            {"id": 2, "name": "Bob", "email": "bob@test.org", "amount": "20"},
            {"id": 3, "name": "Ada Lovelace", "email": "ada@example.com", "amount": 30, "note": null},
        ])
    }

    async fn run(config: Value) -> Result<StepOutput, StepError> {
        let exec = FilterExecutor::new(ScriptEngine::default());
        let step = Step::new("f", "filter", config);
        exec.execute(&step, &mut ctx(), rows()).await
    }

    fn ids(out: &StepOutput) -> Vec<i64> {
        out.data
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn field_operators() {
        let out = run(json!({"filterType": "field", "field": "amount", "operator": "greater_than", "value": 15}))
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![2, 3]);

        let out = run(json!({"filterType": "field", "field": "amount", "operator": "less_or_equal", "value": "{{ input.threshold }}"}))
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![1]);

        let out = run(json!({"filterType": "field", "field": "tags", "operator": "contains", "value": "vip"}))
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![1]);

        let out = run(json!({"filterType": "field", "field": "email", "operator": "ends_with", "value": ".org"}))
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![2]);
    }

    #[test]
    fn exists_treats_null_as_missing() {
        let record = json!({"a": null, "b": 0});
        assert!(!matches_condition(&record, "a", "exists", &Value::Null));
        assert!(matches_condition(&record, "a", "not_exists", &Value::Null));
        assert!(matches_condition(&record, "b", "exists", &Value::Null));
        assert!(matches_condition(&record, "c", "not_equals", &json!(1)));
        assert!(!matches_condition(&record, "c", "equals", &json!(1)));
    }

    #[tokio::test]
    async fn regex_and_dedup() {
        let out = run(json!({"filterType": "regex", "field": "email", "pattern": "@example\\.com$"}))
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![1, 3]);

        let out = run(json!({"filterType": "dedup", "fields": ["name", "email"]}))
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![1, 2]);
        assert_eq!(out.metadata["inputCount"], 3);
    }

    #[tokio::test]
    async fn expression_filter() {
        let out = run(json!({"filterType": "expression", "expression": "record.name == 'Ada Lovelace' && record.id * 10 > input.threshold"}))
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![3]);
    }

    #[test]
    fn validation() {
        let exec = FilterExecutor::new(ScriptEngine::default());
        assert!(exec.validate(&json!({"filterType": "dedup"})).valid);
        let r = exec.validate(&json!({"filterType": "field", "field": "a", "operator": "between"}));
        assert_eq!(r.errors, vec!["unsupported operator type 'between'"]);
        let r = exec.validate(&json!({"filterType": "field", "operator": "equals"}));
        assert_eq!(r.errors.len(), 2);
        assert!(!exec.validate(&json!({"filterType": "regex", "field": "a", "pattern": "("})).valid);
        assert!(!exec.validate(&json!({"filterType": "sql"})).valid);
    }
}
