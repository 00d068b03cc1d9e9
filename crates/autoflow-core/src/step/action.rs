//! `action` steps: reshape data, run scripts and manage files.

use std::collections::BTreeMap;
use std::sync::Arc;

use autoflow_types::automation::Step;
use serde_json::{Map, Value, json};

use super::executor::{StepError, StepExecutor, StepOutput, ValidationResult, check_str, opt_str, require_str};
use super::files::{FileFormat, FileStore};
use super::records::{as_number, as_records, compare, field, remove_field, set_field, string_list};
use super::script::ScriptEngine;
use crate::workflow::context::WorkflowContext;

const AGGREGATE_OPS: [&str; 5] = ["count", "sum", "avg", "min", "max"];
const FILE_OPS: [&str; 5] = ["write", "read", "delete", "copy", "move"];

pub struct ActionExecutor {
    files: Arc<FileStore>,
    scripts: ScriptEngine,
}

impl ActionExecutor {
    pub fn new(files: Arc<FileStore>, scripts: ScriptEngine) -> Self {
        Self { files, scripts }
    }
}

// ---------------------------------------------------------------------------
// transform
// ---------------------------------------------------------------------------

fn transform_record(record: &mut Value, config: &Value, ctx: &WorkflowContext) {
    if let Some(Value::Object(renames)) = config.get("rename") {
        for (from, to) in renames {
            let Some(to) = to.as_str() else { continue };
            if let Some(value) = remove_field(record, from) {
                set_field(record, to, value);
            }
        }
    }
    if let Some(Value::Object(sets)) = config.get("set") {
        for (path, value) in sets {
            set_field(record, path, ctx.resolve_value(value));
        }
    }
    if let Some(Value::Array(removes)) = config.get("remove") {
        for path in removes.iter().filter_map(Value::as_str) {
            remove_field(record, path);
        }
    }
}

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

/// Objects merge key by key (right wins), arrays concatenate, an object
/// merges into every record of an array, anything else is replaced.
pub fn merge_values(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Object(mut a), Value::Object(b)) => {
            a.extend(b);
            Value::Object(a)
        }
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Value::Array(a)
        }
        (Value::Array(a), Value::Object(b)) => Value::Array(
            a.into_iter()
                .map(|record| merge_values(record, Value::Object(b.clone())))
                .collect(),
        ),
        (Value::Null, right) => right,
        (left, Value::Null) => left,
        (_, right) => right,
    }
}

// ---------------------------------------------------------------------------
// aggregate
// ---------------------------------------------------------------------------

struct Aggregation {
    field: Option<String>,
    op: String,
    alias: String,
}

fn parse_aggregations(config: &Value) -> Result<Vec<Aggregation>, StepError> {
    let Some(Value::Array(items)) = config.get("aggregations") else {
        return Err(StepError::InvalidConfig("'aggregations' is required".into()));
    };
    items
        .iter()
        .map(|item| {
            let op = require_str(item, "operation")?.to_string();
            if !AGGREGATE_OPS.contains(&op.as_str()) {
                return Err(StepError::InvalidConfig(format!("unsupported aggregation type '{op}'")));
            }
            let field = opt_str(item, "field").map(str::to_string);
            if field.is_none() && op != "count" {
                return Err(StepError::InvalidConfig(format!("'field' is required for '{op}'")));
            }
            let alias = opt_str(item, "as").map(str::to_string).unwrap_or_else(|| match &field {
                Some(f) => format!("{op}_{f}"),
                None => op.clone(),
            });
            Ok(Aggregation { field, op, alias })
        })
        .collect()
}

fn aggregate_group(records: &[&Value], agg: &Aggregation) -> Value {
    if agg.op == "count" {
        let count = match &agg.field {
            Some(f) => records.iter().filter(|r| field(r, f).is_some_and(|v| !v.is_null())).count(),
            None => records.len(),
        };
        return json!(count);
    }
    let path = agg.field.as_deref().unwrap_or_default();
    let values: Vec<&Value> = records.iter().filter_map(|r| field(r, path)).collect();
    match agg.op.as_str() {
        "sum" => json!(values.iter().filter_map(|v| as_number(v)).sum::<f64>()),
        "avg" => {
            let nums: Vec<f64> = values.iter().filter_map(|v| as_number(v)).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                json!(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        "min" => values
            .iter()
            .filter(|v| !v.is_null())
            .min_by(|a, b| compare(a, b).unwrap_or(std::cmp::Ordering::Equal))
            .map_or(Value::Null, |v| (*v).clone()),
        "max" => values
            .iter()
            .filter(|v| !v.is_null())
            .max_by(|a, b| compare(a, b).unwrap_or(std::cmp::Ordering::Equal))
            .map_or(Value::Null, |v| (*v).clone()),
        _ => Value::Null,
    }
}

fn aggregate(records: &[Value], group_by: &[String], aggs: &[Aggregation]) -> Value {
    // BTreeMap keyed by the serialized group keeps output order stable.
    let mut groups: BTreeMap<String, (Map<String, Value>, Vec<&Value>)> = BTreeMap::new();
    for record in records {
        let mut key_fields = Map::new();
        for g in group_by {
            key_fields.insert(g.clone(), field(record, g).cloned().unwrap_or(Value::Null));
        }
        let key = Value::Object(key_fields.clone()).to_string();
        groups
            .entry(key)
            .or_insert_with(|| (key_fields, Vec::new()))
            .1
            .push(record);
    }

    let rows: Vec<Value> = groups
        .into_values()
        .map(|(mut row, members)| {
            for agg in aggs {
                row.insert(agg.alias.clone(), aggregate_group(&members, agg));
            }
            Value::Object(row)
        })
        .collect();

    if group_by.is_empty() {
        let empty: Vec<&Value> = Vec::new();
        rows.into_iter().next().unwrap_or_else(|| {
            Value::Object(
                aggs.iter()
                    .map(|agg| (agg.alias.clone(), aggregate_group(&empty, agg)))
                    .collect(),
            )
        })
    } else {
        Value::Array(rows)
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

impl ActionExecutor {
    async fn file_action(
        &self,
        step: &Step,
        config: &Value,
        ctx: &mut WorkflowContext,
        input: Value,
    ) -> Result<StepOutput, StepError> {
        let operation = require_str(config, "operation")?;
        let path = require_str(config, "path")?;
        let output = match operation {
            "write" => {
                let format = FileFormat::detect(path, opt_str(config, "format"))?;
                let content = config.get("content").unwrap_or(&input);
                let bytes = self.files.write_value(path, content, format).await?;
                StepOutput::new(input).with_meta("bytes", bytes)
            }
            "read" => {
                let format = FileFormat::detect(path, opt_str(config, "format"))?;
                StepOutput::new(self.files.read_value(path, format).await?)
            }
            "delete" => {
                let existed = self.files.delete(path).await?;
                StepOutput::new(input).with_meta("deleted", existed)
            }
            "copy" => {
                let destination = require_str(config, "destination")?;
                let bytes = self.files.copy(path, destination).await?;
                StepOutput::new(input)
                    .with_meta("destination", destination)
                    .with_meta("bytes", bytes)
            }
            "move" => {
                let destination = require_str(config, "destination")?;
                self.files.rename(path, destination).await?;
                StepOutput::new(input).with_meta("destination", destination)
            }
            other => {
                return Err(StepError::InvalidConfig(format!("unsupported file operation type '{other}'")));
            }
        };
        ctx.info(Some(&step.id), format!("file {operation} {path}"));
        Ok(output.with_meta("operation", operation).with_meta("path", path))
    }
}

impl StepExecutor for ActionExecutor {
    fn step_type(&self) -> &'static str {
        "action"
    }

    fn validate(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        match opt_str(config, "actionType") {
            None => errors.push("'actionType' is required".to_string()),
            Some("transform") => {
                if ["rename", "set", "remove"].iter().all(|k| config.get(k).is_none()) {
                    errors.push("transform needs at least one of 'rename', 'set' or 'remove'".to_string());
                }
            }
            Some("merge") => {}
            Some("aggregate") => {
                if let Err(e) = parse_aggregations(config) {
                    errors.push(e.to_string());
                }
            }
            Some("script") => match opt_str(config, "expression") {
                None => errors.push("'expression' is required".to_string()),
                Some(expr) => {
                    if let Err(e) = self.scripts.check(expr) {
                        errors.push(e.to_string());
                    }
                }
            },
            Some("file") => {
                check_str(config, "path", &mut errors);
                match opt_str(config, "operation") {
                    None => errors.push("'operation' is required".to_string()),
                    Some(op) if !FILE_OPS.contains(&op) => {
                        errors.push(format!("unsupported file operation type '{op}'"));
                    }
                    Some("copy" | "move") => check_str(config, "destination", &mut errors),
                    Some(_) => {}
                }
                // Templated paths can only be checked at run time.
                if let Some(path) = opt_str(config, "path").filter(|p| !p.contains("{{")) {
                    if let Err(e) = self.files.resolve(path) {
                        errors.push(e.to_string());
                    }
                }
            }
            Some(other) => errors.push(format!("unsupported action type '{other}'")),
        }
        ValidationResult::from_errors(errors)
    }

    async fn execute(&self, step: &Step, ctx: &mut WorkflowContext, input: Value) -> Result<StepOutput, StepError> {
        let action_type = require_str(&step.config, "actionType")?;
        tracing::debug!(step_id = %step.id, action_type, "running action");

        match action_type {
            "transform" => {
                let config = &step.config;
                let data = match input {
                    Value::Array(_) => {
                        let mut records = as_records(input, self.scripts.max_records())?;
                        for record in &mut records {
                            transform_record(record, config, ctx);
                        }
                        Value::Array(records)
                    }
                    mut single => {
                        transform_record(&mut single, config, ctx);
                        single
                    }
                };
                Ok(StepOutput::new(data))
            }
            "merge" => {
                let mut merged = input;
                for id in string_list(&step.config, "steps") {
                    let result = ctx
                        .step_result(&id)
                        .cloned()
                        .ok_or_else(|| StepError::InvalidConfig(format!("step '{id}' has no result to merge")))?;
                    merged = merge_values(merged, result);
                }
                if let Some(data) = step.config.get("data") {
                    merged = merge_values(merged, ctx.resolve_value(data));
                }
                Ok(StepOutput::new(merged))
            }
            "aggregate" => {
                let aggs = parse_aggregations(&step.config)?;
                let records = as_records(input, self.scripts.max_records())?;
                let group_by = string_list(&step.config, "groupBy");
                Ok(StepOutput::new(aggregate(&records, &group_by, &aggs)).with_meta("inputCount", records.len()))
            }
            "script" => {
                let expression = require_str(&step.config, "expression")?;
                let scope = ctx.to_expression_context();
                let per_record = input.is_array() && opt_str(&step.config, "mode") != Some("whole");
                let data = if per_record {
                    let records = as_records(input, self.scripts.max_records())?;
                    Value::Array(self.scripts.map(expression, &records, &scope)?)
                } else {
                    let mut scope = scope;
                    if let Value::Object(map) = &mut scope {
                        map.insert("data".into(), input);
                    }
                    self.scripts.eval(expression, &scope)?
                };
                Ok(StepOutput::new(data))
            }
            "file" => {
                let config = ctx.resolve_value(&step.config);
                self.file_action(step, &config, ctx, input).await
            }
            other => Err(StepError::InvalidConfig(format!("unsupported action type '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn exec(dir: &tempfile::TempDir) -> ActionExecutor {
        ActionExecutor::new(Arc::new(FileStore::new(dir.path())), ScriptEngine::default())
    }

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(Uuid::now_v7(), Uuid::now_v7(), "owner", json!({"batch": "b-7"}))
    }

    #[tokio::test]
    async fn transform_renames_sets_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step::new(
            "t",
            "action",
            json!({
                "actionType": "transform",
                "rename": {"mail": "email"},
                "set": {"meta.batch": "{{ input.batch }}"},
                "remove": ["password"],
            }),
        );
        let input = json!([{"mail": "a@x", "password": "p"}]);
        let out = exec(&dir).execute(&step, &mut ctx(), input).await.unwrap();
        assert_eq!(out.data, json!([{"email": "a@x", "meta": {"batch": "b-7"}}]));
    }

    #[tokio::test]
    async fn merge_with_data_and_step_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = ctx();
        c.set_step_result("lookup", json!({"region": "eu"}));
        let step = Step::new(
            "m",
            "action",
            json!({"actionType": "merge", "steps": ["lookup"], "data": {"source": "crm"}}),
        );
        let out = exec(&dir).execute(&step, &mut c, json!([{"id": 1}])).await.unwrap();
        assert_eq!(out.data, json!([{"id": 1, "region": "eu", "source": "crm"}]));

        let missing = Step::new("m2", "action", json!({"actionType": "merge", "steps": ["nope"]}));
        assert!(exec(&dir).execute(&missing, &mut c, json!({})).await.is_err());
    }

    #[tokio::test]
    async fn aggregate_groups() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step::new(
            "a",
            "action",
            json!({
                "actionType": "aggregate",
                "groupBy": "region",
                "aggregations": [
                    {"operation": "count", "as": "orders"},
                    {"operation": "sum", "field": "amount"},
                    {"operation": "max", "field": "amount", "as": "largest"},
                ],
            }),
        );
        let input = json!([
            {"region": "eu", "amount": 10},
            {"region": "us", "amount": 5},
            {"region": "eu", "amount": "30"},
        ]);
        let out = exec(&dir).execute(&step, &mut ctx(), input).await.unwrap();
        assert_eq!(
            out.data,
            json!([
                {"region": "eu", "orders": 2, "sum_amount": 40.0, "largest": "30"},
                {"region": "us", "orders": 1, "sum_amount": 5.0, "largest": 5},
            ])
        );
    }

    #[tokio::test]
    async fn aggregate_without_grouping_returns_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step::new(
            "a",
            "action",
            json!({"actionType": "aggregate", "aggregations": [{"operation": "avg", "field": "n"}]}),
        );
        let out = exec(&dir)
            .execute(&step, &mut ctx(), json!([{"n": 1}, {"n": 2}]))
            .await
            .unwrap();
        assert_eq!(out.data, json!({"avg_n": 1.5}));

        let out = exec(&dir).execute(&step, &mut ctx(), json!([])).await.unwrap();
        assert_eq!(out.data, json!({"avg_n": null}));
    }

    #[tokio::test]
    async fn script_maps_records_or_whole_input() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step::new("s", "action", json!({"actionType": "script", "expression": "record.n * 2"}));
        let out = exec(&dir)
            .execute(&step, &mut ctx(), json!([{"n": 1}, {"n": 4}]))
            .await
            .unwrap();
        assert_eq!(out.data, json!([2.0, 8.0]));

        let step = Step::new(
            "s",
            "action",
            json!({"actionType": "script", "mode": "whole", "expression": "data|length"}),
        );
        let out = exec(&dir).execute(&step, &mut ctx(), json!([1, 2, 3])).await.unwrap();
        assert_eq!(out.data, json!(3.0));
    }

    #[tokio::test]
    async fn file_actions() {
        let dir = tempfile::tempdir().unwrap();
        let e = exec(&dir);
        let mut c = ctx();

        let write = Step::new("w", "action", json!({"actionType": "file", "operation": "write", "path": "{{ input.batch }}.json"}));
        let out = e.execute(&write, &mut c, json!({"ok": true})).await.unwrap();
        assert_eq!(out.data, json!({"ok": true}));
        assert!(dir.path().join("b-7.json").exists());

        let copy = Step::new(
            "c",
            "action",
            json!({"actionType": "file", "operation": "copy", "path": "b-7.json", "destination": "archive/b-7.json"}),
        );
        e.execute(&copy, &mut c, Value::Null).await.unwrap();

        let read = Step::new("r", "action", json!({"actionType": "file", "operation": "read", "path": "archive/b-7.json"}));
        let out = e.execute(&read, &mut c, Value::Null).await.unwrap();
        assert_eq!(out.data, json!({"ok": true}));

        let escape = Step::new("x", "action", json!({"actionType": "file", "operation": "delete", "path": "../x"}));
        assert!(matches!(e.execute(&escape, &mut c, Value::Null).await, Err(StepError::Sandbox(_))));
    }

    #[test]
    fn validation() {
        let dir = tempfile::tempdir().unwrap();
        let e = exec(&dir);
        assert!(!e.validate(&json!({"actionType": "transform"})).valid);
        assert!(!e.validate(&json!({"actionType": "aggregate", "aggregations": [{"operation": "median", "field": "x"}]})).valid);
        let r = e.validate(&json!({"actionType": "file", "operation": "copy", "path": "../a"}));
        assert_eq!(r.errors.len(), 2);
        assert!(e.validate(&json!({"actionType": "merge"})).valid);
    }
}
