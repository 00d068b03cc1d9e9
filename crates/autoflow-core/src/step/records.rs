//! Record helpers shared by the data executors: record lists, field paths,
//! loose value comparison and CSV.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::executor::StepError;
use crate::workflow::context::{lookup_path, value_to_string};

/// Normalize step input into a record list, bounded by `max_records`.
///
/// Arrays are taken as-is, `null` is empty and any other value is a single
/// record.
pub fn as_records(input: Value, max_records: usize) -> Result<Vec<Value>, StepError> {
    let records = match input {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    if records.len() > max_records {
        return Err(StepError::LimitExceeded(format!(
            "{} records, at most {max_records} allowed",
            records.len()
        )));
    }
    Ok(records)
}

/// Dotted field lookup inside one record.
pub fn field<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    lookup_path(record, path)
}

/// Set a top-level or dotted field, creating intermediate objects.
pub fn set_field(record: &mut Value, path: &str, value: Value) {
    let mut current = record;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Remove a top-level or dotted field.
pub fn remove_field(record: &mut Value, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        Some((parent, last)) => lookup_path_mut(record, parent)?
            .as_object_mut()?
            .remove(last),
        None => record.as_object_mut()?.remove(path),
    }
}

fn lookup_path_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    })
}

/// A config entry that is either one string or a list of strings.
pub fn string_list(config: &Value, key: &str) -> Vec<String> {
    match config.get(key) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Numeric view of a value; numeric strings count.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Compare two values: numerically when both sides are numeric, otherwise as
/// strings. `None` when either side is null or a container.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_number() || b.is_number() {
        if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
            return x.partial_cmp(&y);
        }
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => None,
        _ => Some(value_to_string(a).cmp(&value_to_string(b))),
    }
}

/// Loose equality: `compare` equal, or structurally equal.
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    a == b || compare(a, b) == Some(Ordering::Equal)
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Parse CSV with a header row into a list of string-valued objects.
/// Supports quoted fields with embedded commas, quotes and newlines.
pub fn parse_csv(text: &str) -> Vec<Value> {
    let mut rows = split_csv_rows(text).into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    rows.filter(|row| !(row.len() == 1 && row[0].is_empty()))
        .map(|row| {
            let mut record = Map::new();
            for (i, name) in header.iter().enumerate() {
                let cell = row.get(i).cloned().unwrap_or_default();
                record.insert(name.clone(), Value::String(cell));
            }
            Value::Object(record)
        })
        .collect()
}

fn split_csv_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                cell.push('"');
            }
            ('"', true) => in_quotes = false,
            ('"', false) if cell.is_empty() => in_quotes = true,
            (',', false) => row.push(std::mem::take(&mut cell)),
            ('\r', false) => {}
            ('\n', false) => {
                row.push(std::mem::take(&mut cell));
                rows.push(std::mem::take(&mut row));
            }
            (c, _) => cell.push(c),
        }
    }
    if !cell.is_empty() || !row.is_empty() {
        row.push(cell);
        rows.push(row);
    }
    rows
}

/// Render records as CSV. Columns are the union of keys in first-seen order.
pub fn to_csv(records: &[Value]) -> String {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        if let Value::Object(map) = record {
            for key in map.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }

    let mut out = columns
        .iter()
        .map(|c| escape_csv(c))
        .collect::<Vec<_>>()
        .join(",");
    out.push('\n');
    for record in records {
        let line = columns
            .iter()
            .map(|c| escape_csv(&record.get(c).map(value_to_string).unwrap_or_default()))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn escape_csv(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
