//! Automation commands: validate, import, list and run.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use autoflow_core::repository::AutomationRepository;
use autoflow_observe::attrs;
use autoflow_types::automation::Automation;
use autoflow_types::error::RepositoryError;
use autoflow_types::execution::{ExecutionResult, ExecutionStatus, TriggeredBy};

use super::execution::print_logs;
use crate::state::AppState;

/// Read an automation definition from a JSON file.
///
/// A missing `id` gets a fresh UUIDv7 so hand-written files can be imported.
pub async fn load_definition(path: &Path) -> Result<Automation> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_definition(&raw).with_context(|| format!("Invalid automation in {}", path.display()))
}

fn parse_definition(raw: &str) -> Result<Automation> {
    let mut value: Value = serde_json::from_str(raw)?;
    let Some(object) = value.as_object_mut() else {
        bail!("expected a JSON object");
    };
    if !object.contains_key("id") {
        object.insert("id".to_string(), Value::String(Uuid::now_v7().to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub async fn validate(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let automation = load_definition(file).await?;
    let result = state.engine.validate(&automation);

    if json {
        let out = serde_json::json!({
            "valid": result.valid,
            "errors": result.errors,
            "steps": automation.steps.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if result.valid {
        println!();
        println!(
            "  {} '{}' is valid ({} steps)",
            style("✓").green().bold(),
            style(&automation.name).cyan(),
            automation.steps.len()
        );
        println!();
    } else {
        println!();
        println!(
            "  {} '{}' has {} problem(s):",
            style("✗").red().bold(),
            style(&automation.name).cyan(),
            result.errors.len()
        );
        for error in &result.errors {
            println!("    - {error}");
        }
        println!();
    }

    if !result.valid {
        bail!("validation failed");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

pub async fn import(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let mut automation = load_definition(file).await?;

    let result = state.engine.validate(&automation);
    if !result.valid {
        bail!("validation failed: {}", result.errors.join("; "));
    }

    let replaced = match state.automations.insert_automation(&automation).await {
        Ok(()) => false,
        Err(RepositoryError::Conflict(_)) => {
            let existing = state
                .automations
                .get_automation(&automation.id)
                .await?
                .context("automation vanished during import")?;
            automation.version = existing.version;
            automation.created_at = existing.created_at;
            automation.touch();
            state.automations.update_automation(&automation).await?;
            true
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(automation_id = %automation.id, version = automation.version, replaced, "automation imported");

    if json {
        let out = serde_json::json!({
            "id": automation.id,
            "name": automation.name,
            "version": automation.version,
            "replaced": replaced,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} {} '{}' (version {})",
            style("*").green().bold(),
            if replaced { "Updated" } else { "Imported" },
            style(&automation.name).cyan(),
            automation.version
        );
        println!("  ID: {}", automation.id);
        println!();
        println!(
            "  Run it: {}",
            style(format!("autoflow run {}", automation.id)).dim()
        );
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list(state: &AppState, json: bool) -> Result<()> {
    let automations = state.automations.list_automations().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&automations)?);
        return Ok(());
    }

    if automations.is_empty() {
        println!();
        println!("  No automations stored.");
        println!("  Import one with: {}", style("autoflow import <file.json>").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Version"),
            Cell::new("Steps"),
            Cell::new("Schedule"),
            Cell::new("Webhook"),
            Cell::new("Enabled"),
        ]);

    for a in &automations {
        let schedule = a
            .schedule
            .as_ref()
            .filter(|s| s.enabled)
            .map(|s| format!("{} ({})", s.cron_expression, s.timezone))
            .unwrap_or_else(|| "-".to_string());
        let webhook = if a.webhook().is_some_and(|w| w.enabled) { "on" } else { "-" };
        table.add_row(vec![
            Cell::new(a.id),
            Cell::new(&a.name),
            Cell::new(a.version),
            Cell::new(a.steps.len()),
            Cell::new(schedule),
            Cell::new(webhook),
            Cell::new(if a.enabled { "yes" } else { "no" }),
        ]);
    }

    println!("{table}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn run(state: &AppState, id: Uuid, input: Option<&str>, json: bool) -> Result<()> {
    let automation = state
        .automations
        .get_automation(&id)
        .await?
        .with_context(|| format!("Automation {id} not found"))?;

    let input: Value = match input {
        Some(raw) => serde_json::from_str(raw).context("Invalid JSON input")?,
        None => Value::Object(Default::default()),
    };

    let span = tracing::info_span!(attrs::SPAN_MANUAL_RUN, automation_id = %id);
    let result = state
        .engine
        .execute(&automation, input, TriggeredBy::Manual)
        .instrument(span)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&automation, &result);
    }

    if !result.success {
        bail!("execution {} {}", result.execution_id, result.status);
    }
    Ok(())
}

fn print_result(automation: &Automation, result: &ExecutionResult) {
    let marker = match result.status {
        ExecutionStatus::Completed => style("✓").green().bold(),
        ExecutionStatus::Cancelled => style("-").yellow().bold(),
        _ => style("✗").red().bold(),
    };

    println!();
    println!(
        "  {} '{}' {} in {}ms",
        marker,
        style(&automation.name).cyan(),
        result.status,
        result.duration_ms
    );
    println!("  Execution: {}", result.execution_id);

    if let Some(error) = &result.error {
        println!();
        println!("  {} {}", style("Error:").red().bold(), error.message);
        println!(
            "  Type: {} / {} / {}{}",
            error.error_type,
            error.category,
            error.severity,
            if error.retryable { " (retryable)" } else { "" }
        );
        for suggestion in &error.suggestions {
            println!("    - {suggestion}");
        }
    }

    if let Some(results) = &result.results {
        println!();
        println!("  {}", style("Results").bold());
        match serde_json::to_string_pretty(results) {
            Ok(pretty) => {
                for line in pretty.lines() {
                    println!("    {line}");
                }
            }
            Err(_) => println!("    {results}"),
        }
    }

    print_logs(&result.logs);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_id_is_generated() {
        let automation = parse_definition(
            r#"{"name":"n","ownerId":"o","steps":[{"id":"a","type":"source","config":{"sourceType":"manual"}}]}"#,
        )
        .unwrap();
        assert_eq!(automation.steps.len(), 1);
        assert_eq!(automation.version, 1);
        assert!(automation.enabled);
    }

    #[test]
    fn explicit_id_is_kept() {
        let automation = parse_definition(
            r#"{"id":"0191c3a2-7d4e-7000-8000-000000000001","name":"n","ownerId":"o","steps":[]}"#,
        )
        .unwrap();
        assert_eq!(automation.id.to_string(), "0191c3a2-7d4e-7000-8000-000000000001");
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(parse_definition("[1, 2]").is_err());
    }

    #[tokio::test]
    async fn import_twice_bumps_the_version() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(dir.path().join("data"), Default::default()).await.unwrap();
        let file = dir.path().join("automation.json");
        tokio::fs::write(
            &file,
            r#"{"id":"0191c3a2-7d4e-7000-8000-000000000002","name":"n","ownerId":"o",
                "steps":[{"id":"a","type":"source","config":{"sourceType":"manual","data":[1]}}]}"#,
        )
        .await
        .unwrap();

        import(&state, &file, true).await.unwrap();
        import(&state, &file, true).await.unwrap();

        let id: Uuid = "0191c3a2-7d4e-7000-8000-000000000002".parse().unwrap();
        let stored = state.automations.get_automation(&id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn invalid_definition_is_not_imported() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(dir.path().join("data"), Default::default()).await.unwrap();
        let file = dir.path().join("bad.json");
        tokio::fs::write(
            &file,
            r#"{"name":"n","ownerId":"o","steps":[{"id":"a","type":"teleport","config":{}}]}"#,
        )
        .await
        .unwrap();

        assert!(import(&state, &file, true).await.is_err());
        assert!(state.automations.list_automations().await.unwrap().is_empty());
    }
}
