//! Execution inspection commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use autoflow_core::repository::ExecutionRepository;
use autoflow_types::execution::{Execution, ExecutionStatus, LogEntry, LogLevel};

use crate::state::AppState;

#[derive(Subcommand)]
pub enum ExecutionCommand {
    /// Show one execution with its logs, error and retry history.
    Show {
        /// Execution id.
        id: Uuid,
    },

    /// List recent executions of an automation.
    List {
        /// Automation id.
        automation_id: Uuid,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

pub async fn handle_execution_command(action: ExecutionCommand, state: &AppState, json: bool) -> Result<()> {
    match action {
        ExecutionCommand::Show { id } => show(state, id, json).await,
        ExecutionCommand::List { automation_id, limit } => list(state, automation_id, limit, json).await,
    }
}

fn status_cell(status: ExecutionStatus) -> Cell {
    let color = match status {
        ExecutionStatus::Completed => Color::Green,
        ExecutionStatus::Failed => Color::Red,
        ExecutionStatus::Cancelled => Color::Yellow,
        ExecutionStatus::Running => Color::Blue,
    };
    Cell::new(status).fg(color)
}

async fn show(state: &AppState, id: Uuid, json: bool) -> Result<()> {
    let execution = state
        .executions
        .get_execution(&id)
        .await?
        .with_context(|| format!("Execution {id} not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
        return Ok(());
    }

    print_execution(&execution);
    Ok(())
}

fn print_execution(execution: &Execution) {
    println!();
    println!("  {} {}", style("Execution").bold(), execution.id);
    println!("  Automation: {}", execution.automation_id);
    println!("  Status:     {}", execution.status);
    println!("  Trigger:    {}", execution.triggered_by);
    println!("  Started:    {}", execution.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(done) = execution.completed_at {
        println!("  Completed:  {}", done.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(ms) = execution.duration_ms {
        println!("  Duration:   {ms}ms");
    }

    if let Some(error) = &execution.error_details {
        println!();
        println!("  {} {}", style("Error:").red().bold(), error.message);
        println!("  Type: {} / {} / {}", error.error_type, error.category, error.severity);
        if let Some(step) = &error.step_id {
            println!("  Step: {step}");
        }
    }

    if let Some(retry) = &execution.retry_info {
        println!();
        println!(
            "  {} {} of {} retries used ({})",
            style("Retries:").bold(),
            retry.attempts,
            retry.max_retries,
            retry.strategy
        );
        if !retry.retry_history.is_empty() {
            let mut table = Table::new();
            table
                .load_preset(presets::UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("Attempt").fg(Color::Cyan),
                    Cell::new("Error"),
                    Cell::new("Type"),
                    Cell::new("Delay"),
                ]);
            for attempt in &retry.retry_history {
                table.add_row(vec![
                    Cell::new(attempt.attempt),
                    Cell::new(&attempt.error),
                    Cell::new(&attempt.error_type),
                    Cell::new(format!("{}ms", attempt.delay_ms)),
                ]);
            }
            println!("{table}");
        }
    }

    if !execution.step_results.is_empty() {
        println!();
        println!("  {}", style("Step results").bold());
        for (step, value) in &execution.step_results {
            println!("    {step}: {value}");
        }
    }

    print_logs(&execution.logs);
    println!();
}

/// Print execution logs, one line each.
pub fn print_logs(logs: &[LogEntry]) {
    if logs.is_empty() {
        return;
    }
    println!();
    println!("  {}", style("Logs").bold());
    for entry in logs {
        let level = match entry.level {
            LogLevel::Error => style("ERROR").red(),
            LogLevel::Warn => style("WARN ").yellow(),
            LogLevel::Info => style("INFO ").green(),
            LogLevel::Debug => style("DEBUG").dim(),
        };
        let step = entry
            .step_id
            .as_deref()
            .map(|s| format!("[{s}] "))
            .unwrap_or_default();
        println!(
            "    {} {} {}{}",
            style(entry.timestamp.format("%H:%M:%S%.3f")).dim(),
            level,
            step,
            entry.message
        );
    }
}

async fn list(state: &AppState, automation_id: Uuid, limit: u32, json: bool) -> Result<()> {
    let executions = state.executions.list_executions(&automation_id, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions for {automation_id}.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Execution ID").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Trigger"),
            Cell::new("Started"),
            Cell::new("Duration"),
        ]);

    for e in &executions {
        table.add_row(vec![
            Cell::new(e.id),
            status_cell(e.status),
            Cell::new(e.triggered_by),
            Cell::new(e.started_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(e.duration_ms.map(|ms| format!("{ms}ms")).unwrap_or_else(|| "-".to_string())),
        ]);
    }

    println!("{table}");
    Ok(())
}
