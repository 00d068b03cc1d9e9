//! Schedule and webhook trigger commands.
//!
//! Changes are persisted on the automation. A server that is already running
//! picks them up on its next start.

use anyhow::Result;
use clap::Subcommand;
use console::style;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// Attach a cron schedule (5 or 6 fields, or "every day at 09:00").
    Set {
        /// Automation id.
        id: Uuid,

        /// Cron expression or English schedule.
        cron: String,

        /// IANA timezone the schedule is evaluated in.
        #[arg(long, default_value = "UTC")]
        timezone: String,
    },

    /// Remove the schedule.
    Clear {
        /// Automation id.
        id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum WebhookCommand {
    /// Enable the webhook trigger with a fresh token.
    Enable {
        /// Automation id.
        id: Uuid,
    },

    /// Disable the webhook trigger.
    Disable {
        /// Automation id.
        id: Uuid,
    },
}

pub async fn handle_schedule_command(action: ScheduleCommand, state: &AppState, json: bool) -> Result<()> {
    match action {
        ScheduleCommand::Set { id, cron, timezone } => {
            let schedule = state.scheduler.schedule(id, &cron, &timezone).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&schedule)?);
            } else {
                println!();
                println!(
                    "  {} Scheduled {} at '{}' ({})",
                    style("*").green().bold(),
                    id,
                    style(&schedule.cron_expression).cyan(),
                    schedule.timezone
                );
                println!();
            }
        }
        ScheduleCommand::Clear { id } => {
            let removed = state.scheduler.unschedule(id).await?;
            if json {
                println!("{}", serde_json::json!({ "id": id, "removed": removed }));
            } else if removed {
                println!("\n  {} Schedule removed from {id}\n", style("*").green().bold());
            } else {
                println!("\n  {id} has no schedule.\n");
            }
        }
    }
    Ok(())
}

pub async fn handle_webhook_command(action: WebhookCommand, state: &AppState, json: bool) -> Result<()> {
    match action {
        WebhookCommand::Enable { id } => {
            let token = state.scheduler.enable_webhook(id).await?;
            let server = &state.config.server;
            let url = format!("http://{}:{}/webhooks/{token}", server.host, server.port);
            if json {
                println!("{}", serde_json::json!({ "id": id, "token": token, "url": url }));
            } else {
                println!();
                println!("  {} Webhook enabled for {id}", style("*").green().bold());
                println!();
                println!("  {}", style(&url).yellow().bold());
                println!();
                println!("  {}", style("Anyone holding this URL can trigger the automation.").dim());
                println!();
            }
        }
        WebhookCommand::Disable { id } => {
            let disabled = state.scheduler.disable_webhook(id).await?;
            if json {
                println!("{}", serde_json::json!({ "id": id, "disabled": disabled }));
            } else if disabled {
                println!("\n  {} Webhook disabled for {id}\n", style("*").green().bold());
            } else {
                println!("\n  {id} has no webhook.\n");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoflow_core::repository::AutomationRepository;
    use autoflow_types::automation::{Automation, Step};
    use serde_json::json;

    async fn state_with_automation() -> (AppState, Uuid, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(dir.path().to_path_buf(), Default::default()).await.unwrap();
        let automation = Automation::new(
            "report",
            "owner-1",
            vec![Step::new("a", "source", json!({"sourceType": "manual", "data": []}))],
        );
        state.automations.insert_automation(&automation).await.unwrap();
        (state, automation.id, dir)
    }

    #[tokio::test]
    async fn schedule_set_and_clear_persist() {
        let (state, id, _dir) = state_with_automation().await;

        handle_schedule_command(
            ScheduleCommand::Set {
                id,
                cron: "every day at 06:30".into(),
                timezone: "Europe/Berlin".into(),
            },
            &state,
            true,
        )
        .await
        .unwrap();
        let stored = state.automations.get_automation(&id).await.unwrap().unwrap();
        assert_eq!(stored.schedule.unwrap().timezone, "Europe/Berlin");

        handle_schedule_command(ScheduleCommand::Clear { id }, &state, true)
            .await
            .unwrap();
        let stored = state.automations.get_automation(&id).await.unwrap().unwrap();
        assert!(stored.schedule.is_none());
    }

    #[tokio::test]
    async fn bad_timezone_is_an_error() {
        let (state, id, _dir) = state_with_automation().await;
        let err = handle_schedule_command(
            ScheduleCommand::Set {
                id,
                cron: "0 * * * *".into(),
                timezone: "Mars/Olympus".into(),
            },
            &state,
            true,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("invalid timezone"));
    }

    #[tokio::test]
    async fn webhook_enable_then_disable() {
        let (state, id, _dir) = state_with_automation().await;

        handle_webhook_command(WebhookCommand::Enable { id }, &state, true)
            .await
            .unwrap();
        let stored = state.automations.get_automation(&id).await.unwrap().unwrap();
        let webhook = stored.webhook().unwrap();
        assert!(webhook.enabled);
        assert_eq!(webhook.token.len(), 64);

        handle_webhook_command(WebhookCommand::Disable { id }, &state, true)
            .await
            .unwrap();
        let stored = state.automations.get_automation(&id).await.unwrap().unwrap();
        assert!(!stored.webhook().unwrap().enabled);
    }
}
