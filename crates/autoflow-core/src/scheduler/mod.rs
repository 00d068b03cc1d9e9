//! Cron and webhook triggers.
//!
//! [`cron::CronScheduler`] owns the timers, [`webhook::WebhookRouter`] maps
//! tokens to automations, and [`service::AutomationScheduler`] ties both to
//! the automation repository and the workflow engine.

pub mod cron;
pub mod service;
pub mod webhook;

pub use cron::{CronScheduler, CronSpec, FireCallback, normalize_schedule, parse_spec, parse_timezone};
pub use service::AutomationScheduler;
pub use webhook::{WebhookRouter, generate_token};

use autoflow_types::error::RepositoryError;
use uuid::Uuid;

use crate::workflow::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid timezone: '{0}'")]
    InvalidTimezone(String),

    /// Unknown or disabled webhook token.
    #[error("invalid token")]
    InvalidToken,

    #[error("automation {0} not found")]
    AutomationNotFound(Uuid),

    #[error("automation {0} is disabled")]
    AutomationDisabled(Uuid),

    #[error("scheduler error: {0}")]
    Job(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
