//! Automation definition types.
//!
//! An `Automation` is an ordered list of typed steps plus optional schedule,
//! trigger and retry configuration. Definitions are versioned: every explicit
//! update produces a new version number, the stored row is never edited in
//! place by the execution core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

/// A stored automation definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Automation {
    /// UUIDv7 assigned on first save.
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// External user id of the owner.
    pub owner_id: String,
    /// Disabled automations are not fired by schedules or webhooks.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Incremented on each explicit update.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Steps in execution order.
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Triggers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<RetryConfig>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

impl Automation {
    /// Create an empty, enabled automation owned by `owner_id`.
    pub fn new(name: impl Into<String>, owner_id: impl Into<String>, steps: Vec<Step>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description: None,
            owner_id: owner_id.into(),
            enabled: true,
            version: 1,
            steps,
            schedule: None,
            triggers: None,
            retry_config: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the definition as changed: bumps the version and the update time.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// The webhook trigger, if one is configured.
    pub fn webhook(&self) -> Option<&WebhookTriggerConfig> {
        self.triggers.as_ref().and_then(|t| t.webhook.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// A single typed building block.
///
/// `step_type` selects the executor; `config` is validated by that executor.
/// `connections` describe visual wiring only, execution order is list order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Step {
    pub fn new(id: impl Into<String>, step_type: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            name: None,
            config,
            connections: Vec::new(),
        }
    }

    /// Display label: the name when set, otherwise the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// An edge in the visual editor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub target_id: String,
}

// ---------------------------------------------------------------------------
// Schedule and triggers
// ---------------------------------------------------------------------------

/// Cron schedule attached to an automation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// 5/6-field cron expression or an English form ("every 5 minutes").
    pub cron_expression: String,
    /// IANA timezone name.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Input passed to each scheduled run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<serde_json::Value>,
    /// When false a fire is skipped while the previous run is still live.
    #[serde(default = "default_true")]
    pub allow_overlap: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Schedule {
    pub fn new(cron_expression: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            cron_expression: cron_expression.into(),
            timezone: timezone.into(),
            enabled: true,
            input_data: None,
            allow_overlap: true,
        }
    }
}

/// Inbound trigger configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Triggers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookTriggerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<serde_json::Value>,
}

/// Webhook binding persisted on the automation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTriggerConfig {
    pub token: String,
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Retry configuration
// ---------------------------------------------------------------------------

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Immediate,
    Fixed,
    Linear,
    #[default]
    Exponential,
}

impl std::fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RetryStrategy::Immediate => "immediate",
            RetryStrategy::Fixed => "fixed",
            RetryStrategy::Linear => "linear",
            RetryStrategy::Exponential => "exponential",
        };
        f.write_str(s)
    }
}

/// Whole-run retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub strategy: RetryStrategy,
    /// Base delay in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_max_retries(),
            strategy: RetryStrategy::default(),
            base_delay: default_base_delay(),
        }
    }
}
