//! Error reporting: counters, windowed reports, alerts and audit.
//!
//! Every reported error is classified, logged at a level matching its
//! severity and counted. Critical errors additionally raise an alert on the
//! `autoflow::alert` tracing target; high and critical errors are written to
//! the audit sink.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use autoflow_types::classification::{ErrorAnalysis, ErrorSeverity};
use autoflow_types::event::AutomationEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::patterns::ErrorClassifier;
use crate::event::EventBus;
use crate::repository::{AuditEntry, BoxAuditSink};

const HISTORY_LIMIT: usize = 10_000;
const TOP_MESSAGES: usize = 10;
/// Distinct first tokens tracked; later ones are counted under [`OTHER_TOKEN`].
const TOKEN_LIMIT: usize = 1_000;
const OTHER_TOKEN: &str = "<other>";

/// Where an error happened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automation_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

#[derive(Debug, Clone)]
struct ReportedError {
    at: DateTime<Utc>,
    message: String,
    analysis: ErrorAnalysis,
}

#[derive(Debug, Default)]
struct Counters {
    by_severity: HashMap<String, u64>,
    by_category: HashMap<String, u64>,
    by_token: HashMap<String, u64>,
    history: VecDeque<ReportedError>,
}

/// Aggregated view over reported errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub total: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_category: BTreeMap<String, u64>,
    /// Most frequent messages, descending.
    pub top_messages: Vec<(String, u64)>,
}

pub struct ErrorReporter {
    classifier: Arc<ErrorClassifier>,
    counters: Mutex<Counters>,
    audit: Option<BoxAuditSink>,
    events: Option<EventBus>,
}

impl ErrorReporter {
    pub fn new(classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            classifier,
            counters: Mutex::new(Counters::default()),
            audit: None,
            events: None,
        }
    }

    pub fn with_audit(mut self, audit: BoxAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    /// Classify without side effects.
    pub fn analyze(&self, message: &str) -> ErrorAnalysis {
        self.classifier.analyze(message)
    }

    /// Classify, log, count, alert and audit one error.
    pub async fn report(&self, message: &str, context: &ErrorContext) -> ErrorAnalysis {
        let analysis = self.classifier.analyze(message);
        self.record(message, &analysis);

        match analysis.severity {
            ErrorSeverity::Low => tracing::debug!(
                error_type = %analysis.error_type,
                category = %analysis.category,
                execution_id = ?context.execution_id,
                step_id = ?context.step_id,
                "{message}"
            ),
            ErrorSeverity::Medium => tracing::warn!(
                error_type = %analysis.error_type,
                category = %analysis.category,
                execution_id = ?context.execution_id,
                step_id = ?context.step_id,
                "{message}"
            ),
            ErrorSeverity::High | ErrorSeverity::Critical => tracing::error!(
                error_type = %analysis.error_type,
                category = %analysis.category,
                severity = %analysis.severity,
                execution_id = ?context.execution_id,
                step_id = ?context.step_id,
                "{message}"
            ),
        }

        if analysis.severity == ErrorSeverity::Critical {
            tracing::error!(
                target: "autoflow::alert",
                error_type = %analysis.error_type,
                category = %analysis.category,
                automation_id = ?context.automation_id,
                execution_id = ?context.execution_id,
                "critical error: {message}"
            );
            if let Some(events) = &self.events {
                events.publish(AutomationEvent::CriticalError {
                    message: message.to_string(),
                    category: analysis.category,
                    severity: analysis.severity,
                });
            }
        }

        if analysis.severity.is_audited() {
            if let Some(audit) = &self.audit {
                let entry = AuditEntry {
                    id: Uuid::now_v7(),
                    timestamp: Utc::now(),
                    message: message.to_string(),
                    error_type: analysis.error_type.clone(),
                    category: analysis.category,
                    severity: analysis.severity,
                    context: serde_json::to_value(context).unwrap_or_default(),
                };
                if let Err(e) = audit.record(&entry).await {
                    tracing::warn!(error = %e, "failed to write error audit entry");
                }
            }
        }

        analysis
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // Counters stay usable after a panic mid-update; at worst one entry
        // is miscounted.
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, message: &str, analysis: &ErrorAnalysis) {
        let mut counters = self.lock();
        *counters
            .by_severity
            .entry(analysis.severity.as_str().to_string())
            .or_default() += 1;
        *counters
            .by_category
            .entry(analysis.category.as_str().to_string())
            .or_default() += 1;
        let mut token = first_token(message);
        if counters.by_token.len() >= TOKEN_LIMIT && !counters.by_token.contains_key(&token) {
            token = OTHER_TOKEN.to_string();
        }
        *counters.by_token.entry(token).or_default() += 1;

        if counters.history.len() == HISTORY_LIMIT {
            counters.history.pop_front();
        }
        counters.history.push_back(ReportedError {
            at: Utc::now(),
            message: message.to_string(),
            analysis: analysis.clone(),
        });
    }

    /// Lifetime counters keyed by first token of the message.
    pub fn token_counts(&self) -> BTreeMap<String, u64> {
        self.lock()
            .by_token
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Lifetime counters by severity.
    pub fn severity_counts(&self) -> BTreeMap<String, u64> {
        self.lock()
            .by_severity
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Counts grouped by severity and category plus the top recurring
    /// messages, for errors reported within `window`.
    pub fn report_window(&self, window: Duration) -> ErrorReport {
        let counters = self.lock();
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let since = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut report = ErrorReport::default();
        let mut messages: HashMap<&str, u64> = HashMap::new();
        for entry in counters.history.iter().filter(|e| e.at >= since) {
            report.total += 1;
            *report
                .by_severity
                .entry(entry.analysis.severity.as_str().to_string())
                .or_default() += 1;
            *report
                .by_category
                .entry(entry.analysis.category.as_str().to_string())
                .or_default() += 1;
            *messages.entry(entry.message.as_str()).or_default() += 1;
        }

        let mut top: Vec<(String, u64)> = messages
            .into_iter()
            .map(|(m, c)| (m.to_string(), c))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(TOP_MESSAGES);
        report.top_messages = top;
        report
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("audit", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

fn first_token(message: &str) -> String {
    message
        .split(|c: char| c.is_whitespace() || c == ':')
        .find(|t| !t.is_empty())
        .unwrap_or("")
        .to_lowercase()
}
