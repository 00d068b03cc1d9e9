//! Durable audit sink for high-severity errors.
//!
//! `AuditSink` uses RPITIT like the other repository traits. The classifier
//! holds it behind `BoxAuditSink` so it does not become generic over the
//! storage backend.

use std::future::Future;
use std::pin::Pin;

use autoflow_types::classification::{ErrorCategory, ErrorSeverity};
use autoflow_types::error::RepositoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One audited error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub error_type: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    /// Free-form context (execution id, step id, automation id).
    pub context: serde_json::Value,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// Object-safe version of [`AuditSink`] with boxed futures.
pub trait AuditSinkDyn: Send + Sync {
    fn record_boxed<'a>(
        &'a self,
        entry: &'a AuditEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>>;
}

impl<T: AuditSink> AuditSinkDyn for T {
    fn record_boxed<'a>(
        &'a self,
        entry: &'a AuditEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>> {
        Box::pin(self.record(entry))
    }
}

/// Type-erased audit sink.
pub struct BoxAuditSink {
    inner: Box<dyn AuditSinkDyn>,
}

impl BoxAuditSink {
    pub fn new<T: AuditSink + 'static>(sink: T) -> Self {
        Self {
            inner: Box::new(sink),
        }
    }

    pub async fn record(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        self.inner.record_boxed(entry).await
    }
}

impl std::fmt::Debug for BoxAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxAuditSink").finish_non_exhaustive()
    }
}
