//! SQLite error audit log.
//!
//! Receives high and critical severity errors from the error reporter and
//! keeps them for later inspection.

use autoflow_core::repository::{AuditEntry, AuditSink};
use autoflow_types::classification::{ErrorCategory, ErrorSeverity};
use autoflow_types::error::RepositoryError;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, query_error};

/// SQLite-backed error audit log.
pub struct SqliteAuditSink {
    pool: DatabasePool,
}

impl SqliteAuditSink {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Most recent entries first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<AuditEntry>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM error_audit_log ORDER BY created_at DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter().map(row_to_entry).collect()
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEntry, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let created_at: String = row.try_get("created_at").map_err(query_error)?;
    let category: String = row.try_get("category").map_err(query_error)?;
    let severity: String = row.try_get("severity").map_err(query_error)?;
    let context: String = row.try_get("context").map_err(query_error)?;

    let category: ErrorCategory = serde_json::from_value(serde_json::Value::String(category.clone()))
        .map_err(|_| RepositoryError::Query(format!("invalid error category: {category}")))?;
    let severity: ErrorSeverity = serde_json::from_value(serde_json::Value::String(severity.clone()))
        .map_err(|_| RepositoryError::Query(format!("invalid error severity: {severity}")))?;

    Ok(AuditEntry {
        id: parse_uuid(&id)?,
        timestamp: parse_datetime(&created_at)?,
        message: row.try_get("message").map_err(query_error)?,
        error_type: row.try_get("error_type").map_err(query_error)?,
        category,
        severity,
        context: serde_json::from_str(&context)
            .map_err(|e| RepositoryError::Query(format!("invalid audit context: {e}")))?,
    })
}

impl AuditSink for SqliteAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO error_audit_log (id, created_at, message, error_type, category, severity, context)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(format_datetime(&entry.timestamp))
        .bind(&entry.message)
        .bind(&entry.error_type)
        .bind(entry.category.as_str())
        .bind(entry.severity.as_str())
        .bind(entry.context.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }
}
