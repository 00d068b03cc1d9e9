//! SQLite execution repository.
//!
//! The full execution (logs, step results, retry info) lives in the `record`
//! JSON column; status, trigger and timing are duplicated into columns so runs
//! can be listed without decoding every record.

use autoflow_core::repository::ExecutionRepository;
use autoflow_types::error::RepositoryError;
use autoflow_types::execution::Execution;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Execution, RepositoryError> {
    let record: String = row.try_get("record").map_err(query_error)?;
    serde_json::from_str(&record).map_err(|e| RepositoryError::Query(format!("invalid execution JSON: {e}")))
}

fn encode(execution: &Execution) -> Result<String, RepositoryError> {
    serde_json::to_string(execution).map_err(|e| RepositoryError::Query(format!("serialize execution: {e}")))
}

impl ExecutionRepository for SqliteExecutionRepository {
    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT record FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(decode).transpose()
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let record = encode(execution)?;
        sqlx::query(
            r#"INSERT INTO executions
               (id, automation_id, status, triggered_by, started_at, completed_at, duration_ms, record)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.automation_id.to_string())
        .bind(execution.status.as_str())
        .bind(execution.triggered_by.to_string())
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(execution.duration_ms.map(|ms| ms as i64))
        .bind(&record)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("execution {} already exists", execution.id))
            }
            other => query_error(other),
        })?;

        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let record = encode(execution)?;
        let result = sqlx::query(
            r#"UPDATE executions
               SET status = ?, completed_at = ?, duration_ms = ?, record = ?
               WHERE id = ?"#,
        )
        .bind(execution.status.as_str())
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(execution.duration_ms.map(|ms| ms as i64))
        .bind(&record)
        .bind(execution.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_executions(&self, automation_id: &Uuid, limit: u32) -> Result<Vec<Execution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT record FROM executions WHERE automation_id = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(automation_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter().map(decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::automation::SqliteAutomationRepository;
    use crate::sqlite::pool::database_url;
    use autoflow_core::repository::AutomationRepository;
    use autoflow_types::automation::{Automation, RetryStrategy};
    use autoflow_types::execution::{ExecutionStatus, RetryInfo, TriggeredBy};
    use chrono::Utc;
    use serde_json::json;

    async fn setup() -> (SqliteExecutionRepository, Automation) {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(dir.path(), "test.db");
        std::mem::forget(dir);
        let pool = DatabasePool::new(&url).await.unwrap();

        let automation = Automation::new("runs", "owner-1", Vec::new());
        SqliteAutomationRepository::new(pool.clone())
            .insert_automation(&automation)
            .await
            .unwrap();
        (SqliteExecutionRepository::new(pool), automation)
    }

    #[tokio::test]
    async fn insert_then_finish() {
        let (repo, automation) = setup().await;
        let mut execution = Execution::start(automation.id, json!({"x": 1}), TriggeredBy::Retry(2));
        repo.insert_execution(&execution).await.unwrap();

        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.triggered_by, TriggeredBy::Retry(2));

        let mut info = RetryInfo::new(3, RetryStrategy::Exponential);
        info.attempts = 1;
        execution.retry_info = Some(info);
        execution.status = ExecutionStatus::Completed;
        execution.output_data = Some(json!([1, 2, 3]));
        execution.completed_at = Some(Utc::now());
        execution.duration_ms = Some(42);
        repo.update_execution(&execution).await.unwrap();

        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(loaded.output_data, Some(json!([1, 2, 3])));
        assert_eq!(loaded.retry_info.unwrap().attempts, 1);
        assert_eq!(loaded.duration_ms, Some(42));
    }

    #[tokio::test]
    async fn unknown_automation_is_rejected() {
        let (repo, _) = setup().await;
        let execution = Execution::start(Uuid::now_v7(), json!({}), TriggeredBy::Manual);
        assert!(repo.insert_execution(&execution).await.is_err());
    }

    #[tokio::test]
    async fn update_of_missing_execution_is_not_found() {
        let (repo, automation) = setup().await;
        let execution = Execution::start(automation.id, json!({}), TriggeredBy::Manual);
        let err = repo.update_execution(&execution).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let (repo, automation) = setup().await;
        let mut ids = Vec::new();
        for offset in 0..3 {
            let mut execution = Execution::start(automation.id, json!({}), TriggeredBy::Scheduled);
            execution.started_at = Utc::now() + chrono::Duration::seconds(offset);
            repo.insert_execution(&execution).await.unwrap();
            ids.push(execution.id);
        }

        let listed = repo.list_executions(&automation.id, 2).await.unwrap();
        assert_eq!(listed.iter().map(|e| e.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    }
}
