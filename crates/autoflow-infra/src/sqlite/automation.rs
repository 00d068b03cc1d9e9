//! SQLite automation repository.
//!
//! Definitions are stored as JSON blobs next to a few scalar columns used for
//! listing. Updates replace the whole definition.

use autoflow_core::repository::AutomationRepository;
use autoflow_types::automation::Automation;
use autoflow_types::error::RepositoryError;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

pub struct SqliteAutomationRepository {
    pool: DatabasePool,
}

impl SqliteAutomationRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Automation, RepositoryError> {
    let definition: String = row.try_get("definition").map_err(query_error)?;
    serde_json::from_str(&definition)
        .map_err(|e| RepositoryError::Query(format!("invalid automation JSON: {e}")))
}

fn encode(automation: &Automation) -> Result<String, RepositoryError> {
    serde_json::to_string(automation).map_err(|e| RepositoryError::Query(format!("serialize automation: {e}")))
}

impl AutomationRepository for SqliteAutomationRepository {
    async fn get_automation(&self, id: &Uuid) -> Result<Option<Automation>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM automations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(decode).transpose()
    }

    async fn insert_automation(&self, automation: &Automation) -> Result<(), RepositoryError> {
        let definition = encode(automation)?;
        let result = sqlx::query(
            r#"INSERT INTO automations (id, name, owner_id, enabled, version, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO NOTHING"#,
        )
        .bind(automation.id.to_string())
        .bind(&automation.name)
        .bind(&automation.owner_id)
        .bind(automation.enabled)
        .bind(automation.version as i64)
        .bind(&definition)
        .bind(format_datetime(&automation.created_at))
        .bind(format_datetime(&automation.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!("automation {} already exists", automation.id)));
        }
        Ok(())
    }

    async fn update_automation(&self, automation: &Automation) -> Result<(), RepositoryError> {
        let definition = encode(automation)?;
        let result = sqlx::query(
            r#"UPDATE automations
               SET name = ?, owner_id = ?, enabled = ?, version = ?, definition = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&automation.name)
        .bind(&automation.owner_id)
        .bind(automation.enabled)
        .bind(automation.version as i64)
        .bind(&definition)
        .bind(format_datetime(&automation.updated_at))
        .bind(automation.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_automations(&self) -> Result<Vec<Automation>, RepositoryError> {
        let rows = sqlx::query("SELECT definition FROM automations ORDER BY created_at DESC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter().map(decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::database_url;
    use autoflow_types::automation::{Schedule, Step};
    use serde_json::json;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(dir.path(), "test.db");
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample() -> Automation {
        let mut automation = Automation::new(
            "nightly export",
            "owner-1",
            vec![
                Step::new("src", "source", json!({"sourceType": "manual", "data": [1, 2]})),
                Step::new("out", "destination", json!({"destinationType": "file", "path": "out.json"})),
            ],
        );
        automation.schedule = Some(Schedule::new("every day at 02:00", "Europe/Berlin"));
        automation
    }

    #[tokio::test]
    async fn insert_get_update() {
        let repo = SqliteAutomationRepository::new(test_pool().await);
        let mut automation = sample();
        repo.insert_automation(&automation).await.unwrap();

        let loaded = repo.get_automation(&automation.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "nightly export");
        assert_eq!(loaded.steps.len(), 2);
        assert_eq!(loaded.schedule, automation.schedule);

        automation.enabled = false;
        automation.touch();
        repo.update_automation(&automation).await.unwrap();
        let loaded = repo.get_automation(&automation.id).await.unwrap().unwrap();
        assert!(!loaded.enabled);
        assert_eq!(loaded.version, 2);
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let repo = SqliteAutomationRepository::new(test_pool().await);
        let automation = sample();
        repo.insert_automation(&automation).await.unwrap();
        let err = repo.insert_automation(&automation).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn missing_rows() {
        let repo = SqliteAutomationRepository::new(test_pool().await);
        assert!(repo.get_automation(&Uuid::now_v7()).await.unwrap().is_none());
        let err = repo.update_automation(&sample()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let repo = SqliteAutomationRepository::new(test_pool().await);
        let first = sample();
        let mut second = sample();
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        repo.insert_automation(&first).await.unwrap();
        repo.insert_automation(&second).await.unwrap();

        let all = repo.list_automations().await.unwrap();
        assert_eq!(all.iter().map(|a| a.id).collect::<Vec<_>>(), vec![second.id, first.id]);
    }
}
