//! Automation definition storage.

use autoflow_types::automation::Automation;
use autoflow_types::error::RepositoryError;
use uuid::Uuid;

/// Storage interface for automation definitions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait AutomationRepository: Send + Sync {
    /// Get an automation by id. `None` when it does not exist.
    fn get_automation(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Automation>, RepositoryError>> + Send;

    /// Insert a new automation. Conflicts when the id already exists.
    fn insert_automation(
        &self,
        automation: &Automation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace the stored automation. Callers bump the version before saving.
    fn update_automation(
        &self,
        automation: &Automation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All stored automations, newest first.
    fn list_automations(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Automation>, RepositoryError>> + Send;
}
