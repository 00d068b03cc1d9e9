//! Execution record storage.

use autoflow_types::error::RepositoryError;
use autoflow_types::execution::Execution;
use uuid::Uuid;

/// Storage interface for execution records.
///
/// Executions are inserted once (`running`) and updated with retry progress
/// and the terminal state. The core never deletes them.
pub trait ExecutionRepository: Send + Sync {
    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    fn insert_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite the stored execution with `execution`.
    fn update_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Most recent executions of one automation, newest first.
    fn list_executions(
        &self,
        automation_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;
}
