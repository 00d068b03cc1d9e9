//! In-memory repositories for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use autoflow_types::automation::Automation;
use autoflow_types::error::RepositoryError;
use autoflow_types::execution::Execution;
use uuid::Uuid;

use super::{AutomationRepository, ExecutionRepository};

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    automations: Mutex<HashMap<Uuid, Automation>>,
    executions: Mutex<HashMap<Uuid, Execution>>,
    writes: Mutex<HashMap<Uuid, usize>>,
    pub automation_reads: AtomicUsize,
}

impl InMemoryRepository {
    /// Inserts plus updates seen for one execution.
    pub fn execution_writes(&self, id: &Uuid) -> usize {
        self.writes.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn executions_of(&self, automation_id: &Uuid) -> Vec<Execution> {
        self.executions
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.automation_id == *automation_id)
            .cloned()
            .collect()
    }

    fn count_write(&self, id: Uuid) {
        *self.writes.lock().unwrap().entry(id).or_default() += 1;
    }
}

impl AutomationRepository for InMemoryRepository {
    async fn get_automation(&self, id: &Uuid) -> Result<Option<Automation>, RepositoryError> {
        self.automation_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.automations.lock().unwrap().get(id).cloned())
    }

    async fn insert_automation(&self, automation: &Automation) -> Result<(), RepositoryError> {
        let mut automations = self.automations.lock().unwrap();
        if automations.contains_key(&automation.id) {
            return Err(RepositoryError::Conflict(format!("automation {} exists", automation.id)));
        }
        automations.insert(automation.id, automation.clone());
        Ok(())
    }

    async fn update_automation(&self, automation: &Automation) -> Result<(), RepositoryError> {
        let mut automations = self.automations.lock().unwrap();
        match automations.get_mut(&automation.id) {
            Some(stored) => {
                *stored = automation.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list_automations(&self) -> Result<Vec<Automation>, RepositoryError> {
        let mut all: Vec<Automation> = self.automations.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}

impl ExecutionRepository for InMemoryRepository {
    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.executions.lock().unwrap().get(id).cloned())
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        self.executions
            .lock()
            .unwrap()
            .insert(execution.id, execution.clone());
        self.count_write(execution.id);
        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.lock().unwrap();
        if !executions.contains_key(&execution.id) {
            return Err(RepositoryError::NotFound);
        }
        executions.insert(execution.id, execution.clone());
        drop(executions);
        self.count_write(execution.id);
        Ok(())
    }

    async fn list_executions(&self, automation_id: &Uuid, limit: u32) -> Result<Vec<Execution>, RepositoryError> {
        let mut list = self.executions_of(automation_id);
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        list.truncate(limit as usize);
        Ok(list)
    }
}
