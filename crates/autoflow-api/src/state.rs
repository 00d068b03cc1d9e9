//! Application state wiring all services together.
//!
//! The core services are generic over repository traits; AppState pins them
//! to the SQLite implementations and the process-backed browser driver.

use std::path::PathBuf;
use std::sync::Arc;

use autoflow_core::browser::{BoxBrowserDriver, BrowserPool};
use autoflow_core::classifier::{ErrorClassifier, ErrorReporter};
use autoflow_core::event::EventBus;
use autoflow_core::repository::BoxAuditSink;
use autoflow_core::resilience::GuardRegistry;
use autoflow_core::scheduler::AutomationScheduler;
use autoflow_core::step::{BuiltinSteps, ConnectorSet, FileStore, StepRegistryBuilder};
use autoflow_core::workflow::WorkflowEngine;
use autoflow_infra::browser::ProcessBrowserDriver;
use autoflow_infra::connector::register_http_connector;
use autoflow_infra::sqlite::audit::SqliteAuditSink;
use autoflow_infra::sqlite::automation::SqliteAutomationRepository;
use autoflow_infra::sqlite::execution::SqliteExecutionRepository;
use autoflow_infra::sqlite::pool::{DatabasePool, database_url};
use autoflow_types::config::EngineConfig;

pub type ConcreteEngine = WorkflowEngine<SqliteExecutionRepository>;

pub type ConcreteScheduler = AutomationScheduler<SqliteAutomationRepository, SqliteExecutionRepository>;

/// Shared application state used by CLI commands and the webhook server.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
    pub automations: Arc<SqliteAutomationRepository>,
    pub executions: Arc<SqliteExecutionRepository>,
    pub audit: Arc<SqliteAuditSink>,
    pub browser_pool: Arc<BrowserPool>,
    pub engine: Arc<ConcreteEngine>,
    pub scheduler: ConcreteScheduler,
    pub events: EventBus,
}

impl AppState {
    /// Open the database under `data_dir` and wire every service.
    ///
    /// Background work (browser sweeps, cron timers) is not started here;
    /// `serve` starts it.
    pub async fn init(data_dir: PathBuf, config: EngineConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_pool = DatabasePool::new(&database_url(&data_dir, &config.storage.database_file)).await?;

        let automations = Arc::new(SqliteAutomationRepository::new(db_pool.clone()));
        let executions = Arc::new(SqliteExecutionRepository::new(db_pool.clone()));
        let audit = Arc::new(SqliteAuditSink::new(db_pool.clone()));

        let events = EventBus::default();
        let classifier = Arc::new(ErrorClassifier::new());
        let reporter = ErrorReporter::new(Arc::clone(&classifier))
            .with_audit(BoxAuditSink::new(SqliteAuditSink::new(db_pool.clone())))
            .with_events(events.clone());

        let files_dir = data_dir.join(&config.storage.files_dir);
        tokio::fs::create_dir_all(&files_dir).await?;

        let guards = GuardRegistry::new(config.guard.clone(), Arc::clone(&classifier));
        let mut connectors = ConnectorSet::new();
        register_http_connector(&mut connectors, &guards)?;

        let browser_pool = Arc::new(BrowserPool::new(
            BoxBrowserDriver::new(ProcessBrowserDriver::from_settings(&config.browser)),
            config.browser.clone(),
        ));

        let registry = StepRegistryBuilder::new()
            .with_builtins(BuiltinSteps {
                files: Arc::new(FileStore::new(files_dir)),
                connectors: Arc::new(connectors),
                browser_pool: Arc::clone(&browser_pool),
                sandbox: config.sandbox.clone(),
            })
            .build();

        let engine = Arc::new(
            WorkflowEngine::new(
                Arc::clone(&executions),
                Arc::new(registry),
                Arc::new(reporter),
                events.clone(),
            )
            .with_retry_settings(config.retry.clone())
            .with_browser_pool(Arc::clone(&browser_pool)),
        );

        let scheduler = AutomationScheduler::new(
            Arc::clone(&automations),
            Arc::clone(&engine),
            config.scheduler.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            data_dir,
            db_pool,
            automations,
            executions,
            audit,
            browser_pool,
            engine,
            scheduler,
            events,
        })
    }
}
