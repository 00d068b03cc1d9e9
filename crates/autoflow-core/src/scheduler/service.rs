//! Scheduler facade: persisted schedules and webhook bindings in, engine runs
//! out.
//!
//! Schedule and webhook changes are written to the automation (bumping its
//! version) and applied to the live timers and routes when the scheduler is
//! running. Cron fires re-read the automation so they always run the latest
//! version.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use autoflow_types::automation::{Automation, Schedule, Triggers, WebhookTriggerConfig};
use autoflow_types::config::SchedulerSettings;
use autoflow_types::event::AutomationEvent;
use autoflow_types::execution::{ExecutionResult, TriggeredBy};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Value, json};
use uuid::Uuid;

use super::cron::{CronScheduler, FireCallback, parse_spec};
use super::webhook::{WebhookRouter, generate_token};
use super::SchedulerError;
use crate::repository::{AutomationRepository, ExecutionRepository};
use crate::workflow::WorkflowEngine;

/// What `start` armed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartSummary {
    pub schedules: usize,
    pub webhooks: usize,
}

pub struct AutomationScheduler<A: AutomationRepository, E: ExecutionRepository> {
    inner: Arc<Inner<A, E>>,
}

impl<A: AutomationRepository, E: ExecutionRepository> Clone for AutomationScheduler<A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<A: AutomationRepository, E: ExecutionRepository> {
    automations: Arc<A>,
    engine: Arc<WorkflowEngine<E>>,
    settings: SchedulerSettings,
    cron: CronScheduler,
    webhooks: WebhookRouter,
    /// Scheduled runs in flight per automation.
    live_runs: DashMap<Uuid, usize>,
}

impl<A, E> AutomationScheduler<A, E>
where
    A: AutomationRepository + 'static,
    E: ExecutionRepository + 'static,
{
    pub fn new(automations: Arc<A>, engine: Arc<WorkflowEngine<E>>, settings: SchedulerSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                automations,
                engine,
                settings,
                cron: CronScheduler::new(),
                webhooks: WebhookRouter::new(),
                live_runs: DashMap::new(),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine<E>> {
        &self.inner.engine
    }

    /// Load every automation, route its webhook and arm its schedule.
    ///
    /// Cron timers are only armed when `scheduler.enabled` is set; webhooks
    /// always route. An invalid stored schedule is logged and skipped.
    pub async fn start(&self) -> Result<StartSummary, SchedulerError> {
        if self.inner.settings.enabled {
            self.inner.cron.start().await?;
        }

        let mut summary = StartSummary::default();
        for automation in self.inner.automations.list_automations().await? {
            if let Some(webhook) = automation.webhook() {
                self.inner.webhooks.bind(automation.id, webhook);
                if webhook.enabled {
                    summary.webhooks += 1;
                }
            }
            match self.inner.apply_schedule(&automation).await {
                Ok(true) => summary.schedules += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(automation_id = %automation.id, "skipping stored schedule: {e}");
                }
            }
        }

        tracing::info!(
            schedules = summary.schedules,
            webhooks = summary.webhooks,
            "scheduler started"
        );
        Ok(summary)
    }

    /// Disarm every timer and drop every webhook route.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.inner.cron.stop().await?;
        self.inner.webhooks.clear();
        tracing::info!("scheduler stopped");
        Ok(())
    }

    pub fn is_scheduled(&self, automation_id: &Uuid) -> bool {
        self.inner.cron.is_armed(automation_id)
    }

    pub fn routes(&self) -> usize {
        self.inner.webhooks.len()
    }

    // -- schedules ----------------------------------------------------------

    /// Set the automation's cron schedule, keeping its input and overlap
    /// settings. The spec and timezone are validated before anything is read
    /// or written.
    pub async fn schedule(&self, automation_id: Uuid, cron: &str, timezone: &str) -> Result<Schedule, SchedulerError> {
        parse_spec(cron, timezone)?;
        let mut automation = self.inner.load(automation_id).await?;
        let schedule = match automation.schedule.take() {
            Some(existing) => Schedule {
                cron_expression: cron.to_string(),
                timezone: timezone.to_string(),
                enabled: true,
                ..existing
            },
            None => Schedule::new(cron, timezone),
        };
        self.inner.save_schedule(automation, Some(schedule.clone())).await?;
        Ok(schedule)
    }

    /// Replace the automation's schedule wholesale.
    pub async fn update_schedule(&self, automation_id: Uuid, schedule: Schedule) -> Result<Schedule, SchedulerError> {
        parse_spec(&schedule.cron_expression, &schedule.timezone)?;
        let automation = self.inner.load(automation_id).await?;
        self.inner.save_schedule(automation, Some(schedule.clone())).await?;
        Ok(schedule)
    }

    /// Remove the schedule. Returns whether the automation had one.
    pub async fn unschedule(&self, automation_id: Uuid) -> Result<bool, SchedulerError> {
        self.inner.cron.disarm(automation_id).await?;
        let automation = self.inner.load(automation_id).await?;
        if automation.schedule.is_none() {
            return Ok(false);
        }
        self.inner.save_schedule(automation, None).await?;
        Ok(true)
    }

    /// Run a scheduled fire now. `None` when the fire was skipped because the
    /// schedule is disabled or a previous run is still live.
    pub async fn run_scheduled(&self, automation_id: Uuid) -> Result<Option<ExecutionResult>, SchedulerError> {
        self.inner.run_scheduled(automation_id).await
    }

    // -- webhooks -----------------------------------------------------------

    /// Bind a fresh webhook token to the automation and return it. Enabling
    /// an already enabled webhook rotates its token.
    pub async fn enable_webhook(&self, automation_id: Uuid) -> Result<String, SchedulerError> {
        let mut automation = self.inner.load(automation_id).await?;
        let config = WebhookTriggerConfig {
            token: generate_token(),
            enabled: true,
        };
        automation.triggers.get_or_insert_with(Triggers::default).webhook = Some(config.clone());
        automation.touch();
        self.inner.automations.update_automation(&automation).await?;
        self.inner.webhooks.bind(automation_id, &config);
        tracing::info!(%automation_id, version = automation.version, "webhook enabled");
        Ok(config.token)
    }

    /// Stop routing the automation's webhook. The binding stays on the
    /// automation. Returns whether a webhook was configured.
    pub async fn disable_webhook(&self, automation_id: Uuid) -> Result<bool, SchedulerError> {
        let mut automation = self.inner.load(automation_id).await?;
        let Some(webhook) = automation.triggers.as_mut().and_then(|t| t.webhook.as_mut()) else {
            return Ok(false);
        };
        webhook.enabled = false;
        automation.touch();
        self.inner.automations.update_automation(&automation).await?;
        self.inner.webhooks.unbind(automation_id);
        tracing::info!(%automation_id, version = automation.version, "webhook disabled");
        Ok(true)
    }

    /// Run the automation bound to `token` with the request as input.
    ///
    /// Unknown tokens are rejected before any automation is read.
    pub async fn handle_webhook(
        &self,
        token: &str,
        payload: Value,
        headers: BTreeMap<String, String>,
    ) -> Result<ExecutionResult, SchedulerError> {
        let Some(automation_id) = self.inner.webhooks.resolve(token) else {
            tracing::warn!("webhook rejected: invalid token");
            return Err(SchedulerError::InvalidToken);
        };

        let automation = self.inner.load(automation_id).await?;
        let bound = automation.webhook().is_some_and(|w| w.enabled && w.token == token);
        if !bound {
            self.inner.webhooks.unbind(automation_id);
            tracing::warn!(%automation_id, "webhook rejected: stale token");
            return Err(SchedulerError::InvalidToken);
        }
        if !automation.enabled {
            return Err(SchedulerError::AutomationDisabled(automation_id));
        }

        tracing::info!(%automation_id, "webhook received");
        let input = json!({
            "webhook": {
                "payload": payload,
                "headers": headers,
                "timestamp": Utc::now().to_rfc3339(),
            }
        });
        Ok(self.inner.engine.execute(&automation, input, TriggeredBy::Webhook).await?)
    }
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

impl<A, E> Inner<A, E>
where
    A: AutomationRepository + 'static,
    E: ExecutionRepository + 'static,
{
    async fn load(&self, automation_id: Uuid) -> Result<Automation, SchedulerError> {
        self.automations
            .get_automation(&automation_id)
            .await?
            .ok_or(SchedulerError::AutomationNotFound(automation_id))
    }

    async fn save_schedule(self: &Arc<Self>, mut automation: Automation, schedule: Option<Schedule>) -> Result<(), SchedulerError> {
        automation.schedule = schedule;
        automation.touch();
        self.automations.update_automation(&automation).await?;
        self.apply_schedule(&automation).await?;
        tracing::info!(
            automation_id = %automation.id,
            version = automation.version,
            scheduled = automation.schedule.is_some(),
            "schedule saved"
        );
        Ok(())
    }

    /// Arm or disarm the automation's timer to match its stored schedule.
    /// Returns whether a timer is armed afterwards.
    async fn apply_schedule(self: &Arc<Self>, automation: &Automation) -> Result<bool, SchedulerError> {
        let schedule = automation.schedule.as_ref().filter(|s| s.enabled);
        let armable = automation.enabled && self.settings.enabled && self.cron.is_running().await;
        let Some(schedule) = schedule.filter(|_| armable) else {
            self.cron.disarm(automation.id).await?;
            return Ok(false);
        };

        let spec = parse_spec(&schedule.cron_expression, &schedule.timezone)?;
        self.cron.arm(automation.id, spec, self.fire_callback()).await?;
        Ok(true)
    }

    fn fire_callback(self: &Arc<Self>) -> FireCallback {
        let weak: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |automation_id| {
            let weak = Weak::clone(&weak);
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = inner.run_scheduled(automation_id).await {
                    tracing::error!(%automation_id, "scheduled run failed: {e}");
                }
            })
        })
    }

    async fn run_scheduled(&self, automation_id: Uuid) -> Result<Option<ExecutionResult>, SchedulerError> {
        let automation = self.load(automation_id).await?;
        if !automation.enabled {
            return Err(SchedulerError::AutomationDisabled(automation_id));
        }
        let Some(schedule) = automation.schedule.clone().filter(|s| s.enabled) else {
            tracing::debug!(%automation_id, "fire ignored, schedule disabled");
            return Ok(None);
        };

        let Some(_run) = self.begin_run(automation_id, schedule.allow_overlap) else {
            tracing::info!(%automation_id, "scheduled fire skipped, previous run still live");
            self.engine
                .events()
                .publish(AutomationEvent::ScheduleSkipped { automation_id });
            return Ok(None);
        };

        let input = schedule.input_data.unwrap_or_else(|| json!({}));
        let result = self
            .engine
            .execute(&automation, input, TriggeredBy::Scheduled)
            .await?;
        Ok(Some(result))
    }

    fn begin_run(&self, automation_id: Uuid, allow_overlap: bool) -> Option<LiveRun<'_>> {
        let mut live = self.live_runs.entry(automation_id).or_insert(0);
        if *live > 0 && !allow_overlap {
            return None;
        }
        *live += 1;
        drop(live);
        Some(LiveRun {
            runs: &self.live_runs,
            automation_id,
        })
    }
}

/// Counts one scheduled run as live until dropped.
struct LiveRun<'a> {
    runs: &'a DashMap<Uuid, usize>,
    automation_id: Uuid,
}

impl Drop for LiveRun<'_> {
    fn drop(&mut self) {
        if let Some(mut live) = self.runs.get_mut(&self.automation_id) {
            *live = live.saturating_sub(1);
        }
        self.runs.remove_if(&self.automation_id, |_, live| *live == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ErrorClassifier, ErrorReporter};
    use crate::event::EventBus;
    use crate::repository::memory::InMemoryRepository;
    use crate::step::registry::testing;
    use autoflow_types::automation::Step;
    use autoflow_types::execution::ExecutionStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    type Scheduler = AutomationScheduler<InMemoryRepository, InMemoryRepository>;

    fn setup() -> (Arc<InMemoryRepository>, Scheduler) {
        let repo = Arc::new(InMemoryRepository::default());
        let reporter = Arc::new(ErrorReporter::new(Arc::new(ErrorClassifier::new())));
        let engine = Arc::new(WorkflowEngine::new(
            Arc::clone(&repo),
            Arc::new(testing::registry(Arc::new(AtomicU32::new(0)))),
            reporter,
            EventBus::new(64),
        ));
        let scheduler = AutomationScheduler::new(Arc::clone(&repo), engine, SchedulerSettings::default());
        (repo, scheduler)
    }

    async fn stored(repo: &InMemoryRepository, steps: Vec<Step>) -> Automation {
        let automation = Automation::new("triggered", "owner-1", steps);
        repo.insert_automation(&automation).await.unwrap();
        automation
    }

    fn echo() -> Vec<Step> {
        vec![Step::new("a", "echo", json!({}))]
    }

    #[tokio::test]
    async fn unknown_token_never_reads_an_automation() {
        let (repo, scheduler) = setup();
        stored(&repo, echo()).await;

        let err = scheduler
            .handle_webhook("deadbeef", json!({}), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidToken));
        assert_eq!(err.to_string(), "invalid token");
        assert_eq!(repo.automation_reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn webhook_runs_with_payload_and_headers() {
        let (repo, scheduler) = setup();
        let automation = stored(&repo, echo()).await;

        let token = scheduler.enable_webhook(automation.id).await.unwrap();
        assert_eq!(token.len(), 64);
        let saved = repo.get_automation(&automation.id).await.unwrap().unwrap();
        assert_eq!(saved.version, 2);
        assert_eq!(saved.webhook().unwrap().token, token);

        let headers = BTreeMap::from([("x-source".to_string(), "shop".to_string())]);
        let result = scheduler
            .handle_webhook(&token, json!({"order": 7}), headers)
            .await
            .unwrap();
        assert!(result.success);
        let echoed = &result.results.unwrap()["a"]["webhook"];
        assert_eq!(echoed["payload"]["order"], 7);
        assert_eq!(echoed["headers"]["x-source"], "shop");
        assert!(echoed["timestamp"].is_string());

        let runs = repo.executions_of(&automation.id);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].triggered_by, TriggeredBy::Webhook);
    }

    #[tokio::test]
    async fn reenabling_rotates_and_disabling_stops_routing() {
        let (repo, scheduler) = setup();
        let automation = stored(&repo, echo()).await;

        let first = scheduler.enable_webhook(automation.id).await.unwrap();
        let second = scheduler.enable_webhook(automation.id).await.unwrap();
        assert_ne!(first, second);
        let err = scheduler.handle_webhook(&first, json!({}), BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidToken));

        assert!(scheduler.disable_webhook(automation.id).await.unwrap());
        let err = scheduler.handle_webhook(&second, json!({}), BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidToken));

        let saved = repo.get_automation(&automation.id).await.unwrap().unwrap();
        let webhook = saved.webhook().unwrap();
        assert!(!webhook.enabled);
        assert_eq!(webhook.token, second);
        assert_eq!(saved.version, 4);
    }

    #[tokio::test]
    async fn disabled_automation_rejects_webhooks() {
        let (repo, scheduler) = setup();
        let automation = stored(&repo, echo()).await;
        let token = scheduler.enable_webhook(automation.id).await.unwrap();

        let mut saved = repo.get_automation(&automation.id).await.unwrap().unwrap();
        saved.enabled = false;
        saved.touch();
        repo.update_automation(&saved).await.unwrap();

        let err = scheduler.handle_webhook(&token, json!({}), BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AutomationDisabled(id) if id == automation.id));
        assert!(repo.executions_of(&automation.id).is_empty());
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected_before_storage() {
        let (repo, scheduler) = setup();
        let automation = stored(&repo, echo()).await;
        scheduler.start().await.unwrap();
        let reads = repo.automation_reads.load(Ordering::SeqCst);

        let err = scheduler.schedule(automation.id, "every fortnight", "UTC").await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
        let err = scheduler.schedule(automation.id, "*/5 * * * *", "Atlantis/Capital").await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTimezone(_)));

        assert_eq!(repo.automation_reads.load(Ordering::SeqCst), reads);
        assert!(!scheduler.is_scheduled(&automation.id));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn schedule_and_unschedule_persist_and_arm() {
        let (repo, scheduler) = setup();
        let automation = stored(&repo, echo()).await;
        scheduler.start().await.unwrap();

        let schedule = scheduler
            .schedule(automation.id, "every 5 minutes", "Europe/Paris")
            .await
            .unwrap();
        assert!(schedule.allow_overlap);
        assert!(scheduler.is_scheduled(&automation.id));
        let saved = repo.get_automation(&automation.id).await.unwrap().unwrap();
        assert_eq!(saved.schedule.as_ref().unwrap().cron_expression, "every 5 minutes");
        assert_eq!(saved.version, 2);

        let mut paused = schedule.clone();
        paused.enabled = false;
        scheduler.update_schedule(automation.id, paused).await.unwrap();
        assert!(!scheduler.is_scheduled(&automation.id));

        assert!(scheduler.unschedule(automation.id).await.unwrap());
        assert!(!scheduler.unschedule(automation.id).await.unwrap());
        let saved = repo.get_automation(&automation.id).await.unwrap().unwrap();
        assert!(saved.schedule.is_none());
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_restores_routes_and_timers() {
        let (repo, scheduler) = setup();
        let mut automation = Automation::new("restored", "owner-1", echo());
        automation.schedule = Some(Schedule::new("hourly", "UTC"));
        automation.triggers = Some(Triggers {
            webhook: Some(WebhookTriggerConfig {
                token: "a".repeat(64),
                enabled: true,
            }),
            ..Default::default()
        });
        repo.insert_automation(&automation).await.unwrap();

        let mut broken = Automation::new("broken", "owner-1", echo());
        broken.schedule = Some(Schedule::new("not a schedule", "UTC"));
        repo.insert_automation(&broken).await.unwrap();

        let summary = scheduler.start().await.unwrap();
        assert_eq!(summary, StartSummary { schedules: 1, webhooks: 1 });
        assert!(scheduler.is_scheduled(&automation.id));
        assert_eq!(scheduler.routes(), 1);

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_scheduled(&automation.id));
        assert_eq!(scheduler.routes(), 0);
    }

    #[tokio::test]
    async fn overlapping_fire_is_skipped_when_disallowed() {
        let (repo, scheduler) = setup();
        let mut automation = Automation::new("slow", "owner-1", vec![Step::new("s", "slow", json!({"ms": 300}))]);
        let mut schedule = Schedule::new("hourly", "UTC");
        schedule.allow_overlap = false;
        automation.schedule = Some(schedule);
        repo.insert_automation(&automation).await.unwrap();
        let mut events = scheduler.engine().events().subscribe();

        let first = {
            let scheduler = scheduler.clone();
            let id = automation.id;
            tokio::spawn(async move { scheduler.run_scheduled(id).await })
        };
        while scheduler.engine().running() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(scheduler.run_scheduled(automation.id).await.unwrap().is_none());
        let finished = first.await.unwrap().unwrap().unwrap();
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(repo.executions_of(&automation.id).len(), 1);

        let mut skipped = false;
        while let Ok(event) = events.try_recv() {
            skipped |= matches!(event, AutomationEvent::ScheduleSkipped { automation_id } if automation_id == automation.id);
        }
        assert!(skipped);

        // The slot is free again once the run finished.
        assert!(scheduler.run_scheduled(automation.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn overlapping_fires_run_when_allowed() {
        let (repo, scheduler) = setup();
        let mut automation = Automation::new("slow", "owner-1", vec![Step::new("s", "slow", json!({"ms": 100}))]);
        automation.schedule = Some(Schedule::new("hourly", "UTC"));
        repo.insert_automation(&automation).await.unwrap();

        let (a, b) = tokio::join!(
            scheduler.run_scheduled(automation.id),
            scheduler.run_scheduled(automation.id)
        );
        assert!(a.unwrap().is_some());
        assert!(b.unwrap().is_some());
        assert_eq!(repo.executions_of(&automation.id).len(), 2);
    }

    #[tokio::test]
    async fn armed_timer_fires_the_engine() {
        let (repo, scheduler) = setup();
        let automation = stored(&repo, echo()).await;
        let mut events = scheduler.engine().events().subscribe();
        scheduler.start().await.unwrap();
        scheduler
            .update_schedule(automation.id, Schedule::new("*/1 * * * * *", "UTC"))
            .await
            .unwrap();

        let fired = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(AutomationEvent::ExecutionFinished { automation_id, .. }) = events.recv().await {
                    if automation_id == automation.id {
                        break;
                    }
                }
            }
        })
        .await;
        assert!(fired.is_ok(), "cron timer did not fire");
        scheduler.stop().await.unwrap();
        assert_eq!(repo.executions_of(&automation.id)[0].triggered_by, TriggeredBy::Scheduled);
    }
}
