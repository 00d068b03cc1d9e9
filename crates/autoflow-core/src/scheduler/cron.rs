//! Cron timers on top of `tokio-cron-scheduler`.
//!
//! Schedules are validated here (`parse_spec`) before anything is armed, so a
//! bad expression or timezone never reaches the job scheduler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use super::SchedulerError;

// ---------------------------------------------------------------------------
// Schedule parsing
// ---------------------------------------------------------------------------

/// Normalize a schedule string to a 6-field (seconds first) cron expression.
///
/// Accepts 5-field cron (seconds default to 0), 6-field cron, and these
/// English forms (case-insensitive):
/// - "every N seconds" / "every N minutes" / "every N hours"
/// - "every minute", "every hour", "every day" (and "minutely", "hourly", "daily")
/// - "every day at HH:MM"
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();
    let invalid = || SchedulerError::InvalidSchedule(format!("unrecognized schedule format: '{trimmed}'"));

    let fields = trimmed.split_whitespace().count();
    if fields == 5 && !trimmed.to_lowercase().starts_with("every") {
        return Ok(format!("0 {trimmed}"));
    }
    if fields == 6 && !trimmed.to_lowercase().starts_with("every") {
        return Ok(trimmed.to_string());
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("0 * * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    let Some(rest) = lower.strip_prefix("every ") else {
        return Err(invalid());
    };

    if let Some(at) = rest.strip_prefix("day at ") {
        let (hour, minute) = at.split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
        if hour >= 24 || minute >= 60 {
            return Err(invalid());
        }
        return Ok(format!("0 {minute} {hour} * * *"));
    }

    let words: Vec<&str> = rest.split_whitespace().collect();
    let [count, unit] = words.as_slice() else {
        return Err(invalid());
    };
    let n: u32 = count.parse().map_err(|_| invalid())?;
    if n == 0 {
        return Err(SchedulerError::InvalidSchedule("interval must be > 0".to_string()));
    }
    match unit.trim_end_matches('s') {
        "second" => Ok(format!("*/{n} * * * * *")),
        "minute" => Ok(format!("0 */{n} * * * *")),
        "hour" => Ok(format!("0 0 */{n} * * *")),
        _ => Err(invalid()),
    }
}

/// Resolve an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, SchedulerError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

/// A validated cron schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct CronSpec {
    /// Normalized 6-field expression handed to the job scheduler.
    pub expression: String,
    pub timezone: Tz,
}

impl CronSpec {
    /// The first fire time after now, in the schedule's timezone.
    pub fn next_fire(&self) -> Option<DateTime<Tz>> {
        let cron = self.expression.parse::<croner::Cron>().ok()?;
        cron.iter_after(Utc::now().with_timezone(&self.timezone)).next()
    }
}

/// Validate `schedule` and `timezone` together.
pub fn parse_spec(schedule: &str, timezone: &str) -> Result<CronSpec, SchedulerError> {
    let expression = normalize_schedule(schedule)?;
    expression
        .parse::<croner::Cron>()
        .map_err(|e| SchedulerError::InvalidSchedule(format!("'{schedule}': {e}")))?;
    Ok(CronSpec {
        expression,
        timezone: parse_timezone(timezone)?,
    })
}

// ---------------------------------------------------------------------------
// CronScheduler
// ---------------------------------------------------------------------------

/// Invoked with the automation id each time its timer fires.
pub type FireCallback = Arc<dyn Fn(Uuid) -> BoxFuture<'static, ()> + Send + Sync>;

struct ArmedJob {
    job_id: Uuid,
    spec: CronSpec,
}

/// One cron job per automation.
pub struct CronScheduler {
    inner: RwLock<Option<JobScheduler>>,
    jobs: DashMap<Uuid, ArmedJob>,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
            jobs: DashMap::new(),
        }
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.write().await;
        if inner.is_some() {
            return Ok(());
        }
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Job(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::Job(e.to_string()))?;
        *inner = Some(scheduler);
        tracing::info!("cron scheduler started");
        Ok(())
    }

    /// Shut the job scheduler down and forget every armed job.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.write().await;
        if let Some(mut scheduler) = inner.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::Job(e.to_string()))?;
            tracing::info!("cron scheduler stopped");
        }
        self.jobs.clear();
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// Arm (or re-arm) the timer for `automation_id`.
    pub async fn arm(&self, automation_id: Uuid, spec: CronSpec, callback: FireCallback) -> Result<(), SchedulerError> {
        self.disarm(automation_id).await?;

        let inner = self.inner.read().await;
        let scheduler = inner
            .as_ref()
            .ok_or_else(|| SchedulerError::Job("scheduler not started".to_string()))?;

        let job = Job::new_async_tz(spec.expression.as_str(), spec.timezone, move |_job_id, _lock| {
            let callback = Arc::clone(&callback);
            Box::pin(async move {
                tracing::debug!(%automation_id, "cron timer fired");
                callback(automation_id).await;
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let job_id = job.guid();
        scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::Job(e.to_string()))?;

        tracing::info!(
            %automation_id,
            %job_id,
            cron = %spec.expression,
            timezone = %spec.timezone,
            "schedule armed"
        );
        self.jobs.insert(automation_id, ArmedJob { job_id, spec });
        Ok(())
    }

    /// Remove the timer for `automation_id`. Returns whether one was armed.
    pub async fn disarm(&self, automation_id: Uuid) -> Result<bool, SchedulerError> {
        let Some((_, job)) = self.jobs.remove(&automation_id) else {
            return Ok(false);
        };
        let inner = self.inner.read().await;
        if let Some(scheduler) = inner.as_ref() {
            scheduler
                .remove(&job.job_id)
                .await
                .map_err(|e| SchedulerError::Job(e.to_string()))?;
        }
        tracing::info!(%automation_id, "schedule disarmed");
        Ok(true)
    }

    pub fn is_armed(&self, automation_id: &Uuid) -> bool {
        self.jobs.contains_key(automation_id)
    }

    pub fn spec_of(&self, automation_id: &Uuid) -> Option<CronSpec> {
        self.jobs.get(automation_id).map(|job| job.spec.clone())
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_cron_gets_seconds() {
        assert_eq!(normalize_schedule("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_schedule("0 30 9 * * 1-5").unwrap(), "0 30 9 * * 1-5");
    }

    #[test]
    fn english_forms() {
        assert_eq!(normalize_schedule("every 5 minutes").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_schedule("Every 10 Seconds").unwrap(), "*/10 * * * * *");
        assert_eq!(normalize_schedule("every 1 hour").unwrap(), "0 0 */1 * * *");
        assert_eq!(normalize_schedule("hourly").unwrap(), "0 0 * * * *");
        assert_eq!(normalize_schedule("every day at 07:45").unwrap(), "0 45 7 * * *");
    }

    #[test]
    fn unrecognized_forms_are_rejected() {
        assert!(normalize_schedule("whenever you like").is_err());
        assert!(normalize_schedule("every 0 minutes").is_err());
        assert!(normalize_schedule("every 3 fortnights").is_err());
        assert!(normalize_schedule("every day at 25:00").is_err());
    }

    #[test]
    fn spec_validates_fields_and_timezone() {
        let spec = parse_spec("every 5 minutes", "Europe/Berlin").unwrap();
        assert_eq!(spec.timezone, chrono_tz::Europe::Berlin);
        assert!(spec.next_fire().is_some());

        let err = parse_spec("61 * * * *", "UTC").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));

        let err = parse_spec("every minute", "Mars/Olympus_Mons").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTimezone(_)));
    }

    #[tokio::test]
    async fn arm_requires_a_started_scheduler() {
        let cron = CronScheduler::new();
        let callback: FireCallback = Arc::new(|_| Box::pin(async {}));
        let spec = parse_spec("every minute", "UTC").unwrap();
        assert!(cron.arm(Uuid::now_v7(), spec, callback).await.is_err());
        assert_eq!(cron.job_count(), 0);
    }

    #[tokio::test]
    async fn arm_replace_and_disarm() {
        let cron = CronScheduler::new();
        cron.start().await.unwrap();
        let id = Uuid::now_v7();
        let callback: FireCallback = Arc::new(|_| Box::pin(async {}));

        cron.arm(id, parse_spec("every 5 minutes", "UTC").unwrap(), Arc::clone(&callback))
            .await
            .unwrap();
        cron.arm(id, parse_spec("hourly", "Asia/Tokyo").unwrap(), callback)
            .await
            .unwrap();
        assert_eq!(cron.job_count(), 1);
        assert_eq!(cron.spec_of(&id).unwrap().expression, "0 0 * * * *");

        assert!(cron.disarm(id).await.unwrap());
        assert!(!cron.disarm(id).await.unwrap());
        cron.stop().await.unwrap();
        assert!(!cron.is_running().await);
    }
}
