//! A pooled browser session.
//!
//! Every operation is bounded by a timeout and refreshes `last_used`. When
//! an operation fails and the underlying process is gone, the error is
//! reported as a crash so the run can be retried on a fresh session.

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use super::driver::{BoxBrowserInstance, ExtractRequest, PageInfo};
use super::error::BrowserError;

#[derive(Debug)]
pub struct BrowserSession {
    pub id: Uuid,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    instance: BoxBrowserInstance,
    started: Instant,
    last_used: Mutex<Instant>,
    memory_usage: AtomicU64,
    default_timeout: Duration,
    navigation_timeout: Duration,
}

impl BrowserSession {
    pub(crate) fn new(
        owner_id: String,
        instance: BoxBrowserInstance,
        default_timeout: Duration,
        navigation_timeout: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::now_v7(),
            owner_id,
            created_at: Utc::now(),
            instance,
            started: now,
            last_used: Mutex::new(now),
            memory_usage: AtomicU64::new(0),
            default_timeout,
            navigation_timeout,
        }
    }

    /// Monotonic creation time, used to evict the oldest sessions first.
    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used().elapsed()
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    /// Last sampled heap usage in bytes.
    pub fn memory_usage(&self) -> u64 {
        self.memory_usage.load(Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.instance.is_alive()
    }

    pub(crate) fn instance(&self) -> &BoxBrowserInstance {
        &self.instance
    }

    /// Read heap usage from the process and remember it.
    pub async fn sample_memory(&self, timeout: Duration) -> Result<u64, BrowserError> {
        let bytes = self
            .bounded("memory_usage", timeout, self.instance.memory_usage())
            .await?;
        self.memory_usage.store(bytes, Ordering::Relaxed);
        Ok(bytes)
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        timeout: Duration,
        fut: impl Future<Output = Result<T, BrowserError>>,
    ) -> Result<T, BrowserError> {
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if self.instance.is_alive() || matches!(e, BrowserError::Crashed(_)) {
                    Err(e)
                } else {
                    Err(BrowserError::Crashed(format!("{operation}: {e}")))
                }
            }
            Err(_) => {
                if self.instance.is_alive() {
                    Err(BrowserError::Timeout {
                        operation: operation.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                } else {
                    Err(BrowserError::Crashed(format!("{operation}: process exited")))
                }
            }
        }
    }

    async fn op<T>(
        &self,
        operation: &str,
        timeout: Option<Duration>,
        fut: impl Future<Output = Result<T, BrowserError>>,
    ) -> Result<T, BrowserError> {
        self.touch();
        let timeout = timeout.unwrap_or(self.default_timeout);
        tracing::debug!(session_id = %self.id, operation, ?timeout, "browser operation");
        let result = self.bounded(operation, timeout, fut).await;
        self.touch();
        result
    }

    pub async fn navigate(&self, url: &str, timeout: Option<Duration>) -> Result<PageInfo, BrowserError> {
        let timeout = timeout.unwrap_or(self.navigation_timeout).min(self.navigation_timeout);
        self.op("navigate", Some(timeout), self.instance.navigate(url))
            .await
    }

    pub async fn click(&self, selector: &str, timeout: Option<Duration>) -> Result<(), BrowserError> {
        self.op("click", timeout, self.instance.click(selector)).await
    }

    pub async fn type_text(
        &self,
        selector: &str,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<(), BrowserError> {
        self.op("type", timeout, self.instance.type_text(selector, text))
            .await
    }

    pub async fn extract(
        &self,
        request: &ExtractRequest,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, BrowserError> {
        self.op("extract", timeout, self.instance.extract(request))
            .await
    }

    pub async fn wait_for(&self, selector: &str, timeout: Option<Duration>) -> Result<(), BrowserError> {
        self.op("wait", timeout, self.instance.wait_for(selector))
            .await
    }

    pub async fn screenshot(&self, full_page: bool, timeout: Option<Duration>) -> Result<String, BrowserError> {
        self.op("screenshot", timeout, self.instance.screenshot(full_page))
            .await
    }

    pub async fn execute_script(
        &self,
        script: &str,
        args: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, BrowserError> {
        self.op(
            "execute_script",
            timeout,
            self.instance.execute_script(script, args),
        )
        .await
    }
}
