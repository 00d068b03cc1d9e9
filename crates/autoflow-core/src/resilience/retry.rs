//! Retry orchestrator.
//!
//! Wraps an operation with bounded, backed-off retries. Each failure is
//! classified: non-retryable errors abort at once, retryable ones sleep for
//! the strategy's delay and try again, up to `max_retries + 1` attempts in
//! total. Progress is handed to a [`RetryObserver`] after every failed
//! attempt so callers can persist it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use autoflow_types::automation::{RetryConfig, RetryStrategy};
use autoflow_types::classification::ErrorAnalysis;
use autoflow_types::config::RetrySettings;
use autoflow_types::execution::{RetryAttempt, RetryInfo};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use crate::classifier::ErrorClassifier;

/// Parameters for one retry loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, strategy: RetryStrategy, base_delay: Duration) -> Self {
        let defaults = RetrySettings::default();
        Self {
            max_retries,
            backoff: Backoff::new(
                strategy,
                base_delay,
                Duration::from_millis(defaults.max_retry_delay_ms),
            )
            .with_jitter(defaults.jitter_ratio),
        }
    }

    /// Policy from an automation's retry config and the global limits.
    pub fn from_config(config: &RetryConfig, settings: &RetrySettings) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Backoff::new(
                config.strategy,
                Duration::from_millis(config.base_delay),
                Duration::from_millis(settings.max_retry_delay_ms),
            )
            .with_jitter(settings.jitter_ratio),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Receives the retry snapshot after each failed attempt.
pub trait RetryObserver: Send + Sync {
    fn on_attempt_failed(&self, info: &RetryInfo) -> impl Future<Output = ()> + Send;
}

impl RetryObserver for () {
    async fn on_attempt_failed(&self, _info: &RetryInfo) {}
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// All attempts failed with retryable errors.
    #[error("failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        history: Vec<RetryAttempt>,
        analysis: ErrorAnalysis,
        #[source]
        source: E,
    },

    /// An attempt failed with an error classified as non-retryable.
    #[error("non-retryable failure on attempt {attempts}: {source}")]
    Fatal {
        attempts: u32,
        history: Vec<RetryAttempt>,
        analysis: ErrorAnalysis,
        #[source]
        source: E,
    },

    /// The cancellation token fired before or between attempts.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled {
        attempts: u32,
        history: Vec<RetryAttempt>,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Fatal { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn history(&self) -> &[RetryAttempt] {
        match self {
            RetryError::Exhausted { history, .. }
            | RetryError::Fatal { history, .. }
            | RetryError::Cancelled { history, .. } => history,
        }
    }

    pub fn analysis(&self) -> Option<&ErrorAnalysis> {
        match self {
            RetryError::Exhausted { analysis, .. } | RetryError::Fatal { analysis, .. } => Some(analysis),
            RetryError::Cancelled { .. } => None,
        }
    }

    /// The last attempt's error.
    pub fn cause(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Fatal { source, .. } => Some(source),
            RetryError::Cancelled { .. } => None,
        }
    }

    pub fn into_cause(self) -> Option<E> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Fatal { source, .. } => Some(source),
            RetryError::Cancelled { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    classifier: Arc<ErrorClassifier>,
}

impl RetryOrchestrator {
    pub fn new(classifier: Arc<ErrorClassifier>) -> Self {
        Self { classifier }
    }

    /// Run `op` until it succeeds, fails fatally, runs out of attempts or is
    /// cancelled. `op` receives the 1-based attempt number.
    pub async fn execute_with_retry<T, E, F, Fut, O>(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        observer: &O,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        O: RetryObserver,
    {
        let mut info = RetryInfo::new(policy.max_retries, policy.backoff.strategy);
        let max_attempts = policy.max_attempts();

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled {
                    attempts: info.attempts,
                    history: info.retry_history,
                });
            }

            let attempt = info.attempts + 1;
            info.attempts = attempt;

            let error = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let message = error.to_string();
            let analysis = self.classifier.analyze(&message);
            let last_attempt = attempt >= max_attempts;
            let delay = if analysis.retryable && !last_attempt {
                policy.backoff.delay(attempt)
            } else {
                Duration::ZERO
            };

            info.retry_history.push(RetryAttempt {
                attempt,
                error: message.clone(),
                error_type: analysis.error_type.clone(),
                category: analysis.category,
                retryable: analysis.retryable,
                timestamp: Utc::now(),
                delay_ms: delay.as_millis().min(u128::from(u64::MAX)) as u64,
            });
            info.last_error = Some(message.clone());
            info.next_attempt = (analysis.retryable && !last_attempt)
                .then(|| Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()));
            observer.on_attempt_failed(&info).await;

            if !analysis.retryable {
                tracing::warn!(attempt, error_type = %analysis.error_type, "non-retryable failure: {message}");
                return Err(RetryError::Fatal {
                    attempts: attempt,
                    history: info.retry_history,
                    analysis,
                    source: error,
                });
            }
            if last_attempt {
                tracing::warn!(attempt, "retries exhausted: {message}");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    history: info.retry_history,
                    analysis,
                    source: error,
                });
            }

            tracing::info!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, retrying: {message}"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled {
                        attempts: attempt,
                        history: info.retry_history,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct OpError(String);

    #[derive(Default)]
    struct Recorder {
        snapshots: Mutex<Vec<RetryInfo>>,
    }

    impl RetryObserver for Recorder {
        async fn on_attempt_failed(&self, info: &RetryInfo) {
            self.snapshots.lock().unwrap().push(info.clone());
        }
    }

    fn orchestrator() -> RetryOrchestrator {
        RetryOrchestrator::new(Arc::new(ErrorClassifier::new()))
    }

    fn policy(max_retries: u32, strategy: RetryStrategy) -> RetryPolicy {
        RetryPolicy::new(max_retries, strategy, Duration::from_millis(1000))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_failures() {
        let calls = AtomicU32::new(0);
        let recorder = Recorder::default();
        let started = tokio::time::Instant::now();

        let result = orchestrator()
            .execute_with_retry(
                &policy(3, RetryStrategy::Exponential),
                &CancellationToken::new(),
                &recorder,
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(OpError("connection reset by peer".into()))
                        } else {
                            Ok("done")
                        }
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let snapshots = recorder.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].retry_history.len(), 2);
        // 1000ms + 2000ms, each within ±10%
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2700), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(3300), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn total_attempts_bounded_by_max_retries_plus_one() {
        let calls = AtomicU32::new(0);
        let err = orchestrator()
            .execute_with_retry(
                &policy(2, RetryStrategy::Fixed),
                &CancellationToken::new(),
                &(),
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err::<(), _>(OpError(format!("request timed out ({attempt})"))) }
                },
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert_eq!(err.history().len(), 3);
        assert_eq!(err.history()[2].delay_ms, 0);
        assert_eq!(err.cause().unwrap().0, "request timed out (3)");
        assert!(err.to_string().contains("failed after 3 attempt(s)"));
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_never_retries() {
        let calls = AtomicU32::new(0);
        let err = orchestrator()
            .execute_with_retry(
                &policy(5, RetryStrategy::Immediate),
                &CancellationToken::new(),
                &(),
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(OpError("401 unauthorized".into())) }
                },
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RetryError::Fatal { attempts: 1, .. }));
        assert!(!err.analysis().unwrap().retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let calls = AtomicU32::new(0);
        let err = orchestrator()
            .execute_with_retry(&policy(3, RetryStrategy::Fixed), &cancel, &(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(OpError("network unreachable".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::Cancelled { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_retries_runs_once() {
        let calls = AtomicU32::new(0);
        let _ = orchestrator()
            .execute_with_retry(&policy(0, RetryStrategy::Immediate), &CancellationToken::new(), &(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(OpError("timeout".into())) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
