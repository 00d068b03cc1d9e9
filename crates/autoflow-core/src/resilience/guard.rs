//! Service guard: rate limiter, circuit breaker and response cache composed
//! in front of one external dependency.
//!
//! Call order is cache (reads only) -> limiter -> breaker -> operation.
//! Only failures the classifier marks retryable count toward the breaker;
//! authentication and validation errors pass through untouched.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use autoflow_types::config::GuardSettings;
use dashmap::DashMap;

use super::cache::ResponseCache;
use super::circuit_breaker::CircuitBreaker;
use super::rate_limiter::TokenBucket;
use crate::classifier::ErrorClassifier;

#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    #[error("rate limit exceeded for '{dependency}', retry after {}s", retry_after.as_secs())]
    RateLimited {
        dependency: String,
        retry_after: Duration,
    },

    #[error("circuit breaker open for '{dependency}'")]
    CircuitOpen { dependency: String },

    #[error("{0}")]
    Upstream(E),
}

impl<E> GuardError<E> {
    /// True when the guard refused the call without running it.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, GuardError::Upstream(_))
    }
}

#[derive(Debug)]
pub struct ServiceGuard {
    name: String,
    limiter: TokenBucket,
    breaker: CircuitBreaker,
    cache: ResponseCache,
    classifier: Arc<ErrorClassifier>,
    default_ttl: Duration,
}

impl ServiceGuard {
    pub fn new(name: impl Into<String>, settings: &GuardSettings, classifier: Arc<ErrorClassifier>) -> Self {
        let name = name.into();
        Self {
            limiter: TokenBucket::new(
                settings.rate_limit_per_sec,
                Duration::from_secs(settings.rate_limit_block_secs),
            ),
            breaker: CircuitBreaker::new(
                name.clone(),
                settings.failure_threshold,
                Duration::from_secs(settings.recovery_timeout_secs),
            ),
            cache: ResponseCache::new(),
            classifier,
            default_ttl: Duration::from_secs(settings.cache_ttl_secs),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Run `op` behind the limiter and breaker.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, GuardError<E>>
    where
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(retry_after) = self.limiter.try_acquire() {
            tracing::debug!(dependency = %self.name, ?retry_after, "call rejected by rate limiter");
            return Err(GuardError::RateLimited {
                dependency: self.name.clone(),
                retry_after,
            });
        }
        let Some(permit) = self.breaker.acquire() else {
            tracing::debug!(dependency = %self.name, "call rejected by open circuit");
            return Err(GuardError::CircuitOpen {
                dependency: self.name.clone(),
            });
        };

        match op().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                if self.classifier.analyze(&e.to_string()).retryable {
                    permit.failure();
                } else {
                    permit.ignored();
                }
                Err(GuardError::Upstream(e))
            }
        }
    }

    /// Guarded read with caching. `ttl` defaults to the configured cache TTL.
    pub async fn read<E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        op: F,
    ) -> Result<serde_json::Value, GuardError<E>>
    where
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, E>>,
    {
        if let Some(hit) = self.cache.get(key) {
            tracing::trace!(dependency = %self.name, key, "cache hit");
            return Ok(hit);
        }
        let value = self.call(op).await?;
        self.cache
            .insert(key, value.clone(), ttl.unwrap_or(self.default_ttl));
        Ok(value)
    }

    /// Guarded mutation (upload, delete). Invalidates `key` afterwards.
    pub async fn mutate<T, E, F, Fut>(&self, key: &str, op: F) -> Result<T, GuardError<E>>
    where
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = self.call(op).await;
        if !matches!(result, Err(ref e) if e.is_rejection()) {
            self.cache.invalidate(key);
        }
        result
    }
}

/// One guard per dependency name, created on first use.
#[derive(Debug)]
pub struct GuardRegistry {
    guards: DashMap<String, Arc<ServiceGuard>>,
    settings: GuardSettings,
    classifier: Arc<ErrorClassifier>,
}

impl GuardRegistry {
    pub fn new(settings: GuardSettings, classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            guards: DashMap::new(),
            settings,
            classifier,
        }
    }

    pub fn guard(&self, dependency: &str) -> Arc<ServiceGuard> {
        self.guards
            .entry(dependency.to_string())
            .or_insert_with(|| {
                Arc::new(ServiceGuard::new(
                    dependency,
                    &self.settings,
                    Arc::clone(&self.classifier),
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn guard() -> ServiceGuard {
        ServiceGuard::new("onedrive", &GuardSettings::default(), Arc::new(ErrorClassifier::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_rejects_without_calling() {
        let g = guard();
        for _ in 0..5 {
            let r: Result<(), _> = g.call(|| async { Err::<(), _>("503 service unavailable") }).await;
            assert!(matches!(r, Err(GuardError::Upstream(_))));
            // keep clear of the limiter
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let r = g
            .call(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;
        assert!(matches!(r, Err(GuardError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(r.unwrap_err().to_string().contains("circuit breaker open"));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_does_not_wedge_the_breaker() {
        let g = guard();
        for _ in 0..5 {
            let _ = g.call(|| async { Err::<(), _>("503 service unavailable") }).await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(g.breaker().state().label(), "open");
        tokio::time::advance(Duration::from_secs(120)).await;

        let slow = g.call(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, String>(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(10), slow).await.is_err());
        assert_eq!(g.breaker().state(), CircuitState::HalfOpen);

        tokio::time::advance(Duration::from_secs(1)).await;
        g.call(|| async { Ok::<_, String>(()) }).await.unwrap();
        assert_eq!(g.breaker().state().label(), "closed");
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failures_do_not_trip_breaker() {
        let g = guard();
        for _ in 0..10 {
            let _ = g.call(|| async { Err::<(), _>("401 Unauthorized") }).await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(g.breaker().state().label(), "closed");
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_is_consulted_first() {
        let g = guard();
        for _ in 0..4 {
            g.call(|| async { Ok::<_, String>(()) }).await.unwrap();
        }
        let r = g.call(|| async { Ok::<_, String>(()) }).await;
        assert!(matches!(r, Err(GuardError::RateLimited { .. })));
        assert!(r.unwrap_err().to_string().contains("rate limit exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn reads_are_cached_and_mutations_invalidate() {
        let g = guard();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let read = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(serde_json::json!({"items": 2}))
        };

        g.read("/drive/root", None, read).await.unwrap();
        g.read("/drive/root", None, read).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        g.mutate("/drive/root", || async { Ok::<_, String>(()) })
            .await
            .unwrap();
        g.read("/drive/root", None, read).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn registry_reuses_guards() {
        let registry = GuardRegistry::new(GuardSettings::default(), Arc::new(ErrorClassifier::new()));
        let a = registry.guard("smb");
        let b = registry.guard("smb");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
