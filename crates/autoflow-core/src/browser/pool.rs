//! Bounded pool of browser sessions.
//!
//! Limits enforced:
//! - per-owner session cap: a slot is reserved before the process is
//!   launched and released if the launch fails, so concurrent creates can
//!   never overshoot the cap;
//! - memory: a sampler records each session's heap usage, a sweep closes the
//!   oldest share of sessions when aggregate usage exceeds the per-session
//!   limit times the session count;
//! - idle: a sweep closes sessions unused for longer than the idle timeout.

use std::sync::Arc;
use std::time::Duration;

use autoflow_types::config::BrowserSettings;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::driver::{BoxBrowserDriver, LaunchOptions};
use super::error::BrowserError;
use super::session::BrowserSession;

const MB: u64 = 1024 * 1024;

pub struct BrowserPool {
    driver: BoxBrowserDriver,
    settings: BrowserSettings,
    sessions: DashMap<Uuid, Arc<BrowserSession>>,
    owner_counts: DashMap<String, usize>,
    shutdown: CancellationToken,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl BrowserPool {
    pub fn new(driver: BoxBrowserDriver, settings: BrowserSettings) -> Self {
        Self {
            driver,
            settings,
            sessions: DashMap::new(),
            owner_counts: DashMap::new(),
            shutdown: CancellationToken::new(),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &BrowserSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the memory sampler and the memory and idle sweepers.
    pub fn start(self: &Arc<Self>) {
        let sample_every = Duration::from_secs(self.settings.memory_sample_interval_secs.max(1));
        let memory_every = Duration::from_secs(self.settings.memory_sweep_interval_secs.max(1));
        let idle_every = Duration::from_secs(self.settings.idle_sweep_interval_secs.max(1));

        let handles = vec![
            self.spawn_periodic("memory_sampler", sample_every, |pool| async move {
                pool.sample_memory().await;
            }),
            self.spawn_periodic("memory_sweep", memory_every, |pool| async move {
                pool.sweep_memory().await;
            }),
            self.spawn_periodic("idle_sweep", idle_every, |pool| async move {
                pool.sweep_idle().await;
            }),
        ];
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend(handles);
        }
        tracing::info!(
            max_per_owner = self.settings.max_sessions_per_owner,
            "browser pool started"
        );
    }

    fn spawn_periodic<F, Fut>(self: &Arc<Self>, name: &'static str, every: Duration, tick: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let pool = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(task = name, "browser pool task stopped");
                        return;
                    }
                    _ = interval.tick() => tick(Arc::clone(&pool)).await,
                }
            }
        })
    }

    /// Stop the background tasks and close every session.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self
            .tasks
            .lock()
            .map(|mut t| t.drain(..).collect())
            .unwrap_or_default();
        for handle in handles {
            let _ = handle.await;
        }
        let ids: Vec<Uuid> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.close_session(id).await;
        }
        tracing::info!("browser pool stopped");
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Launch a new session for `owner_id`.
    ///
    /// Fails with [`BrowserError::SessionLimit`] without launching anything
    /// when the owner already holds the maximum number of sessions.
    pub async fn create_session(
        &self,
        owner_id: &str,
        options: Option<LaunchOptions>,
    ) -> Result<Uuid, BrowserError> {
        let limit = self.settings.max_sessions_per_owner;
        {
            let mut count = self.owner_counts.entry(owner_id.to_string()).or_insert(0);
            if *count >= limit {
                tracing::warn!(owner_id, limit, "browser session limit reached");
                return Err(BrowserError::SessionLimit {
                    owner_id: owner_id.to_string(),
                    limit,
                });
            }
            *count += 1;
        }

        let options = options.unwrap_or_else(|| LaunchOptions::from_settings(&self.settings));
        let launch_timeout = Duration::from_millis(self.settings.launch_timeout_ms);
        let launched = match tokio::time::timeout(launch_timeout, self.driver.launch(&options)).await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::Timeout {
                operation: "launch".into(),
                timeout_ms: self.settings.launch_timeout_ms,
            }),
        };

        let instance = match launched {
            Ok(instance) => instance,
            Err(e) => {
                self.release_slot(owner_id);
                tracing::error!(owner_id, error = %e, "browser launch failed");
                return Err(e);
            }
        };

        let session = Arc::new(BrowserSession::new(
            owner_id.to_string(),
            instance,
            Duration::from_millis(self.settings.operation_timeout_ms),
            Duration::from_millis(self.settings.navigation_timeout_ms),
        ));
        let id = session.id;
        self.sessions.insert(id, session);
        tracing::info!(session_id = %id, owner_id, "browser session created");
        Ok(id)
    }

    fn release_slot(&self, owner_id: &str) {
        let mut remove = false;
        if let Some(mut count) = self.owner_counts.get_mut(owner_id) {
            *count = count.saturating_sub(1);
            remove = *count == 0;
        }
        if remove {
            self.owner_counts.remove_if(owner_id, |_, c| *c == 0);
        }
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<BrowserSession>, BrowserError> {
        self.sessions
            .get(&id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(BrowserError::SessionClosed(id))
    }

    /// Close a session and free its owner's slot. Returns `false` when the
    /// session was already gone.
    pub async fn close_session(&self, id: Uuid) -> bool {
        let Some((_, session)) = self.sessions.remove(&id) else {
            return false;
        };
        self.release_slot(&session.owner_id);

        let timeout = Duration::from_millis(self.settings.operation_timeout_ms);
        match tokio::time::timeout(timeout, session.instance().close()).await {
            Ok(Ok(())) => tracing::info!(session_id = %id, "browser session closed"),
            Ok(Err(e)) => tracing::warn!(session_id = %id, error = %e, "browser close reported an error"),
            Err(_) => tracing::warn!(session_id = %id, "browser close timed out"),
        }
        true
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn owner_session_count(&self, owner_id: &str) -> usize {
        self.owner_counts.get(owner_id).map(|c| *c).unwrap_or(0)
    }

    fn snapshot(&self) -> Vec<Arc<BrowserSession>> {
        self.sessions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    // -----------------------------------------------------------------------
    // Governance
    // -----------------------------------------------------------------------

    /// Read heap usage of every session. Sessions whose process died are closed.
    pub async fn sample_memory(&self) {
        let timeout = Duration::from_millis(self.settings.operation_timeout_ms);
        for session in self.snapshot() {
            match session.sample_memory(timeout).await {
                Ok(bytes) => tracing::trace!(session_id = %session.id, bytes, "memory sampled"),
                Err(BrowserError::Crashed(reason)) => {
                    tracing::warn!(session_id = %session.id, %reason, "browser process gone, closing session");
                    self.close_session(session.id).await;
                }
                Err(e) => tracing::debug!(session_id = %session.id, error = %e, "memory sample failed"),
            }
        }
    }

    /// Close the oldest sessions when aggregate memory is above the limit.
    /// Returns how many sessions were closed.
    pub async fn sweep_memory(&self) -> usize {
        let mut sessions = self.snapshot();
        if sessions.is_empty() {
            return 0;
        }
        let total: u64 = sessions.iter().map(|s| s.memory_usage()).sum();
        let threshold = self
            .settings
            .memory_limit_per_session_mb
            .saturating_mul(MB)
            .saturating_mul(sessions.len() as u64);
        if total <= threshold {
            return 0;
        }

        let evict = ((sessions.len() as f64 * self.settings.evict_fraction).ceil() as usize)
            .clamp(1, sessions.len());
        tracing::warn!(
            total_mb = total / MB,
            threshold_mb = threshold / MB,
            evict,
            "browser memory above limit, closing oldest sessions"
        );
        sessions.sort_by_key(|s| s.started());
        let mut closed = 0;
        for session in sessions.into_iter().take(evict) {
            if self.close_session(session.id).await {
                closed += 1;
            }
        }
        closed
    }

    /// Close sessions idle longer than the configured timeout.
    pub async fn sweep_idle(&self) -> usize {
        let idle_timeout = Duration::from_secs(self.settings.idle_timeout_secs);
        let mut closed = 0;
        for session in self.snapshot() {
            if session.idle_for() > idle_timeout {
                tracing::info!(session_id = %session.id, "closing idle browser session");
                if self.close_session(session.id).await {
                    closed += 1;
                }
            }
        }
        closed
    }
}

impl std::fmt::Debug for BrowserPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserPool")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeDriver, FakeState};
    use std::sync::atomic::Ordering;

    fn pool_with(state: Arc<FakeState>, settings: BrowserSettings) -> Arc<BrowserPool> {
        Arc::new(BrowserPool::new(
            BoxBrowserDriver::new(FakeDriver::new(state)),
            settings,
        ))
    }

    #[tokio::test]
    async fn create_get_close() {
        let state = Arc::new(FakeState::default());
        let pool = pool_with(Arc::clone(&state), BrowserSettings::default());

        let id = pool.create_session("alice", None).await.unwrap();
        assert_eq!(pool.owner_session_count("alice"), 1);
        assert!(pool.get(id).is_ok());

        assert!(pool.close_session(id).await);
        assert!(!pool.close_session(id).await);
        assert!(matches!(pool.get(id), Err(BrowserError::SessionClosed(_))));
        assert_eq!(pool.owner_session_count("alice"), 0);
        assert_eq!(state.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn launch_applies_defensive_options() {
        let state = Arc::new(FakeState::default());
        let pool = pool_with(Arc::clone(&state), BrowserSettings::default());
        pool.create_session("alice", None).await.unwrap();

        let options = state.last_options.lock().unwrap().clone().unwrap();
        assert!(options.headless);
        assert_eq!(options.viewport_width, 1280);
        assert!(options.disabled_features.iter().any(|f| f == "extensions"));
        assert!(options.blocked_url_patterns.iter().any(|p| p.contains("doubleclick")));
    }

    #[tokio::test]
    async fn concurrent_creates_respect_owner_limit() {
        let state = Arc::new(FakeState::default());
        state.launch_delay_ms.store(20, Ordering::SeqCst);
        let pool = pool_with(Arc::clone(&state), BrowserSettings::default());

        let mut handles = Vec::new();
        for _ in 0..12 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move { pool.create_session("bob", None).await }));
        }
        let mut ok = 0;
        let mut limited = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(BrowserError::SessionLimit { .. }) => limited += 1,
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(ok, 10);
        assert_eq!(limited, 2);
        assert_eq!(pool.session_count(), 10);
        assert_eq!(state.launched.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn limit_is_per_owner_and_slot_freed_on_close() {
        let state = Arc::new(FakeState::default());
        let settings = BrowserSettings {
            max_sessions_per_owner: 1,
            ..Default::default()
        };
        let pool = pool_with(state, settings);

        let first = pool.create_session("alice", None).await.unwrap();
        assert!(pool.create_session("alice", None).await.is_err());
        assert!(pool.create_session("carol", None).await.is_ok());

        pool.close_session(first).await;
        assert!(pool.create_session("alice", None).await.is_ok());
    }

    #[tokio::test]
    async fn failed_launch_releases_reservation() {
        let state = Arc::new(FakeState::default());
        state.fail_launch.store(true, Ordering::SeqCst);
        let settings = BrowserSettings {
            max_sessions_per_owner: 1,
            ..Default::default()
        };
        let pool = pool_with(Arc::clone(&state), settings);

        assert!(matches!(
            pool.create_session("alice", None).await,
            Err(BrowserError::Launch(_))
        ));
        assert_eq!(pool.owner_session_count("alice"), 0);

        state.fail_launch.store(false, Ordering::SeqCst);
        assert!(pool.create_session("alice", None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn operations_time_out() {
        let state = Arc::new(FakeState::default());
        state.navigate_delay_ms.store(60_000, Ordering::SeqCst);
        let pool = pool_with(Arc::clone(&state), BrowserSettings::default());
        let id = pool.create_session("alice", None).await.unwrap();

        let session = pool.get(id).unwrap();
        let err = session
            .navigate("https://example.com", Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Timeout { timeout_ms: 5000, .. }));
    }

    #[tokio::test]
    async fn crashed_process_surfaces_as_crash() {
        let state = FakeState::with_elements(&[("#go", "Go")]);
        let pool = pool_with(Arc::clone(&state), BrowserSettings::default());
        let id = pool.create_session("alice", None).await.unwrap();
        state.crash_all();

        let err = pool.get(id).unwrap().click("#go", None).await.unwrap_err();
        assert!(matches!(err, BrowserError::Crashed(_)));

        pool.sample_memory().await;
        assert_eq!(pool.session_count(), 0, "sampler closes dead sessions");
    }

    #[tokio::test(start_paused = true)]
    async fn memory_sweep_closes_oldest_share() {
        let state = Arc::new(FakeState::default());
        let pool = pool_with(Arc::clone(&state), BrowserSettings::default());
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(pool.create_session("alice", None).await.unwrap());
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        state.memory_bytes.store(100 * MB, Ordering::SeqCst);
        pool.sample_memory().await;
        assert_eq!(pool.sweep_memory().await, 0);

        state.memory_bytes.store(600 * MB, Ordering::SeqCst);
        pool.sample_memory().await;
        // ceil(5 * 0.3) = 2 oldest
        assert_eq!(pool.sweep_memory().await, 2);
        assert!(pool.get(ids[0]).is_err());
        assert!(pool.get(ids[1]).is_err());
        assert!(pool.get(ids[2]).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sweep_closes_unused_sessions() {
        let state = FakeState::with_elements(&[("#x", "x")]);
        let pool = pool_with(state, BrowserSettings::default());
        let stale = pool.create_session("alice", None).await.unwrap();
        let busy = pool.create_session("alice", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        pool.get(busy).unwrap().wait_for("#x", None).await.unwrap();
        tokio::time::advance(Duration::from_secs(11 * 60)).await;

        assert_eq!(pool.sweep_idle().await, 1);
        assert!(pool.get(stale).is_err());
        assert!(pool.get(busy).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_run_sweepers() {
        let state = Arc::new(FakeState::default());
        let pool = pool_with(Arc::clone(&state), BrowserSettings::default());
        pool.start();
        pool.create_session("alice", None).await.unwrap();

        tokio::time::sleep(Duration::from_secs(31 * 60 + 61)).await;
        assert_eq!(pool.session_count(), 0, "idle sweeper closed the session");

        pool.create_session("alice", None).await.unwrap();
        pool.stop().await;
        assert_eq!(pool.session_count(), 0);
    }
}
