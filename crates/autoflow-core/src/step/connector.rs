//! Connector port.
//!
//! Source and destination steps reach external systems (HTTP APIs, cloud
//! drives, SMB shares, databases) through named connectors. External modules
//! implement [`Connector`]; [`GuardedConnector`] puts a connector behind a
//! [`ServiceGuard`] so its calls are rate limited, circuit broken and cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::resilience::{GuardError, ServiceGuard};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One connector call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorRequest {
    /// Logical resource path (URL, drive path, table). Also the cache key.
    pub resource: String,
    /// The step config, templates already resolved.
    pub config: Value,
}

impl ConnectorRequest {
    pub fn new(resource: impl Into<String>, config: Value) -> Self {
        Self {
            resource: resource.into(),
            config,
        }
    }

    /// Per-call cache TTL from `cacheTtlSecs`.
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.config
            .get("cacheTtlSecs")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    /// Refused by the service guard (rate limit or open circuit).
    #[error("{0}")]
    Rejected(String),
}

impl From<GuardError<ConnectorError>> for ConnectorError {
    fn from(e: GuardError<ConnectorError>) -> Self {
        match e {
            GuardError::Upstream(inner) => inner,
            rejected => ConnectorError::Rejected(rejected.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Connector trait
// ---------------------------------------------------------------------------

pub trait Connector: Send + Sync {
    fn read(&self, request: &ConnectorRequest) -> impl Future<Output = Result<Value, ConnectorError>> + Send;

    fn write(
        &self,
        request: &ConnectorRequest,
        data: &Value,
    ) -> impl Future<Output = Result<Value, ConnectorError>> + Send;
}

pub trait ConnectorDyn: Send + Sync {
    fn read_boxed<'a>(&'a self, request: &'a ConnectorRequest) -> BoxFuture<'a, Result<Value, ConnectorError>>;
    fn write_boxed<'a>(
        &'a self,
        request: &'a ConnectorRequest,
        data: &'a Value,
    ) -> BoxFuture<'a, Result<Value, ConnectorError>>;
}

impl<T: Connector> ConnectorDyn for T {
    fn read_boxed<'a>(&'a self, request: &'a ConnectorRequest) -> BoxFuture<'a, Result<Value, ConnectorError>> {
        Box::pin(self.read(request))
    }

    fn write_boxed<'a>(
        &'a self,
        request: &'a ConnectorRequest,
        data: &'a Value,
    ) -> BoxFuture<'a, Result<Value, ConnectorError>> {
        Box::pin(self.write(request, data))
    }
}

pub struct BoxConnector {
    inner: Box<dyn ConnectorDyn>,
}

impl BoxConnector {
    pub fn new<T: Connector + 'static>(connector: T) -> Self {
        Self {
            inner: Box::new(connector),
        }
    }

    pub async fn read(&self, request: &ConnectorRequest) -> Result<Value, ConnectorError> {
        self.inner.read_boxed(request).await
    }

    pub async fn write(&self, request: &ConnectorRequest, data: &Value) -> Result<Value, ConnectorError> {
        self.inner.write_boxed(request, data).await
    }
}

impl std::fmt::Debug for BoxConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxConnector").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// GuardedConnector
// ---------------------------------------------------------------------------

/// A connector whose reads are cached and whose calls pass the guard.
pub struct GuardedConnector<C> {
    inner: C,
    guard: Arc<ServiceGuard>,
}

impl<C: Connector> GuardedConnector<C> {
    pub fn new(inner: C, guard: Arc<ServiceGuard>) -> Self {
        Self { inner, guard }
    }

    pub fn guard(&self) -> &ServiceGuard {
        &self.guard
    }
}

impl<C: Connector> Connector for GuardedConnector<C> {
    async fn read(&self, request: &ConnectorRequest) -> Result<Value, ConnectorError> {
        self.guard
            .read(&request.resource, request.cache_ttl(), || self.inner.read(request))
            .await
            .map_err(ConnectorError::from)
    }

    async fn write(&self, request: &ConnectorRequest, data: &Value) -> Result<Value, ConnectorError> {
        self.guard
            .mutate(&request.resource, || self.inner.write(request, data))
            .await
            .map_err(ConnectorError::from)
    }
}

// ---------------------------------------------------------------------------
// ConnectorSet
// ---------------------------------------------------------------------------

/// Connectors by name, fixed once the step registry is built.
#[derive(Debug, Default)]
pub struct ConnectorSet {
    connectors: HashMap<String, BoxConnector>,
}

impl ConnectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: Connector + 'static>(&mut self, name: impl Into<String>, connector: C) -> &mut Self {
        let name = name.into();
        tracing::debug!(connector = %name, "connector registered");
        self.connectors.insert(name, BoxConnector::new(connector));
        self
    }

    pub fn get(&self, name: &str) -> Option<&BoxConnector> {
        self.connectors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connectors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ---------------------------------------------------------------------------
// Test connector
// ---------------------------------------------------------------------------

/// Records calls and replays canned responses.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingConnector {
    pub reads: std::sync::Mutex<Vec<ConnectorRequest>>,
    pub writes: std::sync::Mutex<Vec<(ConnectorRequest, Value)>>,
    pub response: Value,
    pub fail_with: Option<ConnectorError>,
}

#[cfg(test)]
impl Connector for Arc<RecordingConnector> {
    async fn read(&self, request: &ConnectorRequest) -> Result<Value, ConnectorError> {
        self.reads.lock().unwrap().push(request.clone());
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(self.response.clone()),
        }
    }

    async fn write(&self, request: &ConnectorRequest, data: &Value) -> Result<Value, ConnectorError> {
        self.writes.lock().unwrap().push((request.clone(), data.clone()));
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => Ok(serde_json::json!({"written": true})),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorClassifier;
    use autoflow_types::config::GuardSettings;
    use serde_json::json;

    fn guarded(conn: Arc<RecordingConnector>) -> GuardedConnector<Arc<RecordingConnector>> {
        let settings = GuardSettings {
            rate_limit_per_sec: 100,
            ..GuardSettings::default()
        };
        let guard = Arc::new(ServiceGuard::new(
            "sharepoint",
            &settings,
            Arc::new(ErrorClassifier::new()),
        ));
        GuardedConnector::new(conn, guard)
    }

    #[tokio::test]
    async fn reads_are_cached_until_a_write() {
        let conn = Arc::new(RecordingConnector {
            response: json!({"rows": 3}),
            ..Default::default()
        });
        let guarded = guarded(Arc::clone(&conn));
        let req = ConnectorRequest::new("/sites/a/list", json!({}));

        assert_eq!(guarded.read(&req).await.unwrap(), json!({"rows": 3}));
        guarded.read(&req).await.unwrap();
        assert_eq!(conn.reads.lock().unwrap().len(), 1);

        guarded.write(&req, &json!([1])).await.unwrap();
        guarded.read(&req).await.unwrap();
        assert_eq!(conn.reads.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn auth_failures_do_not_trip_the_breaker() {
        let conn = Arc::new(RecordingConnector {
            fail_with: Some(ConnectorError::Unauthorized("token expired".into())),
            ..Default::default()
        });
        let guarded = guarded(Arc::clone(&conn));
        let req = ConnectorRequest::new("/drive/root", json!({}));
        for _ in 0..3 {
            let err = guarded.read(&req).await.unwrap_err();
            assert!(matches!(err, ConnectorError::Unauthorized(_)));
        }
        assert_eq!(guarded.guard().breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn open_circuit_is_reported_as_rejection() {
        let conn = Arc::new(RecordingConnector {
            fail_with: Some(ConnectorError::Status {
                status: 503,
                body: "service unavailable".into(),
            }),
            ..Default::default()
        });
        let guarded = guarded(Arc::clone(&conn));
        let threshold = GuardSettings::default().failure_threshold;
        for i in 0..threshold {
            let req = ConnectorRequest::new(format!("/r/{i}"), json!({}));
            assert!(guarded.read(&req).await.is_err());
        }
        let err = guarded
            .read(&ConnectorRequest::new("/r/next", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Rejected(_)));
        assert!(err.to_string().contains("circuit breaker open"));
        assert_eq!(conn.reads.lock().unwrap().len() as u32, threshold);
    }

    #[test]
    fn connector_set_lookup() {
        let mut set = ConnectorSet::new();
        set.register("api", Arc::new(RecordingConnector::default()))
            .register("smb", Arc::new(RecordingConnector::default()));
        assert!(set.contains("api"));
        assert!(set.get("ftp").is_none());
        assert_eq!(set.names(), vec!["api", "smb"]);
    }
}
