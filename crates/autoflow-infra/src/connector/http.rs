//! HTTP API connector.
//!
//! Reads issue `GET` (or `config.method`) against the step's resource URL and
//! return the decoded JSON body; writes send the step input as a JSON body
//! with `POST` unless `config.method` says otherwise. Relative resources are
//! joined onto the connector's base URL.

use std::time::Duration;

use autoflow_core::resilience::GuardRegistry;
use autoflow_core::step::{Connector, ConnectorError, ConnectorRequest, ConnectorSet, GuardedConnector};
use reqwest::Method;
use serde_json::Value;

/// Name under which the HTTP connector is registered.
pub const API_CONNECTOR: &str = "api";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpConnector {
    pub fn new() -> Result<Self, ConnectorError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: None,
        })
    }

    /// Prefix for resources that are not absolute URLs.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn url(&self, resource: &str) -> Result<String, ConnectorError> {
        if resource.starts_with("http://") || resource.starts_with("https://") {
            return Ok(resource.to_string());
        }
        match &self.base_url {
            Some(base) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                resource.trim_start_matches('/')
            )),
            None => Err(ConnectorError::Invalid(format!("url '{resource}' is not absolute"))),
        }
    }

    fn request(
        &self,
        request: &ConnectorRequest,
        default_method: Method,
    ) -> Result<reqwest::RequestBuilder, ConnectorError> {
        let method = match request.config.get("method").and_then(Value::as_str) {
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| ConnectorError::Invalid(format!("unsupported HTTP method '{m}'")))?,
            None => default_method,
        };

        let mut builder = self.client.request(method, self.url(&request.resource)?);

        if let Some(headers) = request.config.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    builder = builder.header(name.as_str(), value);
                }
            }
        }
        if let Some(query) = request.config.get("query").and_then(Value::as_object) {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect();
            builder = builder.query(&pairs);
        }
        if let Some(token) = request.config.get("bearerToken").and_then(Value::as_str) {
            builder = builder.bearer_auth(token);
        }

        Ok(builder)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, ConnectorError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ConnectorError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectorError::Request(e.to_string()))?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ConnectorError::Unauthorized(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(ConnectorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

impl Connector for HttpConnector {
    async fn read(&self, request: &ConnectorRequest) -> Result<Value, ConnectorError> {
        let builder = self.request(request, Method::GET)?;
        self.send(builder).await
    }

    async fn write(&self, request: &ConnectorRequest, data: &Value) -> Result<Value, ConnectorError> {
        let builder = self.request(request, Method::POST)?.json(data);
        self.send(builder).await
    }
}

/// Register the guarded HTTP connector as `api`.
pub fn register_http_connector(
    connectors: &mut ConnectorSet,
    guards: &GuardRegistry,
) -> Result<(), ConnectorError> {
    let connector = GuardedConnector::new(HttpConnector::new()?, guards.guard(API_CONNECTOR));
    connectors.register(API_CONNECTOR, connector);
    Ok(())
}
