//! JSON envelope returned by every webhook server route.
//!
//! ```json
//! {
//!   "data": { "success": true, "executionId": "...", ... },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 },
//!   "errors": []
//! }
//! ```
//!
//! A webhook whose run fails still answers 200 with `data.success == false`;
//! `errors` is only filled when no execution was started.

use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub meta: ApiMeta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub request_id: String,
    pub timestamp: String,
    pub response_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    /// Stable code such as `INVALID_TOKEN`.
    pub code: &'static str,
    pub message: String,
}

fn meta(request_id: String, response_time_ms: u64) -> ApiMeta {
    ApiMeta {
        request_id,
        timestamp: chrono::Utc::now().to_rfc3339(),
        response_time_ms,
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, request_id: String, response_time_ms: u64) -> Self {
        Self {
            data: Some(data),
            meta: meta(request_id, response_time_ms),
            errors: Vec::new(),
        }
    }
}

impl ApiResponse<()> {
    /// Error envelope; no execution exists so there is no request id to echo.
    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            data: None,
            meta: meta(String::new(), 0),
            errors: vec![ApiErrorDetail {
                code,
                message: message.into(),
            }],
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = serde_json::to_string(&self).unwrap_or_else(|e| {
            tracing::error!("failed to serialize response: {e}");
            r#"{"errors":[{"code":"SERIALIZATION_ERROR","message":"failed to serialize response"}]}"#
                .to_string()
        });
        ([(CONTENT_TYPE, "application/json")], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn success_envelope_has_no_errors_key() {
        let body = serde_json::to_value(ApiResponse::success(json!({"success": true}), "r-1".into(), 7)).unwrap();
        assert_eq!(body["data"]["success"], true);
        assert_eq!(body["meta"]["request_id"], "r-1");
        assert_eq!(body["meta"]["response_time_ms"], 7);
        assert!(body.get("errors").is_none());
    }

    #[test]
    fn error_envelope_has_no_data_key() {
        let body = serde_json::to_value(ApiResponse::error("INVALID_TOKEN", "invalid token")).unwrap();
        assert!(body.get("data").is_none());
        assert_eq!(body["errors"][0]["code"], Value::from("INVALID_TOKEN"));
        assert_eq!(body["errors"][0]["message"], "invalid token");
    }
}
