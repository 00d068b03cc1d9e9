//! `POST /webhooks/{token}`: run the automation bound to a webhook token.
//!
//! The request body becomes `inputData.webhook.payload` (JSON when it parses,
//! the raw text otherwise) and the request headers `inputData.webhook.headers`.
//! The execution runs to completion before the response is sent; a failed
//! run is still a `200` whose `data.success` is `false`.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use autoflow_observe::attrs;
use autoflow_types::execution::ExecutionResult;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Headers that carry credentials and never reach step inputs.
const REDACTED_HEADERS: [&str; 3] = ["authorization", "cookie", "proxy-authorization"];

pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse<ExecutionResult>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let payload = decode_body(&body);
    let headers = header_map(&headers);

    let span = tracing::info_span!(attrs::SPAN_WEBHOOK, request_id = %request_id);
    let result = state
        .scheduler
        .handle_webhook(&token, payload, headers)
        .instrument(span)
        .await?;

    Ok(ApiResponse::success(
        result,
        request_id,
        start.elapsed().as_millis() as u64,
    ))
}

fn decode_body(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| !REDACTED_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "runningExecutions": state.engine.running(),
        "browserSessions": state.browser_pool.session_count(),
        "webhookRoutes": state.scheduler.routes(),
    }))
}
