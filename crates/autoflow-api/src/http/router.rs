//! Axum router for the webhook server.

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::http::webhook;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/{token}", post(webhook::receive_webhook))
        .route("/health", get(webhook::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
