//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use autoflow_core::scheduler::SchedulerError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Scheduler(SchedulerError),
}

impl From<SchedulerError> for AppError {
    fn from(e: SchedulerError) -> Self {
        AppError::Scheduler(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Scheduler(SchedulerError::InvalidToken) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", "Invalid webhook token".to_string())
            }
            AppError::Scheduler(e @ SchedulerError::AutomationDisabled(_)) => {
                (StatusCode::FORBIDDEN, "AUTOMATION_DISABLED", e.to_string())
            }
            AppError::Scheduler(e @ SchedulerError::AutomationNotFound(_)) => {
                (StatusCode::NOT_FOUND, "AUTOMATION_NOT_FOUND", e.to_string())
            }
            AppError::Scheduler(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, "{message}");
        }
        (status, ApiResponse::error(code, message)).into_response()
    }
}
