use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::errors::BackupError;

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": message, "code": status.as_u16() })),
    )
        .into_response()
}

impl IntoResponse for BackupError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(status = %status, error = ?self, "backup request failed");
        } else {
            tracing::warn!(status = %status, error = %self, "backup request rejected");
        }
        error_response(status, &self.public_message())
    }
}

/// Authentication failures, answered before any handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    NotAdmin,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing bearer token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthError::NotAdmin => (StatusCode::FORBIDDEN, "Administrator role required"),
        };
        tracing::warn!(status = %status, "request refused: {}", message);
        error_response(status, message)
    }
}
