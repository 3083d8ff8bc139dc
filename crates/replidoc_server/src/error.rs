use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use replidoc_core::ReplidocError;

/// Error surfaced to HTTP clients as a JSON body with a matching
/// status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ReplidocError> for ApiError {
    fn from(err: ReplidocError) -> Self {
        let status = match &err {
            ReplidocError::Validation(_) => StatusCode::BAD_REQUEST,
            ReplidocError::ProtocolViolation(_) => StatusCode::CONFLICT,
            ReplidocError::Contention(_) => StatusCode::SERVICE_UNAVAILABLE,
            ReplidocError::SchemaVersionMismatch { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("request failed: {}", self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
