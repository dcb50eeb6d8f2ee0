//! HTTP-facing error type: maps `crate::Error` onto a status code and a
//! stable machine-readable code, the way the teacher's `ApiError` does for
//! its own error enum.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::Error;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn too_many_requests(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("{entity_type} with id '{id}' not found"))
            }
            Error::Validation(msg) => ApiError::validation(msg),
            Error::Configuration(msg) => ApiError::internal(msg),
            Error::InvalidStateTransition { from, to } => {
                ApiError::conflict(format!("cannot transition from {from} to {to}"))
            }
            Error::Unauthorized(msg) => ApiError::unauthorized(msg),
            Error::RateLimitExceeded => ApiError::too_many_requests(
                "RATE_LIMIT_EXCEEDED",
                "broadcast creation rate limit exceeded",
            ),
            Error::JobCreationRateLimit => ApiError::too_many_requests(
                "JOB_CREATION_RATE_LIMIT",
                "job creation rate limit exceeded",
            ),
            Error::BroadcastSetupFailed(msg) => {
                ApiError::new(StatusCode::BAD_GATEWAY, "YOUTUBE_SETUP_FAILED", msg)
            }
            Error::StreamRestartExceeded => ApiError::new(
                StatusCode::CONFLICT,
                "STREAM_RESTART_EXCEEDED",
                "stream restart attempts exhausted",
            ),
            Error::Io(e) => {
                tracing::error!(error = %e, "io error");
                ApiError::internal("io error occurred")
            }
            Error::IoContext { op, path, source } => {
                tracing::error!(%op, path = %path.display(), error = %source, "io error");
                ApiError::internal("io error occurred")
            }
            Error::Http(e) => {
                tracing::error!(error = %e, "http transport error");
                ApiError::internal("upstream transport error")
            }
            Error::Serialization(e) => ApiError::bad_request(format!("malformed payload: {e}")),
            Error::Other(msg) => {
                tracing::error!(message = %msg, "unexpected error");
                ApiError::internal(msg)
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
