//! HTTP error responses
//!
//! Every error leaves as `{"error": <code>, "message": <text>}`. Internal
//! detail is logged, never returned.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use railguard_core::{Error, FailureKind};
use railguard_pipeline::rail::FAILURE_NOTICE;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Error from the rail or session layer
    #[error(transparent)]
    Rail(#[from] Error),

    /// The message reached a FAILED terminal state
    #[error("message {message_id} failed: {}", .kind.code())]
    Failed {
        message_id: String,
        kind: FailureKind,
    },

    #[error("unknown preset '{0}'")]
    PresetNotFound(String),

    /// Body or query string could not be parsed
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Malformed(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Malformed(rejection.body_text())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// HTTP status for a rail error
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidRequest(_) | Error::InvalidConfiguration(_) | Error::Serialization(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
        Error::DuplicateMessage(_) => StatusCode::CONFLICT,
        Error::QueueFull(_) | Error::TransportDisconnected(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::PipelineTimeout | Error::DetectorTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::DetectorUnavailable(_)
        | Error::GenerationFailure(_)
        | Error::Io(_)
        | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Rail(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    error!(error = %err, "Request failed");
                }
                (status, err.code(), err.public_message())
            }
            AppError::Failed { kind, .. } => {
                let status = match kind {
                    FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    FailureKind::Generation | FailureKind::Detector => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, kind.code(), FAILURE_NOTICE.to_string())
            }
            AppError::PresetNotFound(name) => (
                StatusCode::NOT_FOUND,
                "preset_not_found",
                format!("unknown preset '{name}'"),
            ),
            AppError::Malformed(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            AppError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    FAILURE_NOTICE.to_string(),
                )
            }
        };

        let body = json!({
            "error": code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
