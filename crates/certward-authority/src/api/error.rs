//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::error::{AuthorityError, ErrorContext};

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("Forbidden: {message}")]
    Forbidden {
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, context) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::Unauthorized { message, context } => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message, context)
            }
            ApiError::Forbidden { message, context } => {
                (StatusCode::FORBIDDEN, "FORBIDDEN", message, context)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg, None)
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details: context
                .filter(|c| !c.is_empty())
                .and_then(|c| serde_json::to_value(c).ok()),
        };

        (status, Json(body)).into_response()
    }
}

impl ApiError {
    /// Report `err` as a failed authorization regardless of its kind
    pub fn unauthorized(err: AuthorityError) -> Self {
        log_rejection(&err);
        ApiError::Unauthorized {
            message: err.to_string(),
            context: err.context().cloned(),
        }
    }

    /// Report `err` as a refused signing request regardless of its kind
    pub fn forbidden(err: AuthorityError) -> Self {
        log_rejection(&err);
        ApiError::Forbidden {
            message: err.to_string(),
            context: err.context().cloned(),
        }
    }
}

fn log_rejection(err: &AuthorityError) {
    match err.context() {
        Some(context) if !context.is_empty() => {
            warn!(context = %context, error = %err, "Request rejected")
        }
        _ => warn!(error = %err, "Request rejected"),
    }
}

impl From<AuthorityError> for ApiError {
    fn from(err: AuthorityError) -> Self {
        match err {
            AuthorityError::MalformedInput { reason, .. } => ApiError::BadRequest(reason),
            AuthorityError::NotFound(msg) => ApiError::NotFound(msg),
            err @ AuthorityError::Unauthenticated { .. } => ApiError::unauthorized(err),
            err @ AuthorityError::Forbidden { .. } => ApiError::forbidden(err),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<certward_core::CoreError> for ApiError {
    fn from(err: certward_core::CoreError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}
