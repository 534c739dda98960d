use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::llm_client::LlmError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing user input or missing provider configuration. Raised before any
    /// upstream call is made.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-success status from the provider, or the body could not be read.
    #[error("{0}")]
    Upstream(#[from] LlmError),

    /// The model answered, but nothing in the answer followed the section protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) | AppError::Protocol(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Upstream(_) => "UPSTREAM_ERROR",
            AppError::Protocol(_) => "PROTOCOL_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The single human-readable diagnostic shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            AppError::NotFound(msg) | AppError::Validation(msg) | AppError::Protocol(msg) => {
                msg.clone()
            }
            AppError::Upstream(e) => e.to_string(),
            AppError::Internal(_) => "An internal server error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Upstream(e) => tracing::error!("Upstream error: {e}"),
            AppError::Protocol(msg) => tracing::warn!("Protocol error: {msg}"),
            AppError::Internal(e) => tracing::error!("Internal error: {e:?}"),
            AppError::NotFound(_) | AppError::Validation(_) => {}
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.user_message()
            }
        }));

        (self.status(), body).into_response()
    }
}
