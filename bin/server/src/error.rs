//! Domain error types for server operations.
//!
//! `ApiError` is what handlers return; it maps to a JSON body with
//! `status: "error"` and logs server-side details. `StartupError` covers
//! everything that can stop the process from coming up.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Errors returned by HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The request body or path is unusable.
    InvalidRequest { reason: String },
    /// The engine could not complete the turn.
    Engine { details: String },
    /// Reading or changing stored sessions failed.
    Storage { details: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest { reason } => write!(f, "invalid request: {reason}"),
            Self::Engine { details } => write!(f, "workflow failed: {details}"),
            Self::Storage { details } => write!(f, "session storage error: {details}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidRequest { reason } => (StatusCode::BAD_REQUEST, reason.clone()),
            Self::Engine { details } => {
                tracing::error!(%details, "turn failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Your message could not be processed".to_string(),
                )
            }
            Self::Storage { details } => {
                tracing::error!(%details, "session storage failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "status": "error", "detail": message }))).into_response()
    }
}

/// Errors that prevent the server from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration is missing or invalid.
    Config { details: String },
    /// The session database could not be opened.
    Database { url: String },
    /// The text-generation backend could not be built.
    Llm { details: String },
    /// The listener could not bind.
    Bind { addr: String, details: String },
    /// The server stopped with an I/O error.
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "failed to load configuration: {details}"),
            Self::Database { url } => write!(f, "failed to open session database '{url}'"),
            Self::Llm { details } => write!(f, "failed to build LLM backend: {details}"),
            Self::Bind { addr, details } => write!(f, "failed to bind to {addr}: {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_is_bad_request() {
        let response = ApiError::InvalidRequest {
            reason: "message is required".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn engine_failure_is_internal_error() {
        let response = ApiError::Engine {
            details: "disk full".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn startup_error_display() {
        let err = StartupError::Bind {
            addr: "0.0.0.0:80".to_string(),
            details: "permission denied".to_string(),
        };
        assert_eq!(err.to_string(), "failed to bind to 0.0.0.0:80: permission denied");
    }
}
