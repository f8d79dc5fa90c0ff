//! # Error Handling
//!
//! Error types for each layer of the bridge:
//! - **AppError**: HTTP-facing and configuration errors, rendered as JSON responses
//! - **LegError**: a send on one leg of a call failed
//! - **SetupError**: the AI leg could not be established (credential exchange or connect)
//! - **IntegrationError**: a peripheral collaborator (lookup, outcome sink, call control) failed
//!
//! ## Propagation Policy:
//! Only `AppError` ever reaches a client. The others stay inside one call: they are
//! logged, counted, and at most end that call early. One session failing never
//! affects another session or the HTTP listener.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::audio::codec::CodecError;

/// Errors surfaced through the HTTP layer or at startup.
///
/// ## Error Categories:
/// - **NotFound**: unknown path (404)
/// - **ConfigError**: configuration could not be loaded or failed validation (500)
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Converts our custom errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "/unknown",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Configuration loading failures (missing file syntax, bad env values, etc.)
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Sample rates that the codec can't work with
impl From<CodecError> for AppError {
    fn from(err: CodecError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

/// A message could not be delivered on one leg of a call.
///
/// Callers log and drop these; a send racing a close is expected during teardown.
#[derive(Debug, Error)]
pub enum LegError {
    #[error("leg is closed")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The AI leg could not be brought up.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("realtime API key is not configured")]
    MissingApiKey,

    #[error("credential request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential endpoint returned status {0}")]
    CredentialStatus(u16),

    #[error("invalid connection parameter: {0}")]
    InvalidRequest(String),

    #[error("AI socket failed to open: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("AI socket did not open within {0:?}")]
    Timeout(std::time::Duration),
}

/// A peripheral collaborator call failed.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote returned status {0}")]
    Status(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}
