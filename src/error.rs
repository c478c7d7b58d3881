//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **StreamError**: failures inside a streaming session (bad audio, bad
//!   compact segment text, bad protocol messages, dead peers). These never
//!   leave the session; the processor turns the recoverable ones into an
//!   `ERROR` message for the peer.
//! - **AppError**: failures of the HTTP admin API, converted to JSON
//!   responses through actix-web's `ResponseError` trait.
//!
//! ## JSON error body (HTTP only):
//! ```json
//! {
//!   "error": {
//!     "type": "validation_error",
//!     "message": "Server port cannot be 0",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Errors raised while handling a single streaming session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    /// Audio payload is malformed or declares an unsupported format
    #[error("decode error: {0}")]
    Decode(String),

    /// Compact segment text does not have the `start end text` shape
    #[error("parse error: {0}")]
    Parse(String),

    /// Unknown command, message type or out-of-state request
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer went away while sending or receiving
    #[error("transport error: {0}")]
    Transport(String),
}

impl StreamError {
    /// Whether the session can carry on after reporting this error to the peer.
    ///
    /// Transport failures cannot be reported (the peer is gone), everything
    /// else is answered with an `ERROR` message and the session continues.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StreamError::Transport(_))
    }

    /// Short machine-readable kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::Decode(_) => "decode",
            StreamError::Parse(_) => "parse",
            StreamError::Protocol(_) => "protocol",
            StreamError::Transport(_) => "transport",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}

/// Errors returned by the HTTP admin API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Server-side problems (500)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Client sent invalid or malformed data (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Requested resource does not exist (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration file or environment variable problems (500)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input failed validation rules (400)
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

/// Shorthand for `Result<T, StreamError>`.
pub type StreamResult<T> = Result<T, StreamError>;
