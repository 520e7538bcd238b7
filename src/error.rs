//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - **Domain errors** (`ConnectionError`, `PublishError`, `ProviderError`,
//!   `SessionError`, `TransitionError`) are `thiserror` enums produced by the room
//!   client, the provider adapters and the session machinery.
//! - **`AppError`** is what HTTP handlers return. It renders every failure in the
//!   same JSON envelope:
//!
//! ```json
//! {
//!   "error": {
//!     "type": "conflict",
//!     "message": "session demo already exists",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```
//!
//! ## Severity of domain errors:
//! - `ConnectionError` is fatal to session start and is returned to the caller.
//! - `PublishError` degrades playback but never ends a session.
//! - `ProviderError` aborts the current turn only.

use crate::providers::Stage;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Errors raised while joining a room.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid connection argument: {0}")]
    InvalidArgument(String),

    #[error("room unreachable: {0}")]
    Unreachable(String),

    #[error("credential rejected: {0}")]
    CredentialRejected(String),
}

/// Errors raised while creating, publishing or playing the agent's outbound track.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("room is not connected")]
    NotConnected,

    #[error("failed to create local track: {0}")]
    TrackCreation(String),

    #[error("failed to publish track: {0}")]
    Publish(String),

    #[error("playback failed: {0}")]
    Playback(String),
}

/// Errors returned by the STT, LLM and TTS adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout { stage: Stage, timeout_ms: u64 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inbound track is no longer available")]
    TrackUnavailable,

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider configuration error: {0}")]
    Config(String),
}

/// A state machine event that is not legal in the current state.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot apply {event} while {state}")]
pub struct TransitionError {
    pub state: String,
    pub event: String,
}

/// Errors surfaced by the session registry and control surface.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("session {0} already exists")]
    AlreadyExists(String),

    #[error("session {0} not found")]
    NotFound(String),

    #[error("maximum concurrent sessions ({0}) reached")]
    LimitReached(usize),

    #[error("session {0} is closed")]
    Closed(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Errors returned from HTTP handlers.
///
/// ## Status mapping:
/// - `Internal` / `ConfigError` → 500
/// - `BadRequest` / `ValidationError` → 400
/// - `NotFound` → 404
/// - `Conflict` → 409
/// - `Upstream` → 502 (the room refused or could not be reached)
/// - `Unavailable` → 503 (capacity exhausted)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Upstream(String),
    Unavailable(String),
    ConfigError(String),
    ValidationError(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
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

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Maps registry failures onto HTTP semantics.
impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyExists(_) => AppError::Conflict(err.to_string()),
            SessionError::NotFound(_) => AppError::NotFound(err.to_string()),
            SessionError::LimitReached(_) => AppError::Unavailable(err.to_string()),
            SessionError::Closed(_) => AppError::Conflict(err.to_string()),
            SessionError::Connection(ConnectionError::InvalidArgument(msg)) => {
                AppError::ValidationError(msg)
            }
            SessionError::Connection(inner) => AppError::Upstream(inner.to_string()),
            SessionError::Provider(inner) => AppError::ConfigError(inner.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_map_to_status_codes() {
        let cases = vec![
            (SessionError::AlreadyExists("a".into()), StatusCode::CONFLICT),
            (SessionError::NotFound("a".into()), StatusCode::NOT_FOUND),
            (SessionError::LimitReached(2), StatusCode::SERVICE_UNAVAILABLE),
            (
                SessionError::Connection(ConnectionError::CredentialRejected("401".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                SessionError::Connection(ConnectionError::InvalidArgument("url".into())),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, expected) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status_code(), expected, "{}", app);
        }
    }

    #[test]
    fn test_timeout_message_names_stage() {
        let err = ProviderError::Timeout { stage: Stage::Generation, timeout_ms: 250 };
        assert_eq!(err.to_string(), "generation timed out after 250ms");
    }
}
