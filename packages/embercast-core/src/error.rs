//! Centralized error types for the Embercast core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type for the Embercast server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum CastError {
    /// Requested mount point does not exist.
    #[error("Mount not found: {0}")]
    MountNotFound(String),

    /// Mount's listener cap (or the global client cap) is full.
    #[error("Listener limit reached on {0}")]
    ListenerLimitReached(String),

    /// Client IP is rejected by the mount's allow/deny lists.
    #[error("Access denied for {0}")]
    AccessDenied(String),

    /// Source supplied missing or wrong credentials.
    #[error("Source authentication failed on {0}")]
    AuthFailed(String),

    /// A source is already attached to the mount.
    #[error("Source already active on {0}")]
    SourceAlreadyActive(String),

    /// Source handshake was not a parseable SOURCE/PUT request.
    #[error("Bad source handshake: {0}")]
    BadHandshake(String),

    /// Mount cannot be deleted while a source or listeners are connected.
    #[error("Mount in use: {0}")]
    MountInUse(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Admin credentials missing or wrong.
    #[error("Admin authentication failed")]
    AdminAuthFailed,

    /// Server configuration error (missing required settings).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CastError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MountNotFound(_) => "mount_not_found",
            Self::ListenerLimitReached(_) => "listener_limit_reached",
            Self::AccessDenied(_) => "access_denied",
            Self::AuthFailed(_) => "auth_failed",
            Self::SourceAlreadyActive(_) => "source_already_active",
            Self::BadHandshake(_) => "bad_handshake",
            Self::MountInUse(_) => "mount_in_use",
            Self::InvalidRequest(_) => "invalid_request",
            Self::AdminAuthFailed => "admin_auth_failed",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    ///
    /// The mapping follows Icecast conventions: 401 for bad source
    /// credentials, 403 for dual-source and IP rejections, 503 for a full
    /// mount.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MountNotFound(_) => StatusCode::NOT_FOUND,
            Self::ListenerLimitReached(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::AccessDenied(_) | Self::SourceAlreadyActive(_) | Self::MountInUse(_) => {
                StatusCode::FORBIDDEN
            }
            Self::AuthFailed(_) | Self::AdminAuthFailed => StatusCode::UNAUTHORIZED,
            Self::BadHandshake(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type CastResult<T> = Result<T, CastError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for CastError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// Why a listener session ended.
///
/// Used for the session summary log line and admin-facing disconnect
/// reasons; not every variant maps to a [`CastError`] because most session
/// ends are normal operation, not API errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisconnectReason {
    /// The client closed the connection (or the write path failed).
    ClientGone,
    /// The listener crossed the hard lag threshold.
    TooSlow,
    /// No source reattached within the reconnect window, or a live source
    /// stopped producing bytes past the client timeout.
    SourceTimeout,
    /// An admin kicked the listener.
    Kicked,
    /// The source reconnected with a different content type.
    ContentTypeChanged,
}

impl DisconnectReason {
    /// Short string used in logs and admin responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientGone => "client-gone",
            Self::TooSlow => "too-slow",
            Self::SourceTimeout => "source-timeout",
            Self::Kicked => "kicked",
            Self::ContentTypeChanged => "content-type-changed",
        }
    }
}
