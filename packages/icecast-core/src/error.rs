//! Centralized error taxonomy for the streaming engine.
//!
//! Defines structured error types using `thiserror`, maps them to HTTP
//! status codes, and implements `IntoResponse` for automatic JSON error
//! bodies on axum handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the broadcast server.
#[derive(Debug, Error)]
pub enum IcecastError {
    /// Listener hit an unknown mount path.
    #[error("mount not found: {0}")]
    MountNotFound(String),

    /// Listener hit a mount with no active source.
    #[error("no source connected to {0}")]
    NoSource(String),

    /// Admission failed: mount is at its listener limit.
    #[error("mount {0} is at its listener limit")]
    MaxListeners(String),

    /// A second source attempted to connect to an already-active mount.
    #[error("a source is already connected to {0}")]
    SourceAlreadyConnected(String),

    /// Source or admin credentials were invalid.
    #[error("authentication failed")]
    AuthFailed,

    /// Source socket read error or buffer write error.
    #[error("source write fault on {0}: {1}")]
    WriteFault(String, String),

    /// Listener socket write error.
    #[error("client dropped: {0}")]
    ClientDrop(String),

    /// Listener was rebased during a read (skip-to-live). Not surfaced as
    /// an HTTP error; carried in the taxonomy for logging/stat purposes.
    #[error("listener on {0} skipped ahead to stay live")]
    OverrunSkip(String),

    /// Task was cancelled by shutdown or an admin kill.
    #[error("cancelled")]
    Cancelled,

    /// `ApplyConfig` received an invalid configuration; the previous
    /// configuration is kept and this is logged, not propagated.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Requested destination mount for `moveclients` does not exist or is
    /// inactive.
    #[error("move destination invalid: {0}")]
    InvalidMoveDestination(String),
}

impl IcecastError {
    /// Returns a machine-readable error code for API responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MountNotFound(_) => "mount_not_found",
            Self::NoSource(_) => "no_source",
            Self::MaxListeners(_) => "max_listeners",
            Self::SourceAlreadyConnected(_) => "source_already_connected",
            Self::AuthFailed => "auth_failed",
            Self::WriteFault(_, _) => "write_fault",
            Self::ClientDrop(_) => "client_drop",
            Self::OverrunSkip(_) => "overrun_skip",
            Self::Cancelled => "cancelled",
            Self::ConfigInvalid(_) => "config_invalid",
            Self::InvalidMoveDestination(_) => "invalid_move_destination",
        }
    }

    /// Maps the error to the HTTP status code the §7 taxonomy specifies.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MountNotFound(_) => StatusCode::NOT_FOUND,
            Self::NoSource(_) | Self::MaxListeners(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::SourceAlreadyConnected(_) => StatusCode::CONFLICT,
            Self::AuthFailed => StatusCode::UNAUTHORIZED,
            Self::InvalidMoveDestination(_) | Self::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorCode for IcecastError {
    fn code(&self) -> &'static str {
        IcecastError::code(self)
    }
}

/// Convenient Result alias for server-wide operations.
pub type IcecastResult<T> = Result<T, IcecastError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for IcecastError {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_not_found_maps_to_404() {
        let err = IcecastError::MountNotFound("/stream".into());
        assert_eq!(err.code(), "mount_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn source_already_connected_maps_to_409() {
        let err = IcecastError::SourceAlreadyConnected("/stream".into());
        assert_eq!(err.code(), "source_already_connected");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn auth_failed_maps_to_401() {
        let err = IcecastError::AuthFailed;
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }
}
