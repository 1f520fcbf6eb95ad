//! Error types surfaced by the networking stack

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Broad error classification used by callers to pick recovery behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Device offline or host unreachable; work may have been queued
    Connectivity,
    /// Authentication or session problems
    Auth,
    /// Request rejected by the server; retrying will not help
    Client,
    /// Server-side failure, potentially transient
    Server,
    /// Transport security violation
    Security,
    /// Failure inside the stack itself (decoding, config, storage)
    Internal,
}

/// Main error type for Caravel networking operations
///
/// Variants carry enough information (status code, message, queued-request
/// id) for the caller to render a user-facing message without reaching back
/// into the transport layer.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum NetworkError {
    /// The device is offline or the host unreachable. When the request was
    /// captured for later delivery, `queued_id` identifies the queue record.
    #[error("offline: request could not be delivered")]
    Offline { queued_id: Option<Uuid> },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("client error ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("response decoding failed: {0}")]
    Decode(String),

    #[error("transport security violation: {0}")]
    Security(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Store(String),
}

impl NetworkError {
    /// Returns the broad category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Offline { .. } => ErrorCategory::Connectivity,
            Self::Unauthorized(_) | Self::SessionExpired(_) => ErrorCategory::Auth,
            Self::NotFound(_) | Self::Client { .. } => ErrorCategory::Client,
            Self::Server { .. } => ErrorCategory::Server,
            Self::Security(_) => ErrorCategory::Security,
            Self::Decode(_) | Self::Config(_) | Self::Store(_) => ErrorCategory::Internal,
        }
    }

    /// True when the request was captured by the offline queue and will be
    /// replayed once connectivity returns.
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Offline { queued_id: Some(_) })
    }

    /// True for failures that may clear without user action (offline spells,
    /// transient server trouble).
    pub fn is_transient(&self) -> bool {
        matches!(self.category(), ErrorCategory::Connectivity | ErrorCategory::Server)
    }

    /// True when the user must re-authenticate before further calls succeed.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::SessionExpired(_))
    }
}

/// Result type alias for networking operations
pub type Result<T> = std::result::Result<T, NetworkError>;
