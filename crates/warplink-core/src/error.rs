//! Shared error type across warplink crates.

use thiserror::Error;

/// Stable application-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Structurally invalid wire data.
    Malformed,
    /// Envelope tag outside the protocol set.
    UnknownTag,
    /// Known tag but missing or ill-typed addressing.
    SchemaMismatch,
    /// No connection slot for the host.
    NotConnected,
    /// Connection explicitly closed.
    Closed,
    /// Two downlinks for one lane with different kinds.
    KindConflict,
    /// Server denied the link permanently.
    AuthorizationDenied,
    /// Lane does not exist on the remote agent.
    LaneNotFound,
    /// Local queue overflow.
    Backpressure,
    /// Internal engine error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and terminal updates.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Malformed => "MALFORMED",
            ErrorCode::UnknownTag => "UNKNOWN_TAG",
            ErrorCode::SchemaMismatch => "SCHEMA_MISMATCH",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::Closed => "CLOSED",
            ErrorCode::KindConflict => "KIND_CONFLICT",
            ErrorCode::AuthorizationDenied => "AUTHORIZATION_DENIED",
            ErrorCode::LaneNotFound => "LANE_NOT_FOUND",
            ErrorCode::Backpressure => "BACKPRESSURE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, WarpError>;

/// Unified error type used by core and the client engine.
#[derive(Debug, Clone, Error)]
pub enum WarpError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("unknown envelope tag: {0}")]
    UnknownTag(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("connection closed")]
    Closed,
    #[error("downlink kind conflict: {0}")]
    KindConflict(String),
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),
    #[error("lane not found: {0}")]
    LaneNotFound(String),
    #[error("backpressure: {0}")]
    Backpressure(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl WarpError {
    /// Map internal error to a stable application-facing code.
    pub fn code(&self) -> ErrorCode {
        match self {
            WarpError::Malformed(_) => ErrorCode::Malformed,
            WarpError::UnknownTag(_) => ErrorCode::UnknownTag,
            WarpError::SchemaMismatch(_) => ErrorCode::SchemaMismatch,
            WarpError::NotConnected(_) => ErrorCode::NotConnected,
            WarpError::Closed => ErrorCode::Closed,
            WarpError::KindConflict(_) => ErrorCode::KindConflict,
            WarpError::AuthorizationDenied(_) => ErrorCode::AuthorizationDenied,
            WarpError::LaneNotFound(_) => ErrorCode::LaneNotFound,
            WarpError::Backpressure(_) => ErrorCode::Backpressure,
            WarpError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether this is a wire decode failure (dropped locally, never fatal
    /// to the connection).
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            WarpError::Malformed(_) | WarpError::UnknownTag(_) | WarpError::SchemaMismatch(_)
        )
    }

    /// Whether this failure is permanent for the lane (no auto re-link).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WarpError::AuthorizationDenied(_) | WarpError::LaneNotFound(_)
        )
    }
}
