//! Error types for media session operations

use thiserror::Error;

/// Result type alias for media session operations
pub type Result<T> = std::result::Result<T, MediaSessionError>;

/// Errors raised by the media session state container
///
/// Only `InvalidArgument`, `SchedulerClosed`, `IdentityAlreadyAssigned` and
/// `Config` ever reach the caller of a public entry point. Everything that
/// happens inside a deferred task is logged and counted instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaSessionError {
    /// A required argument was missing or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The payload registry already holds this payload or its payload type
    #[error("Duplicate payload: payload type {payload_type} is already registered")]
    DuplicatePayload { payload_type: u32 },

    /// Decoded SRTP key material has an unexpected length
    #[error("Malformed key length: expected {expected} bytes, got {actual}")]
    MalformedKeyLength { expected: usize, actual: usize },

    /// Stored SRTP key is not valid base64
    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// A deferred task found a captured reference that no longer matches the session
    #[error("Stale reference: {0}")]
    StaleReference(String),

    /// The scheduler no longer accepts tasks
    #[error("Scheduler closed")]
    SchedulerClosed,

    /// The ssrc/cname pair was already assigned
    #[error("Session identity already assigned")]
    IdentityAlreadyAssigned,

    /// Configuration could not be parsed or applied
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MediaSessionError {
    /// Whether the error is a diagnostic that leaves usable state behind
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DuplicatePayload { .. } | Self::MalformedKeyLength { .. } | Self::StaleReference(_)
        )
    }
}
