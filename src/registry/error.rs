//! Registry error types
//!
//! Error types for live source registry and live stream handle operations.

use std::time::Duration;

use super::key::{LiveSourceKey, MediaSourceInfo};

/// Error type for live stream operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LiveStreamError {
    /// The tuner could not establish the physical connection
    #[error("Failed to connect live source {key}: {message}")]
    Connect { key: LiveSourceKey, message: String },

    /// The physical connection was not established in time
    #[error("Timed out after {timeout:?} opening live source {key}")]
    OpenTimeout {
        key: LiveSourceKey,
        timeout: Duration,
    },

    /// The open was cancelled by the caller
    #[error("Open cancelled for live source {0}")]
    Cancelled(LiveSourceKey),

    /// A shared stream is registered for the key with a different media source
    #[error(
        "Live source {key} is already streaming media source {} (requested {})",
        .registered.id,
        .requested.id
    )]
    DescriptorMismatch {
        key: LiveSourceKey,
        registered: Box<MediaSourceInfo>,
        requested: Box<MediaSourceInfo>,
    },

    /// The stream has been closed and can no longer be read
    #[error("Live stream closed: {0}")]
    Closed(LiveSourceKey),

    /// Tearing down the physical connection failed
    #[error("Failed to shut down live source {key}: {message}")]
    Shutdown { key: LiveSourceKey, message: String },

    /// Registry bookkeeping reached a state it must never reach
    #[error("Live registry invariant violated for {key}: {detail}")]
    InvariantViolation { key: LiveSourceKey, detail: String },
}

impl LiveStreamError {
    pub(crate) fn invariant(key: &LiveSourceKey, detail: impl Into<String>) -> Self {
        LiveStreamError::InvariantViolation {
            key: key.clone(),
            detail: detail.into(),
        }
    }

    /// Whether this error is a programming error rather than a runtime condition
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, LiveStreamError::InvariantViolation { .. })
    }
}
