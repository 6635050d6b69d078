//! Crate-level error type

use crate::auth::Decision;
use crate::registry::LiveStreamError;

/// Errors surfaced to request handlers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request failed authorization
    #[error("Access denied: {0}")]
    AccessDenied(Decision),

    /// Opening, reading or releasing a live stream failed
    #[error(transparent)]
    LiveStream(#[from] LiveStreamError),
}

impl Error {
    /// Whether this is an authorization rejection
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Error::AccessDenied(_))
    }
}

/// Result type for gate operations
pub type Result<T> = std::result::Result<T, Error>;
