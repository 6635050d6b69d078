//! Identity claims
//!
//! The claim set is produced once per request by the token layer and is
//! read-only from here on.

use uuid::Uuid;

/// Identity claims resolved for one request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentityClaims {
    /// Authenticated user, if the token names one
    pub user_id: Option<Uuid>,
    /// Client device identifier
    pub device_id: String,
    /// Session identifier the token was issued for
    pub session_id: String,
    /// User holds administrator rights
    pub is_administrator: bool,
    /// User may watch live TV
    pub has_live_tv_access: bool,
    /// The credential is an API key rather than a user token
    pub is_api_key: bool,
}

impl IdentityClaims {
    /// Claims for an ordinary user token
    pub fn user(
        user_id: Uuid,
        device_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: Some(user_id),
            device_id: device_id.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// Claims for an API key
    pub fn api_key(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            is_api_key: true,
            ..Default::default()
        }
    }

    /// Grant administrator rights
    pub fn administrator(mut self) -> Self {
        self.is_administrator = true;
        self
    }

    /// Grant live TV access
    pub fn with_live_tv_access(mut self) -> Self {
        self.has_live_tv_access = true;
        self
    }

    /// The user the claims resolve to; a nil id counts as unresolved
    pub fn resolved_user_id(&self) -> Option<Uuid> {
        self.user_id.filter(|id| !id.is_nil())
    }
}

/// Resolves the identity claims carried by a request
///
/// Implemented by the token layer; returns `None` when the request carries
/// no usable credential.
pub trait IdentityResolver<R: ?Sized>: Send + Sync {
    fn resolve(&self, request: &R) -> Option<IdentityClaims>;
}
