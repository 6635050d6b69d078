//! Authorization decision chain
//!
//! Turns a request context and a requirement into a [`Decision`].
//!
//! Most requirements are plain claim validation. Two are special:
//!
//! - `FirstTimeSetup` is accepted outright while setup has not finished.
//! - `Unsafe` accepts a valid credential first and only otherwise falls back
//!   to matching the caller's remote address against the active sessions.
//!   Anything behind the same NAT as an authenticated device passes this
//!   check, so it must only guard low-sensitivity endpoints.

use std::sync::Arc;

use super::requirement::Requirement;
use super::validator::ClaimValidator;
use super::verdict::{Decision, Grant, RejectReason, Verdict};
use crate::session::{RequestContext, SessionSource};

/// Evaluates requirements for inbound requests
#[derive(Clone)]
pub struct Authorizer {
    validator: ClaimValidator,
    sessions: Arc<dyn SessionSource>,
}

impl Authorizer {
    pub fn new(validator: ClaimValidator, sessions: Arc<dyn SessionSource>) -> Self {
        Self {
            validator,
            sessions,
        }
    }

    pub fn validator(&self) -> &ClaimValidator {
        &self.validator
    }

    /// Decide whether the request in `ctx` satisfies `requirement`
    pub fn authorize(&self, ctx: &RequestContext, requirement: Requirement) -> Decision {
        let verdict = match requirement {
            Requirement::Unsafe => self.authorize_by_address(ctx),
            Requirement::FirstTimeSetup { .. } if !self.validator.is_setup_complete() => {
                Verdict::Accepted(Grant::SetupInProgress)
            }
            other => self.validator.validate(ctx.claims.as_ref(), &other.rule()),
        };

        tracing::debug!(
            requirement = %requirement,
            peer = ?ctx.peer_addr,
            verdict = ?verdict,
            "Authorization decided"
        );

        Decision {
            requirement,
            verdict,
        }
    }

    fn authorize_by_address(&self, ctx: &RequestContext) -> Verdict {
        // A real credential always wins over the address fallback
        let verdict = self
            .validator
            .validate(ctx.claims.as_ref(), &Requirement::Unsafe.rule());
        if verdict.is_accepted() {
            return verdict;
        }

        let Some(ip) = ctx.normalized_remote_ip() else {
            return Verdict::Rejected(RejectReason::RemoteAddressUnavailable);
        };
        let ip = ip.to_string();

        match self
            .sessions
            .active_sessions()
            .into_iter()
            .find(|session| session.remote_endpoint.eq_ignore_ascii_case(&ip))
        {
            Some(session) => Verdict::Accepted(Grant::TrustedSessionAddress {
                session_id: session.session_id,
            }),
            None => Verdict::Rejected(RejectReason::NoMatchingSession),
        }
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}
