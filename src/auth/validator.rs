//! Claim validation
//!
//! Checks a request's identity claims against a [`ValidationRule`]. The
//! checks run in a fixed order and the first failing one decides:
//!
//! 1. admin required but caller is not an administrator
//! 2. setup incomplete, rule does not allow that, caller is not an administrator
//! 3. live TV access required and caller has neither it nor admin rights
//! 4. API keys are accepted here, skipping the per-user checks below
//! 5. no user resolved
//! 6. user outside their parental access schedule (unless ignored or admin)
//!
//! Anything left is accepted. The result depends only on the claims, the
//! rule and the two collaborator lookups.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use super::claims::IdentityClaims;
use super::requirement::ValidationRule;
use super::verdict::{Grant, RejectReason, Verdict};

/// Reports whether first-time server setup has completed
pub trait SetupState: Send + Sync {
    fn is_setup_complete(&self) -> bool;
}

/// Setup state held in memory
#[derive(Debug, Default)]
pub struct SetupFlag(AtomicBool);

impl SetupFlag {
    pub fn new(complete: bool) -> Self {
        Self(AtomicBool::new(complete))
    }

    pub fn mark_complete(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl SetupState for SetupFlag {
    fn is_setup_complete(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Parental access schedules kept by the user store
pub trait ParentalSchedule: Send + Sync {
    /// Whether `user_id` may use the server right now
    fn allows_access(&self, user_id: Uuid) -> bool;
}

/// Schedule that never restricts anyone
#[derive(Debug, Clone, Copy, Default)]
pub struct Unrestricted;

impl ParentalSchedule for Unrestricted {
    fn allows_access(&self, _user_id: Uuid) -> bool {
        true
    }
}

/// Validates identity claims against a rule
#[derive(Clone)]
pub struct ClaimValidator {
    setup: Arc<dyn SetupState>,
    schedule: Arc<dyn ParentalSchedule>,
}

impl ClaimValidator {
    /// Create a validator with no parental schedule restrictions
    pub fn new(setup: Arc<dyn SetupState>) -> Self {
        Self {
            setup,
            schedule: Arc::new(Unrestricted),
        }
    }

    /// Consult `schedule` for parental access schedules
    pub fn with_parental_schedule(mut self, schedule: Arc<dyn ParentalSchedule>) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup.is_setup_complete()
    }

    pub fn validate(&self, claims: Option<&IdentityClaims>, rule: &ValidationRule) -> Verdict {
        let is_api_key = claims.is_some_and(|c| c.is_api_key);
        let is_admin = claims.is_some_and(|c| c.is_administrator);
        let has_live_tv_access = claims.is_some_and(|c| c.has_live_tv_access);
        let user_id = claims.and_then(IdentityClaims::resolved_user_id);

        if rule.require_admin && !is_admin {
            return Verdict::Rejected(RejectReason::AdministratorRequired);
        }

        if !rule.allow_before_setup && !is_admin && !self.setup.is_setup_complete() {
            return Verdict::Rejected(RejectReason::SetupIncomplete);
        }

        if rule.require_live_tv_access && !is_admin && !has_live_tv_access {
            return Verdict::Rejected(RejectReason::LiveTvAccessDenied);
        }

        if is_api_key {
            return Verdict::Accepted(Grant::ApiKey);
        }

        let Some(user_id) = user_id else {
            return Verdict::Rejected(RejectReason::NoIdentity);
        };

        if !rule.ignore_schedule && !is_admin && !self.schedule.allows_access(user_id) {
            return Verdict::Rejected(RejectReason::OutsideAccessSchedule);
        }

        Verdict::Accepted(Grant::Credential { user_id })
    }
}

impl std::fmt::Debug for ClaimValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimValidator")
            .field("setup_complete", &self.setup.is_setup_complete())
            .finish_non_exhaustive()
    }
}
