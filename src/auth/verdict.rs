//! Authorization decisions
//!
//! A decision is a plain value returned to the caller, which applies it
//! (typically by answering 401/403). Nothing here mutates shared state.

use uuid::Uuid;

use super::requirement::Requirement;

/// Outcome of evaluating one requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(Grant),
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }
}

/// Why a request was accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// A validated user token
    Credential { user_id: Uuid },
    /// An API key
    ApiKey,
    /// Remote address matched an already authenticated session
    TrustedSessionAddress { session_id: String },
    /// First-time setup has not finished yet
    SetupInProgress,
}

/// Why a request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AdministratorRequired,
    SetupIncomplete,
    LiveTvAccessDenied,
    NoIdentity,
    OutsideAccessSchedule,
    RemoteAddressUnavailable,
    NoMatchingSession,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            RejectReason::AdministratorRequired => "administrator rights required",
            RejectReason::SetupIncomplete => "server setup is not complete",
            RejectReason::LiveTvAccessDenied => "live TV access not granted",
            RejectReason::NoIdentity => "no identity resolved",
            RejectReason::OutsideAccessSchedule => "outside the user's access schedule",
            RejectReason::RemoteAddressUnavailable => "remote address unavailable",
            RejectReason::NoMatchingSession => "no active session from this address",
        };
        f.write_str(reason)
    }
}

/// A verdict together with the requirement it answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub requirement: Requirement,
    pub verdict: Verdict,
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        self.verdict.is_accepted()
    }

    /// The rejection reason, if rejected
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self.verdict {
            Verdict::Rejected(reason) => Some(reason),
            Verdict::Accepted(_) => None,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.verdict {
            Verdict::Accepted(_) => write!(f, "{} requirement satisfied", self.requirement),
            Verdict::Rejected(reason) => {
                write!(f, "{} requirement failed: {}", self.requirement, reason)
            }
        }
    }
}
