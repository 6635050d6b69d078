//! Authorization requirements
//!
//! Each requirement kind maps to a [`ValidationRule`] consumed by the claim
//! validator, so adding a policy means adding a row here rather than a new
//! handler type.

/// What an endpoint requires of its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// Any authenticated caller
    Default,
    /// Administrators only
    Elevation,
    /// Callers with live TV access
    LiveTvAccess,
    /// Guide provider (Schedules Direct) configuration
    SchedulesDirectAccess,
    /// Authenticated callers, ignoring parental access schedules
    IgnoreParentalControl,
    /// Authenticated callers, ignoring access schedules and setup state
    IgnoreSchedule,
    /// Open while first-time setup runs, then default or admin-only
    FirstTimeSetup { require_admin: bool },
    /// Credential, or else a remote address matching an active session
    Unsafe,
}

/// Claim checks applied for a requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidationRule {
    pub require_admin: bool,
    pub require_live_tv_access: bool,
    /// Skip the "setup must be complete" check
    pub allow_before_setup: bool,
    /// Skip the parental access schedule check
    pub ignore_schedule: bool,
}

impl Requirement {
    /// The claim checks for this requirement
    ///
    /// `Unsafe` uses the default rule for its credential check before falling
    /// back to address matching.
    pub fn rule(&self) -> ValidationRule {
        match *self {
            Requirement::Default | Requirement::Unsafe => ValidationRule::default(),
            Requirement::Elevation => ValidationRule {
                require_admin: true,
                ..Default::default()
            },
            Requirement::LiveTvAccess => ValidationRule {
                require_live_tv_access: true,
                ..Default::default()
            },
            Requirement::SchedulesDirectAccess => ValidationRule {
                require_admin: true,
                require_live_tv_access: true,
                ..Default::default()
            },
            Requirement::IgnoreParentalControl => ValidationRule {
                ignore_schedule: true,
                ..Default::default()
            },
            Requirement::IgnoreSchedule => ValidationRule {
                allow_before_setup: true,
                ignore_schedule: true,
                ..Default::default()
            },
            Requirement::FirstTimeSetup { require_admin } => ValidationRule {
                require_admin,
                allow_before_setup: true,
                ..Default::default()
            },
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Requirement::Default => "default",
            Requirement::Elevation => "elevation",
            Requirement::LiveTvAccess => "live-tv-access",
            Requirement::SchedulesDirectAccess => "schedules-direct-access",
            Requirement::IgnoreParentalControl => "ignore-parental-control",
            Requirement::IgnoreSchedule => "ignore-schedule",
            Requirement::FirstTimeSetup {
                require_admin: false,
            } => "first-time-setup-or-default",
            Requirement::FirstTimeSetup {
                require_admin: true,
            } => "first-time-setup-or-elevated",
            Requirement::Unsafe => "unsafe-ip-fallback",
        }
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
