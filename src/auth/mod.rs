//! Request authorization
//!
//! Decides whether a request may proceed, before any resource is touched.
//!
//! ```text
//!   RequestContext ──► Authorizer::authorize(ctx, Requirement)
//!                          │
//!                          ├─ Requirement::rule() ──► ClaimValidator::validate()
//!                          │                              │ SetupState, ParentalSchedule
//!                          │
//!                          └─ Unsafe: credential, else SessionSource scan
//!                                            │
//!                                            ▼
//!                               Decision { requirement, verdict }
//! ```

pub mod claims;
pub mod policy;
pub mod requirement;
pub mod validator;
pub mod verdict;

pub use claims::{IdentityClaims, IdentityResolver};
pub use policy::Authorizer;
pub use requirement::{Requirement, ValidationRule};
pub use validator::{ClaimValidator, ParentalSchedule, SetupFlag, SetupState, Unrestricted};
pub use verdict::{Decision, Grant, RejectReason, Verdict};
