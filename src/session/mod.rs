//! Request and session state
//!
//! - [`RequestContext`]: claims and peer address of one inbound request
//! - [`SessionRegistry`]: the active authenticated sessions

pub mod context;
pub mod registry;

pub use context::{normalize_ip, RequestContext};
pub use registry::{SessionRecord, SessionRegistry, SessionSource};
