//! Request context
//!
//! Per-request information the authorization chain works from: the claims
//! the token layer resolved and the address the connection came from.

use std::net::{IpAddr, SocketAddr};

use crate::auth::{IdentityClaims, IdentityResolver};

/// Context for one inbound request
///
/// Read-only once built; the authorization chain never changes it.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Claims resolved from the request's credential, if any
    pub claims: Option<IdentityClaims>,

    /// Remote peer address, if the transport exposes one
    pub peer_addr: Option<SocketAddr>,
}

impl RequestContext {
    /// Create a context with no credential
    pub fn anonymous(peer_addr: Option<SocketAddr>) -> Self {
        Self {
            claims: None,
            peer_addr,
        }
    }

    /// Create a context for a request carrying `claims`
    pub fn authenticated(claims: IdentityClaims, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            claims: Some(claims),
            peer_addr,
        }
    }

    /// Build a context by running `resolver` over `request`
    pub fn resolve<R, Req>(resolver: &R, request: &Req, peer_addr: Option<SocketAddr>) -> Self
    where
        R: IdentityResolver<Req> + ?Sized,
        Req: ?Sized,
    {
        Self {
            claims: resolver.resolve(request),
            peer_addr,
        }
    }

    /// The caller's address in the form sessions record it
    pub fn normalized_remote_ip(&self) -> Option<IpAddr> {
        self.peer_addr.map(|addr| normalize_ip(addr.ip()))
    }
}

/// Unwrap IPv4-mapped IPv6 addresses to plain IPv4
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 => v4,
    }
}
