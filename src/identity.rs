//! Client identity resolution from proxy headers and the transport address.

use std::net::IpAddr;

/// Identity used when nothing at all is known about the caller.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Derive a client identity from proxy headers and the remote address.
///
/// Precedence is fixed: the first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the transport-level address, then [`UNKNOWN_IDENTITY`]. Header values
/// that are empty after trimming are treated as absent rather than producing
/// an empty identity.
pub fn resolve_identity(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    remote_addr: Option<IpAddr>,
) -> String {
    if let Some(forwarded) = forwarded_for {
        let first_hop = forwarded.split(',').next().unwrap_or("").trim();
        if !first_hop.is_empty() {
            return first_hop.to_string();
        }
    }

    if let Some(real) = real_ip {
        let real = real.trim();
        if !real.is_empty() {
            return real.to_string();
        }
    }

    match remote_addr {
        Some(addr) => addr.to_string(),
        None => UNKNOWN_IDENTITY.to_string(),
    }
}
