//! CIDR parsing, canonical formatting and overlap tests

use std::net::IpAddr;

use ipnet::IpNet;

use super::RouteError;

/// Normalise a CIDR string.
///
/// A bare address becomes a host route: `/128` for IPv6, `/32` otherwise.
/// Parseable input is rewritten to its canonical network form (host bits
/// masked off); anything else is returned unchanged so the caller's parse
/// reports the original text.
pub fn format_cidr(cidr: &str) -> String {
    let cidr = if cidr.contains('/') {
        cidr.to_string()
    } else {
        match cidr.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("{}/128", cidr),
            _ => format!("{}/32", cidr),
        }
    };

    match cidr.parse::<IpNet>() {
        Ok(net) => net.trunc().to_string(),
        Err(_) => cidr,
    }
}

/// Strictly parse a CIDR (prefix length required)
pub fn parse_cidr(cidr: &str) -> Result<IpNet, RouteError> {
    cidr.parse::<IpNet>().map_err(|e| RouteError::InvalidCidr {
        cidr: cidr.to_string(),
        reason: e.to_string(),
    })
}

/// Whether either network contains the other.
///
/// For CIDR blocks any intersection implies containment, so this is also
/// the intersection test. Networks of different families never overlap.
pub fn overlaps(a: &IpNet, b: &IpNet) -> bool {
    a.contains(b) || b.contains(a)
}
