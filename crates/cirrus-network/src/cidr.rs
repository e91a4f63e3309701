//! IPv4 CIDR helpers

use crate::error::{NetworkError, Result};
use ipnet::Ipv4Net;

/// Parse an IPv4 CIDR, rejecting blocks with host bits set
pub fn parse_cidr(input: &str) -> Result<Ipv4Net> {
    let cidr: Ipv4Net = input
        .trim()
        .parse()
        .map_err(|_| NetworkError::InvalidCidr(input.to_string()))?;
    if cidr != cidr.trunc() {
        return Err(NetworkError::InvalidCidr(format!(
            "{} (did you mean {}?)",
            input,
            cidr.trunc()
        )));
    }
    Ok(cidr)
}

/// Whether two blocks share at least one address. Containment counts.
pub fn overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network())
        || a.contains(&b.broadcast())
        || b.contains(&a.network())
        || b.contains(&a.broadcast())
}

/// Whether `inner` lies entirely inside `outer`
pub fn is_within(inner: &Ipv4Net, outer: &Ipv4Net) -> bool {
    outer.contains(&inner.network()) && outer.contains(&inner.broadcast())
}
