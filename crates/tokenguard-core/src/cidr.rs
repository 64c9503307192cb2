//! CIDR parsing and validation
//!
//! Networks are parsed strictly: the address must be the network address of
//! its prefix, so `192.168.1.0/24` is accepted while `192.168.1.5/24` is not.
//! Parsed networks are kept in canonical form, which is what gets stored and
//! compared.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::error::{GuardError, Result};

/// Sentinel range that admits every IPv4 address
pub const OPEN_IPV4: &str = "0.0.0.0/0";

/// Sentinel range that admits every IPv6 address
pub const OPEN_IPV6: &str = "::/0";

/// The two sentinel ranges that together make up the open policy
pub fn open_ranges() -> [IpNet; 2] {
    [IpNet::V4(Ipv4Net::default()), IpNet::V6(Ipv6Net::default())]
}

/// Check whether a network is one of the sentinel open ranges
pub fn is_open_sentinel(net: &IpNet) -> bool {
    net.prefix_len() == 0
}

/// Check whether text is a valid IPv4 or IPv6 network in CIDR notation
pub fn validate_cidr(text: &str) -> bool {
    parse_cidr(text).is_ok()
}

/// Parse a CIDR string into its canonical network
///
/// IPv4 is tried first, then IPv6.
pub fn parse_cidr(text: &str) -> Result<IpNet> {
    let trimmed = text.trim();

    if let Ok(net) = Ipv4Net::from_str(trimmed) {
        if net.addr() != net.network() {
            return Err(GuardError::InvalidCidr(text.to_string()));
        }
        return Ok(IpNet::V4(net));
    }

    match Ipv6Net::from_str(trimmed) {
        Ok(net) if net.addr() == net.network() => Ok(IpNet::V6(net)),
        _ => Err(GuardError::InvalidCidr(text.to_string())),
    }
}

/// Parse a source address, folding IPv4-mapped IPv6 addresses to IPv4
pub fn parse_address(text: &str) -> Result<IpAddr> {
    IpAddr::from_str(text.trim())
        .map(|addr| addr.to_canonical())
        .map_err(|_| GuardError::InvalidAddress(text.to_string()))
}
