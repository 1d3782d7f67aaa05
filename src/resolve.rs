//! Hostname to IP address lookup

use crate::error::{Error, Result};
use std::net::{IpAddr, ToSocketAddrs};
use tracing::debug;

/// Resolve `hostname` to a single address.
///
/// Walks every address bound to the name in resolver order and returns
/// the first IPv4 address, or the first IPv6 address when `allow_ipv6`
/// is set and it comes before any IPv4 one. Returns `Ok(None)` if the
/// name only has addresses of a disallowed family.
///
/// # Errors
///
/// Returns [`Error::Resolve`] if the lookup itself fails.
pub fn resolve(hostname: &str, allow_ipv6: bool) -> Result<Option<IpAddr>> {
    let addresses = (hostname, 0)
        .to_socket_addrs()
        .map_err(|source| Error::Resolve {
            host: hostname.to_string(),
            source,
        })?;

    let found = addresses
        .map(|addr| addr.ip())
        .find(|ip| ip.is_ipv4() || (allow_ipv6 && ip.is_ipv6()));

    debug!("Resolved {} to {:?}", hostname, found);
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn ipv4_literal() {
        assert_eq!(
            resolve("127.0.0.1", false).unwrap(),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
    }

    #[test]
    fn ipv6_literal_needs_permission() {
        assert_eq!(resolve("::1", false).unwrap(), None);
        assert_eq!(
            resolve("::1", true).unwrap(),
            Some(IpAddr::V6(Ipv6Addr::LOCALHOST))
        );
    }

    #[test]
    fn localhost_without_ipv6_is_ipv4() {
        let ip = resolve("localhost", false).unwrap();
        assert!(ip.is_some_and(|ip| ip.is_ipv4()));
    }

    #[test]
    fn unknown_name_is_an_error() {
        let err = resolve("no-such-host.invalid", false).unwrap_err();
        assert!(matches!(err, Error::Resolve { host, .. } if host == "no-such-host.invalid"));
    }
}
