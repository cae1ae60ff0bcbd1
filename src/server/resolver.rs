use crate::protocol::types::Address;
use crate::utils::error::{Result, RustSocksError};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tracing::instrument;

/// Resolve a SOCKS5 address into a list of socket addresses, preferring IPv6 entries first.
#[instrument(level = "debug", fields(port = port, address = ?address))]
pub async fn resolve_address(address: &Address, port: u16) -> Result<Vec<SocketAddr>> {
    let mut targets = match address {
        Address::IPv4(octets) => {
            let ip = IpAddr::V4(Ipv4Addr::from(*octets));
            vec![SocketAddr::new(ip, port)]
        }
        Address::IPv6(octets) => {
            let ip = IpAddr::V6(Ipv6Addr::from(*octets));
            vec![SocketAddr::new(ip, port)]
        }
        Address::Domain(domain) => {
            let lookup = tokio::net::lookup_host((domain.as_str(), port))
                .await
                .map_err(RustSocksError::Io)?;
            lookup.collect()
        }
    };

    // Prefer IPv6, then IPv4, while preserving order inside each category.
    targets.sort_by_key(|addr| match addr.ip() {
        IpAddr::V6(_) => 0,
        IpAddr::V4(_) => 1,
    });

    if targets.is_empty() {
        return Err(RustSocksError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "no addresses found for destination",
        )));
    }

    Ok(targets)
}
