use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use easymesh_types::TransportError;
use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;

/// Turn a connection target into a dialable multiaddr.
///
/// Accepts a multiaddr (`/ip4/10.0.0.1/tcp/3000`), a socket address
/// (`10.0.0.1:3000`, `[::1]:3000`) or a `host:port` pair, which is resolved
/// with the system resolver.
pub fn parse_target(addr: &str) -> Result<Multiaddr, TransportError> {
    let invalid = |reason: String| TransportError::InvalidAddress {
        addr: addr.to_string(),
        reason,
    };

    if addr.starts_with('/') {
        return addr.parse::<Multiaddr>().map_err(|e| invalid(e.to_string()));
    }

    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return Ok(socket_multiaddr(socket));
    }

    let mut resolved = addr
        .to_socket_addrs()
        .map_err(|e| invalid(e.to_string()))?;
    resolved
        .next()
        .map(socket_multiaddr)
        .ok_or_else(|| invalid("no addresses found".to_string()))
}

/// Multiaddr to listen on for a host/port pair.
pub fn listen_multiaddr(host: &str, port: u16) -> Result<Multiaddr, TransportError> {
    let ip = host
        .parse::<IpAddr>()
        .map_err(|e| TransportError::InvalidAddress {
            addr: format!("{}:{}", host, port),
            reason: e.to_string(),
        })?;
    Ok(socket_multiaddr(SocketAddr::new(ip, port)))
}

fn socket_multiaddr(socket: SocketAddr) -> Multiaddr {
    let ip = match socket.ip() {
        IpAddr::V4(v4) => Protocol::Ip4(v4),
        IpAddr::V6(v6) => Protocol::Ip6(v6),
    };
    Multiaddr::empty()
        .with(ip)
        .with(Protocol::Tcp(socket.port()))
}
