//! Flow identification types.

use std::fmt;
use std::net::IpAddr;

/// The 4-tuple identifying a network flow as observed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    /// Source address of the captured segment
    pub src_addr: IpAddr,
    /// Source port
    pub src_port: u16,
    /// Destination address
    pub dst_addr: IpAddr,
    /// Destination port
    pub dst_port: u16,
}

impl FlowKey {
    /// Create a flow key from endpoint parts.
    pub fn new(src_addr: IpAddr, src_port: u16, dst_addr: IpAddr, dst_port: u16) -> Self {
        Self {
            src_addr,
            src_port,
            dst_addr,
            dst_port,
        }
    }

    /// The same flow seen from the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            src_addr: self.dst_addr,
            src_port: self.dst_port,
            dst_addr: self.src_addr,
            dst_port: self.src_port,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src_addr, self.src_port, self.dst_addr, self.dst_port
        )
    }
}

/// Direction of a segment relative to the fronted service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client toward the fronted service
    ClientToServer,
    /// Fronted service back toward the client
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => write!(f, "client->server"),
            Direction::ServerToClient => write!(f, "server->client"),
        }
    }
}

/// The address/port of the service whose traffic the proxy observes.
///
/// An unspecified address (`0.0.0.0` / `::`) matches any local address, so
/// classification falls back to the port alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Service address
    pub addr: IpAddr,
    /// Service port
    pub port: u16,
}

impl ServiceEndpoint {
    /// Create a service endpoint.
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    fn matches(&self, addr: IpAddr, port: u16) -> bool {
        port == self.port && (self.addr.is_unspecified() || addr == self.addr)
    }

    /// Classify a wire-order flow key against this endpoint.
    ///
    /// Returns `None` for traffic that involves neither side of the service;
    /// such segments are orphans and are counted, not logged.
    pub fn classify(&self, key: &FlowKey) -> Option<Direction> {
        if self.matches(key.dst_addr, key.dst_port) {
            Some(Direction::ClientToServer)
        } else if self.matches(key.src_addr, key.src_port) {
            Some(Direction::ServerToClient)
        } else {
            None
        }
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16) -> FlowKey {
        FlowKey::new(
            IpAddr::V4(Ipv4Addr::from(src)),
            sport,
            IpAddr::V4(Ipv4Addr::from(dst)),
            dport,
        )
    }

    #[test]
    fn test_reversed_swaps_endpoints() {
        let k = key([10, 0, 0, 1], 40000, [10, 0, 0, 2], 443);
        let r = k.reversed();
        assert_eq!(r.src_addr, k.dst_addr);
        assert_eq!(r.src_port, k.dst_port);
        assert_eq!(r.reversed(), k);
    }

    #[test]
    fn test_classify_both_directions() {
        let service = ServiceEndpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 443);

        let c2s = key([10, 0, 0, 1], 40000, [10, 0, 0, 2], 443);
        assert_eq!(service.classify(&c2s), Some(Direction::ClientToServer));

        let s2c = c2s.reversed();
        assert_eq!(service.classify(&s2c), Some(Direction::ServerToClient));
    }

    #[test]
    fn test_classify_orphan() {
        let service = ServiceEndpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 443);
        let other = key([10, 0, 0, 5], 40000, [10, 0, 0, 6], 80);
        assert_eq!(service.classify(&other), None);

        // Same port on an unrelated host is still an orphan
        let wrong_host = key([10, 0, 0, 5], 40000, [10, 0, 0, 6], 443);
        assert_eq!(service.classify(&wrong_host), None);
    }

    #[test]
    fn test_classify_unspecified_address_matches_port_only() {
        let service = ServiceEndpoint::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 443);
        let c2s = key([10, 0, 0, 1], 40000, [192, 168, 1, 9], 443);
        assert_eq!(service.classify(&c2s), Some(Direction::ClientToServer));
    }

    #[test]
    fn test_flow_key_display() {
        let k = key([10, 0, 0, 1], 40000, [10, 0, 0, 2], 443);
        assert_eq!(k.to_string(), "10.0.0.1:40000 -> 10.0.0.2:443");
    }

    #[test]
    fn test_flow_key_hash_equality() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(key([10, 0, 0, 1], 40000, [10, 0, 0, 2], 443));
        set.insert(key([10, 0, 0, 1], 40000, [10, 0, 0, 2], 443));
        set.insert(key([10, 0, 0, 1], 40001, [10, 0, 0, 2], 443));
        assert_eq!(set.len(), 2);
    }
}
