// ── Network domain types ──

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::CoreError;

// ── Ipv4Net ─────────────────────────────────────────────────────────

/// An IPv4 prefix such as `192.168.218.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Net {
    addr: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Net {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, CoreError> {
        if prefix_len > 32 {
            return Err(CoreError::Validation {
                message: format!("IPv4 prefix length must be <= 32, got {prefix_len}"),
            });
        }
        Ok(Self { addr, prefix_len })
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    fn mask(&self) -> u32 {
        match self.prefix_len {
            0 => 0,
            len => u32::MAX << (32 - u32::from(len)),
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = self.mask();
        u32::from(self.addr) & mask == u32::from(ip) & mask
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// Parses `a.b.c.d/nn`; a bare address is taken as a `/32` host route.
impl FromStr for Ipv4Net {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, prefix) = s.split_once('/').unwrap_or((s, "32"));
        let addr = host
            .parse::<Ipv4Addr>()
            .map_err(|_| CoreError::Validation {
                message: format!("invalid IPv4 address '{host}'"),
            })?;
        let prefix_len = prefix.parse::<u8>().map_err(|_| CoreError::Validation {
            message: format!("invalid IPv4 prefix length '{prefix}'"),
        })?;
        Self::new(addr, prefix_len)
    }
}

impl TryFrom<String> for Ipv4Net {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Net> for String {
    fn from(net: Ipv4Net) -> Self {
        net.to_string()
    }
}

// ── Routes ──────────────────────────────────────────────────────────

/// Destination of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    Default,
    Prefix(Ipv4Net),
}

impl Destination {
    pub fn is_default(&self) -> bool {
        match self {
            Self::Default => true,
            Self::Prefix(net) => net.prefix_len() == 0,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Prefix(net) => write!(f, "{net}"),
        }
    }
}

/// One route as understood by the routing primitives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: Destination,
    pub gateway: Option<Ipv4Addr>,
    pub device: Option<String>,
    pub metric: Option<u32>,
}

impl RouteEntry {
    /// Default route via `gateway` over `device`.
    pub fn default_via(gateway: Ipv4Addr, device: impl Into<String>) -> Self {
        Self {
            destination: Destination::Default,
            gateway: Some(gateway),
            device: Some(device.into()),
            metric: None,
        }
    }

    /// Route for `net` via `gateway` over `device`.
    pub fn prefix_via(net: Ipv4Net, gateway: Ipv4Addr, device: impl Into<String>) -> Self {
        Self {
            destination: Destination::Prefix(net),
            gateway: Some(gateway),
            device: Some(device.into()),
            metric: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.destination.is_default()
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination)?;
        if let Some(gw) = self.gateway {
            write!(f, " via {gw}")?;
        }
        if let Some(ref dev) = self.device {
            write!(f, " dev {dev}")?;
        }
        if let Some(metric) = self.metric {
            write!(f, " metric {metric}")?;
        }
        Ok(())
    }
}

/// Source-address policy rule pointing into a routing table.
///
/// A `None` table matches any rule for the source, which is how the
/// generic rule left behind by other components is cleared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    pub source: Ipv4Addr,
    pub table: Option<String>,
}

impl PolicyRule {
    pub fn new(source: Ipv4Addr, table: impl Into<String>) -> Self {
        Self {
            source,
            table: Some(table.into()),
        }
    }

    pub fn any_table(source: Ipv4Addr) -> Self {
        Self {
            source,
            table: None,
        }
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.table {
            Some(ref table) => write!(f, "from {} lookup {table}", self.source),
            None => write!(f, "from {}", self.source),
        }
    }
}

/// Local/peer address pair of a point-to-point interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointToPoint {
    pub local: Ipv4Addr,
    pub peer: Ipv4Addr,
}

/// Pick the remote gateway among an interface's address pairs.
///
/// When several pairs are reported, the `.1` local address is the tunnel's
/// own side and is skipped: the first pair whose local address does not end
/// in `.1` is the client assignment and its peer is the remote gateway. A
/// lone pair is used as-is.
pub fn select_remote(pairs: &[PointToPoint]) -> Option<Ipv4Addr> {
    pairs
        .iter()
        .find(|pair| pair.local.octets()[3] != 1)
        .or_else(|| pairs.first())
        .map(|pair| pair.peer)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_net_parses_and_contains() {
        let net: Ipv4Net = "192.168.218.0/24".parse().unwrap();
        assert!(net.contains(Ipv4Addr::new(192, 168, 218, 40)));
        assert!(!net.contains(Ipv4Addr::new(192, 168, 219, 40)));
        assert_eq!(net.to_string(), "192.168.218.0/24");
    }

    #[test]
    fn ipv4_net_bare_address_is_host_route() {
        let net: Ipv4Net = "10.1.2.3".parse().unwrap();
        assert_eq!(net.prefix_len(), 32);
        assert!(net.contains(Ipv4Addr::new(10, 1, 2, 3)));
        assert!(!net.contains(Ipv4Addr::new(10, 1, 2, 4)));
    }

    #[test]
    fn ipv4_net_zero_prefix_contains_everything() {
        let net: Ipv4Net = "0.0.0.0/0".parse().unwrap();
        assert!(net.contains(Ipv4Addr::new(8, 8, 8, 8)));
        assert!(Destination::Prefix(net).is_default());
    }

    #[test]
    fn ipv4_net_rejects_bad_input() {
        assert!("192.168.1.0/40".parse::<Ipv4Net>().is_err());
        assert!("192.168.1/24".parse::<Ipv4Net>().is_err());
        assert!("192.168.1.0/x".parse::<Ipv4Net>().is_err());
    }

    #[test]
    fn select_remote_skips_dot_one_local() {
        let pairs = [
            PointToPoint {
                local: Ipv4Addr::new(10, 8, 0, 1),
                peer: Ipv4Addr::new(10, 8, 0, 2),
            },
            PointToPoint {
                local: Ipv4Addr::new(10, 8, 0, 6),
                peer: Ipv4Addr::new(10, 8, 0, 5),
            },
        ];
        assert_eq!(select_remote(&pairs), Some(Ipv4Addr::new(10, 8, 0, 5)));
    }

    #[test]
    fn select_remote_uses_lone_pair() {
        let pairs = [PointToPoint {
            local: Ipv4Addr::new(10, 0, 0, 1),
            peer: Ipv4Addr::new(10, 0, 0, 5),
        }];
        assert_eq!(select_remote(&pairs), Some(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn select_remote_none_without_pairs() {
        assert_eq!(select_remote(&[]), None);
    }

    #[test]
    fn route_entry_display() {
        let route = RouteEntry::default_via(Ipv4Addr::new(10, 0, 0, 5), "tun_abc");
        assert_eq!(route.to_string(), "default via 10.0.0.5 dev tun_abc");
        assert!(route.is_default());
    }
}
