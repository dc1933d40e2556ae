//! `SubnetCidrMask` — an `(address, prefix-length, family)` tuple whose
//! equality and hash are defined over the network portion only. Built on
//! `ipnetwork::IpNetwork`, the same crate the scanner side uses for CIDR
//! iteration.

use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

/// A CIDR prefix. `PartialEq`/`Hash` compare the masked network address and
/// prefix length, not the exact address bits an operator may have typed
/// (e.g. `10.0.0.5/24` and `10.0.0.0/24` are the same subnet).
#[derive(Debug, Clone, Copy)]
pub struct SubnetCidrMask(IpNetwork);

impl SubnetCidrMask {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Self {
        let network = match addr {
            IpAddr::V4(v4) => {
                let clamped = prefix_len.min(32);
                IpNetwork::V4(Ipv4Network::new(v4, clamped).unwrap())
            }
            IpAddr::V6(v6) => {
                let clamped = prefix_len.min(128);
                IpNetwork::V6(Ipv6Network::new(v6, clamped).unwrap())
            }
        };
        Self(network.network_network())
    }

    pub fn family(&self) -> Family {
        match self.0 {
            IpNetwork::V4(_) => Family::V4,
            IpNetwork::V6(_) => Family::V6,
        }
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix()
    }

    pub fn network(&self) -> IpAddr {
        self.0.network()
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.0, addr) {
            (IpNetwork::V4(_), IpAddr::V4(_)) | (IpNetwork::V6(_), IpAddr::V6(_)) => {
                self.0.contains(*addr)
            }
            _ => false,
        }
    }

    /// Parse `"10.0.0.0/24"` / `"2001:db8::/32"`.
    pub fn parse(s: &str) -> Result<Self, SubnetParseError> {
        let network: IpNetwork = s.parse().map_err(|_| SubnetParseError(s.to_string()))?;
        Ok(Self(network.network_network()))
    }
}

/// `ipnetwork` preserves the host bits an operator typed; re-derive the
/// network from the address+prefix so equality and the Patricia trie only
/// ever see masked addresses.
trait NetworkNetwork {
    fn network_network(self) -> IpNetwork;
}

impl NetworkNetwork for IpNetwork {
    fn network_network(self) -> IpNetwork {
        match self {
            IpNetwork::V4(v4) => IpNetwork::V4(Ipv4Network::new(v4.network(), v4.prefix()).unwrap()),
            IpNetwork::V6(v6) => IpNetwork::V6(Ipv6Network::new(v6.network(), v6.prefix()).unwrap()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetParseError(pub String);

impl std::fmt::Display for SubnetParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid CIDR literal: {}", self.0)
    }
}

impl std::error::Error for SubnetParseError {}

impl PartialEq for SubnetCidrMask {
    fn eq(&self, other: &Self) -> bool {
        self.prefix_len() == other.prefix_len() && self.network() == other.network()
    }
}

impl Eq for SubnetCidrMask {}

impl Hash for SubnetCidrMask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.prefix_len().hash(state);
        self.network().hash(state);
    }
}
