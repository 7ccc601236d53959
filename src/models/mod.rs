mod node;
mod pool;

pub use node::{BgpSpec, NodeConfig};
pub use pool::IpPool;

use std::fmt;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    pub fn of_network(network: &IpNetwork) -> Self {
        match network {
            IpNetwork::V4(_) => IpVersion::V4,
            IpNetwork::V6(_) => IpVersion::V6,
        }
    }

    pub fn matches(self, addr: &IpAddr) -> bool {
        IpVersion::of(addr) == self
    }

    /// Numeric version, as used in log lines and env var names
    pub fn number(self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IPv{}", self.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_version() {
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(IpVersion::of(&v4), IpVersion::V4);
        assert_eq!(IpVersion::of(&v6), IpVersion::V6);
        assert!(IpVersion::V6.matches(&v6));
        assert!(!IpVersion::V4.matches(&v6));
        let net: IpNetwork = "fd80:24e2:f998:72d6::/64".parse().unwrap();
        assert_eq!(IpVersion::of_network(&net), IpVersion::V6);
        assert_eq!(IpVersion::V4.to_string(), "IPv4");
    }
}
