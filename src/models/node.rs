use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use super::IpVersion;
use crate::utils::u32_to_dotted;

/// BGP identity of a node, one address/network pair per IP version
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct BgpSpec {
    pub ipv4_address: Option<IpAddr>,
    pub ipv4_network: Option<IpNetwork>,
    pub ipv6_address: Option<IpAddr>,
    pub ipv6_network: Option<IpNetwork>,
    // Falls back to the global default AS when absent
    pub as_number: Option<u32>,
}

impl BgpSpec {
    pub fn address(&self, version: IpVersion) -> Option<IpAddr> {
        match version {
            IpVersion::V4 => self.ipv4_address,
            IpVersion::V6 => self.ipv6_address,
        }
    }

    pub fn network(&self, version: IpVersion) -> Option<IpNetwork> {
        match version {
            IpVersion::V4 => self.ipv4_network,
            IpVersion::V6 => self.ipv6_network,
        }
    }

    pub fn set(&mut self, version: IpVersion, address: Option<IpAddr>, network: Option<IpNetwork>) {
        match version {
            IpVersion::V4 => {
                self.ipv4_address = address;
                self.ipv4_network = network;
            }
            IpVersion::V6 => {
                self.ipv6_address = address;
                self.ipv6_network = network;
            }
        }
    }
}

/// Durable per-node record, keyed by `name`
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(default)]
    pub bgp: Option<BgpSpec>,
    #[serde(default)]
    pub tunnel_address: Option<Ipv4Addr>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl NodeConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bgp: None,
            tunnel_address: None,
            last_updated: None,
        }
    }

    pub fn address(&self, version: IpVersion) -> Option<IpAddr> {
        self.bgp.as_ref().and_then(|bgp| bgp.address(version))
    }

    pub fn network(&self, version: IpVersion) -> Option<IpNetwork> {
        self.bgp.as_ref().and_then(|bgp| bgp.network(version))
    }

    pub fn as_number(&self) -> Option<u32> {
        self.bgp.as_ref().and_then(|bgp| bgp.as_number)
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let show = |addr: Option<IpAddr>| addr.map(|a| a.to_string()).unwrap_or_default();
        write!(
            f,
            "<Node {} ipv4={} ipv6={} as={} tunnel={}>",
            self.name,
            show(self.address(IpVersion::V4)),
            show(self.address(IpVersion::V6)),
            self.as_number()
                .map(|asn| u32_to_dotted(asn, '.'))
                .unwrap_or_default(),
            show(self.tunnel_address.map(IpAddr::V4)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgp_spec_accessors() {
        let mut bgp = BgpSpec::default();
        let net: IpNetwork = "10.0.0.0/24".parse().unwrap();
        bgp.set(IpVersion::V4, Some("10.0.0.5".parse().unwrap()), Some(net));
        assert_eq!(bgp.address(IpVersion::V4), Some("10.0.0.5".parse().unwrap()));
        assert_eq!(bgp.network(IpVersion::V4), Some(net));
        assert_eq!(bgp.address(IpVersion::V6), None);

        let node = NodeConfig {
            bgp: Some(bgp),
            ..NodeConfig::new("node-a")
        };
        assert_eq!(node.address(IpVersion::V4), Some("10.0.0.5".parse().unwrap()));
        assert_eq!(NodeConfig::new("node-b").address(IpVersion::V4), None);
    }

    #[test]
    fn test_node_deserialize_defaults() {
        let node: NodeConfig = serde_json::from_str(r#"{"name": "node-a"}"#).unwrap();
        assert_eq!(node, NodeConfig::new("node-a"));
    }
}
