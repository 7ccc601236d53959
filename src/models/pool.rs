use std::fmt;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use super::IpVersion;

// Smallest pools the allocator accepts
const MAX_IPV4_PREFIX: u8 = 30;
const MAX_IPV6_PREFIX: u8 = 126;

/// An externally owned block of addresses that workloads and tunnels draw from
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct IpPool {
    pub cidr: IpNetwork,
    // IPIP/VXLAN encapsulation enabled for this pool
    #[serde(default)]
    pub overlay_enabled: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub nat_outgoing: bool,
}

impl IpPool {
    pub fn new(cidr: IpNetwork) -> Self {
        Self {
            cidr: normalize(cidr),
            overlay_enabled: false,
            disabled: false,
            nat_outgoing: false,
        }
    }

    pub fn version(&self) -> IpVersion {
        IpVersion::of_network(&self.cidr)
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.cidr.contains(addr)
    }

    /// Pools of the same version overlap when either contains the other's base address
    pub fn overlaps(&self, other: &IpPool) -> bool {
        self.cidr.contains(other.cidr.network()) || other.cidr.contains(self.cidr.network())
    }

    /// Is this pool usable as a source of tunnel addresses
    pub fn is_overlay_source(&self) -> bool {
        self.overlay_enabled && !self.disabled && self.version() == IpVersion::V4
    }

    pub fn validate(&self) -> Result<(), String> {
        let max_prefix = match self.version() {
            IpVersion::V4 => MAX_IPV4_PREFIX,
            IpVersion::V6 => MAX_IPV6_PREFIX,
        };
        if self.cidr.prefix() > max_prefix {
            return Err(format!(
                "{} pool {} is too small (prefix must be /{} or shorter)",
                self.version(),
                self.cidr,
                max_prefix
            ));
        }
        if self.cidr.ip() != self.cidr.network() {
            return Err(format!("{} has host bits set", self.cidr));
        }
        Ok(())
    }
}

/// Mask off any host bits, so "10.0.0.5/16" becomes "10.0.0.0/16"
pub(crate) fn normalize(cidr: IpNetwork) -> IpNetwork {
    IpNetwork::new(cidr.network(), cidr.prefix()).unwrap_or(cidr)
}

impl fmt::Display for IpPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<IpPool {} overlay={} nat={}{}>",
            self.cidr,
            self.overlay_enabled,
            self.nat_outgoing,
            if self.disabled { " disabled" } else { "" },
        )
    }
}
