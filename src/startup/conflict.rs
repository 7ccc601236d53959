use std::fmt;
use std::net::IpAddr;

use crate::models::{IpVersion, NodeConfig};

#[derive(Clone, Debug, PartialEq)]
pub enum Conflict {
    /// Another node already advertises this IPv4 address
    DuplicateIpv4 {
        address: IpAddr,
        node: String,
        other: String,
    },
    DuplicateIpv6 {
        address: IpAddr,
        node: String,
        other: String,
    },
    /// The stored record for this node carries a different address
    SameNodeIpChanged {
        node: String,
        version: IpVersion,
        previous: IpAddr,
        current: Option<IpAddr>,
    },
}

impl Conflict {
    /// Duplicates abort startup, a changed address is only reported
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Conflict::SameNodeIpChanged { .. })
    }

    fn duplicate(version: IpVersion, address: IpAddr, node: &str, other: &str) -> Self {
        let (node, other) = (node.to_string(), other.to_string());
        match version {
            IpVersion::V4 => Conflict::DuplicateIpv4 {
                address,
                node,
                other,
            },
            IpVersion::V6 => Conflict::DuplicateIpv6 {
                address,
                node,
                other,
            },
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Conflict::*;
        match self {
            DuplicateIpv4 {
                address,
                node,
                other,
            }
            | DuplicateIpv6 {
                address,
                node,
                other,
            } => write!(
                f,
                "{} address {} of node {} is already in use by node {}",
                IpVersion::of(address),
                address,
                node,
                other
            ),
            SameNodeIpChanged {
                node,
                version,
                previous,
                current,
            } => write!(
                f,
                "{} address of node {} changed from {} to {}",
                version,
                node,
                previous,
                current
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string())
            ),
        }
    }
}

/// Compare a candidate node record against every stored node.
/// All conflicts are collected, in `nodes` order.
pub fn check(candidate: &NodeConfig, nodes: &[NodeConfig]) -> Vec<Conflict> {
    let mut conflicts: Vec<Conflict> = Vec::new();
    for node in nodes {
        for version in [IpVersion::V4, IpVersion::V6] {
            let current = candidate.address(version);
            let existing = match node.address(version) {
                Some(existing) => existing,
                None => continue,
            };
            if node.name == candidate.name {
                if current != Some(existing) {
                    conflicts.push(Conflict::SameNodeIpChanged {
                        node: node.name.clone(),
                        version,
                        previous: existing,
                        current,
                    });
                }
            } else if current == Some(existing) {
                conflicts.push(Conflict::duplicate(
                    version,
                    existing,
                    &candidate.name,
                    &node.name,
                ));
            }
        }
    }
    conflicts
}
