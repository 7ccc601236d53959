use prettytable::{cell, row, Row};

use super::table::ToRow;
use crate::models::{IpPool, IpVersion, NodeConfig};
use crate::utils::{format_time_as_elapsed, maybe_string, u32_to_dotted, EMPTY_VALUE};

pub struct NodeRow<'a>(pub &'a NodeConfig);

impl ToRow for NodeRow<'_> {
    fn columns() -> Row {
        row!["Name", "IPv4", "IPv4 Network", "IPv6", "AS", "Tunnel", "Updated"]
    }

    fn to_row(&self) -> Row {
        let node = self.0;
        row![
            node.name,
            maybe_string(node.address(IpVersion::V4).as_ref()),
            maybe_string(node.network(IpVersion::V4).as_ref()),
            maybe_string(node.address(IpVersion::V6).as_ref()),
            node.as_number()
                .map(|asn| u32_to_dotted(asn, '.'))
                .unwrap_or_else(|| String::from(EMPTY_VALUE)),
            maybe_string(node.tunnel_address.as_ref()),
            node.last_updated
                .map(format_time_as_elapsed)
                .unwrap_or_else(|| String::from(EMPTY_VALUE)),
        ]
    }
}

pub struct PoolRow<'a>(pub &'a IpPool);

impl ToRow for PoolRow<'_> {
    fn columns() -> Row {
        row!["CIDR", "Version", "Overlay", "NAT Outgoing", "Disabled"]
    }

    fn to_row(&self) -> Row {
        let pool = self.0;
        row![
            pool.cidr,
            pool.version(),
            pool.overlay_enabled,
            pool.nat_outgoing,
            pool.disabled,
        ]
    }
}
