use log::{debug, info};

use super::interfaces::{list_interfaces, HostNetwork, InterfaceFilter};
use super::{DetectionError, DetectionResult};
use crate::models::IpVersion;

/// Detect the interface address the host uses to reach `destination`.
///
/// The local address picked by the route table must also show up in the
/// interface listing, otherwise the two views of the network stack disagree
/// and a `NoMatch` error is returned.
pub async fn reach_destination<H>(
    host: &H,
    destination: &str,
    version: IpVersion,
) -> Result<DetectionResult, DetectionError>
where
    H: HostNetwork + ?Sized,
{
    debug!("Auto-detecting {} CIDR by reaching {}", version, destination);
    let local = host
        .route_source(destination, version)
        .await
        .map_err(|error| DetectionError::Reach {
            destination: destination.to_string(),
            error,
        })?;
    info!("Auto-detected address {} by connecting to {}", local, destination);

    let interfaces = list_interfaces(host, &InterfaceFilter::all(), version)?;
    for iface in interfaces {
        debug!("Checking interface {} CIDRs", iface.name);
        if let Some(address) = iface.addresses.iter().find(|a| a.ip == local) {
            info!("Found matching interface address {} on {}", address, iface.name);
            return Ok(DetectionResult {
                interface: iface.name.clone(),
                address: *address,
            });
        }
    }
    Err(DetectionError::NoMatch {
        version,
        address: local,
    })
}
