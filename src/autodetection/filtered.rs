use log::{debug, info};

use super::interfaces::{list, HostNetwork, InterfaceError};
use super::DetectionResult;
use crate::models::IpVersion;

/// Enumerate interfaces passing the include/exclude filters and pick the first
/// global unicast address that has a network. Failing that, the first global
/// unicast address seen at all. `None` when nothing qualifies.
///
/// First-found wins in OS enumeration order, which is not guaranteed
/// to be stable across reboots.
pub fn filtered_enumeration<H, S>(
    host: &H,
    include: &[S],
    exclude: &[S],
    version: IpVersion,
) -> Result<Option<DetectionResult>, InterfaceError>
where
    H: HostNetwork + ?Sized,
    S: AsRef<str>,
{
    let interfaces = list(host, include, exclude, version)?;
    let mut fallback: Option<DetectionResult> = None;
    for iface in &interfaces {
        debug!("Check interface {}", iface.name);
        for address in &iface.addresses {
            debug!("Check address {}", address);
            if !address.is_global_unicast() {
                continue;
            }
            let found = DetectionResult {
                interface: iface.name.clone(),
                address: *address,
            };
            if address.network.is_some() {
                info!("Using {} address {} from {}", version, address, iface.name);
                return Ok(Some(found));
            }
            if fallback.is_none() {
                fallback = Some(found);
            }
        }
    }
    if let Some(found) = &fallback {
        info!(
            "Using {} address {} from {} (no network found)",
            version, found.address, found.interface
        );
    }
    Ok(fallback)
}
