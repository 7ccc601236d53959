use std::net::IpAddr;

use chrono::Utc;
use ipnetwork::IpNetwork;
use log::{debug, info, warn};

use super::options::{IpRequest, StartupOptions};
use super::{StartupError, Warning};
use crate::autodetection::{autodetect, find_address, HostNetwork};
use crate::models::{BgpSpec, IpVersion, NodeConfig};
use crate::utils::asn_from_dotted;

type Resolved = (Option<IpAddr>, Option<IpNetwork>);

/// A fully resolved node record, ready to be written as one update
#[derive(Debug)]
pub struct Reconciled {
    pub node: NodeConfig,
    pub warnings: Vec<Warning>,
}

/// Merges explicit options, the persisted record and autodetection into
/// the node's BGP identity. Precedence per field: option, persisted, detected.
pub struct Reconciler<'a, H: HostNetwork + ?Sized> {
    host: &'a H,
    options: &'a StartupOptions,
}

impl<'a, H> Reconciler<'a, H>
where
    H: HostNetwork + ?Sized,
{
    pub fn new(host: &'a H, options: &'a StartupOptions) -> Self {
        Self { host, options }
    }

    pub async fn reconcile(
        &self,
        persisted: Option<&NodeConfig>,
    ) -> Result<Reconciled, StartupError> {
        let mut warnings: Vec<Warning> = Vec::new();
        let mut node = persisted
            .cloned()
            .unwrap_or_else(|| NodeConfig::new(&self.options.name));
        let mut bgp = node.bgp.take().unwrap_or_default();

        for version in [IpVersion::V4, IpVersion::V6] {
            let (address, network) = self.resolve(version, &bgp, &mut warnings).await?;
            bgp.set(version, address, network);
        }
        bgp.as_number = self.resolve_as_number(bgp.as_number, &mut warnings);

        node.bgp = Some(bgp);
        node.last_updated = Some(Utc::now());
        debug!("Reconciled {}", node);
        Ok(Reconciled { node, warnings })
    }

    async fn resolve(
        &self,
        version: IpVersion,
        persisted: &BgpSpec,
        warnings: &mut Vec<Warning>,
    ) -> Result<Resolved, StartupError> {
        let current = (persisted.address(version), persisted.network(version));
        match self.options.request(version) {
            IpRequest::Autodetect => self.detect(version, current, warnings).await,
            IpRequest::Unspecified if version == IpVersion::V4 && current.0.is_none() => {
                self.detect(version, current, warnings).await
            }
            IpRequest::Unspecified => {
                debug!("Keeping persisted {} {:?}", version, current.0);
                Ok(current)
            }
            IpRequest::Address(address) => {
                if address.network.is_some() {
                    return Ok((Some(address.ip), address.network));
                }
                Ok((Some(address.ip), self.network_on_host(address.ip, warnings)))
            }
        }
    }

    async fn detect(
        &self,
        version: IpVersion,
        current: Resolved,
        warnings: &mut Vec<Warning>,
    ) -> Result<Resolved, StartupError> {
        let method = self.options.method(version);
        match (autodetect(self.host, method, version).await, version) {
            (Ok(Some(found)), _) => {
                info!(
                    "Using autodetected {} address {} on interface {}",
                    version, found.address, found.interface
                );
                Ok((Some(found.address.ip), found.address.network))
            }
            (Ok(None), IpVersion::V4) => Err(StartupError::NoIpv4Address),
            (Err(err), IpVersion::V4) => Err(StartupError::Detection(err)),
            (Ok(None), IpVersion::V6) => {
                let reason = format!("no valid IPv6 address found using {}", method);
                warn!("Couldn't autodetect IPv6 address: {}", reason);
                warnings.push(Warning::Ipv6Autodetection(reason));
                Ok(current)
            }
            (Err(err), IpVersion::V6) => {
                warn!("Couldn't autodetect IPv6 address: {}", err);
                warnings.push(Warning::Ipv6Autodetection(err.to_string()));
                Ok(current)
            }
        }
    }

    /// Look up the network of an explicitly configured address on the local interfaces
    fn network_on_host(&self, ip: IpAddr, warnings: &mut Vec<Warning>) -> Option<IpNetwork> {
        match find_address(self.host, ip) {
            Ok(Some((interface, address))) => {
                debug!("Found {} on interface {}", address, interface);
                address.network
            }
            Ok(None) => {
                warn!("Unable to confirm {} is assigned to this host", ip);
                warnings.push(Warning::AddressNotOnHost {
                    version: IpVersion::of(&ip),
                    address: ip,
                });
                None
            }
            Err(err) => {
                warn!("Unable to list interfaces to find {}: {}", ip, err);
                warnings.push(Warning::InterfaceLookup {
                    address: ip,
                    reason: err.to_string(),
                });
                None
            }
        }
    }

    fn resolve_as_number(&self, persisted: Option<u32>, warnings: &mut Vec<Warning>) -> Option<u32> {
        let raw = match self.options.as_number.as_deref().map(str::trim) {
            None | Some("") => return persisted,
            Some(raw) => raw,
        };
        match asn_from_dotted(raw) {
            Ok(asn) => Some(asn),
            Err(err) => {
                warn!("Ignoring AS number '{}': {}", raw, err);
                warnings.push(Warning::InvalidAsNumber {
                    value: raw.to_string(),
                    reason: err.reason,
                });
                persisted
            }
        }
    }
}
