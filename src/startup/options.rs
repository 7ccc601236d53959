use std::fmt;
use std::io;
use std::path::PathBuf;

use log::debug;

use super::StartupError;
use crate::autodetection::{classify, Address, DetectionMethod};
use crate::models::IpVersion;

/// What the operator asked for one address family
#[derive(Clone, Debug, PartialEq)]
pub enum IpRequest {
    /// Nothing given: keep what is persisted (IPv4 autodetects if nothing is)
    Unspecified,
    Autodetect,
    /// Literal `address` or `address/prefix`
    Address(Address),
}

impl Default for IpRequest {
    fn default() -> Self {
        IpRequest::Unspecified
    }
}

impl IpRequest {
    pub fn parse(raw: Option<&str>, version: IpVersion) -> Result<Self, StartupError> {
        let raw = match raw.map(str::trim) {
            None | Some("") => return Ok(IpRequest::Unspecified),
            Some(raw) => raw,
        };
        if raw.eq_ignore_ascii_case("autodetect") {
            return Ok(IpRequest::Autodetect);
        }
        let address = classify(raw).map_err(|err| StartupError::InvalidAddress {
            version,
            value: raw.to_string(),
            reason: err.reason,
        })?;
        if address.version() != version {
            return Err(StartupError::InvalidAddress {
                version,
                value: raw.to_string(),
                reason: format!("not an {} address", version),
            });
        }
        Ok(IpRequest::Address(address))
    }
}

impl fmt::Display for IpRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpRequest::Unspecified => write!(f, "unspecified"),
            IpRequest::Autodetect => write!(f, "autodetect"),
            IpRequest::Address(address) => write!(f, "{}", address),
        }
    }
}

/// Validated inputs for one node startup
#[derive(Clone, Debug, Default)]
pub struct StartupOptions {
    pub name: String,
    pub ipv4: IpRequest,
    pub ipv6: IpRequest,
    // Raw AS value; an invalid one is ignored with a warning
    pub as_number: Option<String>,
    pub ipv4_method: DetectionMethod,
    pub ipv6_method: DetectionMethod,
    pub no_default_pools: bool,
    pub env_file: Option<PathBuf>,
}

impl StartupOptions {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn request(&self, version: IpVersion) -> &IpRequest {
        match version {
            IpVersion::V4 => &self.ipv4,
            IpVersion::V6 => &self.ipv6,
        }
    }

    pub fn method(&self, version: IpVersion) -> &DetectionMethod {
        match version {
            IpVersion::V4 => &self.ipv4_method,
            IpVersion::V6 => &self.ipv6_method,
        }
    }
}

/// Pick the node name: explicit NODENAME, then HOSTNAME, then the kernel hostname
pub fn resolve_node_name(
    nodename: Option<&str>,
    hostname: Option<&str>,
) -> Result<String, StartupError> {
    let explicit = [nodename, hostname]
        .iter()
        .flatten()
        .map(|name| name.trim())
        .find(|name| !name.is_empty());
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }
    let name = kernel_hostname().map_err(StartupError::NodeName)?;
    debug!("Using kernel hostname {} as node name", name);
    if name.is_empty() {
        return Err(StartupError::NodeName(io::Error::new(
            io::ErrorKind::NotFound,
            "empty hostname",
        )));
    }
    Ok(name)
}

fn kernel_hostname() -> io::Result<String> {
    gethostname::gethostname()
        .into_string()
        .map(|name| name.trim().to_string())
        .map_err(|raw| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("hostname {:?} is not valid UTF-8", raw),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip_request() {
        assert_eq!(IpRequest::parse(None, IpVersion::V4).unwrap(), IpRequest::Unspecified);
        assert_eq!(
            IpRequest::parse(Some("  "), IpVersion::V4).unwrap(),
            IpRequest::Unspecified
        );
        assert_eq!(
            IpRequest::parse(Some("AutoDetect"), IpVersion::V6).unwrap(),
            IpRequest::Autodetect
        );
        match IpRequest::parse(Some("10.0.0.5/24"), IpVersion::V4).unwrap() {
            IpRequest::Address(address) => {
                assert_eq!(address.ip.to_string(), "10.0.0.5");
                assert_eq!(address.network.unwrap().to_string(), "10.0.0.0/24");
            }
            other => panic!("Unexpected {:?}", other),
        }
        match IpRequest::parse(Some("2001:db8::5"), IpVersion::V6).unwrap() {
            IpRequest::Address(address) => assert_eq!(address.network, None),
            other => panic!("Unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_ip_request_invalid() {
        assert!(matches!(
            IpRequest::parse(Some("10.0.0.300"), IpVersion::V4),
            Err(StartupError::InvalidAddress { .. })
        ));
        // Wrong family
        assert!(matches!(
            IpRequest::parse(Some("2001:db8::5"), IpVersion::V4),
            Err(StartupError::InvalidAddress { .. })
        ));
        assert!(matches!(
            IpRequest::parse(Some("10.0.0.5/24"), IpVersion::V6),
            Err(StartupError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_resolve_node_name() {
        assert_eq!(
            resolve_node_name(Some("node-a"), Some("host-a")).unwrap(),
            "node-a"
        );
        assert_eq!(resolve_node_name(Some(" "), Some("host-a")).unwrap(), "host-a");
        assert!(!resolve_node_name(None, None).unwrap().is_empty());
    }

    #[test]
    fn test_options_accessors() {
        let mut options = StartupOptions::new("node-a");
        options.ipv6 = IpRequest::Autodetect;
        options.ipv4_method = DetectionMethod::CanReach("8.8.8.8".to_string());
        assert_eq!(options.request(IpVersion::V4), &IpRequest::Unspecified);
        assert_eq!(options.request(IpVersion::V6), &IpRequest::Autodetect);
        assert_eq!(options.method(IpVersion::V6), &DetectionMethod::FirstFound);
        assert_eq!(
            options.method(IpVersion::V4).to_string(),
            "can-reach=8.8.8.8"
        );
    }
}
