use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;

use crate::models::IpVersion;
use crate::utils::{is_global_unicast, ParseError};

/// One address assigned to an interface. The IP is always set, the network
/// only when the OS reported a mask with it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub ip: IpAddr,
    pub network: Option<IpNetwork>,
}

impl Address {
    pub fn new(ip: IpAddr) -> Self {
        Self { ip, network: None }
    }

    pub fn version(&self) -> IpVersion {
        IpVersion::of(&self.ip)
    }

    pub fn is_global_unicast(&self) -> bool {
        is_global_unicast(&self.ip)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.network {
            Some(network) => write!(f, "{} ({})", self.ip, network),
            None => write!(f, "{}", self.ip),
        }
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        classify(s)
    }
}

/// Parse an address as reported by the OS or supplied by an operator.
/// "10.0.0.5/24" yields the IP plus its network (10.0.0.0/24),
/// a bare "10.0.0.5" yields the IP alone.
pub fn classify(raw: &str) -> Result<Address, ParseError> {
    let raw = raw.trim();
    if raw.contains('/') {
        let cidr: IpNetwork = raw
            .parse()
            .map_err(|err| ParseError::new(format!("{} '{}'", err, raw)))?;
        let network = IpNetwork::new(cidr.network(), cidr.prefix())
            .map_err(|err| ParseError::new(format!("{} '{}'", err, raw)))?;
        Ok(Address {
            ip: cidr.ip(),
            network: Some(network),
        })
    } else {
        let ip: IpAddr = raw
            .parse()
            .map_err(|err| ParseError::new(format!("{} '{}'", err, raw)))?;
        Ok(Address::new(ip))
    }
}
