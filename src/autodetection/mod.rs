//! Host IP/network autodetection
//!
//! Interfaces are enumerated fresh on every call, addresses are classified by
//! version, and one of two strategies picks the address a node should advertise:
//! - [`filtered_enumeration`]: first global unicast address in enumeration order
//! - [`reach_destination`]: the local address the route table uses for a destination
//!
//! "Nothing found" is `Ok(None)`, distinct from a detection failure.

mod address;
mod filtered;
mod interfaces;
mod reach;

pub use address::{classify, Address};
pub use filtered::filtered_enumeration;
pub use interfaces::{
    find_address, list, list_interfaces, HostNetwork, Interface, InterfaceError, InterfaceFilter,
    RawInterface, SystemNetwork,
};
pub use reach::reach_destination;

#[cfg(test)]
pub(crate) use interfaces::testing;

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::str::FromStr;

use log::debug;

use crate::models::IpVersion;
use crate::utils::ParseError;

/// Virtual and container interfaces never used for the node address by default
pub const DEFAULT_INTERFACE_EXCLUDES: &[&str] = &[
    "^docker.*",
    "^cbr.*",
    "^dummy.*",
    "^virbr.*",
    "^lxcbr.*",
    "^veth.*",
    "^lo$",
    "^cali.*",
    "^tunl.*",
    "^flannel.*",
    "^kube-ipvs.*",
    "^cni.*",
    "^vxlan.calico.*",
];

/// An autodetected address and the interface it was found on
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    pub interface: String,
    pub address: Address,
}

#[derive(Debug)]
pub enum DetectionError {
    /// Interfaces could not be listed
    Interfaces(InterfaceError),
    /// The reach probe itself failed
    Reach {
        destination: String,
        error: io::Error,
    },
    /// The route table picked an address no interface reports
    NoMatch { version: IpVersion, address: IpAddr },
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DetectionError::*;
        match self {
            Interfaces(err) => write!(f, "{}", err),
            Reach { destination, error } => {
                write!(f, "Unable to reach {}: {}", destination, error)
            }
            NoMatch { version, address } => write!(
                f,
                "Autodetected {} address does not match any addresses found on local interfaces: {}",
                version, address
            ),
        }
    }
}

impl std::error::Error for DetectionError {}

impl From<InterfaceError> for DetectionError {
    fn from(error: InterfaceError) -> Self {
        DetectionError::Interfaces(error)
    }
}

/// How to pick a node address, e.g. "first-found", "interface=eth.*",
/// "skip-interface=eth1,eth2" or "can-reach=8.8.8.8"
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionMethod {
    FirstFound,
    Interface(Vec<String>),
    SkipInterface(Vec<String>),
    CanReach(String),
}

impl Default for DetectionMethod {
    fn default() -> Self {
        DetectionMethod::FirstFound
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DetectionMethod::*;
        match self {
            FirstFound => write!(f, "first-found"),
            Interface(patterns) => write!(f, "interface={}", patterns.join(",")),
            SkipInterface(patterns) => write!(f, "skip-interface={}", patterns.join(",")),
            CanReach(destination) => write!(f, "can-reach={}", destination),
        }
    }
}

impl FromStr for DetectionMethod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "first-found" {
            return Ok(DetectionMethod::FirstFound);
        }
        let (method, value) = match s.find('=') {
            Some(i) => (&s[..i], s[i + 1..].trim()),
            None => {
                return Err(ParseError::new(format!(
                    "Unsupported autodetection method: '{}'",
                    s
                )))
            }
        };
        if value.is_empty() {
            return Err(ParseError::new(format!("Missing value for '{}'", method)));
        }
        let patterns = || -> Result<Vec<String>, ParseError> {
            let patterns: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
            if patterns.is_empty() {
                return Err(ParseError::new(format!(
                    "No interface patterns in '{}'",
                    s
                )));
            }
            Ok(patterns)
        };
        match method {
            "interface" => Ok(DetectionMethod::Interface(patterns()?)),
            "skip-interface" => Ok(DetectionMethod::SkipInterface(patterns()?)),
            "can-reach" => Ok(DetectionMethod::CanReach(value.to_string())),
            _ => Err(ParseError::new(format!(
                "Unsupported autodetection method: '{}'",
                s
            ))),
        }
    }
}

/// Run the selected detection strategy for one IP version
pub async fn autodetect<H>(
    host: &H,
    method: &DetectionMethod,
    version: IpVersion,
) -> Result<Option<DetectionResult>, DetectionError>
where
    H: HostNetwork + ?Sized,
{
    debug!("Autodetecting {} address using {}", version, method);
    let none: &[String] = &[];
    let found = match method {
        DetectionMethod::FirstFound => {
            let excludes: Vec<String> = DEFAULT_INTERFACE_EXCLUDES
                .iter()
                .map(|p| p.to_string())
                .collect();
            filtered_enumeration(host, none, excludes.as_slice(), version)?
        }
        DetectionMethod::Interface(include) => {
            filtered_enumeration(host, include.as_slice(), none, version)?
        }
        DetectionMethod::SkipInterface(exclude) => {
            filtered_enumeration(host, none, exclude.as_slice(), version)?
        }
        DetectionMethod::CanReach(destination) => {
            Some(reach_destination(host, destination, version).await?)
        }
    };
    Ok(found)
}
