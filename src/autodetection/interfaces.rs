use std::ffi::CStr;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

use super::address::{classify, Address};
use crate::models::IpVersion;

// Port used for the connectionless reach probe, no traffic is ever sent
const REACH_PORT: u16 = 80;

/// Interface as reported by the OS: a name plus unparsed address strings
#[derive(Clone, Debug, PartialEq)]
pub struct RawInterface {
    pub name: String,
    pub addresses: Vec<String>,
}

impl RawInterface {
    pub fn new(name: &str, addresses: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Host interface with addresses of a single IP version, in OS order
#[derive(Clone, Debug, PartialEq)]
pub struct Interface {
    pub name: String,
    pub addresses: Vec<Address>,
}

/// The host networking stack, as seen by autodetection
#[async_trait]
pub trait HostNetwork: Send + Sync {
    /// All interfaces with their addresses, in OS-reported order
    fn raw_interfaces(&self) -> io::Result<Vec<RawInterface>>;

    /// Local address the route table picks when reaching `destination`
    async fn route_source(&self, destination: &str, version: IpVersion) -> io::Result<IpAddr>;
}

#[derive(Debug)]
pub enum InterfaceError {
    /// Listing the host interfaces failed
    Enumeration(io::Error),
    /// An include/exclude pattern is not a valid regex
    InvalidPattern(regex::Error),
}

impl fmt::Display for InterfaceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InterfaceError::Enumeration(err) => write!(f, "Interfaces unavailable: {}", err),
            InterfaceError::InvalidPattern(err) => write!(f, "Invalid interface pattern: {}", err),
        }
    }
}

impl std::error::Error for InterfaceError {}

impl From<io::Error> for InterfaceError {
    fn from(error: io::Error) -> Self {
        InterfaceError::Enumeration(error)
    }
}

impl From<regex::Error> for InterfaceError {
    fn from(error: regex::Error) -> Self {
        InterfaceError::InvalidPattern(error)
    }
}

/// Include/exclude name patterns, each set joined into a single regex
#[derive(Debug)]
pub struct InterfaceFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl InterfaceFilter {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self, InterfaceError> {
        Ok(Self {
            include: join_patterns(include)?,
            exclude: join_patterns(exclude)?,
        })
    }

    /// Matches all interfaces
    pub fn all() -> Self {
        Self {
            include: None,
            exclude: None,
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        let include = self.include.as_ref().map_or(true, |re| re.is_match(name));
        let exclude = self.exclude.as_ref().map_or(false, |re| re.is_match(name));
        include && !exclude
    }
}

fn join_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Option<Regex>, InterfaceError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let joined = patterns
        .iter()
        .map(|p| format!("({})", p.as_ref()))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Some(Regex::new(&joined)?))
}

/// List host interfaces passing `filter`, keeping only addresses of `version`.
/// Unparseable addresses are skipped; interfaces left with no addresses are still returned.
pub fn list_interfaces<H>(
    host: &H,
    filter: &InterfaceFilter,
    version: IpVersion,
) -> Result<Vec<Interface>, InterfaceError>
where
    H: HostNetwork + ?Sized,
{
    let raw_interfaces = host.raw_interfaces().map_err(|err| {
        warn!("Interfaces unavailable: {}", err);
        InterfaceError::Enumeration(err)
    })?;
    let interfaces = raw_interfaces
        .into_iter()
        .filter(|raw| filter.allows(&raw.name))
        .map(|raw| {
            debug!("Query addresses of interface {}", raw.name);
            let addresses = raw
                .addresses
                .iter()
                .filter_map(|addr| match classify(addr) {
                    Ok(address) => Some(address),
                    Err(err) => {
                        warn!("Unable to parse address on {}: {}", raw.name, err);
                        None
                    }
                })
                .filter(|address| address.version() == version)
                .collect();
            Interface {
                name: raw.name,
                addresses,
            }
        })
        .collect();
    Ok(interfaces)
}

/// Compile `include`/`exclude` and list matching interfaces
pub fn list<H, S>(
    host: &H,
    include: &[S],
    exclude: &[S],
    version: IpVersion,
) -> Result<Vec<Interface>, InterfaceError>
where
    H: HostNetwork + ?Sized,
    S: AsRef<str>,
{
    list_interfaces(host, &InterfaceFilter::new(include, exclude)?, version)
}

/// Find which interface (if any) has `ip` assigned
pub fn find_address<H>(host: &H, ip: IpAddr) -> Result<Option<(String, Address)>, InterfaceError>
where
    H: HostNetwork + ?Sized,
{
    let interfaces = list_interfaces(host, &InterfaceFilter::all(), IpVersion::of(&ip))?;
    Ok(interfaces.into_iter().find_map(|iface| {
        iface
            .addresses
            .iter()
            .find(|address| address.ip == ip)
            .map(|address| (iface.name.clone(), *address))
    }))
}

/// The real host network stack: getifaddrs(3) and UDP sockets
pub struct SystemNetwork {
    reach_timeout: Duration,
}

impl SystemNetwork {
    pub fn new(reach_timeout: Duration) -> Self {
        Self { reach_timeout }
    }
}

#[async_trait]
impl HostNetwork for SystemNetwork {
    fn raw_interfaces(&self) -> io::Result<Vec<RawInterface>> {
        let mut interfaces: Vec<RawInterface> = Vec::new();
        unsafe {
            let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
            if libc::getifaddrs(&mut ifaddrs) != 0 {
                return Err(io::Error::last_os_error());
            }

            let mut current = ifaddrs;
            while !current.is_null() {
                let ifa = &*current;
                current = ifa.ifa_next;

                let name = match CStr::from_ptr(ifa.ifa_name).to_str() {
                    Ok(s) => s.to_string(),
                    Err(_) => continue,
                };
                // Each address is its own entry, group them under one interface
                let index = match interfaces.iter().position(|i| i.name == name) {
                    Some(index) => index,
                    None => {
                        interfaces.push(RawInterface {
                            name,
                            addresses: Vec::new(),
                        });
                        interfaces.len() - 1
                    }
                };
                if let Some(ip) = sockaddr_ip(ifa.ifa_addr) {
                    let raw = match sockaddr_ip(ifa.ifa_netmask) {
                        Some(mask) => format!("{}/{}", ip, prefix_len(mask)),
                        None => ip.to_string(),
                    };
                    interfaces[index].addresses.push(raw);
                }
            }

            libc::freeifaddrs(ifaddrs);
        }
        Ok(interfaces)
    }

    async fn route_source(&self, destination: &str, version: IpVersion) -> io::Result<IpAddr> {
        let host = destination.trim_start_matches('[').trim_end_matches(']');
        let target = lookup_host((host, REACH_PORT))
            .await?
            .find(|addr| version.matches(&addr.ip()))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} has no {} address", destination, version),
                )
            })?;
        let bind: SocketAddr = match version {
            IpVersion::V4 => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpVersion::V6 => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind).await?;
        timeout(self.reach_timeout, socket.connect(target))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("Timed out reaching {}", destination),
                )
            })??;
        let local = socket.local_addr()?.ip();
        info!("Reaching {} uses local address {}", destination, local);
        Ok(local)
    }
}

unsafe fn sockaddr_ip(addr: *const libc::sockaddr) -> Option<IpAddr> {
    if addr.is_null() {
        return None;
    }
    match (*addr).sa_family as i32 {
        libc::AF_INET => {
            let sa = addr as *const libc::sockaddr_in;
            Some(IpAddr::V4(Ipv4Addr::from(u32::from_be((*sa).sin_addr.s_addr))))
        }
        libc::AF_INET6 => {
            let sa = addr as *const libc::sockaddr_in6;
            Some(IpAddr::V6(Ipv6Addr::from((*sa).sin6_addr.s6_addr)))
        }
        _ => None,
    }
}

fn prefix_len(mask: IpAddr) -> u32 {
    match mask {
        IpAddr::V4(v4) => u32::from(v4).count_ones(),
        IpAddr::V6(v6) => u128::from(v6).count_ones(),
    }
}
