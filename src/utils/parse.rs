use std::error::Error;
use std::fmt;
use std::io;
use std::net::IpAddr;

#[derive(Debug)]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    pub fn new(reason: String) -> Self {
        ParseError { reason }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParseError: {}", self.reason)
    }
}

impl Error for ParseError {
    fn description(&self) -> &str {
        "Error parsing IP/ASN values"
    }
}

impl From<io::Error> for ParseError {
    fn from(error: io::Error) -> Self {
        ParseError::new(error.to_string())
    }
}

/// Convert an ASN string to a u32
/// E.g. "65000.100" -> 4259840100
pub fn asn_from_dotted(value: &str) -> std::result::Result<u32, ParseError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ParseError::new("Empty ASN".to_string()));
    }
    // Parse to list of u32, since we should support 4 byte ASN as a single int
    // (E.g. "4259840100")
    let mut chunks = [0; 2];
    let check_for_overflow = value.contains('.');
    // Iterate through chunks in reverse, so if there's no dot (only one number),
    // it will be in the least significant position
    for (i, chunk) in value
        .splitn(2, '.')
        .collect::<Vec<&str>>()
        .into_iter()
        .rev()
        .enumerate()
    {
        let chunk: u32 = chunk
            .parse()
            .map_err(|err| ParseError::new(format!("{} '{}'", err, value)))?;
        if check_for_overflow && chunk > std::u16::MAX as u32 {
            return Err(ParseError::new(format!("Unsupported ASN '{}'", value)));
        }
        chunks[i] = chunk;
    }
    Ok((chunks[1] << 16) + chunks[0])
}

/// An address routable beyond the local link/host
/// (not unspecified, loopback, link-local, multicast or broadcast)
pub fn is_global_unicast(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !(v6.is_unspecified() || v6.is_loopback() || v6.is_multicast() || link_local)
        }
    }
}
