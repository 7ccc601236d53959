use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use ipnetwork::IpNetwork;
use serde::Deserialize;

pub(super) struct Defaults {}

impl Defaults {
    pub(super) fn datastore_path() -> PathBuf {
        PathBuf::from("/var/lib/calico/datastore.json")
    }

    pub(super) fn connect_attempts() -> u32 {
        10
    }

    pub(super) fn connect_interval_secs() -> u64 {
        1
    }

    pub(super) fn reach_timeout_ms() -> u64 {
        2000
    }

    pub(super) fn default_ipv4_pool() -> IpNetwork {
        "192.168.0.0/16".parse().expect("valid default IPv4 pool")
    }

    pub(super) fn default_ipv6_pool() -> IpNetwork {
        "fd80:24e2:f998:72d6::/64"
            .parse()
            .expect("valid default IPv6 pool")
    }

    fn enabled() -> bool {
        true
    }
}

/// Config (toml) representation of the client config
#[derive(Clone, Debug, Deserialize)]
pub(super) struct ClientConfigSpec {
    // Local datastore file shared by calicoctl and node startup
    #[serde(default = "Defaults::datastore_path")]
    pub(super) datastore_path: PathBuf,

    // Readiness check before node startup
    #[serde(default = "Defaults::connect_attempts")]
    pub(super) connect_attempts: u32,
    #[serde(default = "Defaults::connect_interval_secs")]
    pub(super) connect_interval_secs: u64,

    // Bound on the can-reach autodetection probe
    #[serde(default = "Defaults::reach_timeout_ms")]
    pub(super) reach_timeout_ms: u64,

    // Where to write CALICO_IP/CALICO_IP6/NODENAME after startup
    pub(super) env_file: Option<PathBuf>,

    // Pools created on first startup (unless NO_DEFAULT_POOLS is set)
    #[serde(default = "Defaults::default_ipv4_pool")]
    pub(super) default_ipv4_pool: IpNetwork,
    #[serde(default = "Defaults::default_ipv6_pool")]
    pub(super) default_ipv6_pool: IpNetwork,
    #[serde(default = "Defaults::enabled")]
    pub(super) default_pool_overlay: bool,
    #[serde(default = "Defaults::enabled")]
    pub(super) default_pool_nat_outgoing: bool,
}

impl ClientConfigSpec {
    pub(super) fn from_file(path: &str) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_str(&contents)
    }

    pub(super) fn from_str(contents: &str) -> io::Result<Self> {
        toml::from_str(contents).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

impl Default for ClientConfigSpec {
    fn default() -> Self {
        Self {
            datastore_path: Defaults::datastore_path(),
            connect_attempts: Defaults::connect_attempts(),
            connect_interval_secs: Defaults::connect_interval_secs(),
            reach_timeout_ms: Defaults::reach_timeout_ms(),
            env_file: None,
            default_ipv4_pool: Defaults::default_ipv4_pool(),
            default_ipv6_pool: Defaults::default_ipv6_pool(),
            default_pool_overlay: Defaults::enabled(),
            default_pool_nat_outgoing: Defaults::enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/calicoctl.toml");
        let config = ClientConfigSpec::from_file(path).unwrap();
        assert_eq!(
            config.datastore_path,
            PathBuf::from("/tmp/calico/datastore.json")
        );
        assert_eq!(config.connect_attempts, 5);
        // Not in the file, defaulted
        assert_eq!(config.connect_interval_secs, 1);
        assert_eq!(config.reach_timeout_ms, 500);
        assert_eq!(config.env_file, Some(PathBuf::from("/tmp/calico/startup.env")));
        assert_eq!(config.default_ipv4_pool.to_string(), "10.244.0.0/16");
        assert_eq!(config.default_ipv6_pool, Defaults::default_ipv6_pool());
        assert!(!config.default_pool_overlay);
        assert!(config.default_pool_nat_outgoing);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ClientConfigSpec::from_str("").unwrap();
        let defaults = ClientConfigSpec::default();
        assert_eq!(config.datastore_path, defaults.datastore_path);
        assert_eq!(config.connect_attempts, 10);
        assert_eq!(config.default_ipv4_pool.to_string(), "192.168.0.0/16");
        assert!(config.default_pool_overlay);
    }

    #[test]
    fn test_invalid_config() {
        let err = ClientConfigSpec::from_str("connect_attempts = \"many\"").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(ClientConfigSpec::from_file("/nonexistent/calicoctl.toml").is_err());
    }
}
