mod file;

use std::io::Result;
use std::path::PathBuf;
use std::time::Duration;

use ipnetwork::IpNetwork;

use crate::models::IpPool;

/// In-memory client configuration, defaults already applied
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub datastore_path: PathBuf,
    pub connect_attempts: u32,
    pub connect_interval: Duration,
    pub reach_timeout: Duration,
    pub env_file: Option<PathBuf>,
    pub default_ipv4_pool: IpNetwork,
    pub default_ipv6_pool: IpNetwork,
    pub default_pool_overlay: bool,
    pub default_pool_nat_outgoing: bool,
}

impl ClientConfig {
    /// Parse a TOML config file and return a ClientConfig
    pub fn from_file(path: &str) -> Result<Self> {
        let spec = file::ClientConfigSpec::from_file(path)?;
        Ok(Self::from_spec(spec))
    }

    fn from_spec(spec: file::ClientConfigSpec) -> Self {
        Self {
            datastore_path: spec.datastore_path,
            connect_attempts: spec.connect_attempts,
            connect_interval: Duration::from_secs(spec.connect_interval_secs),
            reach_timeout: Duration::from_millis(spec.reach_timeout_ms),
            env_file: spec.env_file,
            default_ipv4_pool: spec.default_ipv4_pool,
            default_ipv6_pool: spec.default_ipv6_pool,
            default_pool_overlay: spec.default_pool_overlay,
            default_pool_nat_outgoing: spec.default_pool_nat_outgoing,
        }
    }

    /// The pool created for `cidr` when no pool of its IP version exists yet
    pub fn default_pool(&self, cidr: IpNetwork) -> IpPool {
        let mut pool = IpPool::new(cidr);
        pool.nat_outgoing = self.default_pool_nat_outgoing;
        // Tunnels are IPv4 only
        pool.overlay_enabled = self.default_pool_overlay && cidr.is_ipv4();
        pool
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_spec(file::ClientConfigSpec::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_file() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/calicoctl.toml");
        let config = ClientConfig::from_file(path).unwrap();
        assert_eq!(config.connect_interval, Duration::from_secs(1));
        assert_eq!(config.reach_timeout, Duration::from_millis(500));
        assert_eq!(config.connect_attempts, 5);
    }

    #[test]
    fn test_default_pools() {
        let config = ClientConfig::default();
        let v4 = config.default_pool(config.default_ipv4_pool);
        assert_eq!(v4.cidr.to_string(), "192.168.0.0/16");
        assert!(v4.overlay_enabled);
        assert!(v4.nat_outgoing);
        let v6 = config.default_pool(config.default_ipv6_pool);
        assert_eq!(v6.cidr.to_string(), "fd80:24e2:f998:72d6::/64");
        assert!(!v6.overlay_enabled);
    }
}
