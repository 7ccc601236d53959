//! Node startup: wait for the datastore, reconcile this node's record,
//! refuse duplicate addresses, persist, then settle pools, the cluster GUID
//! and the tunnel address.
//!
//! Fatal problems come back as [`StartupError`], everything else is logged
//! and collected as [`Warning`]s on the [`StartupReport`].

mod conflict;
mod options;
mod reconcile;

pub use conflict::{check, Conflict};
pub use options::{resolve_node_name, IpRequest, StartupOptions};
pub use reconcile::{Reconciled, Reconciler};

use std::error;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use itertools::Itertools;
use log::{debug, info, trace, warn};
use tokio::time::sleep;
use uuid::Uuid;

use crate::autodetection::{DetectionError, HostNetwork};
use crate::config::ClientConfig;
use crate::datastore::{Datastore, DatastoreError};
use crate::models::{IpPool, IpVersion, NodeConfig};
use crate::tunnel::{TunnelAllocator, TunnelError, TunnelOutcome};
use crate::utils::ParseError;

/// Startup must not continue
#[derive(Debug)]
pub enum StartupError {
    InvalidAddress {
        version: IpVersion,
        value: String,
        reason: String,
    },
    InvalidMethod(ParseError),
    NodeName(io::Error),
    NoIpv4Address,
    Detection(DetectionError),
    /// Fatal conflicts only
    Conflicts(Vec<Conflict>),
    DatastoreUnavailable { attempts: u32, reason: String },
    Datastore(DatastoreError),
    Tunnel(TunnelError),
    EnvFile(io::Error),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use StartupError::*;
        match self {
            InvalidAddress {
                version,
                value,
                reason,
            } => write!(f, "Invalid {} address '{}': {}", version, value, reason),
            InvalidMethod(err) => write!(f, "Invalid autodetection method: {}", err),
            NodeName(err) => write!(f, "Unable to determine node name: {}", err),
            NoIpv4Address => write!(
                f,
                "Couldn't autodetect an IPv4 address. Set IP to a valid address or change the autodetection method"
            ),
            Detection(err) => write!(f, "{}", err),
            Conflicts(conflicts) => write!(f, "{}", conflicts.iter().join("; ")),
            DatastoreUnavailable { attempts, reason } => write!(
                f,
                "Datastore not ready after {} attempt(s): {}",
                attempts, reason
            ),
            Datastore(err) => write!(f, "{}", err),
            Tunnel(err) => write!(f, "{}", err),
            EnvFile(err) => write!(f, "Unable to write environment file: {}", err),
        }
    }
}

impl error::Error for StartupError {}

impl From<DatastoreError> for StartupError {
    fn from(error: DatastoreError) -> Self {
        StartupError::Datastore(error)
    }
}

impl From<DetectionError> for StartupError {
    fn from(error: DetectionError) -> Self {
        StartupError::Detection(error)
    }
}

impl From<TunnelError> for StartupError {
    fn from(error: TunnelError) -> Self {
        StartupError::Tunnel(error)
    }
}

/// Reported, startup carries on
#[derive(Clone, Debug, PartialEq)]
pub enum Warning {
    AddressNotOnHost { version: IpVersion, address: IpAddr },
    /// Interfaces could not be listed to look the address up
    InterfaceLookup { address: IpAddr, reason: String },
    Ipv6Autodetection(String),
    InvalidAsNumber { value: String, reason: String },
    Conflict(Conflict),
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Warning::*;
        match self {
            AddressNotOnHost { version, address } => write!(
                f,
                "Could not confirm {} address {} is assigned to this host",
                version, address
            ),
            InterfaceLookup { address, reason } => write!(
                f,
                "Could not check interfaces for {}: {}",
                address, reason
            ),
            Ipv6Autodetection(reason) => write!(f, "IPv6 autodetection failed: {}", reason),
            InvalidAsNumber { value, reason } => {
                write!(f, "Ignored invalid AS number '{}': {}", value, reason)
            }
            Warning::Conflict(conflict) => write!(f, "{}", conflict),
        }
    }
}

/// Result of a successful startup
#[derive(Debug)]
pub struct StartupReport {
    pub node: NodeConfig,
    pub warnings: Vec<Warning>,
    pub tunnel: TunnelOutcome,
    pub created_pools: Vec<IpPool>,
    pub cluster_guid: String,
}

/// Ping the datastore until it answers, sleeping `interval` between attempts
pub async fn wait_for_datastore(
    store: &dyn Datastore,
    attempts: u32,
    interval: Duration,
) -> Result<(), StartupError> {
    let attempts = attempts.max(1);
    let mut reason = String::new();
    for attempt in 1..=attempts {
        match store.ping().await {
            Ok(()) => {
                debug!("Datastore ready after {} attempt(s)", attempt);
                return Ok(());
            }
            Err(err) => {
                warn!("Datastore not ready ({}/{}): {}", attempt, attempts, err);
                reason = err.to_string();
            }
        }
        if attempt < attempts {
            sleep(interval).await;
        }
    }
    Err(StartupError::DatastoreUnavailable { attempts, reason })
}

/// Create the default pools for any IP version that has none yet.
/// IPv6 only gets a default pool when the node has an IPv6 address.
pub async fn ensure_default_pools(
    store: &dyn Datastore,
    config: &ClientConfig,
    node: &NodeConfig,
) -> Result<Vec<IpPool>, DatastoreError> {
    let existing = store.list_pools().await?;
    let has_pool = |version: IpVersion| existing.iter().any(|p| p.version() == version);
    let mut wanted: Vec<IpPool> = Vec::new();
    if !has_pool(IpVersion::V4) {
        wanted.push(config.default_pool(config.default_ipv4_pool));
    }
    if node.address(IpVersion::V6).is_some() && !has_pool(IpVersion::V6) {
        wanted.push(config.default_pool(config.default_ipv6_pool));
    }
    let mut created: Vec<IpPool> = Vec::with_capacity(wanted.len());
    for pool in wanted {
        info!("Creating default {}", pool);
        created.push(store.apply_pool(pool).await?);
    }
    Ok(created)
}

/// Global config key holding the cluster's unique id
pub const CLUSTER_GUID_KEY: &str = "ClusterGUID";

/// Set a cluster GUID if none exists yet and return the one in effect
pub async fn ensure_cluster_guid(store: &dyn Datastore) -> Result<String, DatastoreError> {
    let guid = Uuid::new_v4().simple().to_string();
    match store.create_global(CLUSTER_GUID_KEY, &guid).await {
        Ok(()) => {
            info!("Assigned cluster GUID {}", guid);
            Ok(guid)
        }
        Err(DatastoreError::AlreadyExists(_)) => {
            let existing = store.get_global(CLUSTER_GUID_KEY).await?.ok_or_else(|| {
                DatastoreError::NotFound(format!("Global config {}", CLUSTER_GUID_KEY))
            })?;
            info!("Using previously configured cluster GUID {}", existing);
            Ok(existing)
        }
        Err(err) => Err(err),
    }
}

/// Write CALICO_IP, CALICO_IP6 and NODENAME for processes started after us
pub async fn write_env_file(path: &Path, node: &NodeConfig) -> io::Result<()> {
    let show = |version: IpVersion| {
        node.address(version)
            .map(|a| a.to_string())
            .unwrap_or_default()
    };
    let contents = format!(
        "CALICO_IP={}\nCALICO_IP6={}\nNODENAME={}\n",
        show(IpVersion::V4),
        show(IpVersion::V6),
        node.name
    );
    tokio::fs::write(path, contents).await?;
    trace!("Wrote environment file {}", path.display());
    Ok(())
}

/// One node startup run against a datastore and a host network stack
pub struct NodeStartup<'a> {
    store: &'a dyn Datastore,
    host: &'a dyn HostNetwork,
    config: &'a ClientConfig,
}

impl<'a> NodeStartup<'a> {
    pub fn new(
        store: &'a dyn Datastore,
        host: &'a dyn HostNetwork,
        config: &'a ClientConfig,
    ) -> Self {
        Self {
            store,
            host,
            config,
        }
    }

    pub async fn run(&self, options: &StartupOptions) -> Result<StartupReport, StartupError> {
        wait_for_datastore(
            self.store,
            self.config.connect_attempts,
            self.config.connect_interval,
        )
        .await?;

        let persisted = self.store.get_node(&options.name).await?;
        match &persisted {
            Some(node) => debug!("Found existing {}", node),
            None => info!("Creating new node {}", options.name),
        }
        let Reconciled { node, mut warnings } = Reconciler::new(self.host, options)
            .reconcile(persisted.as_ref())
            .await?;

        let nodes = self.store.list_nodes().await?;
        let (fatal, reported): (Vec<Conflict>, Vec<Conflict>) =
            check(&node, &nodes).into_iter().partition(|c| c.is_fatal());
        for conflict in reported {
            warn!("{}", conflict);
            warnings.push(Warning::Conflict(conflict));
        }
        if !fatal.is_empty() {
            return Err(StartupError::Conflicts(fatal));
        }

        let mut node = self.store.apply_node(node).await?;
        info!("Saved {}", node);

        let created_pools = if options.no_default_pools {
            debug!("Skipping default pool creation");
            vec![]
        } else {
            ensure_default_pools(self.store, self.config, &node).await?
        };
        let cluster_guid = ensure_cluster_guid(self.store).await?;

        let tunnel = TunnelAllocator::new(self.store)
            .reconcile(&node.name)
            .await?;
        info!("{}", tunnel);
        node.tunnel_address = tunnel.address();

        if let Some(path) = options.env_file.as_ref().or(self.config.env_file.as_ref()) {
            write_env_file(path, &node)
                .await
                .map_err(StartupError::EnvFile)?;
        }

        Ok(StartupReport {
            node,
            warnings,
            tunnel,
            created_pools,
            cluster_guid,
        })
    }
}
