//! Tunnel (IPIP) endpoint address for a node
//!
//! The node's `tunnel_address` is kept in step with the overlay-enabled pools:
//! no overlay pools means no tunnel address, otherwise the node holds exactly
//! one address drawn from a pool that is overlay-enabled right now.

use std::error;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::IpNetwork;
use log::{debug, info, warn};

use crate::datastore::{Datastore, DatastoreError};
use crate::models::NodeConfig;

/// What a reconciliation pass did to the node's tunnel address
#[derive(Clone, Debug, PartialEq)]
pub enum TunnelOutcome {
    Unchanged(Option<Ipv4Addr>),
    Assigned(Ipv4Addr),
    /// No overlay pools left, the held address was returned
    Released(Ipv4Addr),
    /// The held address was stale and replaced from a current pool
    Reassigned {
        previous: Ipv4Addr,
        current: Ipv4Addr,
    },
}

impl TunnelOutcome {
    /// Tunnel address the node holds after the pass
    pub fn address(&self) -> Option<Ipv4Addr> {
        match self {
            TunnelOutcome::Unchanged(address) => *address,
            TunnelOutcome::Assigned(address) => Some(*address),
            TunnelOutcome::Released(_) => None,
            TunnelOutcome::Reassigned { current, .. } => Some(*current),
        }
    }
}

impl fmt::Display for TunnelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use TunnelOutcome::*;
        match self {
            Unchanged(Some(address)) => write!(f, "Tunnel address {} unchanged", address),
            Unchanged(None) => write!(f, "No tunnel address required"),
            Assigned(address) => write!(f, "Assigned tunnel address {}", address),
            Released(address) => write!(f, "Released tunnel address {}", address),
            Reassigned { previous, current } => write!(
                f,
                "Replaced stale tunnel address {} with {}",
                previous, current
            ),
        }
    }
}

#[derive(Debug)]
pub enum TunnelError {
    /// Overlay pools exist but none had a free address
    PoolsExhausted(Vec<IpNetwork>),
    NodeNotFound(String),
    Datastore(DatastoreError),
}

impl TunnelError {
    /// Only exhaustion on a required allocation stops the node.
    /// Everything else may be retried by the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TunnelError::PoolsExhausted(_))
    }
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use TunnelError::*;
        match self {
            PoolsExhausted(pools) => {
                let pools: Vec<String> = pools.iter().map(|p| p.to_string()).collect();
                write!(
                    f,
                    "No tunnel address available in overlay pools [{}], add more pools or increase their size",
                    pools.join(", ")
                )
            }
            NodeNotFound(name) => write!(f, "Node {} does not exist", name),
            Datastore(err) => write!(f, "{}", err),
        }
    }
}

impl error::Error for TunnelError {}

impl From<DatastoreError> for TunnelError {
    fn from(error: DatastoreError) -> Self {
        TunnelError::Datastore(error)
    }
}

pub struct TunnelAllocator<'a> {
    store: &'a dyn Datastore,
}

impl<'a> TunnelAllocator<'a> {
    pub fn new(store: &'a dyn Datastore) -> Self {
        Self { store }
    }

    /// Bring the named node's tunnel address in line with the current pools.
    /// A second pass with no pool changes makes no allocate/release calls.
    pub async fn reconcile(&self, node_name: &str) -> Result<TunnelOutcome, TunnelError> {
        let mut node = self
            .store
            .get_node(node_name)
            .await?
            .ok_or_else(|| TunnelError::NodeNotFound(node_name.to_string()))?;
        let overlay: Vec<IpNetwork> = self
            .store
            .list_pools()
            .await?
            .into_iter()
            .filter(|pool| pool.is_overlay_source())
            .map(|pool| pool.cidr)
            .collect();
        debug!(
            "{} overlay pool(s) available for {}",
            overlay.len(),
            node_name
        );

        let held = match node.tunnel_address {
            None if overlay.is_empty() => return Ok(TunnelOutcome::Unchanged(None)),
            None => {
                let assigned = self.assign(&mut node, &overlay).await?;
                return Ok(TunnelOutcome::Assigned(assigned));
            }
            Some(held) => held,
        };
        if overlay.iter().any(|cidr| cidr.contains(IpAddr::V4(held))) {
            debug!("Tunnel address {} is still valid", held);
            return Ok(TunnelOutcome::Unchanged(Some(held)));
        }

        warn!(
            "Tunnel address {} of {} is not in any overlay pool, releasing",
            held, node_name
        );
        // Clear the record before releasing so it never names a free address
        node.tunnel_address = None;
        let mut node = self.store.apply_node(node).await?;
        self.store.release_addresses(&[IpAddr::V4(held)]).await?;
        if overlay.is_empty() {
            info!("Released tunnel address {} of {}", held, node_name);
            return Ok(TunnelOutcome::Released(held));
        }
        let current = self.assign(&mut node, &overlay).await?;
        Ok(TunnelOutcome::Reassigned {
            previous: held,
            current,
        })
    }

    async fn assign(
        &self,
        node: &mut NodeConfig,
        overlay: &[IpNetwork],
    ) -> Result<Ipv4Addr, TunnelError> {
        let handle = format!("ipip-tunnel-addr-{}", node.name);
        let addresses = self.store.allocate_addresses(overlay, 1, &handle).await?;
        let assigned = addresses
            .into_iter()
            .find_map(|address| match address {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| TunnelError::PoolsExhausted(overlay.to_vec()))?;
        node.tunnel_address = Some(assigned);
        if let Err(err) = self.store.apply_node(node.clone()).await {
            warn!(
                "Failed to record tunnel address {} for {}, releasing it",
                assigned, node.name
            );
            node.tunnel_address = None;
            let to_release = [IpAddr::V4(assigned)];
            let release = self.store.release_addresses(&to_release);
            if let Err(release_err) = release.await {
                warn!("Failed to release {}: {}", assigned, release_err);
            }
            return Err(err.into());
        }
        info!("Assigned tunnel address {} to {}", assigned, node.name);
        Ok(assigned)
    }
}
