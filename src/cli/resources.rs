use std::fmt;

use ipnetwork::IpNetwork;

use super::display::{NodeRow, PoolRow};
use super::table::OutputTable;
use crate::datastore::{Datastore, DatastoreError};
use crate::models::{IpPool, NodeConfig};

/// Resource kinds calicoctl manages
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Node,
    IpPool,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResourceKind::Node => write!(f, "Node"),
            ResourceKind::IpPool => write!(f, "IPPool"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    Node(NodeConfig),
    IpPool(IpPool),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Node(_) => ResourceKind::Node,
            Resource::IpPool(_) => ResourceKind::IpPool,
        }
    }

    /// Create or replace
    pub async fn apply(self, store: &dyn Datastore) -> Result<Resource, DatastoreError> {
        match self {
            Resource::Node(node) => store.apply_node(node).await.map(Resource::Node),
            Resource::IpPool(pool) => store.apply_pool(pool).await.map(Resource::IpPool),
        }
    }
}

impl ResourceKind {
    pub async fn list(self, store: &dyn Datastore) -> Result<Vec<Resource>, DatastoreError> {
        let resources = match self {
            ResourceKind::Node => store
                .list_nodes()
                .await?
                .into_iter()
                .map(Resource::Node)
                .collect(),
            ResourceKind::IpPool => store
                .list_pools()
                .await?
                .into_iter()
                .map(Resource::IpPool)
                .collect(),
        };
        Ok(resources)
    }

    /// Delete by key (node name or pool CIDR)
    pub async fn delete(self, store: &dyn Datastore, key: &str) -> Result<Resource, DatastoreError> {
        match self {
            ResourceKind::Node => Err(DatastoreError::Unsupported(format!(
                "Node {} is owned by its host and can't be deleted here",
                key
            ))),
            ResourceKind::IpPool => {
                let cidr: IpNetwork = key
                    .parse()
                    .map_err(|_| DatastoreError::NotFound(format!("IP pool {}", key)))?;
                store.delete_pool(&cidr).await.map(Resource::IpPool)
            }
        }
    }
}

/// Print resources of one kind as a table, one row each
pub fn print_resources(kind: ResourceKind, resources: &[Resource]) {
    match kind {
        ResourceKind::Node => {
            let mut table = OutputTable::new();
            for resource in resources {
                if let Resource::Node(node) = resource {
                    table.add_row(&NodeRow(node));
                }
            }
            table.print();
        }
        ResourceKind::IpPool => {
            let mut table = OutputTable::new();
            for resource in resources {
                if let Resource::IpPool(pool) = resource {
                    table.add_row(&PoolRow(pool));
                }
            }
            table.print();
        }
    }
}
