mod local;

pub use local::LocalDatastore;

use std::error;
use std::fmt;
use std::io;
use std::net::IpAddr;

use async_trait::async_trait;
use ipnetwork::IpNetwork;

use crate::models::{IpPool, NodeConfig};

/// Node, pool and IPAM storage shared by every node in the cluster.
/// Writes are last-writer-wins; no locks are held across calls.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Check the datastore is reachable
    async fn ping(&self) -> Result<(), DatastoreError>;

    async fn get_node(&self, name: &str) -> Result<Option<NodeConfig>, DatastoreError>;
    async fn list_nodes(&self) -> Result<Vec<NodeConfig>, DatastoreError>;
    /// Create or fully replace a node record
    async fn apply_node(&self, node: NodeConfig) -> Result<NodeConfig, DatastoreError>;

    async fn list_pools(&self) -> Result<Vec<IpPool>, DatastoreError>;
    /// Create or fully replace the pool with the same CIDR
    async fn apply_pool(&self, pool: IpPool) -> Result<IpPool, DatastoreError>;
    async fn delete_pool(&self, cidr: &IpNetwork) -> Result<IpPool, DatastoreError>;

    async fn get_global(&self, key: &str) -> Result<Option<String>, DatastoreError>;
    /// Set a cluster-wide value, failing with `AlreadyExists` if `key` is set
    async fn create_global(&self, key: &str, value: &str) -> Result<(), DatastoreError>;

    /// Claim up to `count` free addresses from `pools` on behalf of `handle`.
    /// Fewer (or zero) addresses are returned when the pools are exhausted.
    async fn allocate_addresses(
        &self,
        pools: &[IpNetwork],
        count: usize,
        handle: &str,
    ) -> Result<Vec<IpAddr>, DatastoreError>;
    /// Return addresses to their pools. Unallocated addresses are ignored.
    async fn release_addresses(&self, addresses: &[IpAddr]) -> Result<(), DatastoreError>;
}

#[derive(Debug)]
pub enum DatastoreError {
    /// Datastore can't be reached. [reason]
    Unavailable(String),
    /// Resource does not exist. [resource]
    NotFound(String),
    /// Create refused, resource is already set. [resource]
    AlreadyExists(String),
    /// Pool rejected on apply. [reason]
    InvalidPool(String),
    /// Operation not allowed for this resource. [reason]
    Unsupported(String),
    /// Stored data could not be (de)serialized
    Serialization(serde_json::Error),
    Io(io::Error),
}

impl fmt::Display for DatastoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Datastore Error: ")?;
        use DatastoreError::*;
        match self {
            Unavailable(r) => write!(f, "Unavailable [{}]", r)?,
            NotFound(r) => write!(f, "{} does not exist", r)?,
            AlreadyExists(r) => write!(f, "{} already exists", r)?,
            InvalidPool(r) => write!(f, "Invalid pool [{}]", r)?,
            Unsupported(r) => write!(f, "Unsupported [{}]", r)?,
            Serialization(err) => write!(f, "Bad stored data [{}]", err)?,
            Io(err) => write!(f, "{}", err)?,
        }
        Ok(())
    }
}

impl From<io::Error> for DatastoreError {
    fn from(error: io::Error) -> Self {
        DatastoreError::Io(error)
    }
}

impl From<serde_json::Error> for DatastoreError {
    fn from(error: serde_json::Error) -> Self {
        DatastoreError::Serialization(error)
    }
}

impl error::Error for DatastoreError {
    fn description(&self) -> &str {
        "Datastore Error"
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Wraps a `LocalDatastore`, recording IPAM calls and optionally
    /// failing pings a number of times before answering
    pub(crate) struct RecordingDatastore {
        pub(crate) inner: LocalDatastore,
        pub(crate) allocations: Mutex<Vec<(Vec<IpNetwork>, usize)>>,
        pub(crate) releases: Mutex<Vec<Vec<IpAddr>>>,
        pub(crate) failing_pings: AtomicUsize,
        pub(crate) failing_node_applies: AtomicUsize,
        pub(crate) pings: AtomicUsize,
    }

    impl RecordingDatastore {
        pub(crate) fn new() -> Self {
            Self {
                inner: LocalDatastore::in_memory(),
                allocations: Mutex::new(Vec::new()),
                releases: Mutex::new(Vec::new()),
                failing_pings: AtomicUsize::new(0),
                failing_node_applies: AtomicUsize::new(0),
                pings: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing_pings(self, count: usize) -> Self {
            self.failing_pings.store(count, Ordering::SeqCst);
            self
        }

        /// Fail the next `count` node writes
        pub(crate) fn fail_node_applies(&self, count: usize) {
            self.failing_node_applies.store(count, Ordering::SeqCst);
        }

        pub(crate) fn allocation_calls(&self) -> Vec<(Vec<IpNetwork>, usize)> {
            self.allocations.lock().unwrap().clone()
        }

        pub(crate) fn release_calls(&self) -> Vec<Vec<IpAddr>> {
            self.releases.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Datastore for RecordingDatastore {
        async fn ping(&self) -> Result<(), DatastoreError> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failing_pings.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_pings.store(remaining - 1, Ordering::SeqCst);
                return Err(DatastoreError::Unavailable("connection refused".to_string()));
            }
            self.inner.ping().await
        }

        async fn get_node(&self, name: &str) -> Result<Option<NodeConfig>, DatastoreError> {
            self.inner.get_node(name).await
        }

        async fn list_nodes(&self) -> Result<Vec<NodeConfig>, DatastoreError> {
            self.inner.list_nodes().await
        }

        async fn apply_node(&self, node: NodeConfig) -> Result<NodeConfig, DatastoreError> {
            let remaining = self.failing_node_applies.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_node_applies
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(DatastoreError::Unavailable("write timed out".to_string()));
            }
            self.inner.apply_node(node).await
        }

        async fn list_pools(&self) -> Result<Vec<IpPool>, DatastoreError> {
            self.inner.list_pools().await
        }

        async fn apply_pool(&self, pool: IpPool) -> Result<IpPool, DatastoreError> {
            self.inner.apply_pool(pool).await
        }

        async fn delete_pool(&self, cidr: &IpNetwork) -> Result<IpPool, DatastoreError> {
            self.inner.delete_pool(cidr).await
        }

        async fn get_global(&self, key: &str) -> Result<Option<String>, DatastoreError> {
            self.inner.get_global(key).await
        }

        async fn create_global(&self, key: &str, value: &str) -> Result<(), DatastoreError> {
            self.inner.create_global(key, value).await
        }

        async fn allocate_addresses(
            &self,
            pools: &[IpNetwork],
            count: usize,
            handle: &str,
        ) -> Result<Vec<IpAddr>, DatastoreError> {
            self.allocations
                .lock()
                .unwrap()
                .push((pools.to_vec(), count));
            self.inner.allocate_addresses(pools, count, handle).await
        }

        async fn release_addresses(&self, addresses: &[IpAddr]) -> Result<(), DatastoreError> {
            self.releases.lock().unwrap().push(addresses.to_vec());
            self.inner.release_addresses(addresses).await
        }
    }
}
