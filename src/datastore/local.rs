use std::collections::{BTreeMap, HashSet};
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use fs2::FileExt;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task;

use super::{Datastore, DatastoreError};
use crate::models::{IpPool, NodeConfig};

/// An address claimed from a pool, tagged with who claimed it
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
struct Allocation {
    address: IpAddr,
    handle: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct State {
    #[serde(default)]
    nodes: BTreeMap<String, NodeConfig>,
    #[serde(default)]
    pools: Vec<IpPool>,
    #[serde(default)]
    allocations: Vec<Allocation>,
    #[serde(default)]
    globals: BTreeMap<String, String>,
}

impl State {
    fn allocated(&self) -> HashSet<IpAddr> {
        self.allocations.iter().map(|a| a.address).collect()
    }
}

/// Single-file JSON datastore (or purely in-memory when no path is given).
///
/// Every operation holds an exclusive lock on a `<file>.lock` sibling while it
/// reloads, mutates and persists the file, so handles in separate processes
/// never interleave a read-modify-write. Writes go to a temporary file that is
/// renamed over the datastore, so readers never see a partial file.
pub struct LocalDatastore {
    path: Option<PathBuf>,
    state: Mutex<State>,
}

/// Held for the duration of one operation; unlocked on drop
struct FileLock(std::fs::File);

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.0) {
            warn!("Failed to unlock datastore: {}", err);
        }
    }
}

impl LocalDatastore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(State::default()),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            state: Mutex::new(State::default()),
        }
    }

    /// Take the in-process lock, then the file lock, then reload
    async fn begin(&self) -> Result<(MutexGuard<'_, State>, Option<FileLock>), DatastoreError> {
        let mut state = self.state.lock().await;
        let lock = match &self.path {
            Some(path) => Some(lock_file(sibling(path, "lock")).await?),
            None => None,
        };
        self.load(&mut state).await?;
        Ok((state, lock))
    }

    async fn load(&self, state: &mut State) -> Result<(), DatastoreError> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        match fs::read(path).await {
            Ok(contents) if contents.is_empty() => *state = State::default(),
            Ok(contents) => *state = serde_json::from_slice(&contents)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                trace!("No datastore at {}, starting empty", path.display());
                *state = State::default();
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    async fn persist(&self, state: &State) -> Result<(), DatastoreError> {
        if let Some(path) = &self.path {
            let contents = serde_json::to_vec_pretty(state)?;
            let temp_path = sibling(path, "tmp");
            fs::write(&temp_path, contents).await?;
            fs::rename(&temp_path, path).await?;
            trace!("Wrote datastore to {}", path.display());
        }
        Ok(())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

async fn lock_file(path: PathBuf) -> Result<FileLock, DatastoreError> {
    let file = task::spawn_blocking(move || -> io::Result<std::fs::File> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive()?;
        Ok(file)
    })
    .await
    .map_err(|err| io::Error::new(io::ErrorKind::Other, err))??;
    Ok(FileLock(file))
}

#[async_trait]
impl Datastore for LocalDatastore {
    async fn ping(&self) -> Result<(), DatastoreError> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        match fs::metadata(parent).await {
            Ok(meta) if meta.is_dir() => self.begin().await.map(|_| ()),
            Ok(_) => Err(DatastoreError::Unavailable(format!(
                "{} is not a directory",
                parent.display()
            ))),
            Err(err) => Err(DatastoreError::Unavailable(format!(
                "{}: {}",
                parent.display(),
                err
            ))),
        }
    }

    async fn get_node(&self, name: &str) -> Result<Option<NodeConfig>, DatastoreError> {
        let (state, _lock) = self.begin().await?;
        Ok(state.nodes.get(name).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeConfig>, DatastoreError> {
        let (state, _lock) = self.begin().await?;
        Ok(state.nodes.values().cloned().collect())
    }

    async fn apply_node(&self, node: NodeConfig) -> Result<NodeConfig, DatastoreError> {
        let (mut state, _lock) = self.begin().await?;
        debug!("Applying {}", node);
        state.nodes.insert(node.name.clone(), node.clone());
        self.persist(&state).await?;
        Ok(node)
    }

    async fn list_pools(&self) -> Result<Vec<IpPool>, DatastoreError> {
        let (state, _lock) = self.begin().await?;
        Ok(state.pools.clone())
    }

    async fn apply_pool(&self, pool: IpPool) -> Result<IpPool, DatastoreError> {
        pool.validate().map_err(DatastoreError::InvalidPool)?;
        let (mut state, _lock) = self.begin().await?;
        if let Some(existing) = state
            .pools
            .iter()
            .find(|p| p.cidr != pool.cidr && p.overlaps(&pool))
        {
            return Err(DatastoreError::InvalidPool(format!(
                "{} overlaps with existing pool {}",
                pool.cidr, existing.cidr
            )));
        }
        debug!("Applying {}", pool);
        match state.pools.iter_mut().find(|p| p.cidr == pool.cidr) {
            Some(existing) => *existing = pool.clone(),
            None => state.pools.push(pool.clone()),
        }
        self.persist(&state).await?;
        Ok(pool)
    }

    async fn delete_pool(&self, cidr: &IpNetwork) -> Result<IpPool, DatastoreError> {
        let (mut state, _lock) = self.begin().await?;
        let index = state
            .pools
            .iter()
            .position(|p| &p.cidr == cidr)
            .ok_or_else(|| DatastoreError::NotFound(format!("IP pool {}", cidr)))?;
        let removed = state.pools.remove(index);
        self.persist(&state).await?;
        Ok(removed)
    }

    async fn get_global(&self, key: &str) -> Result<Option<String>, DatastoreError> {
        let (state, _lock) = self.begin().await?;
        Ok(state.globals.get(key).cloned())
    }

    async fn create_global(&self, key: &str, value: &str) -> Result<(), DatastoreError> {
        let (mut state, _lock) = self.begin().await?;
        if state.globals.contains_key(key) {
            return Err(DatastoreError::AlreadyExists(format!("Global config {}", key)));
        }
        debug!("Setting global {}={}", key, value);
        state.globals.insert(key.to_string(), value.to_string());
        self.persist(&state).await?;
        Ok(())
    }

    async fn allocate_addresses(
        &self,
        pools: &[IpNetwork],
        count: usize,
        handle: &str,
    ) -> Result<Vec<IpAddr>, DatastoreError> {
        let (mut state, _lock) = self.begin().await?;
        for cidr in pools {
            if !state.pools.iter().any(|p| &p.cidr == cidr) {
                return Err(DatastoreError::NotFound(format!("IP pool {}", cidr)));
            }
        }

        let allocated = state.allocated();
        let mut assigned: Vec<IpAddr> = Vec::with_capacity(count);
        for cidr in pools {
            if assigned.len() == count {
                break;
            }
            let wanted = count - assigned.len();
            let free = host_addresses(cidr).filter(|addr| !allocated.contains(addr));
            assigned.extend(free.take(wanted));
        }
        if assigned.len() < count {
            warn!(
                "Only {} of {} addresses available for {}",
                assigned.len(),
                count,
                handle
            );
        }
        for address in &assigned {
            debug!("Allocated {} to {}", address, handle);
            state.allocations.push(Allocation {
                address: *address,
                handle: handle.to_string(),
            });
        }
        if !assigned.is_empty() {
            self.persist(&state).await?;
        }
        Ok(assigned)
    }

    async fn release_addresses(&self, addresses: &[IpAddr]) -> Result<(), DatastoreError> {
        let (mut state, _lock) = self.begin().await?;
        let before = state.allocations.len();
        state
            .allocations
            .retain(|allocation| !addresses.contains(&allocation.address));
        if state.allocations.len() != before {
            debug!("Released {} address(es)", before - state.allocations.len());
            self.persist(&state).await?;
        } else {
            trace!("Nothing to release for {:?}", addresses);
        }
        Ok(())
    }
}

/// Usable addresses of a pool in ascending order. IPv4 pools larger than
/// a /31 skip the network and broadcast addresses.
fn host_addresses(cidr: &IpNetwork) -> Box<dyn Iterator<Item = IpAddr> + Send> {
    match cidr {
        IpNetwork::V4(net) => {
            let (network, broadcast) = (net.network(), net.broadcast());
            let skip_edges = net.prefix() < 31;
            Box::new(
                net.iter()
                    .filter(move |a| !skip_edges || (*a != network && *a != broadcast))
                    .map(IpAddr::V4),
            )
        }
        IpNetwork::V6(net) => {
            let network = net.network();
            Box::new(net.iter().filter(move |a| *a != network).map(IpAddr::V6))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(cidr: &str) -> IpNetwork {
        cidr.parse().unwrap()
    }

    fn ip(addr: &str) -> IpAddr {
        addr.parse().unwrap()
    }

    async fn store_with_pools(pools: &[&str]) -> LocalDatastore {
        let store = LocalDatastore::in_memory();
        for cidr in pools {
            store.apply_pool(IpPool::new(net(cidr))).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_nodes() {
        let store = LocalDatastore::in_memory();
        assert!(store.get_node("node-a").await.unwrap().is_none());
        store.apply_node(NodeConfig::new("node-b")).await.unwrap();
        store.apply_node(NodeConfig::new("node-a")).await.unwrap();
        let mut updated = NodeConfig::new("node-a");
        updated.tunnel_address = Some("10.0.0.1".parse().unwrap());
        store.apply_node(updated.clone()).await.unwrap();

        assert_eq!(store.get_node("node-a").await.unwrap(), Some(updated));
        let names: Vec<String> = store
            .list_nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["node-a", "node-b"]);
    }

    #[tokio::test]
    async fn test_pools() {
        let store = store_with_pools(&["10.10.0.0/16", "fd00::/64"]).await;
        assert_eq!(store.list_pools().await.unwrap().len(), 2);

        // Re-applying the same CIDR replaces it
        let mut pool = IpPool::new(net("10.10.0.0/16"));
        pool.overlay_enabled = true;
        store.apply_pool(pool).await.unwrap();
        let pools = store.list_pools().await.unwrap();
        assert_eq!(pools.len(), 2);
        assert!(pools[0].overlay_enabled);

        match store.apply_pool(IpPool::new(net("10.10.5.0/24"))).await {
            Err(DatastoreError::InvalidPool(reason)) => assert!(reason.contains("overlaps")),
            other => panic!("Unexpected {:?}", other),
        }
        assert!(store.apply_pool(IpPool::new(net("10.20.0.0/31"))).await.is_err());

        store.delete_pool(&net("fd00::/64")).await.unwrap();
        assert_eq!(store.list_pools().await.unwrap().len(), 1);
        assert!(matches!(
            store.delete_pool(&net("fd00::/64")).await,
            Err(DatastoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_allocate_lowest_free() {
        let store = store_with_pools(&["10.10.0.0/16"]).await;
        let pools = vec![net("10.10.0.0/16")];
        assert_eq!(
            store.allocate_addresses(&pools, 1, "node-a").await.unwrap(),
            vec![ip("10.10.0.1")]
        );
        assert_eq!(
            store.allocate_addresses(&pools, 2, "node-b").await.unwrap(),
            vec![ip("10.10.0.2"), ip("10.10.0.3")]
        );
        store.release_addresses(&[ip("10.10.0.2")]).await.unwrap();
        assert_eq!(
            store.allocate_addresses(&pools, 1, "node-c").await.unwrap(),
            vec![ip("10.10.0.2")]
        );
    }

    #[tokio::test]
    async fn test_allocate_exhausted() {
        let store = store_with_pools(&["10.0.0.0/30", "fd00::/126"]).await;
        let pools = vec![net("10.0.0.0/30")];
        let first = store.allocate_addresses(&pools, 5, "node-a").await.unwrap();
        assert_eq!(first, vec![ip("10.0.0.1"), ip("10.0.0.2")]);
        assert!(store
            .allocate_addresses(&pools, 1, "node-b")
            .await
            .unwrap()
            .is_empty());

        let v6 = store
            .allocate_addresses(&[net("fd00::/126")], 1, "node-a")
            .await
            .unwrap();
        assert_eq!(v6, vec![ip("fd00::1")]);
    }

    #[tokio::test]
    async fn test_allocate_unknown_pool() {
        let store = store_with_pools(&["10.0.0.0/24"]).await;
        assert!(matches!(
            store
                .allocate_addresses(&[net("10.9.0.0/24")], 1, "node-a")
                .await,
            Err(DatastoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_release_unallocated_is_noop() {
        let store = store_with_pools(&["10.0.0.0/24"]).await;
        store.release_addresses(&[ip("10.0.0.7")]).await.unwrap();
        store.release_addresses(&[]).await.unwrap();
    }

    #[test]
    fn test_host_addresses() {
        let hosts: Vec<IpAddr> = host_addresses(&net("10.0.0.0/31")).collect();
        assert_eq!(hosts, vec![ip("10.0.0.0"), ip("10.0.0.1")]);
        let hosts: Vec<IpAddr> = host_addresses(&net("10.0.0.0/29")).collect();
        assert_eq!(hosts.len(), 6);
        assert_eq!(hosts.last(), Some(&ip("10.0.0.6")));
    }

    #[tokio::test]
    async fn test_file_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datastore.json");
        let store = LocalDatastore::open(&path);
        store.ping().await.unwrap();
        store.apply_node(NodeConfig::new("node-a")).await.unwrap();
        store
            .apply_pool(IpPool::new(net("10.10.0.0/16")))
            .await
            .unwrap();
        store
            .allocate_addresses(&[net("10.10.0.0/16")], 1, "node-a")
            .await
            .unwrap();

        let reopened = LocalDatastore::open(&path);
        assert!(reopened.get_node("node-a").await.unwrap().is_some());
        assert_eq!(reopened.list_pools().await.unwrap().len(), 1);
        assert_eq!(
            reopened
                .allocate_addresses(&[net("10.10.0.0/16")], 1, "node-b")
                .await
                .unwrap(),
            vec![ip("10.10.0.2")]
        );
        // The first handle sees the second handle's write
        assert_eq!(
            store
                .allocate_addresses(&[net("10.10.0.0/16")], 1, "node-c")
                .await
                .unwrap(),
            vec![ip("10.10.0.3")]
        );
    }

    #[tokio::test]
    async fn test_create_global_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datastore.json");
        let store = LocalDatastore::open(&path);
        assert_eq!(store.get_global("ClusterGUID").await.unwrap(), None);
        store.create_global("ClusterGUID", "abc").await.unwrap();
        assert!(matches!(
            LocalDatastore::open(&path)
                .create_global("ClusterGUID", "def")
                .await,
            Err(DatastoreError::AlreadyExists(_))
        ));
        assert_eq!(
            store.get_global("ClusterGUID").await.unwrap(),
            Some("abc".to_string())
        );
    }

    #[tokio::test]
    async fn test_ping_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDatastore::open(dir.path().join("missing").join("datastore.json"));
        assert!(matches!(
            store.ping().await,
            Err(DatastoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datastore.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = LocalDatastore::open(&path);
        assert!(matches!(
            store.list_nodes().await,
            Err(DatastoreError::Serialization(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_file_allocations_unique() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datastore.json");
        let pools = vec![net("10.10.0.0/16")];
        LocalDatastore::open(&path)
            .apply_pool(IpPool::new(pools[0]))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for handle in 0..4 {
            let store = std::sync::Arc::new(LocalDatastore::open(&path));
            for n in 0..10 {
                let store = store.clone();
                let pools = pools.clone();
                tasks.push(tokio::spawn(async move {
                    let owner = format!("node-{}-{}", handle, n);
                    store.allocate_addresses(&pools, 1, &owner).await
                }));
            }
        }
        let mut addresses = HashSet::new();
        for task in tasks {
            let assigned = task.await.unwrap().unwrap();
            assert_eq!(assigned.len(), 1);
            assert!(addresses.insert(assigned[0]), "{} handed out twice", assigned[0]);
        }
        assert_eq!(addresses.len(), 40);

        let store = LocalDatastore::open(&path);
        assert_eq!(
            store.allocate_addresses(&pools, 1, "node-last").await.unwrap(),
            vec![ip("10.10.0.41")]
        );
        assert!(!sibling(&path, "tmp").exists());
    }
}
