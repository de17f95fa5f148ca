//! In-process registry backed by shared maps.
//!
//! Serves the single-process deployment mode and the test suites; the
//! etcd-backed registry lives with the daemon, behind the same trait.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

use crate::error::RegistryError;
use crate::meta::{NamespaceMeta, PartitionMeta};
use crate::node::{NodeId, NodeInfo};
use crate::registry::{NamespaceMap, Registry};

const NOTIFY_CAPACITY: usize = 16;

#[derive(Default)]
struct State {
    namespaces: NamespaceMap,
    ns_meta: HashMap<String, NamespaceMeta>,
    nodes: HashMap<NodeId, NodeInfo>,
    pd_nodes: Vec<NodeInfo>,
    registered: HashSet<NodeId>,
}

/// Registry implementation over in-process state.
pub struct MemRegistry {
    state: RwLock<State>,
    cluster_id: Mutex<String>,
    next_reg_id: AtomicU64,
    unregister_calls: AtomicUsize,
    ns_notify: broadcast::Sender<()>,
    pd_leader: watch::Sender<Option<NodeInfo>>,
}

impl MemRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        let (ns_notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        let (pd_leader, _) = watch::channel(None);
        Self {
            state: RwLock::new(State::default()),
            cluster_id: Mutex::new(String::new()),
            next_reg_id: AtomicU64::new(1),
            unregister_calls: AtomicUsize::new(0),
            ns_notify,
            pd_leader,
        }
    }

    fn notify_namespaces(&self) {
        // No subscribers is fine; delivery is lossy by contract.
        let _ = self.ns_notify.send(());
    }

    /// Publishes or replaces one partition's placement and signals watchers.
    pub fn set_partition(&self, meta: PartitionMeta) {
        debug!(partition = %meta.desp(), epoch = meta.epoch, "publishing partition meta");
        {
            let mut state = self.state.write().expect("lock poisoned");
            state
                .namespaces
                .entry(meta.namespace.clone())
                .or_default()
                .insert(meta.partition, meta);
        }
        self.notify_namespaces();
    }

    /// Removes one partition, dropping the namespace entry when it empties.
    pub fn remove_partition(&self, namespace: &str, partition: u32) {
        {
            let mut state = self.state.write().expect("lock poisoned");
            if let Some(parts) = state.namespaces.get_mut(namespace) {
                parts.remove(&partition);
                if parts.is_empty() {
                    state.namespaces.remove(namespace);
                }
            }
        }
        self.notify_namespaces();
    }

    /// Publishes namespace-level metadata.
    pub fn set_namespace_meta(&self, namespace: &str, meta: NamespaceMeta) {
        {
            let mut state = self.state.write().expect("lock poisoned");
            state.ns_meta.insert(namespace.to_string(), meta);
        }
        self.notify_namespaces();
    }

    /// Deletes a namespace and all its partitions.
    pub fn remove_namespace(&self, namespace: &str) {
        debug!(%namespace, "removing namespace");
        {
            let mut state = self.state.write().expect("lock poisoned");
            state.namespaces.remove(namespace);
            state.ns_meta.remove(namespace);
        }
        self.notify_namespaces();
    }

    /// Publishes a node descriptor for lookup by id.
    pub fn put_node_info(&self, info: NodeInfo) {
        let mut state = self.state.write().expect("lock poisoned");
        state.nodes.insert(info.node_id(), info);
    }

    /// Replaces the placement-driver node list.
    pub fn set_pd_nodes(&self, nodes: Vec<NodeInfo>) {
        let mut state = self.state.write().expect("lock poisoned");
        state.pd_nodes = nodes;
    }

    /// Announces a new placement-driver leader to watchers.
    pub fn set_pd_leader(&self, leader: NodeInfo) {
        let _ = self.pd_leader.send(Some(leader));
    }

    /// True while the node's descriptor is registered.
    pub fn is_registered(&self, node_id: &NodeId) -> bool {
        let state = self.state.read().expect("lock poisoned");
        state.registered.contains(node_id)
    }

    /// How many times `unregister` ran.
    pub fn unregister_count(&self) -> usize {
        self.unregister_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemRegistry {
    fn init_cluster_id(&self, cluster_id: &str) {
        let mut id = self.cluster_id.lock().expect("lock poisoned");
        *id = cluster_id.to_string();
    }

    async fn new_register_node_id(&self) -> Result<u64, RegistryError> {
        Ok(self.next_reg_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn register(&self, node: &NodeInfo) -> Result<(), RegistryError> {
        let mut state = self.state.write().expect("lock poisoned");
        state.registered.insert(node.node_id());
        state.nodes.insert(node.node_id(), node.clone());
        Ok(())
    }

    async fn unregister(&self, node: &NodeInfo) -> Result<(), RegistryError> {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().expect("lock poisoned");
        state.registered.remove(&node.node_id());
        Ok(())
    }

    async fn get_all_pd_nodes(&self) -> Result<Vec<NodeInfo>, RegistryError> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.pd_nodes.clone())
    }

    async fn watch_pd_leader(&self, tx: mpsc::Sender<NodeInfo>, mut stop: watch::Receiver<bool>) {
        let mut leader_rx = self.pd_leader.subscribe();
        // Deliver the leader elected before this watch began.
        let current = leader_rx.borrow_and_update().clone();
        if let Some(leader) = current {
            if tx.send(leader).await.is_err() {
                return;
            }
        }
        loop {
            if *stop.borrow() {
                return;
            }
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
                changed = leader_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let leader = leader_rx.borrow_and_update().clone();
                    if let Some(leader) = leader {
                        if tx.send(leader).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn get_all_namespaces(&self) -> Result<NamespaceMap, RegistryError> {
        let state = self.state.read().expect("lock poisoned");
        if state.namespaces.is_empty() {
            return Err(RegistryError::NotFound);
        }
        Ok(state.namespaces.clone())
    }

    async fn get_namespace_meta(&self, namespace: &str) -> Result<NamespaceMeta, RegistryError> {
        let state = self.state.read().expect("lock poisoned");
        state
            .ns_meta
            .get(namespace)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    async fn get_namespace_part(
        &self,
        namespace: &str,
        partition: u32,
    ) -> Result<PartitionMeta, RegistryError> {
        let state = self.state.read().expect("lock poisoned");
        state
            .namespaces
            .get(namespace)
            .and_then(|parts| parts.get(&partition))
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    async fn get_node_info(&self, node_id: &NodeId) -> Result<NodeInfo, RegistryError> {
        let state = self.state.read().expect("lock poisoned");
        state
            .nodes
            .get(node_id)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    fn namespaces_notify_rx(&self) -> broadcast::Receiver<()> {
        self.ns_notify.subscribe()
    }

    async fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn node(reg_id: u64) -> NodeInfo {
        let mut info = NodeInfo {
            node_ip: "127.0.0.1".to_string(),
            tcp_port: 6380,
            http_port: 6381,
            raft_port: 6382,
            reg_id,
            ..Default::default()
        };
        info.id = NodeId::generate(&info).as_str().to_string();
        info
    }

    fn part(ns: &str, partition: u32) -> PartitionMeta {
        PartitionMeta {
            namespace: ns.to_string(),
            partition,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_namespaces_is_not_found() {
        let reg = MemRegistry::new();
        assert_eq!(
            reg.get_all_namespaces().await.unwrap_err(),
            RegistryError::NotFound
        );
    }

    #[tokio::test]
    async fn test_partition_lookup() {
        let reg = MemRegistry::new();
        reg.set_partition(part("orders", 1));
        let meta = reg.get_namespace_part("orders", 1).await.unwrap();
        assert_eq!(meta.desp(), "orders-1");
        assert_eq!(
            reg.get_namespace_part("orders", 2).await.unwrap_err(),
            RegistryError::NotFound
        );
    }

    #[tokio::test]
    async fn test_remove_partition_drops_empty_namespace() {
        let reg = MemRegistry::new();
        reg.set_partition(part("orders", 0));
        reg.remove_partition("orders", 0);
        assert_eq!(
            reg.get_all_namespaces().await.unwrap_err(),
            RegistryError::NotFound
        );
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let reg = MemRegistry::new();
        let n = node(9);
        reg.register(&n).await.unwrap();
        assert!(reg.is_registered(&n.node_id()));
        reg.unregister(&n).await.unwrap();
        assert!(!reg.is_registered(&n.node_id()));
        assert_eq!(reg.unregister_count(), 1);
    }

    #[tokio::test]
    async fn test_reg_ids_are_monotonic() {
        let reg = MemRegistry::new();
        let a = reg.new_register_node_id().await.unwrap();
        let b = reg.new_register_node_id().await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_namespace_notify_on_change() {
        let reg = MemRegistry::new();
        let mut rx = reg.namespaces_notify_rx();
        reg.set_partition(part("orders", 0));
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("notify timed out")
            .expect("notify channel closed");
    }

    #[tokio::test]
    async fn test_watch_pd_leader_forwards_and_stops() {
        let reg = std::sync::Arc::new(MemRegistry::new());
        let (tx, mut rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);

        let watcher = {
            let reg = reg.clone();
            tokio::spawn(async move { reg.watch_pd_leader(tx, stop_rx).await })
        };

        reg.set_pd_leader(node(1));
        let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("leader timed out")
            .expect("watch closed");
        assert_eq!(seen.reg_id, 1);

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("watcher did not stop")
            .unwrap();
    }
}
