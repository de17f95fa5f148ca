//! Registry abstraction: the shared metadata store the placement driver
//! publishes through.
//!
//! The coordinator is a follower of placement; everything it knows about
//! intended state arrives through this trait. Implementations are expected
//! to be internally thread-safe.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, watch};

use crate::error::RegistryError;
use crate::meta::{NamespaceMeta, PartitionMeta};
use crate::node::{NodeId, NodeInfo};

/// Map of namespace name to its partitions, keyed by partition index.
pub type NamespaceMap = HashMap<String, HashMap<u32, PartitionMeta>>;

/// Registry operations consumed by a data node.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Scopes all keys under the given cluster id.
    fn init_cluster_id(&self, cluster_id: &str);

    /// Allocates a fresh monotonic node registration id.
    async fn new_register_node_id(&self) -> Result<u64, RegistryError>;

    /// Publishes this node's descriptor.
    async fn register(&self, node: &NodeInfo) -> Result<(), RegistryError>;

    /// Withdraws this node's descriptor.
    async fn unregister(&self, node: &NodeInfo) -> Result<(), RegistryError>;

    /// All placement-driver nodes currently registered.
    async fn get_all_pd_nodes(&self) -> Result<Vec<NodeInfo>, RegistryError>;

    /// Streams placement-driver leader changes into `tx` until `stop` fires
    /// or the receiver is dropped.
    async fn watch_pd_leader(&self, tx: mpsc::Sender<NodeInfo>, stop: watch::Receiver<bool>);

    /// Full placement snapshot: every namespace with every partition.
    async fn get_all_namespaces(&self) -> Result<NamespaceMap, RegistryError>;

    /// Namespace-level metadata.
    async fn get_namespace_meta(&self, namespace: &str) -> Result<NamespaceMeta, RegistryError>;

    /// One partition's placement.
    async fn get_namespace_part(
        &self,
        namespace: &str,
        partition: u32,
    ) -> Result<PartitionMeta, RegistryError>;

    /// Resolves a node id to its registered descriptor.
    async fn get_node_info(&self, node_id: &NodeId) -> Result<NodeInfo, RegistryError>;

    /// Subscribes to namespace-changed notifications. Delivery is lossy;
    /// consumers reconcile idempotently on each signal.
    fn namespaces_notify_rx(&self) -> broadcast::Receiver<()>;

    /// Releases registry resources.
    async fn stop(&self);
}
