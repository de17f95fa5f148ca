//! Replica configuration handed to the namespace manager when a local
//! replica is created or reopened.

use serde::{Deserialize, Serialize};

/// One seed of a replication group: where an initial member lives.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedNode {
    /// Registry-issued id of the hosting node.
    pub node_id: u64,
    /// Replica id within the group.
    pub replica_id: u64,
    /// Raft transport address.
    pub raft_addr: String,
}

/// Everything the namespace manager needs to open one partition replica.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Namespace name.
    pub base_name: String,
    /// Full partition name, `"{namespace}-{partition}"`.
    pub name: String,
    /// Storage engine variant.
    pub eng_type: String,
    /// Total partitions in the namespace.
    pub partition_num: u32,
    /// Desired replication factor.
    pub replicator: usize,
    /// Replication group id.
    pub group_id: u64,
    /// Initial group membership.
    pub seed_nodes: Vec<SeedNode>,
}

/// Runtime-tunable replica settings, refreshed on load and before joins.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicConf {}
