//! Partition metadata as published by the placement driver.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::node::NodeId;

/// A node being drained out of a replication group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RemovingInfo {
    /// The replica id being removed. A stale entry (replica id no longer in
    /// `RaftIDs`) means the node has since been re-added under a new id.
    pub remove_replica_id: u64,
    /// Seconds since epoch when the removal was scheduled.
    pub remove_time: u64,
}

/// Namespace-level metadata shared by all partitions of one namespace.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceMeta {
    /// Total partitions in the namespace.
    pub partition_num: u32,
    /// Desired replication factor.
    pub replica: usize,
    /// Storage engine variant.
    pub eng_type: String,
    /// Base group id; partition `p` gets group id `min_gid + p`.
    pub min_gid: u64,
    /// Cluster identity stamp; 0 means not yet set.
    pub magic_code: i64,
}

/// Authoritative placement of one partition, owned by the registry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionMeta {
    /// Namespace this partition belongs to.
    pub namespace: String,
    /// Partition index within the namespace.
    pub partition: u32,
    /// Desired replication factor.
    pub replica: usize,
    /// Total partitions in the namespace.
    pub partition_num: u32,
    /// Base group id for the namespace.
    pub min_gid: u64,
    /// Storage engine variant.
    pub eng_type: String,
    /// Cluster identity stamp; 0 means not yet set.
    pub magic_code: i64,
    /// Intended raft configuration, ordered.
    pub raft_nodes: Vec<NodeId>,
    /// In-sync replicas; the head is the preferred leader.
    pub isr: Vec<NodeId>,
    /// Per-node replica ids, unique within the group.
    pub raft_ids: HashMap<NodeId, u64>,
    /// Nodes currently being drained out of the group.
    pub removings: HashMap<NodeId, RemovingInfo>,
    /// Meta version, monotone per change.
    pub epoch: u64,
}

impl PartitionMeta {
    /// Human-readable partition id, also the local replica lookup key.
    pub fn desp(&self) -> String {
        format!("{}-{}", self.namespace, self.partition)
    }

    /// Replication group id of this partition.
    pub fn group_id(&self) -> u64 {
        self.min_gid + self.partition as u64
    }

    /// The in-sync replica list, falling back to the intended configuration
    /// when the balancer has not published one yet.
    pub fn isr_or_nodes(&self) -> &[NodeId] {
        if self.isr.is_empty() {
            &self.raft_nodes
        } else {
            &self.isr
        }
    }
}

/// Sorts partitions of one namespace in ascending partition order. The
/// coordinator processes them in this order so a join failure on a lower
/// partition blocks later ones.
pub fn sort_partitions(parts: &mut [PartitionMeta]) {
    parts.sort_by_key(|p| p.partition);
}

/// Splits a `"{namespace}-{partition}"` name back into its components.
///
/// The partition is everything after the last `-`; namespaces may themselves
/// contain dashes.
pub fn split_desp(name: &str) -> Option<(&str, u32)> {
    let idx = name.rfind('-')?;
    let (ns, part) = name.split_at(idx);
    if ns.is_empty() {
        return None;
    }
    let partition: u32 = part[1..].parse().ok()?;
    Some((ns, partition))
}
