//! Observability surface: per-partition ISR membership reports.

use serde::{Deserialize, Serialize};

use rillkv_cluster::node::NodeId;

/// One ISR member in a stats report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IsrStat {
    /// Resolved host name, empty when unresolved.
    pub hostname: String,
    /// The member's node id.
    pub node_id: NodeId,
}

/// Stats for one partition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceCoordStat {
    /// Namespace name.
    pub name: String,
    /// Partition index.
    pub partition: u32,
    /// Intended members of the partition's group.
    pub isr_stats: Vec<IsrStat>,
}

/// Coordinator-level stats report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordStats {
    /// Per-partition reports.
    pub ns_coord_stats: Vec<NamespaceCoordStat>,
}
