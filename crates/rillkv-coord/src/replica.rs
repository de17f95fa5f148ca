//! Facade traits over the local replica engine.
//!
//! The coordinator never touches consensus or storage directly; it drives
//! them through these seams. The namespace manager owns replica lifecycles,
//! and handles are re-resolved by name each pass rather than cached across
//! suspension points.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use rillkv_cluster::member::MemberInfo;

use crate::config::{DynamicConf, ReplicaConfig};
use crate::error::CoordError;

/// A running consensus member for one partition.
#[async_trait]
pub trait ReplicaNode: Send + Sync + std::fmt::Debug {
    /// Configured members of this replica's group as the local node sees
    /// them.
    fn get_members(&self) -> Vec<MemberInfo>;

    /// The current group leader, if one is known.
    fn get_lead_member(&self) -> Option<MemberInfo>;

    /// This replica's own member descriptor.
    fn get_local_member_info(&self) -> MemberInfo;

    /// Completes a member descriptor with locally-known transport fields.
    fn fill_my_member_info(&self, member: &mut MemberInfo);

    /// Whether the replica can accept configuration changes.
    fn is_ready(&self) -> bool;

    /// Whether the replica's log has caught up with the group.
    fn is_raft_synced(&self) -> bool;

    /// Whether local data was flagged for repair.
    fn is_data_need_fix(&self) -> bool;

    /// Sets or clears the data repair flag.
    fn set_data_fix_state(&self, need_fix: bool);

    /// Stamps the cluster identity code on local data.
    fn set_magic_code(&self, code: i64) -> Result<(), CoordError>;

    /// Applies runtime-tunable settings.
    fn set_dynamic_info(&self, conf: DynamicConf);

    /// Verifies a stored raft configuration against the expected one.
    fn check_raft_conf(&self, replica_id: u64, conf: &ReplicaConfig) -> Result<(), CoordError>;

    /// Proposes adding a member to the group.
    async fn propose_add_member(&self, member: MemberInfo) -> Result<(), CoordError>;

    /// Proposes removing a member from the group.
    async fn propose_remove_member(&self, member: MemberInfo) -> Result<(), CoordError>;

    /// Asks the group to move leadership to the given member.
    async fn transfer_leader(&self, to_reg_id: u64, to_replica_id: u64) -> Result<(), CoordError>;

    /// Starts the replica.
    async fn start(&self) -> Result<(), CoordError>;

    /// Stops the replica without touching on-disk data.
    async fn close(&self);

    /// Stops the replica and deletes its local data.
    async fn destroy(&self) -> Result<(), CoordError>;
}

/// The namespace manager: owner of every local replica.
#[async_trait]
pub trait ReplicaManager: Send + Sync {
    /// Looks up a running replica by partition name.
    fn get_replica(&self, desp: &str) -> Option<Arc<dyn ReplicaNode>>;

    /// Snapshot of all running replicas, keyed by partition name.
    fn replicas(&self) -> HashMap<String, Arc<dyn ReplicaNode>>;

    /// Opens a replica (or returns the existing one) for the given config
    /// and replica id.
    async fn init_replica(
        &self,
        conf: &ReplicaConfig,
        replica_id: u64,
    ) -> Result<Arc<dyn ReplicaNode>, CoordError>;

    /// Verifies the cluster identity stamp on a partition's local data,
    /// stamping it when `try_fix` is set and the stamp is absent.
    fn check_magic_code(&self, desp: &str, magic_code: i64, try_fix: bool)
        -> Result<(), CoordError>;

    /// Persists the registry-issued node id across restarts.
    fn save_machine_reg_id(&self, reg_id: u64) -> Result<(), CoordError>;

    /// Starts the manager.
    async fn start(&self);

    /// Stops the manager and every replica it owns.
    async fn stop(&self);
}
