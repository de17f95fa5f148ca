//! Local replica lifecycle: building configs, opening, and removing.

use std::sync::Arc;
use tracing::{info, warn};

use rillkv_cluster::meta::PartitionMeta;
use rillkv_cluster::node::{NodeId, NodeInfo};
use rillkv_cluster::registry::Registry;

use crate::config::{DynamicConf, ReplicaConfig, SeedNode};
use crate::error::CoordError;
use crate::replica::{ReplicaManager, ReplicaNode};

/// Resolves a node's raft transport address through the registry.
pub(crate) async fn get_raft_addr(
    registry: &dyn Registry,
    node_id: &NodeId,
) -> Result<String, CoordError> {
    let info = registry.get_node_info(node_id).await?;
    Ok(info.raft_transport_addr())
}

/// Builds the replica config for one partition from its meta. Seeds come
/// from the ISR; entries whose raft id or transport address cannot be
/// resolved are skipped.
pub(crate) async fn prepare_config(
    registry: &dyn Registry,
    my_node: &NodeInfo,
    meta: &PartitionMeta,
) -> Result<ReplicaConfig, CoordError> {
    let my_id = my_node.node_id();
    let my_replica_id = match meta.raft_ids.get(&my_id) {
        Some(&rid) => rid,
        None => {
            warn!(partition = %meta.desp(), "partition has no replica id for local node");
            return Err(CoordError::ConfInvalid);
        }
    };
    let mut seeds = Vec::new();
    for nid in &meta.isr {
        if nid == &my_id {
            seeds.push(SeedNode {
                node_id: my_node.reg_id,
                replica_id: my_replica_id,
                raft_addr: my_node.raft_transport_addr(),
            });
            continue;
        }
        let Some(&replica_id) = meta.raft_ids.get(nid) else {
            info!(node = %nid, partition = %meta.desp(), "no replica id for seed node");
            continue;
        };
        match get_raft_addr(registry, nid).await {
            Ok(raft_addr) => seeds.push(SeedNode {
                node_id: nid.reg_id(),
                replica_id,
                raft_addr,
            }),
            Err(err) => {
                info!(node = %nid, %err, "no raft address for seed node");
            }
        }
    }
    if seeds.is_empty() {
        warn!(partition = %meta.desp(), "no seed nodes for partition");
        return Err(CoordError::ConfInvalid);
    }
    Ok(ReplicaConfig {
        base_name: meta.namespace.clone(),
        name: meta.desp(),
        eng_type: meta.eng_type.clone(),
        partition_num: meta.partition_num,
        replicator: meta.replica,
        group_id: meta.group_id(),
        seed_nodes: seeds,
    })
}

/// Opens (or reopens) the local replica for a partition and starts it.
pub(crate) async fn update_local_namespace(
    manager: &dyn ReplicaManager,
    registry: &dyn Registry,
    my_node: &NodeInfo,
    meta: &PartitionMeta,
) -> Result<Arc<dyn ReplicaNode>, CoordError> {
    let my_id = my_node.node_id();
    let Some(&replica_id) = meta.raft_ids.get(&my_id) else {
        warn!(partition = %meta.desp(), "partition has no replica id for local node");
        return Err(CoordError::ConfInvalid);
    };
    let conf = prepare_config(registry, my_node, meta).await.map_err(|err| {
        warn!(partition = %meta.desp(), %err, "prepare replica config failed");
        err
    })?;

    let replica = manager
        .init_replica(&conf, replica_id)
        .await
        .map_err(|err| {
            warn!(partition = %meta.desp(), %err, "local replica init failed");
            CoordError::LocalInit(err.to_string())
        })?;
    if let Err(err) = replica.check_raft_conf(replica_id, &conf) {
        info!(partition = %meta.desp(), %err, "local replica mismatches new raft config");
        return Err(CoordError::Local(err.to_string()));
    }
    if let Err(err) = replica.set_magic_code(meta.magic_code) {
        warn!(partition = %meta.desp(), %err, "local replica magic code init failed");
        return Err(CoordError::LocalInit(err.to_string()));
    }
    replica.set_dynamic_info(DynamicConf::default());
    replica
        .start()
        .await
        .map_err(|err| CoordError::LocalInit(err.to_string()))?;
    Ok(replica)
}

/// Destroys a replica's local data. Errors are logged, never retried here;
/// the next pass notices leftovers.
pub(crate) async fn force_remove(replica: &Arc<dyn ReplicaNode>) {
    if let Err(err) = replica.destroy().await {
        info!(%err, "failed to force remove local data");
    }
}

/// Removes the local replica from its replication group.
///
/// With `remove_data`, proposes removing self through the group (requires a
/// ready replica and a healthy-enough group to commit the change). Without,
/// only closes the replica; on-disk data stays.
pub(crate) async fn remove_from_raft(
    replica: Option<&Arc<dyn ReplicaNode>>,
    remove_data: bool,
) -> Result<(), CoordError> {
    let Some(replica) = replica else {
        return Err(CoordError::NotCreated);
    };
    if remove_data {
        if !replica.is_ready() {
            return Err(CoordError::NotReady);
        }
        let member = replica.get_local_member_info();
        info!(member = member.id, group = %member.group_name, "removing self from group");
        replica.propose_remove_member(member.clone()).await.map_err(|err| {
            info!(member = member.id, %err, "propose remove self failed");
            CoordError::Local(err.to_string())
        })
    } else {
        replica.close().await;
        Ok(())
    }
}
