//! Membership reconciliation for partitions this node leads.
//!
//! Only the raft leader of a group steers it: transfers leadership toward
//! the balancer's preferred node, proposes adds for configured replicas that
//! have not joined, and shrinks over-provisioned groups. Additions always
//! settle before removals so the group never drops below quorum mid-change.

use std::sync::Arc;
use tracing::{info, warn};

use rillkv_cluster::member::MemberInfo;
use rillkv_cluster::meta::PartitionMeta;
use rillkv_cluster::node::NodeId;
use rillkv_cluster::registry::Registry;

use crate::lifecycle;
use crate::replica::ReplicaNode;

/// What one reconciliation of a running replica did.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReconcileOutcome {
    /// The group has no leader yet; nothing to steer.
    NoLeader,
    /// Another node leads this group; it steers, we follow.
    NotSteering,
    /// This node fell out of the ISR; proposed removing itself.
    OutOfIsr,
    /// Leadership was handed toward the preferred leader.
    TransferredLeader,
    /// Membership was compared against the meta.
    MemberSynced {
        /// Whether any add proposal went out.
        any_joined: bool,
        /// Whether another pass should run soon (additions pending or the
        /// ISR is short of the replication factor).
        needs_recheck: bool,
    },
}

pub(crate) struct ReconcileCtx<'a> {
    pub registry: &'a dyn Registry,
    pub my_id: &'a NodeId,
    pub my_reg_id: u64,
}

/// Hands group leadership to `target` if the meta knows its replica id.
pub(crate) async fn transfer_my_leader(
    meta: &PartitionMeta,
    replica: &Arc<dyn ReplicaNode>,
    target: &NodeId,
) {
    let Some(&to_replica_id) = meta.raft_ids.get(target) else {
        warn!(
            partition = %meta.desp(),
            target = %target,
            "cannot transfer leader, no replica id for target"
        );
        return;
    };
    info!(partition = %meta.desp(), target = %target, "begin leader transfer");
    if let Err(err) = replica.transfer_leader(target.reg_id(), to_replica_id).await {
        info!(partition = %meta.desp(), target = %target, %err, "leader transfer failed");
    }
}

/// Proposes adding a member unless the meta marks it as being removed.
async fn add_group_member(meta: &PartitionMeta, replica: &Arc<dyn ReplicaNode>, member: MemberInfo) {
    for (nid, rm) in &meta.removings {
        if member.id == rm.remove_replica_id && member.node_id == nid.reg_id() {
            info!(
                partition = %meta.desp(),
                member = member.id,
                "member is marked removing in meta, ignore add"
            );
            return;
        }
    }
    match replica.propose_add_member(member.clone()).await {
        Ok(()) => info!(partition = %meta.desp(), member = member.id, "proposed add member"),
        Err(err) => info!(partition = %meta.desp(), member = member.id, %err, "propose add failed"),
    }
}

async fn remove_group_member(
    meta: &PartitionMeta,
    replica: &Arc<dyn ReplicaNode>,
    member: MemberInfo,
) {
    match replica.propose_remove_member(member.clone()).await {
        Ok(()) => info!(partition = %meta.desp(), member = member.id, "proposed remove member"),
        Err(err) => {
            info!(partition = %meta.desp(), member = member.id, %err, "propose remove failed")
        }
    }
}

/// One reconciliation step for a running local replica against its meta.
pub(crate) async fn reconcile_running(
    ctx: &ReconcileCtx<'_>,
    meta: &PartitionMeta,
    replica: &Arc<dyn ReplicaNode>,
) -> ReconcileOutcome {
    let leader = replica.get_lead_member().map(|m| m.node_id).unwrap_or(0);
    if leader == 0 {
        return ReconcileOutcome::NoLeader;
    }
    if !meta.isr.contains(ctx.my_id) {
        if !meta.isr.is_empty() {
            info!(partition = %meta.desp(), "local replica out of ISR, should be cleaned");
            if let Err(err) = lifecycle::remove_from_raft(Some(replica), true).await {
                info!(partition = %meta.desp(), %err, "remove self from group failed");
            }
        }
        return ReconcileOutcome::OutOfIsr;
    }
    if leader != ctx.my_reg_id || meta.isr.is_empty() {
        return ReconcileOutcome::NotSteering;
    }

    let replicas_enough = meta.isr.len() >= meta.replica;
    if replicas_enough && meta.isr[0] != *ctx.my_id {
        // Balance sharding leaders across the cluster: the balancer's
        // preferred leader is the ISR head.
        transfer_my_leader(meta, replica, &meta.isr[0]).await;
        return ReconcileOutcome::TransferredLeader;
    }

    sync_members(ctx, meta, replica, replicas_enough).await
}

async fn sync_members(
    ctx: &ReconcileCtx<'_>,
    meta: &PartitionMeta,
    replica: &Arc<dyn ReplicaNode>,
    replicas_enough: bool,
) -> ReconcileOutcome {
    let members = replica.get_members();

    let mut any_joined = false;
    for (nid, &rid) in &meta.raft_ids {
        match members.iter().find(|m| m.id == rid) {
            Some(found) => {
                if found.node_id != nid.reg_id() {
                    info!(
                        partition = %meta.desp(),
                        member = found.id,
                        node = %nid,
                        "group member mismatches its replica node"
                    );
                }
            }
            None => {
                any_joined = true;
                let mut member = MemberInfo {
                    id: rid,
                    node_id: nid.reg_id(),
                    group_id: meta.group_id(),
                    group_name: meta.desp(),
                    raft_urls: Vec::new(),
                };
                match lifecycle::get_raft_addr(ctx.registry, nid).await {
                    Ok(addr) => {
                        member.raft_urls.push(addr);
                        add_group_member(meta, replica, member).await;
                    }
                    Err(err) => {
                        info!(node = %nid, %err, "failed to get raft address for node");
                    }
                }
            }
        }
    }

    if any_joined || members.len() <= meta.replica || !replicas_enough {
        // Never shrink past quorum before additions commit.
        return ReconcileOutcome::MemberSynced {
            any_joined,
            needs_recheck: true,
        };
    }

    for member in &members {
        match meta.raft_ids.iter().find(|&(_, rid)| *rid == member.id) {
            None => {
                info!(
                    partition = %meta.desp(),
                    member = member.id,
                    "group member not found in meta, removing"
                );
                remove_group_member(meta, replica, member.clone()).await;
            }
            Some((nid, _)) => {
                if member.node_id != nid.reg_id() {
                    info!(
                        partition = %meta.desp(),
                        member = member.id,
                        node = %nid,
                        "group member mismatches its replica node"
                    );
                }
                for (rnid, rm) in &meta.removings {
                    if member.id == rm.remove_replica_id && member.node_id == rnid.reg_id() {
                        info!(
                            partition = %meta.desp(),
                            member = member.id,
                            "group member is marked removing in meta"
                        );
                        remove_group_member(meta, replica, member.clone()).await;
                    }
                }
            }
        }
    }

    ReconcileOutcome::MemberSynced {
        any_joined: false,
        needs_recheck: false,
    }
}
