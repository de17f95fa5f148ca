//! Join protocol: get this node's replica accepted into its replication
//! group and caught up.
//!
//! Bounded two ways: one invocation gives up after the join budget and
//! schedules a retry through the nudge, and at most
//! [`crate::options::MAX_RAFT_JOIN_RUNNING`] invocations may catch up
//! concurrently across all partitions.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

use rillkv_cluster::member::MemberInfo;
use rillkv_cluster::meta::PartitionMeta;
use rillkv_cluster::node::NodeId;
use rillkv_cluster::peer::PeerApi;

use crate::config::DynamicConf;
use crate::coordinator::NudgeHandle;
use crate::error::CoordError;
use crate::options::CoordOptions;
use crate::predicates;
use crate::replica::ReplicaNode;

pub(crate) struct JoinCtx<'a> {
    pub my_id: &'a NodeId,
    pub my_reg_id: u64,
    pub peer: &'a dyn PeerApi,
    pub opts: &'a CoordOptions,
    pub catchup_running: &'a AtomicI64,
    pub stop_rx: &'a watch::Receiver<bool>,
    pub nudge: &'a NudgeHandle,
}

struct CatchupGuard<'a>(&'a AtomicI64);

impl Drop for CatchupGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Sleeps for `dur`, aborting early with `Exiting` when the stop signal
/// fires.
pub(crate) async fn pause(
    stop_rx: &mut watch::Receiver<bool>,
    dur: Duration,
) -> Result<(), CoordError> {
    if *stop_rx.borrow() {
        return Err(CoordError::Exiting);
    }
    let sleep = tokio::time::sleep(dur);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return Ok(()),
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return Err(CoordError::Exiting);
                }
            }
        }
    }
}

async fn request_join(
    ctx: &JoinCtx<'_>,
    replica_id: u64,
    meta: &PartitionMeta,
    replica: &Arc<dyn ReplicaNode>,
    remote: &NodeId,
) {
    let mut member = MemberInfo {
        id: replica_id,
        node_id: ctx.my_reg_id,
        group_id: meta.group_id(),
        group_name: meta.desp(),
        raft_urls: Vec::new(),
    };
    replica.fill_my_member_info(&mut member);
    info!(remote = %remote, member = member.id, partition = %meta.desp(), "requesting join");
    if remote == ctx.my_id {
        return;
    }
    let ep = match remote.endpoint() {
        Ok(ep) => ep,
        Err(err) => {
            info!(remote = %remote, %err, "cannot parse remote node id");
            return;
        }
    };
    if let Err(err) = ctx.peer.add_node(&ep.host, ep.http_port, &member).await {
        info!(remote = %ep.host, %err, "failed to request join group");
    }
}

/// Ensures this node's replica is a member of its group and raft-synced,
/// retrying against remote peers until the join budget runs out.
pub(crate) async fn ensure_join_group(
    ctx: &JoinCtx<'_>,
    meta: &PartitionMeta,
    replica: &Arc<dyn ReplicaNode>,
) -> Result<(), CoordError> {
    if predicates::has_current_removal(meta, ctx.my_id) {
        info!(partition = %meta.desp(), "ignore join since node is removing");
        return Ok(());
    }

    let running = ctx.catchup_running.fetch_add(1, Ordering::SeqCst) + 1;
    let _guard = CatchupGuard(ctx.catchup_running);
    if running > ctx.opts.max_join_running {
        info!(running, "too many joins catching up");
        ctx.nudge.schedule();
        return Err(CoordError::CatchupBusy);
    }

    replica.set_dynamic_info(DynamicConf::default());
    let desp = meta.desp();
    let Some(&replica_id) = meta.raft_ids.get(ctx.my_id) else {
        warn!(partition = %desp, "no replica id for local node while joining");
        return Err(CoordError::ConfInvalid);
    };

    let mut stop_rx = ctx.stop_rx.clone();
    let deadline = Instant::now() + ctx.opts.join_budget;
    let mut retry: usize = 0;
    let mut join_err: Option<CoordError> = None;
    while Instant::now() < deadline {
        let members = replica.get_members();
        let member_reg_ids: HashSet<u64> = members.iter().map(|m| m.node_id).collect();
        let mine = members
            .iter()
            .any(|m| m.node_id == ctx.my_reg_id && m.group_name == desp && m.id == replica_id);
        let already_joined = mine && members.len() > meta.isr.len() / 2;
        if mine && !already_joined {
            info!(
                partition = %desp,
                members = members.len(),
                "replica sits in a minority fragment, needs the larger group"
            );
        }

        if already_joined {
            if replica.is_raft_synced() {
                join_err = None;
                break;
            }
            info!(partition = %desp, "still waiting raft sync");
            join_err = Some(CoordError::WaitingSync);
            pause(&mut stop_rx, ctx.opts.retry_pause).await?;
        } else {
            join_err = Some(CoordError::WaitingSync);
            let candidates = meta.isr_or_nodes();
            let mut remote: Option<&NodeId> = None;
            let mut fallback: Option<&NodeId> = None;
            if !candidates.is_empty() {
                let mut cnt = 0;
                while cnt <= candidates.len() {
                    let candidate = &candidates[retry % candidates.len()];
                    retry += 1;
                    cnt += 1;
                    if candidate == ctx.my_id {
                        continue;
                    }
                    fallback = Some(candidate);
                    if !member_reg_ids.contains(&candidate.reg_id()) {
                        remote = Some(candidate);
                        break;
                    }
                }
            }
            if let Some(target) = remote.or(fallback) {
                request_join(ctx, replica_id, meta, replica, target).await;
            }
            pause(&mut stop_rx, ctx.opts.retry_pause).await?;
        }
    }

    match join_err {
        Some(err) => {
            ctx.nudge.schedule();
            info!(partition = %desp, %err, "local join not converged, retry later");
            Err(err)
        }
        None => {
            replica.set_data_fix_state(false);
            if retry > 0 {
                info!(partition = %desp, "local join done");
            }
            Ok(())
        }
    }
}
