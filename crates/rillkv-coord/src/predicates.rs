//! Placement predicates: whether this node should run, keep, or stop a
//! partition replica.
//!
//! A node marked as removing may still have to start its replica: the group
//! may lack quorum to commit the removal until the replica is back, so the
//! leader can only then remove it safely. The probe against peers decides
//! which side of that line we are on.

use tracing::{debug, info};

use rillkv_cluster::error::PeerError;
use rillkv_cluster::meta::PartitionMeta;
use rillkv_cluster::node::NodeId;
use rillkv_cluster::peer::PeerApi;

/// True when the meta carries a removal entry for this node that refers to
/// its current replica id. A stale entry (the node was re-added under a new
/// replica id) does not count.
pub(crate) fn has_current_removal(meta: &PartitionMeta, my_id: &NodeId) -> bool {
    match meta.removings.get(my_id) {
        None => false,
        Some(rm) => {
            let current = meta.raft_ids.get(my_id).copied().unwrap_or(0);
            rm.remove_replica_id == current
        }
    }
}

/// Pure core of [`should_stop`]: a removing node stops only when no peer
/// affirms its membership and the probe saw no error. Errors keep the
/// conservative answer.
pub(crate) fn stop_decision(
    meta: &PartitionMeta,
    my_id: &NodeId,
    in_group: bool,
    probe_errored: bool,
) -> bool {
    has_current_removal(meta, my_id) && !in_group && !probe_errored
}

/// Asks the partition's ISR peers whether any of them still lists this node
/// as a group member with its current replica id. Returns on the first
/// affirming peer; otherwise `(false, last_error)`.
pub(crate) async fn is_me_in_group(
    peer: &dyn PeerApi,
    my_id: &NodeId,
    my_reg_id: u64,
    meta: &PartitionMeta,
) -> (bool, Option<PeerError>) {
    let my_replica_id = meta.raft_ids.get(my_id).copied().unwrap_or(0);
    let desp = meta.desp();
    let mut last_err = None;
    for remote in &meta.isr {
        if remote == my_id {
            continue;
        }
        let ep = match remote.endpoint() {
            Ok(ep) => ep,
            Err(err) => {
                debug!(remote = %remote, %err, "skipping unparsable peer id");
                last_err = Some(PeerError::Transport(err.to_string()));
                continue;
            }
        };
        match peer.get_members(&ep.host, ep.http_port, &desp).await {
            Ok(members) => {
                if members
                    .iter()
                    .any(|m| m.node_id == my_reg_id && m.id == my_replica_id)
                {
                    return (true, last_err);
                }
            }
            Err(err) => {
                info!(remote = %ep.host, partition = %desp, %err, "failed to get members from peer");
                last_err = Some(err);
            }
        }
    }
    (false, last_err)
}

/// Whether this node should run a local replica for the partition.
pub(crate) async fn should_start(
    peer: &dyn PeerApi,
    my_id: &NodeId,
    my_reg_id: u64,
    meta: &PartitionMeta,
) -> bool {
    if !meta.raft_nodes.contains(my_id) {
        return false;
    }
    if !has_current_removal(meta, my_id) {
        return true;
    }
    let (in_group, _) = is_me_in_group(peer, my_id, my_reg_id, meta).await;
    if in_group {
        info!(
            node = %my_id,
            partition = %meta.desp(),
            "removing node should join since still in group"
        );
    }
    in_group
}

/// Whether a removing node has been fully removed from its group and may
/// stop the local replica.
pub(crate) async fn should_stop(
    peer: &dyn PeerApi,
    my_id: &NodeId,
    my_reg_id: u64,
    meta: &PartitionMeta,
) -> bool {
    if !has_current_removal(meta, my_id) {
        return false;
    }
    let (in_group, err) = is_me_in_group(peer, my_id, my_reg_id, meta).await;
    let stop = stop_decision(meta, my_id, in_group, err.is_some());
    if stop {
        info!(
            node = %my_id,
            partition = %meta.desp(),
            "removing node no longer in any group, stopping replica"
        );
    }
    stop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{member, meta_with_nodes, node_id, MockPeer};
    use proptest::prelude::*;
    use rillkv_cluster::meta::RemovingInfo;

    #[tokio::test]
    async fn test_should_start_not_listed() {
        let peer = MockPeer::new();
        let me = node_id(1);
        let meta = meta_with_nodes("orders", 0, &[node_id(2), node_id(3)]);
        assert!(!should_start(&peer, &me, 1, &meta).await);
    }

    #[tokio::test]
    async fn test_should_start_listed_without_removal() {
        let peer = MockPeer::new();
        let me = node_id(1);
        let meta = meta_with_nodes("orders", 0, &[node_id(1), node_id(2)]);
        assert!(should_start(&peer, &me, 1, &meta).await);
    }

    #[tokio::test]
    async fn test_should_start_stale_removal_entry() {
        let peer = MockPeer::new();
        let me = node_id(1);
        let mut meta = meta_with_nodes("orders", 0, &[node_id(1), node_id(2)]);
        // Superseded removal: replica id 9 is not the current id.
        meta.removings.insert(
            me.clone(),
            RemovingInfo {
                remove_replica_id: 9,
                remove_time: 1,
            },
        );
        assert!(should_start(&peer, &me, 1, &meta).await);
    }

    #[tokio::test]
    async fn test_should_start_removing_follows_peer_view() {
        let me = node_id(1);
        let mut meta = meta_with_nodes("orders", 0, &[node_id(1), node_id(2), node_id(3)]);
        let my_rid = meta.raft_ids[&me];
        meta.removings.insert(
            me.clone(),
            RemovingInfo {
                remove_replica_id: my_rid,
                remove_time: 1,
            },
        );

        // A peer still lists us: must start so the leader can finish the removal.
        let peer = MockPeer::new();
        peer.set_members(&node_id(2), vec![member(my_rid, 1, &meta)]);
        assert!(should_start(&peer, &me, 1, &meta).await);

        // No peer lists us: stay down.
        let peer = MockPeer::new();
        peer.set_members(&node_id(2), vec![]);
        peer.set_members(&node_id(3), vec![]);
        assert!(!should_start(&peer, &me, 1, &meta).await);
    }

    #[tokio::test]
    async fn test_should_stop_requires_current_removal() {
        let peer = MockPeer::new();
        let me = node_id(1);
        let meta = meta_with_nodes("orders", 0, &[node_id(1), node_id(2)]);
        assert!(!should_stop(&peer, &me, 1, &meta).await);
    }

    #[tokio::test]
    async fn test_should_stop_when_fully_removed() {
        let me = node_id(1);
        let mut meta = meta_with_nodes("orders", 0, &[node_id(1), node_id(2), node_id(3)]);
        let my_rid = meta.raft_ids[&me];
        meta.removings.insert(
            me.clone(),
            RemovingInfo {
                remove_replica_id: my_rid,
                remove_time: 1,
            },
        );
        let peer = MockPeer::new();
        peer.set_members(&node_id(2), vec![]);
        peer.set_members(&node_id(3), vec![]);
        assert!(should_stop(&peer, &me, 1, &meta).await);
    }

    #[tokio::test]
    async fn test_should_stop_conservative_on_probe_error() {
        let me = node_id(1);
        let mut meta = meta_with_nodes("orders", 0, &[node_id(1), node_id(2)]);
        let my_rid = meta.raft_ids[&me];
        meta.removings.insert(
            me.clone(),
            RemovingInfo {
                remove_replica_id: my_rid,
                remove_time: 1,
            },
        );
        let peer = MockPeer::new();
        peer.fail_node(&node_id(2));
        assert!(!should_stop(&peer, &me, 1, &meta).await);
    }

    #[tokio::test]
    async fn test_is_me_in_group_first_affirming_peer_wins() {
        let me = node_id(1);
        let meta = meta_with_nodes("orders", 0, &[node_id(1), node_id(2), node_id(3)]);
        let my_rid = meta.raft_ids[&me];
        let peer = MockPeer::new();
        peer.fail_node(&node_id(2));
        peer.set_members(&node_id(3), vec![member(my_rid, 1, &meta)]);
        let (in_group, _) = is_me_in_group(&peer, &me, 1, &meta).await;
        assert!(in_group);
    }

    #[tokio::test]
    async fn test_is_me_in_group_replica_id_must_match() {
        let me = node_id(1);
        let meta = meta_with_nodes("orders", 0, &[node_id(1), node_id(2)]);
        let peer = MockPeer::new();
        // Peer lists our reg id under a different replica id.
        peer.set_members(&node_id(2), vec![member(999, 1, &meta)]);
        let (in_group, err) = is_me_in_group(&peer, &me, 1, &meta).await;
        assert!(!in_group);
        assert!(err.is_none());
    }

    proptest! {
        // Drain completion: a node with a current removal entry and no peer
        // affirming it always reaches stop; any error or affirmation blocks it.
        #[test]
        fn prop_stop_decision(
            removal_current in any::<bool>(),
            stale in any::<bool>(),
            in_group in any::<bool>(),
            errored in any::<bool>(),
        ) {
            let me = node_id(1);
            let mut meta = meta_with_nodes("p", 0, &[node_id(1), node_id(2)]);
            let my_rid = meta.raft_ids[&me];
            if removal_current {
                let rid = if stale { my_rid + 100 } else { my_rid };
                meta.removings.insert(
                    me.clone(),
                    RemovingInfo { remove_replica_id: rid, remove_time: 0 },
                );
            }
            let stop = stop_decision(&meta, &me, in_group, errored);
            let expected = removal_current && !stale && !in_group && !errored;
            prop_assert_eq!(stop, expected);
            // A node never in Removings is never stopped.
            if !removal_current {
                prop_assert!(!stop);
            }
        }
    }
}
