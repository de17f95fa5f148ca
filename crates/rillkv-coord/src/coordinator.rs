//! The coordinator facade and its serial reconciliation loop.
//!
//! One worker runs every `do_work` pass; it is fed by a periodic tick, a
//! debounced single-slot nudge, and the registry's namespace-changed
//! notifications. A second worker follows placement-driver leader changes.
//! Shutdown drains leadership away from this node before unregistering.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use rillkv_cluster::error::RegistryError;
use rillkv_cluster::meta::{sort_partitions, split_desp, PartitionMeta};
use rillkv_cluster::node::{NodeId, NodeInfo};
use rillkv_cluster::peer::PeerApi;
use rillkv_cluster::registry::Registry;

use crate::config::DynamicConf;
use crate::error::CoordError;
use crate::join::{self, JoinCtx};
use crate::lifecycle;
use crate::options::CoordOptions;
use crate::predicates;
use crate::reconciler::{self, ReconcileCtx, ReconcileOutcome};
use crate::replica::{ReplicaManager, ReplicaNode};
use crate::stats::{CoordStats, IsrStat, NamespaceCoordStat};

/// Where a replica can pull a snapshot from: one entry per ISR node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSyncInfo {
    /// Registry-issued id of the source node.
    pub reg_id: u64,
    /// Source node's data root directory.
    pub data_root: String,
    /// Replica id the source hosts for this partition.
    pub replica_id: u64,
    /// Source node's address.
    pub remote_addr: String,
    /// Source node's HTTP API port.
    pub http_port: u16,
    /// Rsync module exported by the source.
    pub rsync_module: String,
}

/// Debounced single-slot retry queue. Scheduling sleeps briefly to coalesce
/// bursts, then posts without blocking; a full slot drops the post.
pub(crate) struct NudgeHandle {
    tx: mpsc::Sender<()>,
    delay: Duration,
}

impl NudgeHandle {
    pub(crate) fn new(tx: mpsc::Sender<()>, delay: Duration) -> Self {
        Self { tx, delay }
    }

    pub(crate) fn schedule(&self) {
        let tx = self.tx.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.try_send(());
        });
    }
}

/// The per-node coordinator: reconciles local replicas with the cluster's
/// authoritative placement.
pub struct DataCoordinator {
    cluster_key: String,
    my_node: RwLock<NodeInfo>,
    registry: Arc<dyn Registry>,
    peer: Arc<dyn PeerApi>,
    replica_mgr: Arc<dyn ReplicaManager>,
    opts: CoordOptions,
    pd_leader: Mutex<NodeInfo>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    nudge: NudgeHandle,
    nudge_rx: Mutex<Option<mpsc::Receiver<()>>>,
    stopping: AtomicBool,
    catchup_running: AtomicI64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DataCoordinator {
    /// Builds a coordinator. Nothing runs until [`DataCoordinator::start`].
    pub fn new(
        cluster_key: impl Into<String>,
        my_node: NodeInfo,
        registry: Arc<dyn Registry>,
        peer: Arc<dyn PeerApi>,
        replica_mgr: Arc<dyn ReplicaManager>,
        opts: CoordOptions,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (nudge_tx, nudge_rx) = mpsc::channel(1);
        let nudge = NudgeHandle::new(nudge_tx, opts.nudge_delay);
        Self {
            cluster_key: cluster_key.into(),
            my_node: RwLock::new(my_node),
            registry,
            peer,
            replica_mgr,
            opts,
            pd_leader: Mutex::new(NodeInfo::default()),
            stop_tx,
            stop_rx,
            nudge,
            nudge_rx: Mutex::new(Some(nudge_rx)),
            stopping: AtomicBool::new(false),
            catchup_running: AtomicI64::new(0),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// This node's stable id.
    pub fn my_id(&self) -> NodeId {
        self.my_node.read().expect("lock poisoned").node_id()
    }

    /// This node's registry-issued id.
    pub fn my_reg_id(&self) -> u64 {
        self.my_node.read().expect("lock poisoned").reg_id
    }

    /// The placement-driver leader as last observed.
    pub fn current_pd_leader(&self) -> NodeInfo {
        self.pd_leader.lock().expect("lock poisoned").clone()
    }

    /// All placement-driver nodes known to the registry.
    pub async fn all_pd_nodes(&self) -> Result<Vec<NodeInfo>, CoordError> {
        Ok(self.registry.get_all_pd_nodes().await?)
    }

    /// Binds this node to the cluster: scopes the registry, allocates and
    /// persists a registration id on first run, and derives the node id.
    pub async fn init_register_id(&self) -> Result<(), CoordError> {
        self.registry.init_cluster_id(&self.cluster_key);
        let mut node = self.my_node.read().expect("lock poisoned").clone();
        if node.reg_id == 0 {
            node.reg_id = self.registry.new_register_node_id().await.map_err(|err| {
                error!(%err, "failed to init node register id");
                CoordError::from(err)
            })?;
            self.replica_mgr.save_machine_reg_id(node.reg_id).map_err(|err| {
                error!(%err, "failed to save register id");
                err
            })?;
        }
        node.id = NodeId::generate(&node).as_str().to_string();
        info!(reg_id = node.reg_id, "node starting with register id");
        *self.my_node.write().expect("lock poisoned") = node;
        Ok(())
    }

    /// Registers this node and brings up the reconciliation workers. Fails
    /// hard when the registration id is unassigned or the initial load
    /// errors.
    pub async fn start(self: &Arc<Self>) -> Result<(), CoordError> {
        let node = self.my_node.read().expect("lock poisoned").clone();
        if node.reg_id == 0 {
            error!("invalid register id for data node");
            return Err(CoordError::InvalidRegId);
        }
        self.registry.register(&node).await.map_err(|err| {
            warn!(%err, "failed to register coordinator");
            CoordError::from(err)
        })?;
        self.replica_mgr.start().await;

        let (pd_tx, pd_rx) = mpsc::channel(4);
        {
            let registry = self.registry.clone();
            let stop = self.stop_rx.clone();
            let handle = tokio::spawn(async move { registry.watch_pd_leader(pd_tx, stop).await });
            self.workers.lock().expect("lock poisoned").push(handle);
        }
        {
            let this = self.clone();
            let handle = tokio::spawn(async move { this.forward_pd_leader(pd_rx).await });
            self.workers.lock().expect("lock poisoned").push(handle);
        }

        if let Err(err) = self.load_local().await {
            let _ = self.stop_tx.send(true);
            return Err(err);
        }

        let nudge_rx = self.nudge_rx.lock().expect("lock poisoned").take();
        if let Some(nudge_rx) = nudge_rx {
            let this = self.clone();
            let ns_rx = self.registry.namespaces_notify_rx();
            let handle = tokio::spawn(async move { this.run_main_loop(nudge_rx, ns_rx).await });
            self.workers.lock().expect("lock poisoned").push(handle);
        }
        Ok(())
    }

    /// Drains leadership away, stops the replica manager, unregisters, and
    /// waits for every worker. Idempotent; never fails.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.prepare_leaving().await;
        let _ = self.stop_tx.send(true);
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().expect("lock poisoned");
            guard.drain(..).collect()
        };
        for handle in workers {
            let _ = handle.await;
        }
    }

    async fn forward_pd_leader(&self, mut rx: mpsc::Receiver<NodeInfo>) {
        while let Some(leader) = rx.recv().await {
            let mut pd = self.pd_leader.lock().expect("lock poisoned");
            if pd.id != leader.id || pd.epoch != leader.epoch {
                info!(leader = %leader.id, epoch = leader.epoch, "pd leader changed");
                *pd = leader;
            }
        }
    }

    async fn run_main_loop(
        self: Arc<Self>,
        mut nudge_rx: mpsc::Receiver<()>,
        mut ns_rx: broadcast::Receiver<()>,
    ) {
        let mut stop_rx = self.stop_rx.clone();
        let mut ticker = tokio::time::interval(self.opts.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; the initial load already ran.
        ticker.tick().await;
        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => self.do_work().await,
                recv = nudge_rx.recv() => {
                    if recv.is_none() {
                        return;
                    }
                    self.do_work().await;
                }
                recv = ns_rx.recv() => {
                    match recv {
                        // Lossy notifications are fine: a pass reconciles
                        // everything regardless of how many changes queued.
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            self.do_work().await
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    /// One full reconciliation pass: load wanted partitions, then walk the
    /// running replicas against current meta.
    pub(crate) async fn do_work(&self) {
        if let Err(err) = self.load_local().await {
            info!(%err, "loading local partitions failed");
        }

        let my_id = self.my_id();
        let my_reg_id = self.my_reg_id();
        let mut names: Vec<String> = self.replica_mgr.replicas().into_keys().collect();
        names.sort();
        for name in names {
            let Some(replica) = self.replica_mgr.get_replica(&name) else {
                continue;
            };
            let Some((namespace, partition)) = split_desp(&name) else {
                warn!(partition = %name, "invalid partition name");
                continue;
            };
            let meta = match self.registry.get_namespace_part(namespace, partition).await {
                Ok(meta) => meta,
                Err(RegistryError::NotFound) => {
                    info!(partition = %name, "partition gone from registry, should be cleaned");
                    if let Err(RegistryError::NotFound) =
                        self.registry.get_namespace_meta(namespace).await
                    {
                        if let Err(err) = lifecycle::remove_from_raft(Some(&replica), true).await {
                            info!(partition = %name, %err, "remove from group failed");
                        }
                        lifecycle::force_remove(&replica).await;
                    }
                    self.nudge.schedule();
                    continue;
                }
                Err(_) => {
                    self.nudge.schedule();
                    continue;
                }
            };

            if predicates::should_stop(self.peer.as_ref(), &my_id, my_reg_id, &meta).await {
                lifecycle::force_remove(&replica).await;
                continue;
            }

            let ctx = ReconcileCtx {
                registry: self.registry.as_ref(),
                my_id: &my_id,
                my_reg_id,
            };
            if let ReconcileOutcome::MemberSynced {
                needs_recheck: true,
                ..
            } = reconciler::reconcile_running(&ctx, &meta, &replica).await
            {
                self.nudge.schedule();
            }
        }
    }

    /// Loads every partition this node should host, joining each replica to
    /// its group. Partitions of one namespace run in ascending order and a
    /// join failure aborts the namespace's remaining partitions for this
    /// pass.
    pub(crate) async fn load_local(&self) -> Result<(), CoordError> {
        let namespaces = match self.registry.get_all_namespaces().await {
            Ok(map) => map,
            Err(RegistryError::NotFound) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let my_id = self.my_id();
        let my_reg_id = self.my_reg_id();
        for (ns_name, parts) in namespaces {
            if ns_name.is_empty() {
                continue;
            }
            let mut sorted: Vec<PartitionMeta> = parts.into_values().collect();
            sort_partitions(&mut sorted);
            for meta in sorted {
                let desp = meta.desp();
                let local = self.replica_mgr.get_replica(&desp);
                let should_start =
                    predicates::should_start(self.peer.as_ref(), &my_id, my_reg_id, &meta).await;
                if !should_start {
                    if meta.isr.len() >= meta.replica {
                        if let Some(replica) = &local {
                            if let Err(err) =
                                lifecycle::remove_from_raft(Some(replica), true).await
                            {
                                info!(partition = %desp, %err, "remove from group failed");
                            }
                        }
                    }
                    continue;
                }
                if let Some(replica) = local {
                    // Already loaded; just make sure it is in its group.
                    match self.ensure_join(&meta, &replica).await {
                        Err(err) if err != CoordError::ConfInvalid => break,
                        _ => {}
                    }
                    continue;
                }
                info!(partition = %desp, "loading partition");
                if let Err(err) = self.check_local_magic_code(&meta, true) {
                    error!(partition = %desp, %err, "partition magic code check failed");
                    continue;
                }
                let my_node = self.my_node.read().expect("lock poisoned").clone();
                let replica = match lifecycle::update_local_namespace(
                    self.replica_mgr.as_ref(),
                    self.registry.as_ref(),
                    &my_node,
                    &meta,
                )
                .await
                {
                    Ok(replica) => replica,
                    Err(err) => {
                        error!(partition = %desp, %err, "failed to init local partition");
                        continue;
                    }
                };
                replica.set_dynamic_info(DynamicConf::default());
                if let Err(err) = self.check_and_fix_local_data(&meta, &replica) {
                    error!(partition = %desp, %err, "local partition data needs fix");
                    replica.set_data_fix_state(true);
                }
                match self.ensure_join(&meta, &replica).await {
                    Err(err) if err != CoordError::ConfInvalid => break,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    async fn ensure_join(
        &self,
        meta: &PartitionMeta,
        replica: &Arc<dyn ReplicaNode>,
    ) -> Result<(), CoordError> {
        let my_id = self.my_id();
        let ctx = JoinCtx {
            my_id: &my_id,
            my_reg_id: self.my_reg_id(),
            peer: self.peer.as_ref(),
            opts: &self.opts,
            catchup_running: &self.catchup_running,
            stop_rx: &self.stop_rx,
            nudge: &self.nudge,
        };
        join::ensure_join_group(&ctx, meta, replica).await
    }

    fn check_local_magic_code(
        &self,
        meta: &PartitionMeta,
        try_fix: bool,
    ) -> Result<(), CoordError> {
        if meta.magic_code <= 0 {
            return Ok(());
        }
        self.replica_mgr
            .check_magic_code(&meta.desp(), meta.magic_code, try_fix)
            .map_err(|err| {
                info!(partition = %meta.desp(), %err, "magic code check error");
                err
            })
    }

    // Hook for local data verification before a replica rejoins; a failure
    // here flags the replica for repair.
    fn check_and_fix_local_data(
        &self,
        _meta: &PartitionMeta,
        _replica: &Arc<dyn ReplicaNode>,
    ) -> Result<(), CoordError> {
        Ok(())
    }

    /// Hands leadership of every locally-led partition to another ISR
    /// member, then stops the replica manager and unregisters. Best-effort:
    /// errors are logged, shutdown proceeds.
    async fn prepare_leaving(&self) {
        info!("preparing to leave the cluster");
        let my_id = self.my_id();
        let my_reg_id = self.my_reg_id();
        if let Ok(namespaces) = self.registry.get_all_namespaces().await {
            for parts in namespaces.into_values() {
                for meta in parts.into_values() {
                    if !meta.raft_nodes.contains(&my_id) {
                        continue;
                    }
                    let Some(replica) = self.replica_mgr.get_replica(&meta.desp()) else {
                        continue;
                    };
                    let leader = replica.get_lead_member().map(|m| m.node_id).unwrap_or(0);
                    if leader != my_reg_id {
                        continue;
                    }
                    for new_leader in &meta.isr {
                        if new_leader == &my_id {
                            continue;
                        }
                        reconciler::transfer_my_leader(&meta, &replica, new_leader).await;
                        break;
                    }
                }
            }
        }
        info!("prepare leaving finished");
        self.replica_mgr.stop().await;
        let node = self.my_node.read().expect("lock poisoned").clone();
        if let Err(err) = self.registry.unregister(&node).await {
            warn!(%err, "failed to unregister");
        }
        self.registry.stop().await;
    }

    /// Reports intended group membership for one partition, or for every
    /// partition of the namespace when `partition` is `None`.
    pub async fn stats(&self, namespace: &str, partition: Option<u32>) -> CoordStats {
        let mut stats = CoordStats::default();
        if namespace.is_empty() {
            return stats;
        }
        let meta = match self.registry.get_namespace_meta(namespace).await {
            Ok(meta) => meta,
            Err(err) => {
                info!(%namespace, %err, "failed to get namespace meta");
                return stats;
            }
        };
        let partitions: Vec<u32> = match partition {
            Some(p) => vec![p],
            None => (0..meta.partition_num).collect(),
        };
        for p in partitions {
            let Ok(part) = self.registry.get_namespace_part(namespace, p).await else {
                continue;
            };
            let mut stat = NamespaceCoordStat {
                name: namespace.to_string(),
                partition: part.partition,
                isr_stats: Vec::new(),
            };
            for nid in &part.raft_nodes {
                stat.isr_stats.push(IsrStat {
                    hostname: String::new(),
                    node_id: nid.clone(),
                });
            }
            stats.ns_coord_stats.push(stat);
        }
        stats
    }

    /// Where a replica of `full_name` can pull a snapshot from: one source
    /// descriptor per resolvable ISR node.
    pub async fn snapshot_sync_info(
        &self,
        full_name: &str,
    ) -> Result<Vec<SnapshotSyncInfo>, CoordError> {
        let Some((namespace, partition)) = split_desp(full_name) else {
            warn!(partition = %full_name, "invalid partition name");
            return Ok(Vec::new());
        };
        let meta = self.registry.get_namespace_part(namespace, partition).await?;
        let mut list = Vec::new();
        for nid in &meta.isr {
            let Ok(info) = self.registry.get_node_info(nid).await else {
                continue;
            };
            list.push(SnapshotSyncInfo {
                reg_id: info.reg_id,
                data_root: info.data_root,
                replica_id: meta.raft_ids.get(nid).copied().unwrap_or(0),
                remote_addr: info.node_ip,
                http_port: info.http_port,
                rsync_module: info.rsync_module,
            });
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{member, meta_with_nodes, node_id, node_info, MockManager, MockPeer, MockReplica};
    use rillkv_cluster::mem_registry::MemRegistry;
    use rillkv_cluster::meta::{NamespaceMeta, RemovingInfo};

    struct CoordFixture {
        registry: Arc<MemRegistry>,
        peer: Arc<MockPeer>,
        manager: Arc<MockManager>,
        coord: Arc<DataCoordinator>,
    }

    fn coord_fixture(my_reg_id: u64) -> CoordFixture {
        let registry = Arc::new(MemRegistry::new());
        let peer = Arc::new(MockPeer::new());
        let manager = Arc::new(MockManager::new(my_reg_id));
        let coord = Arc::new(DataCoordinator::new(
            "test-cluster",
            node_info(my_reg_id),
            registry.clone() as Arc<dyn Registry>,
            peer.clone() as Arc<dyn PeerApi>,
            manager.clone() as Arc<dyn ReplicaManager>,
            CoordOptions::fast(),
        ));
        CoordFixture {
            registry,
            peer,
            manager,
            coord,
        }
    }

    fn register_nodes(f: &CoordFixture, regs: &[u64]) {
        for &reg in regs {
            f.registry.put_node_info(node_info(reg));
        }
    }

    #[tokio::test]
    async fn test_fresh_join_creates_and_requests() {
        // Replica=3, nodes 1..3, self is node 3 with no local replica yet.
        let f = coord_fixture(3);
        register_nodes(&f, &[1, 2, 3]);
        let mut meta =
            meta_with_nodes("orders", 0, &[node_id(1), node_id(2), node_id(3)]);
        meta.magic_code = 777;
        f.registry.set_partition(meta.clone());

        f.coord.load_local().await.unwrap();

        let my_rid = meta.raft_ids[&node_id(3)];
        assert_eq!(f.manager.inits(), vec![("orders-0".to_string(), my_rid)]);
        assert_eq!(
            f.manager.magic_checks(),
            vec![("orders-0".to_string(), 777, true)]
        );
        let replica = f.manager.get("orders-0").expect("replica created");
        assert!(replica.is_started());
        assert_eq!(replica.magic_code(), 777);
        // The join posted to one of the other ISR nodes.
        let added = f.peer.added();
        assert!(!added.is_empty());
        assert!(added
            .iter()
            .all(|(host, _)| host == "10.0.0.1" || host == "10.0.0.2"));
        assert!(added.iter().all(|(_, m)| m.id == my_rid && m.node_id == 3));
    }

    #[tokio::test]
    async fn test_preferred_leader_transfer_via_do_work() {
        // Self (node 1) leads but the balancer wants node 2 in front.
        let f = coord_fixture(1);
        register_nodes(&f, &[1, 2, 3]);
        let mut meta =
            meta_with_nodes("orders", 0, &[node_id(1), node_id(2), node_id(3)]);
        meta.isr = vec![node_id(2), node_id(1), node_id(3)];
        f.registry.set_partition(meta.clone());

        let my_rid = meta.raft_ids[&node_id(1)];
        let mock = Arc::new(MockReplica::new("orders-0", my_rid, 1));
        mock.set_lead(Some(member(my_rid, 1, &meta)));
        mock.set_synced(true);
        for reg in [1u64, 2, 3] {
            mock.push_member(member(meta.raft_ids[&node_id(reg)], reg, &meta));
        }
        f.manager.insert("orders-0", mock.clone());

        f.coord.do_work().await;

        assert_eq!(mock.transfers(), vec![(2, meta.raft_ids[&node_id(2)])]);
        assert!(mock.added().is_empty());
        assert!(mock.removed().is_empty());
    }

    #[tokio::test]
    async fn test_drain_removes_then_destroys() {
        // Self is fully drained: marked removing, no peer still lists it.
        let f = coord_fixture(1);
        register_nodes(&f, &[1, 2, 3]);
        let mut meta =
            meta_with_nodes("orders", 0, &[node_id(1), node_id(2), node_id(3)]);
        meta.replica = 2;
        meta.isr = vec![node_id(2), node_id(3)];
        let my_rid = meta.raft_ids[&node_id(1)];
        meta.removings.insert(
            node_id(1),
            RemovingInfo {
                remove_replica_id: my_rid,
                remove_time: 1,
            },
        );
        f.registry.set_partition(meta.clone());
        f.peer.set_members(&node_id(2), vec![]);
        f.peer.set_members(&node_id(3), vec![]);

        let mock = Arc::new(MockReplica::new("orders-0", my_rid, 1));
        mock.set_ready(true);
        f.manager.insert("orders-0", mock.clone());

        f.coord.do_work().await;

        // Proposed removing self (with data), then destroyed the replica.
        assert_eq!(mock.removed().len(), 1);
        assert_eq!(mock.removed()[0].id, my_rid);
        assert!(mock.is_destroyed());
    }

    #[tokio::test]
    async fn test_registry_deletion_cleans_replica() {
        let f = coord_fixture(1);
        let mock = Arc::new(MockReplica::new("ghosts-0", 101, 1));
        mock.set_ready(true);
        f.manager.insert("ghosts-0", mock.clone());

        f.coord.do_work().await;

        assert_eq!(mock.removed().len(), 1);
        assert!(mock.is_destroyed());
    }

    #[tokio::test]
    async fn test_partition_kept_while_namespace_meta_remains() {
        // Partition record gone but the namespace meta still exists: no
        // destroy yet, just a scheduled recheck.
        let f = coord_fixture(1);
        f.registry.set_namespace_meta(
            "ghosts",
            NamespaceMeta {
                partition_num: 1,
                replica: 3,
                ..Default::default()
            },
        );
        let mock = Arc::new(MockReplica::new("ghosts-0", 101, 1));
        mock.set_ready(true);
        f.manager.insert("ghosts-0", mock.clone());

        f.coord.do_work().await;

        assert!(mock.removed().is_empty());
        assert!(!mock.is_destroyed());
    }

    #[tokio::test]
    async fn test_init_register_id_assigns_and_persists() {
        let registry = Arc::new(MemRegistry::new());
        let peer = Arc::new(MockPeer::new());
        let manager = Arc::new(MockManager::new(0));
        let mut fresh = node_info(0);
        fresh.reg_id = 0;
        let coord = Arc::new(DataCoordinator::new(
            "test-cluster",
            fresh,
            registry.clone() as Arc<dyn Registry>,
            peer as Arc<dyn PeerApi>,
            manager.clone() as Arc<dyn ReplicaManager>,
            CoordOptions::fast(),
        ));

        coord.init_register_id().await.unwrap();
        let reg_id = coord.my_reg_id();
        assert!(reg_id > 0);
        assert_eq!(manager.saved_reg_id(), Some(reg_id));
        assert_eq!(coord.my_id().reg_id(), reg_id);
    }

    #[tokio::test]
    async fn test_start_requires_reg_id() {
        let registry = Arc::new(MemRegistry::new());
        let peer = Arc::new(MockPeer::new());
        let manager = Arc::new(MockManager::new(0));
        let mut fresh = node_info(0);
        fresh.reg_id = 0;
        let coord = Arc::new(DataCoordinator::new(
            "test-cluster",
            fresh,
            registry as Arc<dyn Registry>,
            peer as Arc<dyn PeerApi>,
            manager as Arc<dyn ReplicaManager>,
            CoordOptions::fast(),
        ));
        assert_eq!(coord.start().await.unwrap_err(), CoordError::InvalidRegId);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let f = coord_fixture(1);
        f.coord.start().await.unwrap();
        assert!(f.registry.is_registered(&f.coord.my_id()));

        f.coord.stop().await;
        assert!(!f.registry.is_registered(&f.coord.my_id()));
        assert_eq!(f.registry.unregister_count(), 1);
        assert!(f.manager.is_stopped());
        assert!(f.coord.workers.lock().expect("lock poisoned").is_empty());

        // Idempotent: a second stop does not unregister again.
        f.coord.stop().await;
        assert_eq!(f.registry.unregister_count(), 1);
    }

    #[tokio::test]
    async fn test_drain_transfers_leadership_on_stop() {
        let f = coord_fixture(1);
        register_nodes(&f, &[1, 2, 3]);
        let meta = meta_with_nodes("orders", 0, &[node_id(1), node_id(2), node_id(3)]);
        f.registry.set_partition(meta.clone());

        let my_rid = meta.raft_ids[&node_id(1)];
        let mock = Arc::new(MockReplica::new("orders-0", my_rid, 1));
        mock.set_lead(Some(member(my_rid, 1, &meta)));
        mock.set_synced(true);
        for reg in [1u64, 2, 3] {
            mock.push_member(member(meta.raft_ids[&node_id(reg)], reg, &meta));
        }
        f.manager.insert("orders-0", mock.clone());

        f.coord.start().await.unwrap();
        f.coord.stop().await;

        // Leadership went to the first ISR member that is not self.
        assert_eq!(mock.transfers(), vec![(2, meta.raft_ids[&node_id(2)])]);
    }

    #[tokio::test]
    async fn test_pd_leader_watch_updates() {
        let f = coord_fixture(1);
        f.coord.start().await.unwrap();

        let mut leader = node_info(9);
        leader.epoch = 5;
        f.registry.set_pd_leader(leader.clone());

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            if f.coord.current_pd_leader().epoch == 5 {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "pd leader never observed"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.coord.current_pd_leader().id, leader.id);

        f.coord.stop().await;
    }

    #[tokio::test]
    async fn test_stats_shapes() {
        let f = coord_fixture(1);
        f.registry.set_namespace_meta(
            "orders",
            NamespaceMeta {
                partition_num: 2,
                replica: 3,
                ..Default::default()
            },
        );
        for p in 0..2 {
            f.registry.set_partition(meta_with_nodes(
                "orders",
                p,
                &[node_id(1), node_id(2), node_id(3)],
            ));
        }

        let all = f.coord.stats("orders", None).await;
        assert_eq!(all.ns_coord_stats.len(), 2);
        assert_eq!(all.ns_coord_stats[0].isr_stats.len(), 3);

        let one = f.coord.stats("orders", Some(1)).await;
        assert_eq!(one.ns_coord_stats.len(), 1);
        assert_eq!(one.ns_coord_stats[0].partition, 1);

        let none = f.coord.stats("", None).await;
        assert!(none.ns_coord_stats.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_sync_info() {
        let f = coord_fixture(1);
        register_nodes(&f, &[1, 2]);
        let meta = meta_with_nodes("orders", 0, &[node_id(1), node_id(2)]);
        f.registry.set_partition(meta.clone());

        let list = f.coord.snapshot_sync_info("orders-0").await.unwrap();
        assert_eq!(list.len(), 2);
        let first = list.iter().find(|s| s.reg_id == 1).expect("self entry");
        assert_eq!(first.replica_id, meta.raft_ids[&node_id(1)]);
        assert_eq!(first.remote_addr, "10.0.0.1");
        assert_eq!(first.http_port, 6381);
        assert!(!first.data_root.is_empty());

        // Unresolvable ISR nodes are skipped, bad names yield nothing.
        assert!(f
            .coord
            .snapshot_sync_info("nodash")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_load_local_skips_unlisted_partition() {
        // Self is not in the configuration at all: nothing is created.
        let f = coord_fixture(9);
        register_nodes(&f, &[1, 2, 3, 9]);
        f.registry
            .set_partition(meta_with_nodes("orders", 0, &[node_id(1), node_id(2), node_id(3)]));

        f.coord.load_local().await.unwrap();
        assert!(f.manager.inits().is_empty());
        assert!(f.manager.get("orders-0").is_none());
    }
}
