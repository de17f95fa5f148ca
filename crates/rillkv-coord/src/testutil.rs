//! Mock collaborators shared by the coordinator test suites.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rillkv_cluster::error::PeerError;
use rillkv_cluster::member::MemberInfo;
use rillkv_cluster::meta::PartitionMeta;
use rillkv_cluster::node::{NodeId, NodeInfo};
use rillkv_cluster::peer::PeerApi;

use crate::config::{DynamicConf, ReplicaConfig};
use crate::error::CoordError;
use crate::replica::{ReplicaManager, ReplicaNode};

/// Deterministic node descriptor: reg id `n` lives on `10.0.0.n`.
pub(crate) fn node_info(reg_id: u64) -> NodeInfo {
    let mut info = NodeInfo {
        id: String::new(),
        node_ip: format!("10.0.0.{}", reg_id),
        tcp_port: 6380,
        http_port: 6381,
        raft_port: 6382,
        reg_id,
        epoch: 1,
        data_root: format!("/data/rillkv/{}", reg_id),
        rsync_module: "rillkv".to_string(),
    };
    info.id = NodeId::generate(&info).as_str().to_string();
    info
}

pub(crate) fn node_id(reg_id: u64) -> NodeId {
    node_info(reg_id).node_id()
}

/// Meta with all nodes configured, in sync, and replica ids `100 + reg_id`.
pub(crate) fn meta_with_nodes(namespace: &str, partition: u32, nodes: &[NodeId]) -> PartitionMeta {
    PartitionMeta {
        namespace: namespace.to_string(),
        partition,
        replica: nodes.len(),
        partition_num: 4,
        min_gid: 1000,
        eng_type: "rocks".to_string(),
        magic_code: 0,
        raft_nodes: nodes.to_vec(),
        isr: nodes.to_vec(),
        raft_ids: nodes.iter().map(|n| (n.clone(), 100 + n.reg_id())).collect(),
        removings: HashMap::new(),
        epoch: 1,
    }
}

pub(crate) fn member(replica_id: u64, reg_id: u64, meta: &PartitionMeta) -> MemberInfo {
    MemberInfo {
        id: replica_id,
        node_id: reg_id,
        group_id: meta.group_id(),
        group_name: meta.desp(),
        raft_urls: Vec::new(),
    }
}

/// Recording replica node whose observable state tests mutate directly.
#[derive(Debug)]
pub(crate) struct MockReplica {
    desp: String,
    my_replica_id: u64,
    my_reg_id: u64,
    members: Mutex<Vec<MemberInfo>>,
    lead: Mutex<Option<MemberInfo>>,
    ready: AtomicBool,
    synced: AtomicBool,
    need_fix: AtomicBool,
    magic_code: Mutex<i64>,
    started: AtomicBool,
    closed: AtomicBool,
    destroyed: AtomicBool,
    conf_error: Mutex<Option<String>>,
    added: Mutex<Vec<MemberInfo>>,
    removed: Mutex<Vec<MemberInfo>>,
    transfers: Mutex<Vec<(u64, u64)>>,
}

impl MockReplica {
    pub(crate) fn new(desp: &str, my_replica_id: u64, my_reg_id: u64) -> Self {
        Self {
            desp: desp.to_string(),
            my_replica_id,
            my_reg_id,
            members: Mutex::new(Vec::new()),
            lead: Mutex::new(None),
            ready: AtomicBool::new(false),
            synced: AtomicBool::new(false),
            need_fix: AtomicBool::new(false),
            magic_code: Mutex::new(0),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            conf_error: Mutex::new(None),
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_lead(&self, lead: Option<MemberInfo>) {
        *self.lead.lock().expect("lock poisoned") = lead;
    }

    pub(crate) fn push_member(&self, member: MemberInfo) {
        self.members.lock().expect("lock poisoned").push(member);
    }

    pub(crate) fn retain_members(&self, keep: impl Fn(&MemberInfo) -> bool) {
        self.members.lock().expect("lock poisoned").retain(|m| keep(m));
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub(crate) fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    pub(crate) fn set_conf_error(&self, err: &str) {
        *self.conf_error.lock().expect("lock poisoned") = Some(err.to_string());
    }

    pub(crate) fn added(&self) -> Vec<MemberInfo> {
        self.added.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn removed(&self) -> Vec<MemberInfo> {
        self.removed.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn transfers(&self) -> Vec<(u64, u64)> {
        self.transfers.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn magic_code(&self) -> i64 {
        *self.magic_code.lock().expect("lock poisoned")
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn data_need_fix(&self) -> bool {
        self.need_fix.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplicaNode for MockReplica {
    fn get_members(&self) -> Vec<MemberInfo> {
        self.members.lock().expect("lock poisoned").clone()
    }

    fn get_lead_member(&self) -> Option<MemberInfo> {
        self.lead.lock().expect("lock poisoned").clone()
    }

    fn get_local_member_info(&self) -> MemberInfo {
        MemberInfo {
            id: self.my_replica_id,
            node_id: self.my_reg_id,
            group_id: 0,
            group_name: self.desp.clone(),
            raft_urls: Vec::new(),
        }
    }

    fn fill_my_member_info(&self, member: &mut MemberInfo) {
        member.raft_urls = vec![format!("mock://{}", self.my_reg_id)];
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn is_raft_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    fn is_data_need_fix(&self) -> bool {
        self.need_fix.load(Ordering::SeqCst)
    }

    fn set_data_fix_state(&self, need_fix: bool) {
        self.need_fix.store(need_fix, Ordering::SeqCst);
    }

    fn set_magic_code(&self, code: i64) -> Result<(), CoordError> {
        *self.magic_code.lock().expect("lock poisoned") = code;
        Ok(())
    }

    fn set_dynamic_info(&self, _conf: DynamicConf) {}

    fn check_raft_conf(&self, _replica_id: u64, _conf: &ReplicaConfig) -> Result<(), CoordError> {
        match self.conf_error.lock().expect("lock poisoned").as_ref() {
            Some(err) => Err(CoordError::Local(err.clone())),
            None => Ok(()),
        }
    }

    async fn propose_add_member(&self, member: MemberInfo) -> Result<(), CoordError> {
        self.added.lock().expect("lock poisoned").push(member);
        Ok(())
    }

    async fn propose_remove_member(&self, member: MemberInfo) -> Result<(), CoordError> {
        self.removed.lock().expect("lock poisoned").push(member);
        Ok(())
    }

    async fn transfer_leader(&self, to_reg_id: u64, to_replica_id: u64) -> Result<(), CoordError> {
        self.transfers
            .lock()
            .expect("lock poisoned")
            .push((to_reg_id, to_replica_id));
        Ok(())
    }

    async fn start(&self) -> Result<(), CoordError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn destroy(&self) -> Result<(), CoordError> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Namespace manager over a shared map of mock replicas.
pub(crate) struct MockManager {
    my_reg_id: u64,
    replicas: Mutex<HashMap<String, Arc<MockReplica>>>,
    inits: Mutex<Vec<(String, u64)>>,
    magic_checks: Mutex<Vec<(String, i64, bool)>>,
    saved_reg_id: Mutex<Option<u64>>,
    stopped: AtomicBool,
}

impl MockManager {
    pub(crate) fn new(my_reg_id: u64) -> Self {
        Self {
            my_reg_id,
            replicas: Mutex::new(HashMap::new()),
            inits: Mutex::new(Vec::new()),
            magic_checks: Mutex::new(Vec::new()),
            saved_reg_id: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub(crate) fn insert(&self, desp: &str, replica: Arc<MockReplica>) {
        self.replicas
            .lock()
            .expect("lock poisoned")
            .insert(desp.to_string(), replica);
    }

    pub(crate) fn get(&self, desp: &str) -> Option<Arc<MockReplica>> {
        self.replicas.lock().expect("lock poisoned").get(desp).cloned()
    }

    pub(crate) fn inits(&self) -> Vec<(String, u64)> {
        self.inits.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn magic_checks(&self) -> Vec<(String, i64, bool)> {
        self.magic_checks.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn saved_reg_id(&self) -> Option<u64> {
        *self.saved_reg_id.lock().expect("lock poisoned")
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplicaManager for MockManager {
    fn get_replica(&self, desp: &str) -> Option<Arc<dyn ReplicaNode>> {
        self.get(desp).map(|r| r as Arc<dyn ReplicaNode>)
    }

    fn replicas(&self) -> HashMap<String, Arc<dyn ReplicaNode>> {
        self.replicas
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(name, r)| (name.clone(), r.clone() as Arc<dyn ReplicaNode>))
            .collect()
    }

    async fn init_replica(
        &self,
        conf: &ReplicaConfig,
        replica_id: u64,
    ) -> Result<Arc<dyn ReplicaNode>, CoordError> {
        self.inits
            .lock()
            .expect("lock poisoned")
            .push((conf.name.clone(), replica_id));
        let mut replicas = self.replicas.lock().expect("lock poisoned");
        let replica = replicas
            .entry(conf.name.clone())
            .or_insert_with(|| Arc::new(MockReplica::new(&conf.name, replica_id, self.my_reg_id)))
            .clone();
        Ok(replica)
    }

    fn check_magic_code(
        &self,
        desp: &str,
        magic_code: i64,
        try_fix: bool,
    ) -> Result<(), CoordError> {
        self.magic_checks
            .lock()
            .expect("lock poisoned")
            .push((desp.to_string(), magic_code, try_fix));
        Ok(())
    }

    fn save_machine_reg_id(&self, reg_id: u64) -> Result<(), CoordError> {
        *self.saved_reg_id.lock().expect("lock poisoned") = Some(reg_id);
        Ok(())
    }

    async fn start(&self) {}

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Peer client answering from per-host canned member listings.
pub(crate) struct MockPeer {
    members: Mutex<HashMap<String, Result<Vec<MemberInfo>, ()>>>,
    added: Mutex<Vec<(String, MemberInfo)>>,
}

impl MockPeer {
    pub(crate) fn new() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            added: Mutex::new(Vec::new()),
        }
    }

    fn host_of(node: &NodeId) -> String {
        node.endpoint().expect("test node id").host
    }

    pub(crate) fn set_members(&self, node: &NodeId, members: Vec<MemberInfo>) {
        self.members
            .lock()
            .expect("lock poisoned")
            .insert(Self::host_of(node), Ok(members));
    }

    pub(crate) fn fail_node(&self, node: &NodeId) {
        self.members
            .lock()
            .expect("lock poisoned")
            .insert(Self::host_of(node), Err(()));
    }

    pub(crate) fn added(&self) -> Vec<(String, MemberInfo)> {
        self.added.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl PeerApi for MockPeer {
    async fn get_members(
        &self,
        host: &str,
        _http_port: u16,
        _desp: &str,
    ) -> Result<Vec<MemberInfo>, PeerError> {
        match self.members.lock().expect("lock poisoned").get(host) {
            Some(Ok(members)) => Ok(members.clone()),
            Some(Err(())) => Err(PeerError::Transport(format!("{} unreachable", host))),
            None => Err(PeerError::Transport(format!("{} not configured", host))),
        }
    }

    async fn add_node(
        &self,
        host: &str,
        _http_port: u16,
        member: &MemberInfo,
    ) -> Result<(), PeerError> {
        self.added
            .lock()
            .expect("lock poisoned")
            .push((host.to_string(), member.clone()));
        Ok(())
    }
}
