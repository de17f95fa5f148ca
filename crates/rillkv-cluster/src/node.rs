//! Node identity: static node descriptors and the stable node id string.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RegistryError;

/// Suffix appended to generated data-node ids.
const DATANODE_SUFFIX: &str = "datanode";

/// Static description of one cluster node as published in the registry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Generated stable id string, empty until [`NodeId::generate`] ran.
    pub id: String,
    /// Address the node listens on.
    pub node_ip: String,
    /// Client protocol port.
    pub tcp_port: u16,
    /// HTTP API port (peer membership/join calls).
    pub http_port: u16,
    /// Raft transport port.
    pub raft_port: u16,
    /// Registry-issued monotonic id; 0 until assigned, never changes after.
    pub reg_id: u64,
    /// Registry version of this record.
    pub epoch: u64,
    /// Root directory of this node's data, used for snapshot pulls.
    pub data_root: String,
    /// Rsync module name exported for snapshot transfer.
    pub rsync_module: String,
}

impl NodeInfo {
    /// The raft transport address peers dial for consensus traffic.
    pub fn raft_transport_addr(&self) -> String {
        format!("http://{}:{}", self.node_ip, self.raft_port)
    }

    /// The stable node id for this descriptor.
    pub fn node_id(&self) -> NodeId {
        NodeId(self.id.clone())
    }
}

/// Stable string identity of a node:
/// `"{ip}:{tcp}:{http}:{raft}:{reg_id}-datanode"`.
///
/// The string form is what the registry stores in partition metadata
/// (`RaftNodes`, `ISR`, `RaftIDs` keys), so it doubles as a map key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

/// Network endpoint parsed out of a [`NodeId`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEndpoint {
    /// Host or IP address.
    pub host: String,
    /// Client protocol port.
    pub tcp_port: u16,
    /// HTTP API port.
    pub http_port: u16,
    /// Raft transport port.
    pub raft_port: u16,
}

impl NodeId {
    /// Wraps an already-generated id string.
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Generates the stable id for a node descriptor.
    pub fn generate(info: &NodeInfo) -> Self {
        NodeId(format!(
            "{}:{}:{}:{}:{}-{}",
            info.node_ip,
            info.tcp_port,
            info.http_port,
            info.raft_port,
            info.reg_id,
            DATANODE_SUFFIX
        ))
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the registry-issued id embedded in this node id.
    ///
    /// Returns 0 for malformed ids; membership comparisons against reg id 0
    /// never match a live member.
    pub fn reg_id(&self) -> u64 {
        let body = self.0.split('-').next().unwrap_or("");
        body.split(':')
            .nth(4)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Parses the host and port fields out of this id.
    pub fn endpoint(&self) -> Result<NodeEndpoint, RegistryError> {
        let body = self.0.split('-').next().unwrap_or("");
        let fields: Vec<&str> = body.split(':').collect();
        if fields.len() != 5 {
            return Err(RegistryError::InvalidNodeId(self.0.clone()));
        }
        let parse_port = |s: &str| {
            s.parse::<u16>()
                .map_err(|_| RegistryError::InvalidNodeId(self.0.clone()))
        };
        Ok(NodeEndpoint {
            host: fields[0].to_string(),
            tcp_port: parse_port(fields[1])?,
            http_port: parse_port(fields[2])?,
            raft_port: parse_port(fields[3])?,
        })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> NodeInfo {
        NodeInfo {
            id: String::new(),
            node_ip: "10.0.0.7".to_string(),
            tcp_port: 6380,
            http_port: 6381,
            raft_port: 6382,
            reg_id: 42,
            epoch: 3,
            data_root: "/data/rillkv".to_string(),
            rsync_module: "rillkv".to_string(),
        }
    }

    #[test]
    fn test_generate_and_parse() {
        let info = sample_info();
        let id = NodeId::generate(&info);
        assert_eq!(id.as_str(), "10.0.0.7:6380:6381:6382:42-datanode");
        assert_eq!(id.reg_id(), 42);

        let ep = id.endpoint().unwrap();
        assert_eq!(ep.host, "10.0.0.7");
        assert_eq!(ep.tcp_port, 6380);
        assert_eq!(ep.http_port, 6381);
        assert_eq!(ep.raft_port, 6382);
    }

    #[test]
    fn test_malformed_id_reg_id_is_zero() {
        let id = NodeId::new("garbage");
        assert_eq!(id.reg_id(), 0);
        assert!(id.endpoint().is_err());
    }

    #[test]
    fn test_malformed_port_rejected() {
        let id = NodeId::new("10.0.0.7:notaport:6381:6382:42-datanode");
        assert!(matches!(
            id.endpoint(),
            Err(RegistryError::InvalidNodeId(_))
        ));
    }

    #[test]
    fn test_raft_transport_addr() {
        let info = sample_info();
        assert_eq!(info.raft_transport_addr(), "http://10.0.0.7:6382");
    }

    #[test]
    fn test_node_id_roundtrip_through_info() {
        let mut info = sample_info();
        info.id = NodeId::generate(&info).as_str().to_string();
        assert_eq!(info.node_id().reg_id(), 42);
    }
}
