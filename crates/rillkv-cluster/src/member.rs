//! Raft member descriptor exchanged over the peer HTTP API.

use serde::{Deserialize, Serialize};

/// One member of a replication group, as reported by
/// `GET /cluster/members/{desp}` and posted to `POST /cluster/addnode`.
///
/// Field names on the wire are the cluster's canonical JSON form.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Replica id, unique within the group.
    #[serde(rename = "ID")]
    pub id: u64,
    /// Registry-issued id of the node hosting this replica.
    #[serde(rename = "NodeID")]
    pub node_id: u64,
    /// Replication group id.
    #[serde(rename = "GroupID")]
    pub group_id: u64,
    /// Replication group name (the partition desp).
    #[serde(rename = "GroupName")]
    pub group_name: String,
    /// Raft transport URLs for this member.
    #[serde(rename = "RaftURLs")]
    pub raft_urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let m = MemberInfo {
            id: 3,
            node_id: 42,
            group_id: 1003,
            group_name: "orders-3".to_string(),
            raft_urls: vec!["http://10.0.0.7:6382".to_string()],
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["ID"], 3);
        assert_eq!(json["NodeID"], 42);
        assert_eq!(json["GroupID"], 1003);
        assert_eq!(json["GroupName"], "orders-3");
        assert_eq!(json["RaftURLs"][0], "http://10.0.0.7:6382");
    }

    #[test]
    fn test_decode_roundtrip() {
        let raw = r#"{"ID":1,"NodeID":7,"GroupID":11,"GroupName":"ns-0","RaftURLs":[]}"#;
        let m: MemberInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(m.id, 1);
        assert_eq!(m.node_id, 7);
        assert_eq!(serde_json::from_str::<MemberInfo>(&serde_json::to_string(&m).unwrap()).unwrap(), m);
    }
}
