//! HTTP client for the peer data-node API.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::PeerError;
use crate::member::MemberInfo;

/// Path serving a group's member listing, suffixed with `/{desp}`.
pub const API_GET_MEMBERS: &str = "/cluster/members";
/// Path accepting a join request carrying one [`MemberInfo`].
pub const API_ADD_NODE: &str = "/cluster/addnode";

/// Default deadline for every peer call. Retry lives in the outer
/// reconciliation passes, not here.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(3);

/// Peer data-node calls consumed by the coordinator.
#[async_trait]
pub trait PeerApi: Send + Sync {
    /// Fetches the member listing a peer reports for one group.
    async fn get_members(
        &self,
        host: &str,
        http_port: u16,
        desp: &str,
    ) -> Result<Vec<MemberInfo>, PeerError>;

    /// Asks a peer to propose adding the given member to its group.
    async fn add_node(
        &self,
        host: &str,
        http_port: u16,
        member: &MemberInfo,
    ) -> Result<(), PeerError>;
}

/// reqwest-backed peer client.
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    /// Builds a client with the given per-request deadline.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpPeerClient {
    fn default() -> Self {
        Self::new(PEER_TIMEOUT)
    }
}

#[async_trait]
impl PeerApi for HttpPeerClient {
    async fn get_members(
        &self,
        host: &str,
        http_port: u16,
        desp: &str,
    ) -> Result<Vec<MemberInfo>, PeerError> {
        let url = format!("http://{}:{}{}/{}", host, http_port, API_GET_MEMBERS, desp);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PeerError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(PeerError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }
        resp.json()
            .await
            .map_err(|e| PeerError::Decode(e.to_string()))
    }

    async fn add_node(
        &self,
        host: &str,
        http_port: u16,
        member: &MemberInfo,
    ) -> Result<(), PeerError> {
        let url = format!("http://{}:{}{}", host, http_port, API_ADD_NODE);
        let resp = self
            .client
            .post(&url)
            .json(member)
            .send()
            .await
            .map_err(|e| PeerError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(PeerError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }
        Ok(())
    }
}
