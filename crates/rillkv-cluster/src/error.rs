//! Error types for the cluster model.

use thiserror::Error;

/// Errors returned by registry operations.
///
/// `NotFound` is a sentinel: callers match on it to distinguish "the key is
/// gone" from a transient registry failure, which is always retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The requested key does not exist in the registry.
    #[error("key not found in registry")]
    NotFound,

    /// The registry could not be reached or timed out.
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// A node id string could not be parsed.
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    /// Any other registry-side failure.
    #[error("registry internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// True when the error is the distinguished not-found sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound)
    }
}

/// Errors from peer data-node HTTP calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    /// The peer answered with a non-2xx status.
    #[error("peer returned HTTP {status} for {url}")]
    Http {
        /// Response status code.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// The request could not be sent or timed out.
    #[error("peer transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("peer response decode error: {0}")]
    Decode(String),
}
