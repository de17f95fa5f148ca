//! Coordinator error kinds.
//!
//! Within a reconciliation pass, per-partition errors are logged and the
//! pass continues; the loop is eventually consistent across many passes.

use rillkv_cluster::error::RegistryError;
use thiserror::Error;

/// Errors surfaced by coordinator operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    /// The partition meta carries no replica entry for this node.
    #[error("partition meta has no replica entry for this node")]
    ConfInvalid,

    /// The local replica is not ready to accept a configuration change.
    #[error("local replica is not ready")]
    NotReady,

    /// No local replica exists for the partition.
    #[error("local replica has not been created")]
    NotCreated,

    /// The replica has not converged within the join budget.
    #[error("replica is still waiting for raft sync")]
    WaitingSync,

    /// The stop signal fired mid-operation.
    #[error("coordinator is shutting down")]
    Exiting,

    /// Too many joins are catching up concurrently.
    #[error("too many concurrent catch-up joins")]
    CatchupBusy,

    /// The local replica could not be opened or started.
    #[error("failed to init local replica: {0}")]
    LocalInit(String),

    /// A local replica engine operation failed.
    #[error("local replica error: {0}")]
    Local(String),

    /// A registry lookup failed.
    #[error("registry error: {0}")]
    Register(#[from] RegistryError),

    /// This node's registration id has not been assigned.
    #[error("invalid register id for data node")]
    InvalidRegId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_converts() {
        let err: CoordError = RegistryError::NotFound.into();
        assert_eq!(err, CoordError::Register(RegistryError::NotFound));
    }

    #[test]
    fn test_display() {
        assert!(CoordError::CatchupBusy.to_string().contains("catch-up"));
    }
}
