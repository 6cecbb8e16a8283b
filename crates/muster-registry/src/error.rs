//! Error types observable at the registry boundary.

/// Errors produced by registry operations.
///
/// `NotFound` carries the store index at the time of the failed lookup so
/// callers can still audit progress; every other variant implies no index
/// movement.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("{0}")]
    Validation(String),

    #[error("{what} not found")]
    NotFound { what: String, index: u64 },

    #[error("node is not the cluster leader")]
    NotLeader,

    #[error("replication timed out")]
    Timeout,

    #[error("replication error: {0}")]
    Replication(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Index progress associated with this error, if any.
    pub fn index(&self) -> Option<u64> {
        match self {
            RegistryError::NotFound { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Whether the error is the client's fault (HTTP 4xx) rather than the
    /// cluster's (5xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RegistryError::Validation(_)
                | RegistryError::NotFound { .. }
                | RegistryError::NotLeader
        )
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
