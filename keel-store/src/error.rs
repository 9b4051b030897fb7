//! Error types for the coordination store client

use thiserror::Error;

use crate::types::{LeaseId, Revision};

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur when talking to the coordination store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store cannot be reached or refused the request
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),

    /// The requested watch revision has been compacted away
    #[error("Revision {requested} has been compacted (compacted up to {compacted})")]
    Compacted {
        /// Revision the caller asked to resume from
        requested: Revision,
        /// Latest compacted revision
        compacted: Revision,
    },

    /// The lease does not exist or has already expired
    #[error("Lease {0} not found")]
    LeaseNotFound(LeaseId),

    /// Key is not acceptable to the store
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    /// Create an unavailable error from any message
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Check if retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Check if this error means the watch resume point is gone
    pub fn is_compacted(&self) -> bool {
        matches!(self, Self::Compacted { .. })
    }
}
