//! Coordination error types.

use thiserror::Error;

use crossref_storage::StorageError;

/// Errors that can occur while coordinating between instances.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Lease store backed by the persisted store failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Lease row could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compare-and-swap kept losing races on the same row
    #[error("Lease scope {scope} is contended")]
    Contended { scope: String },
}
