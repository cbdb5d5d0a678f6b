//! Engine error types.

use std::sync::Arc;

use thiserror::Error;

use crossref_coordination::CoordinationError;
use crossref_identity::IdentityError;
use crossref_indexing::IndexingError;
use crossref_search::SearchError;
use crossref_storage::StorageError;
use crossref_types::{CrossrefError, Uid};

/// Errors surfaced by [`CrossrefEngine`](crate::CrossrefEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Indexing error: {0}")]
    Indexing(#[from] IndexingError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Invalid input: {0}")]
    Invalid(#[from] CrossrefError),

    /// The node changed after the hardening patch was computed
    #[error("Hardening patch for {uid} is stale")]
    StalePatch { uid: Uid },

    #[error("Node not found: {uid}")]
    NodeNotFound { uid: Uid },

    /// Startup rebuild was interrupted
    #[error("Corpus rebuild was cancelled")]
    RebuildCancelled,

    /// Failure of a reindex shared by several callers
    #[error(transparent)]
    Shared(Arc<EngineError>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_error_is_transparent() {
        let inner = Arc::new(EngineError::RebuildCancelled);
        let err = EngineError::Shared(inner);
        assert_eq!(err.to_string(), "Corpus rebuild was cancelled");
    }
}
