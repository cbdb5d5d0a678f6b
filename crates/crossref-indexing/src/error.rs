//! Error types for the indexing pipeline.

use crossref_graph::GraphError;
use crossref_search::SearchError;
use crossref_storage::StorageError;
use thiserror::Error;

/// Errors that can occur in the indexing pipeline
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Checkpoint load/save issues
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Search index error
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Graph store error
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// The request needs storage but the worker has none
    #[error("No storage attached to the indexing worker")]
    NoStorage,

    /// The worker task has exited and accepts no more requests
    #[error("Indexing worker stopped")]
    WorkerStopped,
}

impl From<serde_json::Error> for IndexingError {
    fn from(err: serde_json::Error) -> Self {
        IndexingError::Serialization(err.to_string())
    }
}
