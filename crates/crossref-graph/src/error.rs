//! Graph error types.

use thiserror::Error;

/// Errors that can occur in the graph store.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A loaded snapshot is internally inconsistent
    #[error("Corrupt graph snapshot: {0}")]
    Corrupt(String),

    /// Unsupported snapshot version
    #[error("Unsupported graph snapshot version: {0}")]
    UnsupportedVersion(u32),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
