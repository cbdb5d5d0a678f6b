//! Identity error types.

use thiserror::Error;

use crossref_coordination::CoordinationError;
use crossref_storage::StorageError;
use crossref_types::{CrossrefError, DocumentId, NodeGuid};

/// Errors that can occur while resolving document and node identity.
///
/// A fork is not an error: it is reported as
/// [`RegistrationStatus::ForkPending`](crate::RegistrationStatus::ForkPending).
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    /// Malformed document id, node guid or group id
    #[error("Invalid identifier: {0}")]
    Invalid(#[from] CrossrefError),

    /// Two nodes of one payload carry the same guid
    #[error("Duplicate node guid {guid} in document {document_id}")]
    DuplicateGuid {
        document_id: DocumentId,
        guid: NodeGuid,
    },

    /// The registry changed after the fork ticket was issued
    #[error("Fork ticket for {document_id} is stale")]
    StaleTicket { document_id: DocumentId },
}
