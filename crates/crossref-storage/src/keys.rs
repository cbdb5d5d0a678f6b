//! Key encoding and decoding for storage layer.
//!
//! Key format: `{prefix}:{id}`
//! - prefix: identifies the key type (doc, snap, blob, lease, checkpoint)
//! - id: document id, blob kind plus document id, or lease scope
//!
//! Document ids never contain `:`, so prefix iteration over `doc:` yields
//! exactly the registry rows.

use crossref_types::DocumentId;

use crate::error::StorageError;

/// Registry row key. Format: `doc:{document_id}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentKey {
    pub document_id: DocumentId,
}

impl DocumentKey {
    pub const PREFIX: &'static [u8] = b"doc:";

    pub fn new(document_id: &DocumentId) -> Self {
        Self {
            document_id: document_id.clone(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("doc:{}", self.document_id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let id = s
            .strip_prefix("doc:")
            .ok_or_else(|| StorageError::Key(format!("Invalid document key: {}", s)))?;
        let document_id = DocumentId::parse(id)
            .map_err(|e| StorageError::Key(format!("Invalid document key {}: {}", s, e)))?;
        Ok(Self { document_id })
    }
}

/// Snapshot key. Format: `snap:{document_id}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotKey {
    pub document_id: DocumentId,
}

impl SnapshotKey {
    pub const PREFIX: &'static [u8] = b"snap:";

    pub fn new(document_id: &DocumentId) -> Self {
        Self {
            document_id: document_id.clone(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("snap:{}", self.document_id).into_bytes()
    }
}

/// Derived-store blob of one document. Format: `blob:{kind}:{document_id}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlobKey {
    /// Canonical index entries of the document
    Index(DocumentId),
    /// Edges the document declares
    Graph(DocumentId),
}

impl BlobKey {
    pub const INDEX_PREFIX: &'static [u8] = b"blob:index:";
    pub const GRAPH_PREFIX: &'static [u8] = b"blob:graph:";

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Index(_) => "index",
            Self::Graph(_) => "graph",
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        match self {
            Self::Index(id) | Self::Graph(id) => id,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("blob:{}:{}", self.kind(), self.document_id()).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let parse = |id: &str| {
            DocumentId::parse(id)
                .map_err(|e| StorageError::Key(format!("Invalid blob key {}: {}", s, e)))
        };
        if let Some(id) = s.strip_prefix("blob:index:") {
            Ok(Self::Index(parse(id)?))
        } else if let Some(id) = s.strip_prefix("blob:graph:") {
            Ok(Self::Graph(parse(id)?))
        } else {
            Err(StorageError::Key(format!("Invalid blob key: {}", s)))
        }
    }
}

/// Lease key. Format: `lease:{scope}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseKey {
    pub scope: String,
}

impl LeaseKey {
    pub const PREFIX: &'static [u8] = b"lease:";

    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("lease:{}", self.scope).into_bytes()
    }
}

/// Checkpoint key. Format: `checkpoint:{document_id}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    pub document_id: DocumentId,
}

impl CheckpointKey {
    pub const PREFIX: &'static [u8] = b"checkpoint:";

    pub fn new(document_id: &DocumentId) -> Self {
        Self {
            document_id: document_id.clone(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("checkpoint:{}", self.document_id).into_bytes()
    }
}
