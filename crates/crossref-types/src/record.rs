//! Registry record for a document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{DocumentSnapshot, SourceFingerprint};
use crate::hash::ContentHash;
use crate::ids::DocumentId;

/// Small per-document metadata row kept in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: DocumentId,
    pub display_name: String,
    pub source: Option<SourceFingerprint>,
    pub content_hash: ContentHash,
    pub node_count: usize,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub registered_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn from_snapshot(snapshot: &DocumentSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            document_id: snapshot.document_id.clone(),
            display_name: snapshot.display_name.clone(),
            source: snapshot.source.clone(),
            content_hash: snapshot.content_hash(),
            node_count: snapshot.node_count(),
            registered_at: now,
            updated_at: now,
        }
    }

    /// Accept a new snapshot for an existing record, keeping `registered_at`.
    pub fn updated_from(&self, snapshot: &DocumentSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            registered_at: self.registered_at,
            ..Self::from_snapshot(snapshot, now)
        }
    }

    /// Serialize to JSON bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
