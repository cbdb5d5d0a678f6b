//! Per-document indexing checkpoints.
//!
//! A checkpoint records which content was last published for a document.
//! On open, a snapshot whose hash differs from its checkpoint is stale and
//! gets reindexed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crossref_storage::Storage;
use crossref_types::{ContentHash, DocumentId, DocumentSnapshot};

use crate::error::IndexingError;

/// Last published state of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCheckpoint {
    pub document_id: DocumentId,

    /// Hash of the snapshot that was indexed
    pub content_hash: ContentHash,

    pub node_count: usize,

    /// When the publish happened (milliseconds since epoch for JSON compatibility)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub indexed_at: DateTime<Utc>,
}

impl IndexCheckpoint {
    /// Checkpoint for a snapshot that was just published.
    pub fn for_snapshot(snapshot: &DocumentSnapshot, indexed_at: DateTime<Utc>) -> Self {
        Self {
            document_id: snapshot.document_id.clone(),
            content_hash: snapshot.content_hash(),
            node_count: snapshot.node_count(),
            indexed_at,
        }
    }

    /// Whether this checkpoint covers the given snapshot's content.
    pub fn is_current(&self, snapshot: &DocumentSnapshot) -> bool {
        self.document_id == snapshot.document_id && self.content_hash == snapshot.content_hash()
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexingError> {
        serde_json::to_vec(self).map_err(IndexingError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexingError> {
        serde_json::from_slice(bytes).map_err(IndexingError::from)
    }

    /// Load the checkpoint of a document, if any.
    pub fn load(storage: &Storage, document_id: &DocumentId) -> Result<Option<Self>, IndexingError> {
        match storage.get_checkpoint(document_id)? {
            Some(bytes) => {
                let checkpoint = Self::from_bytes(&bytes)?;
                if &checkpoint.document_id != document_id {
                    return Err(IndexingError::Checkpoint(format!(
                        "checkpoint for {} stored under {}",
                        checkpoint.document_id, document_id
                    )));
                }
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    pub fn save(&self, storage: &Storage) -> Result<(), IndexingError> {
        storage.put_checkpoint(&self.document_id, &self.to_bytes()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crossref_types::{Node, NodeGuid, NodeLayout, SemanticType};
    use tempfile::TempDir;

    fn snapshot(doc: &str, title: &str) -> DocumentSnapshot {
        DocumentSnapshot {
            document_id: DocumentId::parse(doc).unwrap(),
            display_name: "Plan".to_string(),
            source: None,
            nodes: vec![Node {
                guid: NodeGuid::parse("G1").unwrap(),
                legacy_id: None,
                title: title.to_string(),
                body: String::new(),
                semantic_type: SemanticType::Note,
                tags: Default::default(),
                parent: None,
                updated_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
                layout: NodeLayout::default(),
            }],
            groups: Vec::new(),
        }
    }

    #[test]
    fn test_checkpoint_tracks_content() {
        let indexed = snapshot("D1", "Alpha");
        let checkpoint =
            IndexCheckpoint::for_snapshot(&indexed, Utc.timestamp_millis_opt(5).unwrap());
        assert_eq!(checkpoint.node_count, 1);
        assert!(checkpoint.is_current(&indexed));

        let mut renamed = indexed.clone();
        renamed.display_name = "Renamed".to_string();
        assert!(checkpoint.is_current(&renamed));

        assert!(!checkpoint.is_current(&snapshot("D1", "Alpha v2")));
        assert!(!checkpoint.is_current(&snapshot("D2", "Alpha")));
    }

    #[test]
    fn test_checkpoint_json_format() {
        let checkpoint = IndexCheckpoint::for_snapshot(
            &snapshot("D1", "Alpha"),
            Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        );
        let json_str = String::from_utf8(checkpoint.to_bytes().unwrap()).unwrap();

        assert!(json_str.contains("\"document_id\":\"D1\""));
        assert!(json_str.contains("\"node_count\":1"));
        assert!(json_str.contains("\"indexed_at\":1700000000123"));
    }

    #[test]
    fn test_checkpoint_storage() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let doc = DocumentId::parse("D1").unwrap();
        assert!(IndexCheckpoint::load(&storage, &doc).unwrap().is_none());

        let checkpoint = IndexCheckpoint::for_snapshot(
            &snapshot("D1", "Alpha"),
            Utc.timestamp_millis_opt(42).unwrap(),
        );
        checkpoint.save(&storage).unwrap();
        assert_eq!(
            IndexCheckpoint::load(&storage, &doc).unwrap(),
            Some(checkpoint)
        );
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let doc = DocumentId::parse("D1").unwrap();
        storage.put_checkpoint(&doc, b"{not json").unwrap();

        assert!(matches!(
            IndexCheckpoint::load(&storage, &doc),
            Err(IndexingError::Serialization(_))
        ));
    }
}
