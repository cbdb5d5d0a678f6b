//! Canonical serialized form of the search index.
//!
//! Tantivy segment files carry random segment ids and depend on merge
//! history, so they are not a stable interchange format. The snapshot is
//! the ordered list of index entries; loading it rebuilds the tantivy side.
//! Serializing the same entries always yields the same bytes. Snapshots of
//! single documents combine into one index on load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crossref_types::{DocumentId, Uid};

use crate::document::IndexEntry;
use crate::error::SearchError;
use crate::index::{SearchIndex, SearchIndexConfig};

/// Format tag written into every snapshot.
pub const SNAPSHOT_FORMAT: &str = "crossref-index";

/// Current snapshot version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub format: String,
    pub version: u32,
    /// Entries in uid order.
    pub entries: Vec<IndexEntry>,
}

impl IndexSnapshot {
    fn new(entries: Vec<IndexEntry>) -> Self {
        Self {
            format: SNAPSHOT_FORMAT.to_string(),
            version: SNAPSHOT_VERSION,
            entries,
        }
    }

    /// Decode and validate one snapshot without building an index.
    pub fn decode(bytes: &[u8]) -> Result<Self, SearchError> {
        let snapshot: IndexSnapshot = serde_json::from_slice(bytes)?;

        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(SearchError::InvalidSnapshot(format!(
                "unexpected format {:?}",
                snapshot.format
            )));
        }
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SearchError::InvalidSnapshot(format!(
                "unsupported version {}",
                snapshot.version
            )));
        }
        for pair in snapshot.entries.windows(2) {
            if pair[0].uid >= pair[1].uid {
                return Err(SearchError::InvalidSnapshot(format!(
                    "entries out of order at {}",
                    pair[1].uid
                )));
            }
        }
        if let Some(bad) = snapshot
            .entries
            .iter()
            .find(|e| !e.uid.belongs_to(&e.document_id))
        {
            return Err(SearchError::InvalidSnapshot(format!(
                "entry {} claims document {}",
                bad.uid, bad.document_id
            )));
        }
        Ok(snapshot)
    }

    pub fn encode(&self) -> Result<Vec<u8>, SearchError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl SearchIndex {
    /// Serialize the published entries in this crate's canonical format.
    ///
    /// The canonical round-trip format of a [`SearchIndex`] is this JSON
    /// [`IndexSnapshot`], not tantivy's segment files: segments carry
    /// random ids and depend on merge history. Loading rebuilds the
    /// tantivy side from the entries, and equal entries always encode to
    /// equal bytes.
    pub fn serialize(&self) -> Result<Vec<u8>, SearchError> {
        IndexSnapshot::new(self.entries().cloned().collect()).encode()
    }

    /// Serialize the published entries of one document in the same format.
    pub fn serialize_document(&self, document_id: &DocumentId) -> Result<Vec<u8>, SearchError> {
        let entries = self.entries_for(document_id).into_iter().cloned().collect();
        IndexSnapshot::new(entries).encode()
    }

    /// Rebuild an index from serialized bytes.
    pub fn deserialize(bytes: &[u8], config: SearchIndexConfig) -> Result<Self, SearchError> {
        Self::from_snapshots([IndexSnapshot::decode(bytes)?], config)
    }

    /// Build one index from several decoded snapshots, such as one per
    /// document. A uid that appears in two snapshots is an error.
    pub fn from_snapshots<I>(snapshots: I, config: SearchIndexConfig) -> Result<Self, SearchError>
    where
        I: IntoIterator<Item = IndexSnapshot>,
    {
        let mut entries: BTreeMap<Uid, IndexEntry> = BTreeMap::new();
        for snapshot in snapshots {
            for entry in snapshot.entries {
                if let Some(previous) = entries.insert(entry.uid.clone(), entry) {
                    return Err(SearchError::InvalidSnapshot(format!(
                        "entry {} appears twice",
                        previous.uid
                    )));
                }
            }
        }

        let count = entries.len();
        let mut index = SearchIndex::new(config)?;
        index.stage_entries(entries.into_values())?;
        index.publish()?;

        info!(entries = count, "Loaded search index snapshot");
        Ok(index)
    }
}
