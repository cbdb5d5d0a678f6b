//! Staged writes against the search index.
//!
//! Staging goes straight to the tantivy writer but stays invisible: the
//! reader is manual-reload and the catalog is untouched until `publish`.
//! Staging takes `&self`, so a worker can stage chunk by chunk while
//! queries keep running; only `publish` needs exclusive access.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use tantivy::Term;
use tracing::{debug, info, warn};

use crossref_types::{DocumentId, Uid};

use crate::document::IndexEntry;
use crate::error::SearchError;
use crate::index::SearchIndex;

/// Changes written to the tantivy writer but not yet committed.
#[derive(Debug, Default)]
pub struct StagedChanges {
    replaced_documents: BTreeSet<DocumentId>,
    removed_uids: BTreeSet<Uid>,
    added: BTreeMap<Uid, IndexEntry>,
}

impl StagedChanges {
    fn is_empty(&self) -> bool {
        self.replaced_documents.is_empty() && self.removed_uids.is_empty() && self.added.is_empty()
    }
}

/// What a publish changed in the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub added: BTreeSet<Uid>,
    pub updated: BTreeSet<Uid>,
    pub removed: BTreeSet<Uid>,
    pub unchanged: usize,
    pub opstamp: u64,
}

impl SearchIndex {
    fn staged_changes(&self) -> Result<std::sync::MutexGuard<'_, StagedChanges>, SearchError> {
        self.staged
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))
    }

    /// Stage removal of every entry of a document.
    ///
    /// Entries staged afterwards for the same document survive; entries
    /// staged before are dropped.
    pub fn stage_document_replace(&self, document_id: &DocumentId) -> Result<(), SearchError> {
        let writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        let mut staged = self.staged_changes()?;

        let term = Term::from_field_text(self.schema.document_id, document_id.as_str());
        writer.delete_term(term);

        staged.added.retain(|uid, _| !uid.belongs_to(document_id));
        staged.replaced_documents.insert(document_id.clone());
        debug!(document_id = %document_id, "Staged document replace");
        Ok(())
    }

    /// Stage removal of single entries.
    pub fn stage_remove(&self, uids: &[Uid]) -> Result<(), SearchError> {
        let writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        let mut staged = self.staged_changes()?;

        for uid in uids {
            let term = Term::from_field_text(self.schema.uid, &uid.to_string());
            writer.delete_term(term);
            staged.added.remove(uid);
            staged.removed_uids.insert(uid.clone());
        }
        debug!(count = uids.len(), "Staged entry removals");
        Ok(())
    }

    /// Stage new or replacement entries.
    pub fn stage_entries<I>(&self, entries: I) -> Result<usize, SearchError>
    where
        I: IntoIterator<Item = IndexEntry>,
    {
        let writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        let mut staged = self.staged_changes()?;

        let mut count = 0;
        for entry in entries {
            // Replace anything already staged or published under this uid.
            let term = Term::from_field_text(self.schema.uid, &entry.uid.to_string());
            writer.delete_term(term);
            writer.add_document(entry.to_document(&self.schema))?;
            staged.removed_uids.remove(&entry.uid);
            staged.added.insert(entry.uid.clone(), entry);
            count += 1;
        }

        debug!(count, "Staged entries");
        Ok(count)
    }

    /// Whether anything is waiting to be published.
    pub fn has_staged(&self) -> Result<bool, SearchError> {
        Ok(!self.staged_changes()?.is_empty())
    }

    /// Commit staged changes and make them visible to searchers and to the
    /// catalog in one step.
    pub fn publish(&mut self) -> Result<PublishSummary, SearchError> {
        let staged = mem::take(&mut *self.staged_changes()?);

        let opstamp = {
            let mut writer = self
                .writer
                .lock()
                .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
            match writer.commit() {
                Ok(opstamp) => opstamp,
                Err(e) => {
                    warn!(error = %e, "Commit failed, rolling back");
                    writer.rollback()?;
                    return Err(e.into());
                }
            }
        };
        self.reader.reload()?;

        let mut summary = PublishSummary {
            opstamp,
            ..Default::default()
        };

        let mut doomed = staged.removed_uids;
        for document_id in &staged.replaced_documents {
            doomed.extend(self.uids_for(document_id));
        }

        for (uid, entry) in staged.added {
            match self.catalog.get(&uid) {
                None => {
                    summary.added.insert(uid.clone());
                }
                Some(old) if old != &entry => {
                    summary.updated.insert(uid.clone());
                }
                Some(_) => summary.unchanged += 1,
            }
            doomed.remove(&uid);
            self.catalog_insert(entry);
        }

        for uid in doomed {
            if self.catalog_remove(&uid).is_some() {
                summary.removed.insert(uid);
            }
        }

        info!(
            opstamp,
            added = summary.added.len(),
            updated = summary.updated.len(),
            removed = summary.removed.len(),
            "Published index changes"
        );
        Ok(summary)
    }

    /// Discard staged changes.
    pub fn rollback(&self) -> Result<(), SearchError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        let mut staged = self.staged_changes()?;

        let opstamp = writer.rollback()?;
        *staged = StagedChanges::default();
        warn!(opstamp, "Rolled back index changes");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SearchIndexConfig;
    use chrono::{TimeZone, Utc};
    use crossref_types::{Node, NodeGuid, NodeLayout, SemanticType};

    fn entry(doc: &str, guid: &str, title: &str) -> IndexEntry {
        let node = Node {
            guid: NodeGuid::parse(guid).unwrap(),
            legacy_id: None,
            title: title.to_string(),
            body: String::new(),
            semantic_type: SemanticType::Note,
            tags: Default::default(),
            parent: None,
            updated_at: Utc.timestamp_millis_opt(1_000).unwrap(),
            layout: NodeLayout::default(),
        };
        IndexEntry::from_node(&DocumentId::parse(doc).unwrap(), &node, "")
    }

    #[test]
    fn test_staged_entries_invisible_until_publish() {
        let mut index = SearchIndex::new(SearchIndexConfig::default()).unwrap();
        index.stage_entries(vec![entry("D1", "A", "Alpha")]).unwrap();

        assert!(index.has_staged().unwrap());
        assert_eq!(index.len(), 0);
        assert_eq!(index.num_docs(), 0);

        let summary = index.publish().unwrap();
        assert_eq!(summary.added.len(), 1);
        assert_eq!(index.len(), 1);
        assert_eq!(index.num_docs(), 1);
        assert!(!index.has_staged().unwrap());
    }

    #[test]
    fn test_document_replace() {
        let mut index = SearchIndex::new(SearchIndexConfig::default()).unwrap();
        index
            .stage_entries(vec![entry("D1", "A", "Alpha"), entry("D1", "B", "Beta")])
            .unwrap();
        index.publish().unwrap();

        let doc = DocumentId::parse("D1").unwrap();
        index.stage_document_replace(&doc).unwrap();
        index
            .stage_entries(vec![entry("D1", "A", "Alpha"), entry("D1", "C", "Gamma")])
            .unwrap();
        let summary = index.publish().unwrap();

        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.added.len(), 1);
        assert_eq!(summary.removed.len(), 1);
        assert_eq!(index.len(), 2);
        assert_eq!(index.num_docs(), 2);
        assert!(index.find_by_title("beta").is_empty());
        assert_eq!(index.find_by_title("GAMMA").len(), 1);
    }

    #[test]
    fn test_rollback_discards() {
        let mut index = SearchIndex::new(SearchIndexConfig::default()).unwrap();
        index.stage_entries(vec![entry("D1", "A", "Alpha")]).unwrap();
        index.publish().unwrap();

        index
            .stage_document_replace(&DocumentId::parse("D1").unwrap())
            .unwrap();
        index.rollback().unwrap();
        assert!(!index.has_staged().unwrap());

        let summary = index.publish().unwrap();
        assert!(summary.removed.is_empty());
        assert_eq!(index.len(), 1);
        assert_eq!(index.num_docs(), 1);
    }

    #[test]
    fn test_title_change_updates_title_index() {
        let mut index = SearchIndex::new(SearchIndexConfig::default()).unwrap();
        index.stage_entries(vec![entry("D1", "A", "Alpha")]).unwrap();
        index.publish().unwrap();
        index.stage_entries(vec![entry("D1", "A", "Renamed")]).unwrap();
        let summary = index.publish().unwrap();

        assert_eq!(summary.updated.len(), 1);
        assert!(index.find_by_title("alpha").is_empty());
        assert_eq!(index.find_by_title("renamed").len(), 1);
    }
}
