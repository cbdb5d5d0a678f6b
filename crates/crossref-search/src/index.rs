//! In-memory Tantivy index plus the canonical entry catalog.
//!
//! The tantivy index answers relevance queries. The catalog holds the same
//! entries in uid order; it is what gets serialized and what title
//! resolution reads. Both only change together, in [`SearchIndex::publish`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::debug;

use crossref_types::{normalize_title, DocumentId, Uid};

use crate::document::IndexEntry;
use crate::error::SearchError;
use crate::indexer::StagedChanges;
use crate::schema::{build_node_schema, SearchSchema};

/// Default memory budget for IndexWriter (50MB)
const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Search index configuration
#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    /// Memory budget for writer in MB
    pub writer_memory_mb: usize,
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self {
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }
}

impl SearchIndexConfig {
    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }
}

/// Wrapper for the Tantivy index with schema access and catalog.
pub struct SearchIndex {
    pub(crate) index: Index,
    pub(crate) schema: SearchSchema,
    pub(crate) reader: IndexReader,
    pub(crate) writer: Mutex<IndexWriter>,
    pub(crate) config: SearchIndexConfig,
    pub(crate) catalog: BTreeMap<Uid, IndexEntry>,
    pub(crate) by_document: BTreeMap<DocumentId, BTreeSet<Uid>>,
    pub(crate) titles: BTreeMap<String, BTreeSet<Uid>>,
    pub(crate) staged: Mutex<StagedChanges>,
}

impl SearchIndex {
    /// Create an empty index.
    pub fn new(config: SearchIndexConfig) -> Result<Self, SearchError> {
        let schema = build_node_schema();
        let index = Index::create_in_ram(schema.schema().clone());
        let schema = SearchSchema::from_schema(index.schema())?;

        // One indexing thread keeps segment layout independent of scheduling.
        let memory_budget = config.writer_memory_mb * 1024 * 1024;
        let writer: IndexWriter = index.writer_with_num_threads(1, memory_budget)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        debug!(memory_mb = config.writer_memory_mb, "Created search index");

        Ok(Self {
            index,
            schema,
            reader,
            writer: Mutex::new(writer),
            config,
            catalog: BTreeMap::new(),
            by_document: BTreeMap::new(),
            titles: BTreeMap::new(),
            staged: Mutex::new(StagedChanges::default()),
        })
    }

    /// Get the search schema
    pub fn schema(&self) -> &SearchSchema {
        &self.schema
    }

    /// Get the underlying Tantivy index
    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn config(&self) -> &SearchIndexConfig {
        &self.config
    }

    pub fn reader(&self) -> &IndexReader {
        &self.reader
    }

    /// Published entry for a uid.
    pub fn get(&self, uid: &Uid) -> Option<&IndexEntry> {
        self.catalog.get(uid)
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.catalog.contains_key(uid)
    }

    /// All published entries in uid order.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.catalog.values()
    }

    /// Published entries of one document, in uid order.
    pub fn entries_for(&self, document_id: &DocumentId) -> Vec<&IndexEntry> {
        self.by_document
            .get(document_id)
            .map(|uids| uids.iter().filter_map(|u| self.catalog.get(u)).collect())
            .unwrap_or_default()
    }

    /// Published uids of one document.
    pub fn uids_for(&self, document_id: &DocumentId) -> BTreeSet<Uid> {
        self.by_document.get(document_id).cloned().unwrap_or_default()
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &DocumentId> {
        self.by_document.keys()
    }

    /// Uids whose normalized title equals `title`'s normalized form.
    pub fn find_by_title(&self, title: &str) -> Vec<Uid> {
        self.titles
            .get(&normalize_title(title))
            .map(|uids| uids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of published entries.
    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    /// Number of live tantivy documents visible to searchers.
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub(crate) fn catalog_insert(&mut self, entry: IndexEntry) {
        self.catalog_remove(&entry.uid);
        self.by_document
            .entry(entry.document_id.clone())
            .or_default()
            .insert(entry.uid.clone());
        self.titles
            .entry(normalize_title(&entry.title))
            .or_default()
            .insert(entry.uid.clone());
        self.catalog.insert(entry.uid.clone(), entry);
    }

    pub(crate) fn catalog_remove(&mut self, uid: &Uid) -> Option<IndexEntry> {
        let entry = self.catalog.remove(uid)?;
        if let Some(uids) = self.by_document.get_mut(&entry.document_id) {
            uids.remove(uid);
            if uids.is_empty() {
                self.by_document.remove(&entry.document_id);
            }
        }
        let key = normalize_title(&entry.title);
        if let Some(uids) = self.titles.get_mut(&key) {
            uids.remove(uid);
            if uids.is_empty() {
                self.titles.remove(&key);
            }
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_new_index() {
        let index = SearchIndex::new(SearchIndexConfig::default()).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.num_docs(), 0);
    }

    #[test]
    fn test_config_with_memory() {
        let config = SearchIndexConfig::default().with_memory_mb(100);
        assert_eq!(config.writer_memory_mb, 100);
    }
}
