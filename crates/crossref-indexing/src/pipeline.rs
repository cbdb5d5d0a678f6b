//! Chunked indexing of one document against the shared corpus.
//!
//! Entries are staged chunk by chunk under the read lock, yielding to the
//! runtime between chunks, so queries keep running during a large reindex.
//! Only the final publish takes the write lock.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crossref_search::SearchIndexConfig;
use crossref_types::{DocumentId, DocumentSnapshot, IndexingSettings};

use crate::corpus::{entry_for, IndexDelta, SharedCorpus};
use crate::error::IndexingError;

/// Default number of nodes staged per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Configuration for the indexing pipeline.
#[derive(Debug, Clone)]
pub struct IndexingConfig {
    /// Nodes staged per chunk before yielding
    pub chunk_size: usize,
    /// Search index configuration for fresh corpora
    pub search: SearchIndexConfig,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            search: SearchIndexConfig::default(),
        }
    }
}

impl IndexingConfig {
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn with_search(mut self, search: SearchIndexConfig) -> Self {
        self.search = search;
        self
    }
}

impl From<&IndexingSettings> for IndexingConfig {
    fn from(settings: &IndexingSettings) -> Self {
        Self::default()
            .with_chunk_size(settings.chunk_size)
            .with_search(SearchIndexConfig::default().with_memory_mb(settings.writer_memory_mb))
    }
}

/// Result of an index or purge run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The document was published.
    Indexed(IndexDelta),
    /// The document was removed from the corpus.
    Purged(IndexDelta),
    /// The corpus was rebuilt from source snapshots.
    Rebuilt { documents: usize, entries: usize },
    /// The corpus was replaced with the persisted blobs.
    Reloaded { entries: usize },
    /// Abandoned by the caller; nothing was published.
    Cancelled { chunks_done: usize },
}

impl IndexOutcome {
    pub fn delta(&self) -> Option<&IndexDelta> {
        match self {
            IndexOutcome::Indexed(delta) | IndexOutcome::Purged(delta) => Some(delta),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, IndexOutcome::Cancelled { .. })
    }
}

/// Replace every entry and edge of a document with those of `snapshot`.
///
/// Cancellation is checked after each chunk: the chunk in progress is
/// finished, then the staged writes are rolled back and the corpus is
/// left as it was. Runs must not overlap; the worker issues them one at
/// a time.
pub async fn index_document(
    corpus: &SharedCorpus,
    snapshot: &DocumentSnapshot,
    config: &IndexingConfig,
    cancel: &CancellationToken,
) -> Result<IndexOutcome, IndexingError> {
    let start = Instant::now();
    let document_id = &snapshot.document_id;

    match stage_document(corpus, snapshot, config, cancel).await {
        Ok(Some(chunks_done)) => {
            corpus.read().await.index.rollback()?;
            info!(document_id = %document_id, chunks_done, "Indexing cancelled");
            return Ok(IndexOutcome::Cancelled { chunks_done });
        }
        Ok(None) => {}
        Err(e) => {
            if let Err(rollback) = corpus.read().await.index.rollback() {
                warn!(document_id = %document_id, error = %rollback, "Rollback failed");
            }
            return Err(e);
        }
    }

    let delta = corpus.write().await.publish_document(snapshot)?;
    debug!(
        document_id = %document_id,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Indexed document"
    );
    Ok(IndexOutcome::Indexed(delta))
}

/// Stage all chunks. Returns `Some(chunks_done)` if cancelled.
async fn stage_document(
    corpus: &SharedCorpus,
    snapshot: &DocumentSnapshot,
    config: &IndexingConfig,
    cancel: &CancellationToken,
) -> Result<Option<usize>, IndexingError> {
    if cancel.is_cancelled() {
        return Ok(Some(0));
    }

    corpus
        .read()
        .await
        .index
        .stage_document_replace(&snapshot.document_id)?;

    let document_id = &snapshot.document_id;
    let mut chunks_done = 0;
    for chunk in snapshot.nodes.chunks(config.chunk_size.max(1)) {
        let entries = chunk.iter().map(|node| entry_for(document_id, node));
        corpus.read().await.index.stage_entries(entries)?;
        chunks_done += 1;
        debug!(
            document_id = %document_id,
            chunk = chunks_done,
            nodes = chunk.len(),
            "Staged chunk"
        );

        if cancel.is_cancelled() {
            return Ok(Some(chunks_done));
        }
        tokio::task::yield_now().await;
    }
    Ok(None)
}

/// Remove a document's entries and every edge touching its nodes.
pub async fn purge_document(
    corpus: &SharedCorpus,
    document_id: &DocumentId,
) -> Result<IndexOutcome, IndexingError> {
    let mut guard = corpus.write().await;
    guard.index.stage_document_replace(document_id)?;
    let delta = guard.publish_removal(document_id)?;
    Ok(IndexOutcome::Purged(delta))
}
