//! Full corpus rebuild from source snapshots.
//!
//! The index and graph are derived caches. When either blob is missing or
//! corrupt, or on explicit request, a fresh corpus is built from the
//! stored snapshots and swapped in whole.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crossref_types::DocumentSnapshot;

use crate::corpus::{entry_for, Corpus};
use crate::error::IndexingError;
use crate::pipeline::IndexingConfig;

/// Progress tracking for rebuild operations.
#[derive(Debug, Clone, Default)]
pub struct RebuildProgress {
    /// Documents in the rebuild.
    pub documents_total: usize,
    /// Documents staged so far.
    pub documents_done: usize,
    /// Nodes staged so far.
    pub nodes_indexed: usize,
    /// Whether the rebuild completed successfully.
    pub completed: bool,
}

impl RebuildProgress {
    pub fn new(documents_total: usize) -> Self {
        Self {
            documents_total,
            ..Default::default()
        }
    }

    /// Record a staged document.
    pub fn record_document(&mut self, nodes: usize) {
        self.documents_done += 1;
        self.nodes_indexed += nodes;
    }

    /// Mark as completed.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }
}

/// Result of a rebuild operation.
pub struct RebuildResult {
    pub corpus: Corpus,
    /// Progress statistics.
    pub progress: RebuildProgress,
    /// Time taken in milliseconds.
    pub elapsed_ms: u64,
}

/// Trait for receiving rebuild progress updates.
pub trait ProgressCallback: Send + Sync {
    /// Called after each document is staged and once on completion.
    fn on_progress(&self, progress: &RebuildProgress);
}

/// A no-op progress callback for when progress reporting isn't needed.
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn on_progress(&self, _progress: &RebuildProgress) {}
}

/// A callback that logs progress at info level.
pub struct LoggingProgressCallback {
    batch_size: usize,
}

impl LoggingProgressCallback {
    /// Log every `batch_size` documents.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

impl ProgressCallback for LoggingProgressCallback {
    fn on_progress(&self, progress: &RebuildProgress) {
        if progress.completed || progress.documents_done.is_multiple_of(self.batch_size) {
            info!(
                done = progress.documents_done,
                total = progress.documents_total,
                nodes = progress.nodes_indexed,
                "Rebuild progress"
            );
        }
    }
}

/// Build a fresh corpus from `snapshots`.
///
/// Every document is staged first and published once, so links resolve
/// against the complete title set. Returns `None` if cancelled; the
/// partial corpus is discarded. Later snapshots win over earlier ones
/// with the same document id.
pub async fn rebuild_corpus<P: ProgressCallback + ?Sized>(
    snapshots: &[DocumentSnapshot],
    config: &IndexingConfig,
    progress_callback: &P,
    cancel: &CancellationToken,
) -> Result<Option<RebuildResult>, IndexingError> {
    let start = Instant::now();
    let mut progress = RebuildProgress::new(snapshots.len());
    let mut corpus = Corpus::new(config.search.clone())?;

    info!(documents = snapshots.len(), "Starting corpus rebuild");

    for snapshot in snapshots {
        let document_id = &snapshot.document_id;
        corpus.index.stage_document_replace(document_id)?;
        for chunk in snapshot.nodes.chunks(config.chunk_size.max(1)) {
            let entries = chunk.iter().map(|node| entry_for(document_id, node));
            corpus.index.stage_entries(entries)?;
            if cancel.is_cancelled() {
                info!(
                    done = progress.documents_done,
                    total = progress.documents_total,
                    "Rebuild cancelled"
                );
                return Ok(None);
            }
            tokio::task::yield_now().await;
        }
        progress.record_document(snapshot.node_count());
        progress_callback.on_progress(&progress);
        debug!(document_id = %snapshot.document_id, nodes = snapshot.node_count(), "Staged for rebuild");
    }

    let summary = corpus.index.publish()?;
    debug!(entries = summary.added.len(), "Published rebuilt index");

    // Only the last snapshot per document id is current.
    for (i, snapshot) in snapshots.iter().enumerate() {
        let superseded = snapshots[i + 1..]
            .iter()
            .any(|later| later.document_id == snapshot.document_id);
        if !superseded {
            corpus.apply_document_edges(snapshot);
        }
    }
    corpus.settle();

    progress.mark_completed();
    progress_callback.on_progress(&progress);

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let stats = corpus.stats();
    info!(
        documents = stats.documents,
        entries = stats.entries,
        mentions = stats.mentions,
        memberships = stats.memberships,
        elapsed_ms,
        "Corpus rebuild complete"
    );

    Ok(Some(RebuildResult {
        corpus,
        progress,
        elapsed_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Corpus;
    use crate::pipeline::index_document;
    use crate::test_support::{doc, node, snapshot_with_group, uid};
    use crossref_search::SearchIndexConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl ProgressCallback for Counting {
        fn on_progress(&self, _progress: &RebuildProgress) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn corpus_docs() -> Vec<DocumentSnapshot> {
        vec![
            doc("DA", vec![node("GA", "Alpha", "see [[Beta]] and [[Gamma]]")]),
            doc("DB", vec![node("GB", "Beta", "back to [[Alpha]]")]),
        ]
    }

    #[tokio::test]
    async fn test_rebuild_matches_incremental() {
        let snapshots = corpus_docs();
        let config = IndexingConfig::default();

        let shared = Corpus::new(SearchIndexConfig::default())
            .unwrap()
            .into_shared();
        for snapshot in &snapshots {
            index_document(&shared, snapshot, &config, &CancellationToken::new())
                .await
                .unwrap();
        }

        let result = rebuild_corpus(
            &snapshots,
            &config,
            &NoOpProgressCallback,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(result.progress.completed);
        assert_eq!(result.progress.nodes_indexed, 2);
        assert_eq!(
            result.corpus.encode().unwrap(),
            shared.read().await.encode().unwrap()
        );
        assert_eq!(result.corpus.stats().mentions, 2);
        assert_eq!(result.corpus.unresolved_for(&uid("DA", "GA")).len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_reports_progress() {
        let counting = Counting(AtomicUsize::new(0));
        rebuild_corpus(
            &corpus_docs(),
            &IndexingConfig::default(),
            &counting,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();
        // Once per document plus completion.
        assert_eq!(counting.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_later_snapshot_wins() {
        let mut snapshots = corpus_docs();
        snapshots.push(doc("DA", vec![node("GA2", "Alpha two", "")]));

        let result = rebuild_corpus(
            &snapshots,
            &IndexingConfig::default(),
            &NoOpProgressCallback,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

        let corpus = result.corpus;
        assert!(!corpus.index.contains(&uid("DA", "GA")));
        assert!(corpus.index.contains(&uid("DA", "GA2")));
        assert_eq!(corpus.stats().mentions, 0);
    }

    #[tokio::test]
    async fn test_cancelled_rebuild_returns_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = rebuild_corpus(
            &corpus_docs(),
            &IndexingConfig::default(),
            &NoOpProgressCallback,
            &cancel,
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_cross_document_grouping_is_order_independent() {
        let a = snapshot_with_group("DA", &["GA"], &["DA:GA", "DB:GB"]);
        let b = doc("DB", vec![node("GB", "Beta", "")]);
        let config = IndexingConfig::default();

        let rebuilt = rebuild_corpus(
            &[a.clone(), b.clone()],
            &config,
            &NoOpProgressCallback,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap()
        .corpus;
        assert_eq!(rebuilt.stats().member_slots, 2);

        for order in [[&a, &b], [&b, &a]] {
            let shared = Corpus::new(SearchIndexConfig::default())
                .unwrap()
                .into_shared();
            for snapshot in order {
                index_document(&shared, snapshot, &config, &CancellationToken::new())
                    .await
                    .unwrap();
            }
            assert_eq!(
                shared.read().await.encode().unwrap(),
                rebuilt.encode().unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_chunk_size_does_not_change_the_corpus() {
        let nodes = (0..23)
            .map(|i| node(&format!("G{i:03}"), &format!("Node {i}"), "see [[Node 0]]"))
            .collect();
        let snapshots = vec![doc("DA", nodes)];

        let mut encoded = Vec::new();
        for size in [1, 5, 100] {
            let result = rebuild_corpus(
                &snapshots,
                &IndexingConfig::default().with_chunk_size(size),
                &NoOpProgressCallback,
                &CancellationToken::new(),
            )
            .await
            .unwrap()
            .unwrap();
            assert_eq!(result.progress.nodes_indexed, 23);
            encoded.push(result.corpus.encode().unwrap());
        }
        assert!(encoded.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
