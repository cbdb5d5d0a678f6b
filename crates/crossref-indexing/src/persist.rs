//! Corpus blobs in storage.
//!
//! Every document owns one index blob and one graph blob, written together
//! with its checkpoint in a single batch. A writer only ever touches the
//! rows of the document it holds the lease for, so engines sharing a store
//! never overwrite each other's work. Loading combines the parts of every
//! document; a part that is undecodable, or one half of a pair, means a
//! rebuild from snapshots and never blocks the registry.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crossref_graph::GraphStore;
use crossref_search::{IndexSnapshot, SearchIndex};
use crossref_storage::{BlobKey, Storage};
use crossref_types::{DocumentId, DocumentSnapshot};

use crate::checkpoint::IndexCheckpoint;
use crate::corpus::{Corpus, DocumentEdges};
use crate::error::IndexingError;
use crate::pipeline::IndexingConfig;

/// Outcome of loading the corpus blobs.
pub enum CorpusLoad {
    Loaded {
        corpus: Corpus,
        /// Registered documents that have no blobs yet
        missing: BTreeSet<DocumentId>,
    },
    /// A blob is undecodable or its partner is missing.
    NeedsRebuild { reason: String },
}

/// Write the blobs and checkpoint of one published document.
#[instrument(skip_all, fields(document_id = %snapshot.document_id))]
pub fn persist_document(
    storage: &Storage,
    corpus: &Corpus,
    snapshot: &DocumentSnapshot,
    indexed_at: DateTime<Utc>,
) -> Result<(), IndexingError> {
    let document_id = &snapshot.document_id;
    let (index, graph) = corpus.encode_document(document_id)?;
    let checkpoint = IndexCheckpoint::for_snapshot(snapshot, indexed_at).to_bytes()?;
    storage.put_derived(document_id, &index, &graph, &checkpoint)?;
    debug!(
        index_bytes = index.len(),
        graph_bytes = graph.len(),
        "Persisted document blobs"
    );
    Ok(())
}

/// Drop the blobs and checkpoint of a purged document.
pub fn forget_document(storage: &Storage, document_id: &DocumentId) -> Result<(), IndexingError> {
    storage.delete_derived(document_id)?;
    debug!(document_id = %document_id, "Dropped document blobs");
    Ok(())
}

/// Write the blobs of every document after a rebuild, and drop blobs of
/// documents the rebuild did not include.
#[instrument(skip_all, fields(documents = snapshots.len()))]
pub fn persist_all(
    storage: &Storage,
    corpus: &Corpus,
    snapshots: &[DocumentSnapshot],
    indexed_at: DateTime<Utc>,
) -> Result<(), IndexingError> {
    // Later snapshots win, as in the rebuild itself.
    let latest: BTreeMap<&DocumentId, &DocumentSnapshot> = snapshots
        .iter()
        .map(|snapshot| (&snapshot.document_id, snapshot))
        .collect();
    for snapshot in latest.values() {
        persist_document(storage, corpus, snapshot, indexed_at)?;
    }

    let mut stale = BTreeSet::new();
    for prefix in [BlobKey::INDEX_PREFIX, BlobKey::GRAPH_PREFIX] {
        for (document_id, _) in storage.list_blobs(prefix)? {
            if !latest.contains_key(&document_id) {
                stale.insert(document_id);
            }
        }
    }
    for document_id in &stale {
        forget_document(storage, document_id)?;
    }
    info!(
        written = latest.len(),
        dropped = stale.len(),
        "Persisted rebuilt corpus"
    );
    Ok(())
}

/// Load and combine the blobs of every document. Storage faults are
/// errors; bad blob contents are not.
#[instrument(skip_all)]
pub fn load_corpus(storage: &Storage, config: &IndexingConfig) -> Result<CorpusLoad, IndexingError> {
    let registered: BTreeSet<DocumentId> = storage
        .list_documents()?
        .into_iter()
        .map(|record| record.document_id)
        .collect();
    let indexes: BTreeMap<DocumentId, Vec<u8>> =
        storage.list_blobs(BlobKey::INDEX_PREFIX)?.into_iter().collect();
    let mut graphs: BTreeMap<DocumentId, Vec<u8>> =
        storage.list_blobs(BlobKey::GRAPH_PREFIX)?.into_iter().collect();

    if indexes.is_empty() && graphs.is_empty() && !registered.is_empty() {
        return Ok(needs_rebuild(vec!["corpus blobs missing".to_string()]));
    }

    let mut problems = Vec::new();
    let mut loaded = BTreeSet::new();
    let mut snapshots = Vec::new();
    let mut graph = GraphStore::new();
    let mut declared = BTreeMap::new();
    for (document_id, index_bytes) in indexes {
        let Some(graph_bytes) = graphs.remove(&document_id) else {
            problems.push(format!("graph blob of {document_id} missing"));
            continue;
        };
        loaded.insert(document_id.clone());
        match decode_index(&document_id, &index_bytes) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(reason) => problems.push(reason),
        }
        match DocumentEdges::from_bytes(&document_id, &graph_bytes) {
            Ok((groups, part)) => {
                graph.merge(part);
                if !groups.is_empty() {
                    declared.insert(document_id, groups);
                }
            }
            Err(e) => problems.push(format!("graph blob of {document_id} unreadable: {e}")),
        }
    }
    problems.extend(
        graphs
            .keys()
            .map(|document_id| format!("index blob of {document_id} missing")),
    );
    if !problems.is_empty() {
        return Ok(needs_rebuild(problems));
    }

    let index = match SearchIndex::from_snapshots(snapshots, config.search.clone()) {
        Ok(index) => index,
        Err(e) => return Ok(needs_rebuild(vec![format!("index blobs unreadable: {e}")])),
    };
    let corpus = Corpus::from_parts(index, graph, declared);
    let missing: BTreeSet<DocumentId> = registered
        .into_iter()
        .filter(|id| !loaded.contains(id))
        .collect();
    if !missing.is_empty() {
        debug!(missing = missing.len(), "Registered documents without blobs");
    }
    Ok(CorpusLoad::Loaded { corpus, missing })
}

/// Decode a document's index blob and check every entry is its own.
fn decode_index(document_id: &DocumentId, bytes: &[u8]) -> Result<IndexSnapshot, String> {
    let snapshot = IndexSnapshot::decode(bytes)
        .map_err(|e| format!("index blob of {document_id} unreadable: {e}"))?;
    match snapshot.entries.iter().find(|e| &e.document_id != document_id) {
        Some(entry) => Err(format!(
            "index blob of {document_id} holds entry {}",
            entry.uid
        )),
        None => Ok(snapshot),
    }
}

fn needs_rebuild(problems: Vec<String>) -> CorpusLoad {
    let reason = problems.join("; ");
    warn!(reason = %reason, "Corpus blobs unusable, rebuild needed");
    CorpusLoad::NeedsRebuild { reason }
}
