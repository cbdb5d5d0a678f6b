//! End-to-end test infrastructure for crossref.
//!
//! Provides a shared TestHarness and helper functions for scenarios that
//! cross the identity, indexing, graph and coordination layers.

use std::sync::Arc;

use crossref_coordination::MessageBus;
use crossref_engine::{CrossrefEngine, EngineConfig, ReindexOutcome, SearchFilters};
use crossref_identity::RegistrationStatus;
use crossref_scheduler::FakeClock;
use crossref_storage::Storage;
use crossref_types::{DocumentId, DocumentSnapshot, NodeGuid, RawDocument, RawNode, Uid};

/// Shared test harness for E2E tests.
///
/// One store and one fake clock; engines opened from it share both, the
/// way instances on one machine share a database.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Shared storage instance
    pub storage: Arc<Storage>,
    pub clock: FakeClock,
}

impl TestHarness {
    /// Create a new test harness with temp directory and storage.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage =
            Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));

        Self {
            _temp_dir: temp_dir,
            storage,
            clock: FakeClock::default(),
        }
    }

    /// Open an engine instance named `holder`.
    pub async fn engine(&self, holder: &str) -> CrossrefEngine {
        self.open(holder, None).await
    }

    /// Open an engine instance that talks to peers over `bus`.
    pub async fn engine_on_bus(&self, holder: &str, bus: Arc<dyn MessageBus>) -> CrossrefEngine {
        self.open(holder, Some(bus)).await
    }

    async fn open(&self, holder: &str, bus: Option<Arc<dyn MessageBus>>) -> CrossrefEngine {
        CrossrefEngine::open(
            self.storage.clone(),
            EngineConfig::default().with_holder_id(holder),
            Arc::new(self.clock.clone()),
            bus,
        )
        .await
        .expect("Failed to open engine")
    }

    pub fn snapshot(&self, document_id: &DocumentId) -> DocumentSnapshot {
        self.storage
            .get_snapshot(document_id)
            .expect("Failed to read snapshot")
            .expect("Document has no snapshot")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A node with a host-assigned guid.
pub fn node(guid: &str, title: &str, body: &str) -> RawNode {
    RawNode::new(title).with_guid(guid).with_body(body)
}

pub fn document(name: &str, source: &str, nodes: Vec<RawNode>) -> RawDocument {
    nodes
        .into_iter()
        .fold(RawDocument::new(name).with_source(source), |doc, n| {
            doc.with_node(n)
        })
}

pub fn uid(document_id: &DocumentId, guid: &str) -> Uid {
    Uid::new(
        document_id.clone(),
        NodeGuid::parse(guid).expect("Invalid test guid"),
    )
}

/// Register `raw` and make sure its content is indexed before returning,
/// skipping the debounce for updates.
pub async fn register_indexed(engine: &CrossrefEngine, raw: &RawDocument) -> DocumentId {
    let outcome = engine
        .register_document(raw)
        .await
        .expect("Registration failed");
    if outcome.status == RegistrationStatus::Updated && outcome.reindex.is_none() {
        let flushed = engine
            .flush_now(&outcome.document_id)
            .await
            .expect("Flush failed");
        assert!(
            matches!(flushed, Some(ReindexOutcome::Indexed(_))),
            "Update was not indexed: {flushed:?}"
        );
    }
    outcome.document_id
}

/// Titles of the hits for `query`, best first.
pub async fn search_titles(engine: &CrossrefEngine, query: &str) -> Vec<String> {
    engine
        .search(query, &SearchFilters::default())
        .await
        .expect("Search failed")
        .into_iter()
        .map(|hit| hit.title)
        .collect()
}

/// Uids of the hits for `query`.
pub async fn search_uids(engine: &CrossrefEngine, query: &str) -> Vec<Uid> {
    engine
        .search(query, &SearchFilters::default())
        .await
        .expect("Search failed")
        .into_iter()
        .map(|hit| hit.uid)
        .collect()
}
