//! Engine lifecycle and ingest.
//!
//! [`CrossrefEngine`] wires the identity resolver, change collector,
//! indexing worker and lease manager around one store. Every reindex runs
//! under the `index:{document_id}` lease, and concurrent requests for the
//! same document inside one instance share a single run.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crossref_coordination::{
    identity_scope, index_scope, BusMessage, LeaseKeeper, LeaseManager, LeaseOutcome, MessageBus,
    StorageLeaseStore,
};
use crossref_identity::{ForkChoice, ForkTicket, IdentityResolver, Registration, RegistrationStatus};
use crossref_indexing::{
    load_corpus, persist_all, rebuild_corpus, CorpusLoad, IndexCheckpoint, IndexDelta,
    IndexOutcome, IndexRequest, IndexingWorker, LoggingProgressCallback, SharedCorpus,
    WorkerHandle,
};
use crossref_scheduler::{ChangeCollector, ChangeKind, Clock, SystemClock, TimerScheduler};
use crossref_storage::Storage;
use crossref_types::{DocumentId, DocumentRecord, DocumentSnapshot, RawDocument};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::query::HardeningPatch;

/// Documents between progress lines of the startup rebuild.
const STARTUP_REBUILD_LOG_EVERY: usize = 100;

type SharedReindex = Shared<BoxFuture<'static, Result<ReindexOutcome, Arc<EngineError>>>>;

/// Result of a reindex request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReindexOutcome {
    /// The document's entries and edges were published.
    Indexed(IndexDelta),
    /// The lease was lost mid-run; nothing was published.
    Cancelled,
    /// Another instance holds the index lease. The document stays dirty.
    Deferred { holder: String },
    /// The document is not in the registry; whatever was indexed for it
    /// has been purged.
    NotRegistered,
}

impl ReindexOutcome {
    pub fn delta(&self) -> Option<&IndexDelta> {
        match self {
            ReindexOutcome::Indexed(delta) => Some(delta),
            _ => None,
        }
    }
}

/// Result of registering a host payload.
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub document_id: DocumentId,
    pub status: RegistrationStatus,
    /// Set when the document was indexed as part of the call.
    pub reindex: Option<ReindexOutcome>,
}

impl RegisterOutcome {
    pub fn fork_ticket(&self) -> Option<&ForkTicket> {
        self.status.fork_ticket()
    }
}

pub(crate) struct EngineInner {
    pub(crate) storage: Arc<Storage>,
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) corpus: SharedCorpus,
    pub(crate) worker: WorkerHandle,
    pub(crate) identity: IdentityResolver,
    pub(crate) leases: LeaseManager,
    pub(crate) collector: ChangeCollector,
    pub(crate) bus: Option<Arc<dyn MessageBus>>,
    in_flight: Mutex<HashMap<DocumentId, SharedReindex>>,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Assembles an engine around a store.
pub struct EngineBuilder {
    storage: Arc<Storage>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    bus: Option<Arc<dyn MessageBus>>,
    timers: Option<Arc<dyn TimerScheduler>>,
}

impl EngineBuilder {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            bus: None,
            timers: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish index and lease notifications on `bus` and follow other
    /// instances' notifications.
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Fire a timer when a dirty document becomes due. Pair with
    /// [`CollectorDriver`](crate::CollectorDriver) to act on it.
    pub fn with_timers(mut self, timers: Arc<dyn TimerScheduler>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Load or rebuild the corpus, start the worker and catch up with
    /// snapshots that changed while no instance was indexing.
    #[instrument(skip_all, fields(holder_id = %self.config.holder_id))]
    pub async fn open(self) -> Result<CrossrefEngine, EngineError> {
        let EngineBuilder {
            storage,
            config,
            clock,
            bus,
            timers,
        } = self;

        let registry = storage.list_documents()?;
        let snapshots = storage.list_snapshots()?;
        info!(
            documents = registry.len(),
            snapshots = snapshots.len(),
            "Opening engine"
        );

        let (corpus, rebuilt, missing) = match load_corpus(&storage, &config.indexing)? {
            CorpusLoad::Loaded { corpus, missing } => (corpus, false, missing),
            CorpusLoad::NeedsRebuild { reason } => {
                info!(reason = %reason, "Rebuilding corpus from stored snapshots");
                let result = rebuild_corpus(
                    &snapshots,
                    &config.indexing,
                    &LoggingProgressCallback::new(STARTUP_REBUILD_LOG_EVERY),
                    &CancellationToken::new(),
                )
                .await?
                .ok_or(EngineError::RebuildCancelled)?;
                persist_all(&storage, &result.corpus, &snapshots, clock.now())?;
                (result.corpus, true, BTreeSet::new())
            }
        };

        let indexed: BTreeSet<DocumentId> = corpus.index.document_ids().cloned().collect();
        let corpus = corpus.into_shared();
        let worker = IndexingWorker::new(corpus.clone(), config.indexing.clone())
            .with_storage(storage.clone())
            .spawn();

        let mut leases = LeaseManager::new(
            Arc::new(StorageLeaseStore::new(storage.clone())),
            clock.clone(),
            config.lease.clone(),
        );
        if let Some(bus) = &bus {
            leases = leases.with_bus(bus.clone());
        }
        let identity = IdentityResolver::new(
            storage.clone(),
            leases.clone(),
            config.holder_id.clone(),
            clock.clone(),
        )
        .with_config(config.identity.clone());

        let mut collector = ChangeCollector::new(config.collector.clone(), clock.clone());
        if let Some(timers) = timers {
            collector = collector.with_timers(timers);
        }

        let engine = CrossrefEngine {
            inner: Arc::new(EngineInner {
                storage,
                config,
                clock,
                corpus,
                worker,
                identity,
                leases,
                collector,
                bus,
                in_flight: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                listener: Mutex::new(None),
            }),
        };

        if !rebuilt {
            engine.catch_up(&snapshots, &indexed, &missing).await?;
        }
        if let Some(bus) = engine.inner.bus.clone() {
            let listener = engine.spawn_bus_listener(bus.as_ref());
            *engine.lock_listener() = Some(listener);
        }

        info!("Engine ready");
        Ok(engine)
    }
}

/// Handle to a running engine. Clones share all state.
#[derive(Clone)]
pub struct CrossrefEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl CrossrefEngine {
    pub fn builder(storage: Arc<Storage>) -> EngineBuilder {
        EngineBuilder::new(storage)
    }

    /// Open without timers. Use [`builder`](Self::builder) to attach them.
    pub async fn open(
        storage: Arc<Storage>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        bus: Option<Arc<dyn MessageBus>>,
    ) -> Result<Self, EngineError> {
        let mut builder = EngineBuilder::new(storage)
            .with_config(config)
            .with_clock(clock);
        if let Some(bus) = bus {
            builder = builder.with_bus(bus);
        }
        builder.open().await
    }

    pub fn holder_id(&self) -> &str {
        &self.inner.config.holder_id
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.inner.storage
    }

    pub fn collector(&self) -> &ChangeCollector {
        &self.inner.collector
    }

    /// Reindex snapshots whose checkpoint is missing or outdated, or whose
    /// blobs were never written, and drop corpus documents that are no
    /// longer registered.
    async fn catch_up(
        &self,
        snapshots: &[DocumentSnapshot],
        indexed: &BTreeSet<DocumentId>,
        missing: &BTreeSet<DocumentId>,
    ) -> Result<(), EngineError> {
        let registered: BTreeSet<&DocumentId> = snapshots.iter().map(|s| &s.document_id).collect();
        for orphan in indexed.iter().filter(|id| !registered.contains(id)) {
            info!(document_id = %orphan, "Purging unregistered document from corpus");
            self.inner.worker.purge(orphan.clone()).await?;
        }

        let mut stale = 0usize;
        for snapshot in snapshots {
            let document_id = &snapshot.document_id;
            let current = if missing.contains(document_id) {
                false
            } else {
                match IndexCheckpoint::load(&self.inner.storage, document_id) {
                    Ok(Some(checkpoint)) => checkpoint.is_current(snapshot),
                    Ok(None) => false,
                    Err(e) => {
                        warn!(document_id = %document_id, error = %e, "Unreadable checkpoint");
                        false
                    }
                }
            };
            if current {
                continue;
            }
            stale += 1;
            if let Err(e) = self.reindex_document(document_id).await {
                warn!(document_id = %document_id, error = %e, "Catch-up reindex failed");
                self.inner.collector.mark_dirty(document_id, ChangeKind::Content);
            }
        }
        if stale > 0 {
            info!(stale, "Caught up with changed documents");
        }
        Ok(())
    }

    // ==================== Ingest ====================

    /// Register a host payload.
    ///
    /// New documents are indexed before returning. Content updates mark
    /// the document dirty and are picked up by the change collector; call
    /// [`flush_now`](Self::flush_now) to index them immediately. Forks and
    /// deferred decisions are returned untouched.
    pub async fn register_document(&self, raw: &RawDocument) -> Result<RegisterOutcome, EngineError> {
        let registration = self.inner.identity.register(raw)?;
        self.after_registration(registration, false).await
    }

    /// Answer a fork raised by [`register_document`](Self::register_document).
    /// The accepted content is indexed before returning.
    pub async fn resolve_fork(
        &self,
        ticket: &ForkTicket,
        choice: ForkChoice,
    ) -> Result<RegisterOutcome, EngineError> {
        let registration = self.inner.identity.resolve_fork(ticket, choice)?;
        self.after_registration(registration, true).await
    }

    async fn after_registration(
        &self,
        registration: Registration,
        immediate: bool,
    ) -> Result<RegisterOutcome, EngineError> {
        let Registration {
            document_id,
            status,
            ..
        } = registration;

        let reindex = match &status {
            RegistrationStatus::New => Some(self.reindex_document(&document_id).await?),
            RegistrationStatus::Updated if immediate => {
                Some(self.reindex_document(&document_id).await?)
            }
            RegistrationStatus::Updated => {
                self.inner
                    .collector
                    .mark_dirty(&document_id, ChangeKind::Content);
                None
            }
            RegistrationStatus::ForkPending(_) => {
                info!(document_id = %document_id, "Registration awaits a fork decision");
                None
            }
            _ => None,
        };

        Ok(RegisterOutcome {
            document_id,
            status,
            reindex,
        })
    }

    /// Record a host-side change. Returns whether the document is dirty.
    pub fn notify_content_changed(&self, document_id: &DocumentId, kind: ChangeKind) -> bool {
        self.inner.collector.mark_dirty(document_id, kind)
    }

    /// Reindex a dirty document now, ignoring debounce. `None` when the
    /// document was clean.
    pub async fn flush_now(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<ReindexOutcome>, EngineError> {
        if !self.inner.collector.flush_now(document_id) {
            return Ok(None);
        }
        self.reindex_document(document_id).await.map(Some)
    }

    /// Reindex every dirty document that is due. Failures are logged and
    /// the document stays dirty.
    pub async fn reindex_due(&self) -> Vec<(DocumentId, ReindexOutcome)> {
        let mut done = Vec::new();
        for document_id in self.inner.collector.due_documents() {
            match self.reindex_document(&document_id).await {
                Ok(outcome) => done.push((document_id, outcome)),
                Err(e) => warn!(document_id = %document_id, error = %e, "Reindex failed"),
            }
        }
        done
    }

    /// Remove a document from the registry and the corpus. Returns whether
    /// it was registered.
    #[instrument(skip(self), fields(document_id = %document_id))]
    pub async fn unregister_document(&self, document_id: &DocumentId) -> Result<bool, EngineError> {
        if let Some(running) = self.in_flight(document_id) {
            debug!("Waiting for in-flight reindex before unregistering");
            let _ = running.await;
        }

        let existed = self.inner.storage.unregister(document_id)?;
        self.inner.collector.forget(document_id);
        self.inner.worker.purge(document_id.clone()).await?;
        self.publish(BusMessage::DocumentPurged {
            origin: self.holder_id().to_string(),
            document_id: document_id.clone(),
        });
        info!(existed, "Unregistered document");
        Ok(existed)
    }

    /// Rebuild the corpus from every stored snapshot.
    pub async fn rebuild(&self) -> Result<IndexOutcome, EngineError> {
        let snapshots = self.inner.storage.list_snapshots()?;
        Ok(self.inner.worker.rebuild(snapshots).await?)
    }

    /// Replace the corpus with the persisted blobs.
    pub async fn reload(&self) -> Result<IndexOutcome, EngineError> {
        let pending = self.inner.worker.submit(IndexRequest::Reload).await?;
        Ok(pending.wait().await?)
    }

    /// Write a hardening patch into the stored snapshot. The body must
    /// still be the one the patch was computed from. Returns `false` when
    /// another instance holds the document's identity lease.
    pub async fn apply_hardening(&self, patch: &HardeningPatch) -> Result<bool, EngineError> {
        let document_id = patch.uid.document_id();
        let scope = identity_scope(document_id);
        let holder = self.holder_id();
        let outcome = self.inner.leases.try_acquire(&scope, holder)?;
        if let LeaseOutcome::Busy { holder } = outcome {
            debug!(uid = %patch.uid, holder = %holder.holder_id, "Hardening deferred");
            return Ok(false);
        }

        let result = self.write_hardening(patch);
        if !matches!(outcome, LeaseOutcome::Reentrant(_)) {
            if let Err(e) = self.inner.leases.release(&scope, holder) {
                warn!(scope = %scope, error = %e, "Failed to release identity lease");
            }
        }
        result?;

        self.inner
            .collector
            .mark_dirty(document_id, ChangeKind::Content);
        Ok(true)
    }

    fn write_hardening(&self, patch: &HardeningPatch) -> Result<(), EngineError> {
        let document_id = patch.uid.document_id();
        let not_found = || EngineError::NodeNotFound {
            uid: patch.uid.clone(),
        };
        let mut snapshot = self
            .inner
            .storage
            .get_snapshot(document_id)?
            .ok_or_else(not_found)?;
        let now = self.inner.clock.now();

        let node = snapshot
            .nodes
            .iter_mut()
            .find(|n| &n.guid == patch.uid.node_guid())
            .ok_or_else(not_found)?;
        if node.body != patch.original {
            return Err(EngineError::StalePatch {
                uid: patch.uid.clone(),
            });
        }
        node.body = patch.hardened.clone();
        node.updated_at = now;

        let record = match self.inner.storage.get_document(document_id)? {
            Some(record) => record.updated_from(&snapshot, now),
            None => DocumentRecord::from_snapshot(&snapshot, now),
        };
        self.inner.storage.put_document(&record, &snapshot)?;
        info!(uid = %patch.uid, "Hardened soft links");
        Ok(())
    }

    // ==================== Reindex ====================

    /// Reindex one document from its stored snapshot.
    ///
    /// A request for a document already being reindexed by this instance
    /// joins the running one.
    pub async fn reindex_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<ReindexOutcome, EngineError> {
        let running = {
            let mut in_flight = self.lock_in_flight();
            match in_flight.get(document_id) {
                Some(running) => {
                    debug!(document_id = %document_id, "Joining in-flight reindex");
                    running.clone()
                }
                None => {
                    let engine = self.clone();
                    let key = document_id.clone();
                    let run = async move {
                        let result = engine.run_reindex(&key).await.map_err(Arc::new);
                        engine.lock_in_flight().remove(&key);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(document_id.clone(), run.clone());
                    run
                }
            }
        };
        running.await.map_err(EngineError::Shared)
    }

    fn in_flight(&self, document_id: &DocumentId) -> Option<SharedReindex> {
        self.lock_in_flight().get(document_id).cloned()
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<DocumentId, SharedReindex>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.listener.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run_reindex(&self, document_id: &DocumentId) -> Result<ReindexOutcome, EngineError> {
        let scope = index_scope(document_id);
        let holder = self.holder_id().to_string();
        let acquired = self.inner.leases.try_acquire(&scope, &holder)?;
        if let LeaseOutcome::Busy { holder } = acquired {
            info!(document_id = %document_id, holder = %holder.holder_id, "Reindex deferred to lease holder");
            self.inner
                .collector
                .mark_dirty(document_id, ChangeKind::Content);
            return Ok(ReindexOutcome::Deferred {
                holder: holder.holder_id,
            });
        }
        if let LeaseOutcome::Stolen { previous, .. } = &acquired {
            warn!(document_id = %document_id, previous = %previous.holder_id, "Took over stale index lease");
        }

        let result = self.reindex_under_lease(document_id, &scope).await;

        if !matches!(acquired, LeaseOutcome::Reentrant(_)) {
            if let Err(e) = self.inner.leases.release(&scope, &holder) {
                warn!(scope = %scope, error = %e, "Failed to release index lease");
            }
        }
        result
    }

    async fn reindex_under_lease(
        &self,
        document_id: &DocumentId,
        scope: &str,
    ) -> Result<ReindexOutcome, EngineError> {
        let Some(snapshot) = self.inner.storage.get_snapshot(document_id)? else {
            debug!(document_id = %document_id, "Snapshot gone; purging");
            self.inner.collector.forget(document_id);
            self.inner.worker.purge(document_id.clone()).await?;
            return Ok(ReindexOutcome::NotRegistered);
        };
        let content_hash = snapshot.content_hash();

        let keeper = LeaseKeeper::start(
            self.inner.leases.clone(),
            scope.to_string(),
            self.holder_id().to_string(),
        );
        let pending = self
            .inner
            .worker
            .submit(IndexRequest::Index(Box::new(snapshot)))
            .await?;
        let cancel = pending.cancel_token();
        let lost = keeper.lost();
        let watcher = tokio::spawn(async move {
            lost.cancelled().await;
            cancel.cancel();
        });
        let result = pending.wait().await;
        watcher.abort();
        keeper.stop().await;

        let delta = match result? {
            IndexOutcome::Cancelled { chunks_done } => {
                warn!(document_id = %document_id, chunks_done, "Reindex abandoned after losing lease");
                return Ok(ReindexOutcome::Cancelled);
            }
            outcome => outcome.delta().cloned().unwrap_or_default(),
        };

        self.inner.collector.record_reindex(document_id);
        // Content accepted while indexing needs another pass.
        if let Some(current) = self.inner.storage.get_snapshot(document_id)? {
            if current.content_hash() != content_hash {
                self.inner
                    .collector
                    .mark_dirty(document_id, ChangeKind::Content);
            }
        }

        self.publish(BusMessage::DocumentIndexed {
            origin: self.holder_id().to_string(),
            document_id: document_id.clone(),
            content_hash,
        });
        Ok(ReindexOutcome::Indexed(delta))
    }

    // ==================== Bus ====================

    fn publish(&self, message: BusMessage) {
        if let Some(bus) = &self.inner.bus {
            bus.publish(message);
        }
    }

    /// Follow a notification from another instance. Document messages
    /// reload the corpus from the shared store; messages from this
    /// instance and lease messages are ignored. Returns whether the
    /// corpus was reloaded.
    pub async fn apply_bus_message(&self, message: &BusMessage) -> Result<bool, EngineError> {
        if message.origin() == Some(self.holder_id()) {
            return Ok(false);
        }
        match message {
            BusMessage::DocumentIndexed { document_id, .. } => {
                debug!(document_id = %document_id, "Peer indexed document");
                self.reload().await?;
                Ok(true)
            }
            BusMessage::DocumentPurged { document_id, .. } => {
                debug!(document_id = %document_id, "Peer purged document");
                self.inner.collector.forget(document_id);
                self.reload().await?;
                Ok(true)
            }
            other => {
                debug!(message = ?other, "Lease notification");
                Ok(false)
            }
        }
    }

    fn spawn_bus_listener(&self, bus: &dyn MessageBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => received,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let engine = CrossrefEngine { inner };
                match received {
                    Ok(message) => {
                        if let Err(e) = engine.apply_bus_message(&message).await {
                            warn!(error = %e, "Failed to apply bus message");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Bus listener lagged; reloading corpus");
                        if let Err(e) = engine.reload().await {
                            warn!(error = %e, "Reload after lag failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Bus listener stopped");
        })
    }

    /// Stop the bus listener and the worker. Requests still queued fail
    /// with a worker-stopped error.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let listener = self.lock_listener().take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        self.inner.worker.shutdown().await;
        info!("Engine stopped");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::query::SearchFilters;
    use crossref_coordination::{BroadcastBus, LeaseConfig};
    use crossref_scheduler::FakeClock;
    use crossref_storage::BlobKey;
    use crossref_types::RawNode;
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub(crate) _dir: TempDir,
        pub(crate) storage: Arc<Storage>,
        pub(crate) clock: FakeClock,
        pub(crate) engine: CrossrefEngine,
    }

    pub(crate) async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let clock = FakeClock::default();
        let engine = open_engine(&storage, &clock, "instance-a").await;
        Fixture {
            _dir: dir,
            storage,
            clock,
            engine,
        }
    }

    pub(crate) async fn open_engine(
        storage: &Arc<Storage>,
        clock: &FakeClock,
        holder: &str,
    ) -> CrossrefEngine {
        CrossrefEngine::open(
            storage.clone(),
            EngineConfig::default().with_holder_id(holder),
            Arc::new(clock.clone()),
            None,
        )
        .await
        .unwrap()
    }

    pub(crate) fn notes() -> RawDocument {
        RawDocument::new("Notes")
            .with_source("/notes.json")
            .with_node(
                RawNode::new("Alpha")
                    .with_guid("GA")
                    .with_body("Alpha points at [[Beta]]"),
            )
            .with_node(RawNode::new("Beta").with_guid("GB").with_body("plain beta"))
    }

    async fn titles(engine: &CrossrefEngine, query: &str) -> Vec<String> {
        engine
            .search(query, &SearchFilters::default())
            .await
            .unwrap()
            .into_iter()
            .map(|hit| hit.title)
            .collect()
    }

    #[tokio::test]
    async fn test_new_document_is_indexed_on_register() {
        let f = fixture().await;
        let outcome = f.engine.register_document(&notes()).await.unwrap();

        assert_eq!(outcome.status, RegistrationStatus::New);
        let delta = outcome.reindex.as_ref().and_then(|r| r.delta()).unwrap();
        assert_eq!(delta.added.len(), 2);
        assert_eq!(titles(&f.engine, "beta").await, vec!["Beta", "Alpha"]);

        let checkpoint = IndexCheckpoint::load(&f.storage, &outcome.document_id)
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.node_count, 2);
    }

    #[tokio::test]
    async fn test_update_waits_for_flush() {
        let f = fixture().await;
        let first = f.engine.register_document(&notes()).await.unwrap();
        let id = first.document_id.clone();

        let mut edited = notes().with_id(id.as_str());
        edited.nodes[1].body = "beta now mentions zebras".into();
        let second = f.engine.register_document(&edited).await.unwrap();
        assert_eq!(second.status, RegistrationStatus::Updated);
        assert!(second.reindex.is_none());
        assert!(f.engine.collector().is_dirty(&id));
        assert!(titles(&f.engine, "zebras").await.is_empty());

        let flushed = f.engine.flush_now(&id).await.unwrap().unwrap();
        assert_eq!(flushed.delta().unwrap().updated.len(), 1);
        assert_eq!(titles(&f.engine, "zebras").await, vec!["Beta"]);
        assert!(!f.engine.collector().is_dirty(&id));
        assert!(f.engine.flush_now(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_due_documents_reindex_after_quiet_period() {
        let f = fixture().await;
        let id = f.engine.register_document(&notes()).await.unwrap().document_id;
        let mut edited = notes().with_id(id.as_str());
        edited.nodes[0].title = "Alpha prime".into();
        f.engine.register_document(&edited).await.unwrap();

        assert!(f.engine.reindex_due().await.is_empty());
        f.clock.advance(Duration::from_secs(60));
        let done = f.engine.reindex_due().await;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].0, id);
        assert_eq!(titles(&f.engine, "prime").await, vec!["Alpha prime"]);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_run() {
        let f = fixture().await;
        let id = f.engine.register_document(&notes()).await.unwrap().document_id;

        let (a, b) = tokio::join!(
            f.engine.reindex_document(&id),
            f.engine.reindex_document(&id)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(f.engine.in_flight(&id).is_none());
    }

    #[tokio::test]
    async fn test_busy_lease_defers_and_keeps_dirty() {
        let f = fixture().await;
        let id = f.engine.register_document(&notes()).await.unwrap().document_id;

        let other = LeaseManager::new(
            Arc::new(StorageLeaseStore::new(f.storage.clone())),
            Arc::new(f.clock.clone()),
            LeaseConfig::default(),
        );
        assert!(other
            .try_acquire(&index_scope(&id), "instance-b")
            .unwrap()
            .is_held());

        let outcome = f.engine.reindex_document(&id).await.unwrap();
        assert_eq!(
            outcome,
            ReindexOutcome::Deferred {
                holder: "instance-b".into()
            }
        );
        assert!(f.engine.collector().is_dirty(&id));
    }

    #[tokio::test]
    async fn test_unregister_purges_everything() {
        let f = fixture().await;
        let id = f.engine.register_document(&notes()).await.unwrap().document_id;

        assert!(f.engine.unregister_document(&id).await.unwrap());
        assert!(titles(&f.engine, "alpha").await.is_empty());
        assert!(f.storage.get_document(&id).unwrap().is_none());
        assert!(!f.engine.unregister_document(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_reopen_loads_persisted_corpus() {
        let f = fixture().await;
        f.engine.register_document(&notes()).await.unwrap();
        f.engine.shutdown().await;

        let reopened = open_engine(&f.storage, &f.clock, "instance-a").await;
        assert_eq!(titles(&reopened, "alpha").await, vec!["Alpha"]);
    }

    #[tokio::test]
    async fn test_corrupt_blob_rebuilds_on_open() {
        let f = fixture().await;
        let outcome = f.engine.register_document(&notes()).await.unwrap();
        f.engine.shutdown().await;
        f.storage
            .put_blob(&BlobKey::Graph(outcome.document_id.clone()), b"not a graph")
            .unwrap();

        let reopened = open_engine(&f.storage, &f.clock, "instance-a").await;
        let stats = reopened.stats().await.unwrap();
        assert_eq!(stats.corpus.entries, 2);
        assert_eq!(stats.corpus.mentions, 1);
    }

    #[tokio::test]
    async fn test_open_catches_up_with_unindexed_snapshots() {
        let f = fixture().await;
        f.engine.shutdown().await;

        // Registered by a writer that stopped before indexing.
        let leases = LeaseManager::new(
            Arc::new(StorageLeaseStore::new(f.storage.clone())),
            Arc::new(f.clock.clone()),
            LeaseConfig::default(),
        );
        let resolver = IdentityResolver::new(
            f.storage.clone(),
            leases,
            "instance-b",
            Arc::new(f.clock.clone()),
        );
        resolver.register(&notes()).unwrap();

        let reopened = open_engine(&f.storage, &f.clock, "instance-a").await;
        assert_eq!(titles(&reopened, "beta").await, vec!["Beta", "Alpha"]);
    }

    #[tokio::test]
    async fn test_peer_index_reaches_follower() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let clock = FakeClock::default();
        let bus: Arc<dyn MessageBus> = Arc::new(BroadcastBus::new());

        let open = |holder: &str| {
            CrossrefEngine::builder(storage.clone())
                .with_config(EngineConfig::default().with_holder_id(holder))
                .with_clock(Arc::new(clock.clone()))
                .with_bus(bus.clone())
                .open()
        };
        let writer = open("instance-a").await.unwrap();
        let follower = open("instance-b").await.unwrap();

        writer.register_document(&notes()).await.unwrap();

        let mut found = Vec::new();
        for _ in 0..100 {
            found = titles(&follower, "alpha").await;
            if !found.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(found, vec!["Alpha"]);

        writer.shutdown().await;
        follower.shutdown().await;
    }

    #[tokio::test]
    async fn test_own_bus_messages_are_ignored() {
        let f = fixture().await;
        let message = BusMessage::DocumentPurged {
            origin: "instance-a".into(),
            document_id: DocumentId::parse("D1").unwrap(),
        };
        assert!(!f.engine.apply_bus_message(&message).await.unwrap());

        let lease = BusMessage::LeaseAcquired {
            scope: "index:D1".into(),
            holder_id: "instance-b".into(),
        };
        assert!(!f.engine.apply_bus_message(&lease).await.unwrap());
    }
}
