//! The indexing worker task.
//!
//! Callers never touch the corpus for writing. They send requests over a
//! channel and get the outcome back on a oneshot, matched by a ULID
//! correlation id. The worker handles one request at a time, which is
//! what keeps staged writes of different requests from interleaving.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crossref_storage::Storage;
use crossref_types::{DocumentId, DocumentSnapshot};

use crate::corpus::SharedCorpus;
use crate::error::IndexingError;
use crate::persist::{forget_document, load_corpus, persist_all, persist_document, CorpusLoad};
use crate::pipeline::{index_document, purge_document, IndexOutcome, IndexingConfig};
use crate::rebuild::{rebuild_corpus, LoggingProgressCallback};

/// Requests queued before `submit` waits for room.
pub const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Documents between rebuild progress log lines.
const REBUILD_LOG_EVERY: usize = 100;

/// Work the indexing worker accepts.
#[derive(Debug, Clone)]
pub enum IndexRequest {
    /// Replace a document's entries and edges.
    Index(Box<DocumentSnapshot>),
    /// Remove a document entirely.
    Purge(DocumentId),
    /// Replace the whole corpus with one built from these snapshots.
    Rebuild(Vec<DocumentSnapshot>),
    /// Replace the corpus with the persisted blobs, rebuilding from the
    /// stored snapshots if they are unusable. Needs storage.
    Reload,
}

impl IndexRequest {
    fn describe(&self) -> String {
        match self {
            IndexRequest::Index(snapshot) => format!("index {}", snapshot.document_id),
            IndexRequest::Purge(document_id) => format!("purge {document_id}"),
            IndexRequest::Rebuild(snapshots) => format!("rebuild {} documents", snapshots.len()),
            IndexRequest::Reload => "reload".to_string(),
        }
    }
}

type Reply = Result<IndexOutcome, IndexingError>;

struct Envelope {
    correlation_id: Ulid,
    request: IndexRequest,
    cancel: CancellationToken,
    reply: oneshot::Sender<Reply>,
}

/// A submitted request whose outcome has not been collected yet.
pub struct PendingRequest {
    correlation_id: Ulid,
    cancel: CancellationToken,
    reply: oneshot::Receiver<Reply>,
}

impl PendingRequest {
    pub fn correlation_id(&self) -> Ulid {
        self.correlation_id
    }

    /// Abandon the request. The chunk in progress finishes; nothing is
    /// published.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this request, for handing to another task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the outcome.
    pub async fn wait(self) -> Reply {
        self.reply.await.map_err(|_| IndexingError::WorkerStopped)?
    }
}

/// Builder for the worker task.
pub struct IndexingWorker {
    corpus: SharedCorpus,
    config: IndexingConfig,
    storage: Option<Arc<Storage>>,
}

impl IndexingWorker {
    pub fn new(corpus: SharedCorpus, config: IndexingConfig) -> Self {
        Self {
            corpus,
            config,
            storage: None,
        }
    }

    /// Persist blobs and checkpoints after every publish.
    pub fn with_storage(mut self, storage: Arc<Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Start the worker. Must be called inside a tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.run(rx, shutdown.clone()));
        info!("Indexing worker started");
        WorkerHandle {
            tx,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    async fn run(self, mut rx: mpsc::Receiver<Envelope>, shutdown: CancellationToken) {
        loop {
            let envelope = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.handle(envelope).await;
        }
        info!("Indexing worker stopped");
    }

    async fn handle(&self, envelope: Envelope) {
        let Envelope {
            correlation_id,
            request,
            cancel,
            reply,
        } = envelope;
        let what = request.describe();
        debug!(correlation_id = %correlation_id, request = %what, "Handling request");

        let result = if cancel.is_cancelled() {
            Ok(IndexOutcome::Cancelled { chunks_done: 0 })
        } else {
            self.process(request, &cancel).await
        };

        match &result {
            Ok(outcome) => debug!(
                correlation_id = %correlation_id,
                request = %what,
                cancelled = outcome.is_cancelled(),
                "Request complete"
            ),
            Err(e) => warn!(
                correlation_id = %correlation_id,
                request = %what,
                error = %e,
                "Request failed"
            ),
        }
        if reply.send(result).is_err() {
            debug!(correlation_id = %correlation_id, "Requester went away");
        }
    }

    async fn process(&self, request: IndexRequest, cancel: &CancellationToken) -> Reply {
        match request {
            IndexRequest::Index(snapshot) => {
                let outcome = index_document(&self.corpus, &snapshot, &self.config, cancel).await?;
                if !outcome.is_cancelled() {
                    self.persist(&snapshot).await;
                }
                Ok(outcome)
            }
            IndexRequest::Purge(document_id) => {
                let outcome = purge_document(&self.corpus, &document_id).await?;
                if let Some(storage) = &self.storage {
                    if let Err(e) = forget_document(storage, &document_id) {
                        warn!(document_id = %document_id, error = %e, "Failed to drop document blobs");
                    }
                }
                Ok(outcome)
            }
            IndexRequest::Rebuild(snapshots) => self.rebuild(snapshots, cancel).await,
            IndexRequest::Reload => {
                let Some(storage) = &self.storage else {
                    return Err(IndexingError::NoStorage);
                };
                match load_corpus(storage, &self.config)? {
                    CorpusLoad::Loaded { corpus, missing } => {
                        if !missing.is_empty() {
                            debug!(missing = missing.len(), "Reloaded without some documents");
                        }
                        let entries = corpus.index.len();
                        *self.corpus.write().await = corpus;
                        Ok(IndexOutcome::Reloaded { entries })
                    }
                    CorpusLoad::NeedsRebuild { .. } => {
                        let snapshots = storage.list_snapshots()?;
                        self.rebuild(snapshots, cancel).await
                    }
                }
            }
        }
    }

    async fn rebuild(&self, snapshots: Vec<DocumentSnapshot>, cancel: &CancellationToken) -> Reply {
        let progress = LoggingProgressCallback::new(REBUILD_LOG_EVERY);
        let Some(result) = rebuild_corpus(&snapshots, &self.config, &progress, cancel).await? else {
            return Ok(IndexOutcome::Cancelled { chunks_done: 0 });
        };
        let stats = result.corpus.stats();
        *self.corpus.write().await = result.corpus;
        if let Some(storage) = &self.storage {
            let corpus = self.corpus.read().await;
            if let Err(e) = persist_all(storage, &corpus, &snapshots, Utc::now()) {
                warn!(error = %e, "Failed to persist rebuilt corpus");
            }
        }
        Ok(IndexOutcome::Rebuilt {
            documents: stats.documents,
            entries: stats.entries,
        })
    }

    /// Write the blobs and checkpoint of a published document. A failure
    /// leaves the old checkpoint behind, so the document is reindexed on
    /// the next open.
    async fn persist(&self, snapshot: &DocumentSnapshot) {
        let Some(storage) = &self.storage else {
            return;
        };
        let corpus = self.corpus.read().await;
        if let Err(e) = persist_document(storage, &corpus, snapshot, Utc::now()) {
            warn!(
                document_id = %snapshot.document_id,
                error = %e,
                "Failed to persist document blobs"
            );
        }
    }
}

/// Cloneable handle to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl WorkerHandle {
    /// Queue a request. The returned handle collects or cancels it.
    pub async fn submit(&self, request: IndexRequest) -> Result<PendingRequest, IndexingError> {
        let correlation_id = Ulid::new();
        let cancel = CancellationToken::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            correlation_id,
            request,
            cancel: cancel.clone(),
            reply: reply_tx,
        };
        self.tx
            .send(envelope)
            .await
            .map_err(|_| IndexingError::WorkerStopped)?;
        Ok(PendingRequest {
            correlation_id,
            cancel,
            reply: reply_rx,
        })
    }

    /// Index a snapshot and wait for the outcome.
    pub async fn index(&self, snapshot: DocumentSnapshot) -> Reply {
        self.submit(IndexRequest::Index(Box::new(snapshot)))
            .await?
            .wait()
            .await
    }

    /// Purge a document and wait for the outcome.
    pub async fn purge(&self, document_id: DocumentId) -> Reply {
        self.submit(IndexRequest::Purge(document_id))
            .await?
            .wait()
            .await
    }

    /// Rebuild from snapshots and wait for the outcome.
    pub async fn rebuild(&self, snapshots: Vec<DocumentSnapshot>) -> Reply {
        self.submit(IndexRequest::Rebuild(snapshots))
            .await?
            .wait()
            .await
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Stop the worker after the request in progress and wait for it.
    /// Queued requests are dropped and their callers see
    /// [`IndexingError::WorkerStopped`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}
