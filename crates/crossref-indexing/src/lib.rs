//! # crossref-indexing
//!
//! Indexing pipeline for the crossref engine.
//!
//! Keeps the search index and the relationship graph in step with the
//! registered documents, off the caller's path.
//!
//! ## Key Components
//!
//! - [`Corpus`]: search index plus graph, published together
//! - [`IndexingWorker`]: background task fed through a [`WorkerHandle`]
//! - [`index_document`]: chunked, cancellable replace of one document
//! - [`rebuild_corpus`]: fresh corpus from source snapshots
//! - [`IndexCheckpoint`]: last published content per document
//!
//! ## Example
//!
//! ```ignore
//! use crossref_indexing::{Corpus, IndexingConfig, IndexingWorker};
//!
//! let corpus = Corpus::new(Default::default())?.into_shared();
//! let worker = IndexingWorker::new(corpus.clone(), IndexingConfig::default())
//!     .with_storage(storage)
//!     .spawn();
//!
//! let outcome = worker.index(snapshot).await?;
//! ```

pub mod checkpoint;
pub mod corpus;
pub mod error;
pub mod persist;
pub mod pipeline;
pub mod rebuild;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use checkpoint::IndexCheckpoint;
pub use corpus::{
    entry_for, CatalogLookup, Corpus, CorpusStats, DocumentEdges, IndexDelta, SharedCorpus,
};
pub use error::IndexingError;
pub use persist::{forget_document, load_corpus, persist_all, persist_document, CorpusLoad};
pub use pipeline::{
    index_document, purge_document, IndexOutcome, IndexingConfig, DEFAULT_CHUNK_SIZE,
};
pub use rebuild::{
    rebuild_corpus, LoggingProgressCallback, NoOpProgressCallback, ProgressCallback,
    RebuildProgress, RebuildResult,
};
pub use worker::{IndexRequest, IndexingWorker, PendingRequest, WorkerHandle, REQUEST_QUEUE_CAPACITY};
