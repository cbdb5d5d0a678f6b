//! # crossref-engine
//!
//! Local cross-reference engine over many linked documents.
//!
//! Provides:
//! - Ingest: registration with stable identity, debounced reindexing and
//!   fork decisions surfaced to the caller
//! - Queries: full-text search, backlinks, traversal and node views with
//!   opportunistic link hardening
//! - Coordination: per-document index leases and bus notifications so
//!   several instances can share one store

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod query;

pub use config::{new_holder_id, EngineConfig, DEFAULT_SEARCH_LIMIT};
pub use driver::CollectorDriver;
pub use engine::{CrossrefEngine, EngineBuilder, RegisterOutcome, ReindexOutcome};
pub use error::EngineError;
pub use query::{EngineStats, HardeningPatch, NodeView, SearchFilters};
