//! # crossref-search
//!
//! Full-text search over document nodes using Tantivy.
//!
//! ## Features
//! - In-memory Tantivy index, one document per node keyed by uid
//! - Staged writes that become visible only on publish
//! - BM25 scoring with title and tag boosts, recency tie-break
//! - Type and document-scope filters
//! - Canonical snapshot codec with byte-stable output

pub mod document;
pub mod error;
pub mod index;
pub mod indexer;
pub mod schema;
pub mod searcher;
pub mod snapshot;

pub use document::{tokenize, IndexEntry};
pub use error::SearchError;
pub use index::{SearchIndex, SearchIndexConfig};
pub use indexer::PublishSummary;
pub use schema::{build_node_schema, SearchSchema};
pub use searcher::{NodeSearcher, SearchHit, SearchOptions, TAGS_BOOST, TITLE_BOOST};
pub use snapshot::{IndexSnapshot, SNAPSHOT_FORMAT, SNAPSHOT_VERSION};
