//! # crossref-types
//!
//! Shared domain types for the crossref engine.
//!
//! This crate defines the core data structures used throughout the system:
//! - Identifiers: document ids, node guids and the composite `Uid`
//! - Documents: raw host input and the normalized snapshot form
//! - Content hashing for dirty detection and fork checks
//! - Registry records
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use crossref_types::{DocumentId, NodeGuid, Uid};
//!
//! let uid = Uid::new(DocumentId::mint(), NodeGuid::mint());
//! assert_eq!(Uid::parse(&uid.to_string()).unwrap(), uid);
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod hash;
pub mod ids;
pub mod record;

pub use config::{CollectorSettings, IndexingSettings, LeaseSettings, SearchSettings, Settings};
pub use document::{
    normalize_title, DocumentSnapshot, Grouping, Node, NodeLayout, RawDocument, RawGrouping,
    RawNode, SemanticType, SourceFingerprint,
};
pub use error::CrossrefError;
pub use hash::{content_hash, ContentHash};
pub use ids::{DocumentId, GroupId, NodeGuid, Uid, GROUP_SEPARATOR, UID_SEPARATOR};
pub use record::DocumentRecord;
