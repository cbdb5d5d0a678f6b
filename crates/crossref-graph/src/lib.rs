//! # crossref-graph
//!
//! Relationship graph between nodes of every registered document.
//!
//! Two edge kinds are kept:
//! - Memberships: one entity per explicit grouping, plus a `uid -> groups`
//!   reverse index. Never expanded into pairwise edges.
//! - Mentions: directed textual references, indexed forward and reverse.
//!
//! Nodes are addressed only by [`Uid`](crossref_types::Uid), so reference
//! cycles are ordinary data.

pub mod error;
pub mod snapshot;
pub mod store;
pub mod traverse;
pub mod types;

pub use error::GraphError;
pub use snapshot::{GraphSnapshot, GRAPH_SNAPSHOT_VERSION};
pub use store::GraphStore;
pub use types::{
    Backlink, Direction, EdgeKind, Membership, Mention, MentionKind, PurgeReport, TraversalStep,
    TraverseOptions,
};
