//! # crossref-identity
//!
//! Identity resolver for the crossref engine.
//!
//! Turns host payloads into snapshots where every document has an
//! immutable id and every node an immutable guid:
//! - mints document ids on first sight
//! - detects relocated and forked documents by source fingerprint and
//!   content hash, and surfaces forks to the caller instead of merging
//! - assigns node guids: legacy ids migrate deterministically and bare
//!   nodes keep their guid across moves
//! - serializes decisions per document id through a coordination lease

mod error;
mod infer;
mod migrate;
mod resolver;

pub use error::IdentityError;
pub use infer::{infer_semantic_type, TypeInference};
pub use migrate::{legacy_guid, migrate_nodes, UNTITLED_DOCUMENT};
pub use resolver::{
    ForkChoice, ForkTicket, IdentityConfig, IdentityResolver, Registration, RegistrationStatus,
};
