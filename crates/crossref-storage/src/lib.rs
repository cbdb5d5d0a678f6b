//! Storage layer for the crossref engine.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for the registry, snapshots, blobs, leases and checkpoints
//! - Atomic writes via WriteBatch (registry + snapshot, index + graph blobs)
//! - Compare-and-swap for coordination rows
//! - Independent reads: a bad blob never blocks the registry

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{BlobKey, CheckpointKey, DocumentKey, LeaseKey, SnapshotKey};
