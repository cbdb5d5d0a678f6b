//! Column family definitions for RocksDB.
//!
//! Each column family isolates data with different access patterns:
//! - documents: Document registry rows (small, read on every open)
//! - snapshots: Latest accepted normalized snapshot per document
//! - blobs: Serialized search index and graph store
//! - leases: Coordination leases shared between instances
//! - checkpoints: Per-document indexing checkpoints

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for the document registry
pub const CF_DOCUMENTS: &str = "documents";

/// Column family name for source snapshots
pub const CF_SNAPSHOTS: &str = "snapshots";

/// Column family name for derived-store blobs (index, graph)
pub const CF_BLOBS: &str = "blobs";

/// Column family name for coordination leases
pub const CF_LEASES: &str = "leases";

/// Column family name for indexing checkpoints
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[
    CF_DOCUMENTS,
    CF_SNAPSHOTS,
    CF_BLOBS,
    CF_LEASES,
    CF_CHECKPOINTS,
];

/// Snapshots and blobs are large JSON values; compress them.
fn compressed_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_DOCUMENTS, Options::default()),
        ColumnFamilyDescriptor::new(CF_SNAPSHOTS, compressed_options()),
        ColumnFamilyDescriptor::new(CF_BLOBS, compressed_options()),
        ColumnFamilyDescriptor::new(CF_LEASES, Options::default()),
        ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default()),
    ]
}
