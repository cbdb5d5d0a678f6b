//! RocksDB wrapper for crossref storage.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Registry and snapshot reads/writes (atomic together via WriteBatch)
//! - Per-document derived-store blobs, written with their checkpoint in one batch
//! - Compare-and-swap for lease rows
//! - Generic column family access for other crates

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crossref_types::{DocumentId, DocumentRecord, DocumentSnapshot};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_BLOBS, CF_CHECKPOINTS, CF_DOCUMENTS, CF_LEASES,
    CF_SNAPSHOTS,
};
use crate::error::StorageError;
use crate::keys::{BlobKey, CheckpointKey, DocumentKey, SnapshotKey};

/// Main storage interface for crossref
pub struct Storage {
    db: DB,
    /// Serializes compare-and-swap so read-check-write is atomic for every
    /// holder of this handle.
    cas_lock: Mutex<()>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self {
            db,
            cas_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    // ==================== Registry ====================

    /// Store a registry record together with its snapshot.
    #[instrument(skip(self, record, snapshot), fields(document_id = %record.document_id))]
    pub fn put_document(
        &self,
        record: &DocumentRecord,
        snapshot: &DocumentSnapshot,
    ) -> Result<(), StorageError> {
        let docs_cf = self.cf(CF_DOCUMENTS)?;
        let snaps_cf = self.cf(CF_SNAPSHOTS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &docs_cf,
            DocumentKey::new(&record.document_id).to_bytes(),
            record.to_bytes()?,
        );
        batch.put_cf(
            &snaps_cf,
            SnapshotKey::new(&snapshot.document_id).to_bytes(),
            serde_json::to_vec(snapshot)?,
        );
        self.db.write(batch)?;

        debug!(node_count = record.node_count, "Stored document");
        Ok(())
    }

    /// Store only the registry record (relocation, rename).
    pub fn put_record(&self, record: &DocumentRecord) -> Result<(), StorageError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        self.db.put_cf(
            &cf,
            DocumentKey::new(&record.document_id).to_bytes(),
            record.to_bytes()?,
        )?;
        Ok(())
    }

    /// Get a registry record by document id
    pub fn get_document(&self, id: &DocumentId) -> Result<Option<DocumentRecord>, StorageError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(&cf, DocumentKey::new(id).to_bytes())? {
            Some(bytes) => Ok(Some(DocumentRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List all registry records in document id order.
    ///
    /// Undecodable rows are skipped with a warning.
    pub fn list_documents(&self) -> Result<Vec<DocumentRecord>, StorageError> {
        let mut records = Vec::new();
        for (key, value) in self.prefix_iterator(CF_DOCUMENTS, DocumentKey::PREFIX)? {
            match DocumentRecord::from_bytes(&value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "Skipping undecodable registry row"
                ),
            }
        }
        Ok(records)
    }

    /// Get the latest accepted snapshot for a document
    pub fn get_snapshot(&self, id: &DocumentId) -> Result<Option<DocumentSnapshot>, StorageError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        match self.db.get_cf(&cf, SnapshotKey::new(id).to_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List all stored snapshots in document id order.
    ///
    /// Undecodable rows are skipped with a warning.
    pub fn list_snapshots(&self) -> Result<Vec<DocumentSnapshot>, StorageError> {
        let mut snapshots = Vec::new();
        for (key, value) in self.prefix_iterator(CF_SNAPSHOTS, SnapshotKey::PREFIX)? {
            match serde_json::from_slice::<DocumentSnapshot>(&value) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "Skipping undecodable snapshot row"
                ),
            }
        }
        Ok(snapshots)
    }

    /// Remove a document's registry row, snapshot, checkpoint and blobs
    /// atomically.
    #[instrument(skip(self), fields(document_id = %id))]
    pub fn unregister(&self, id: &DocumentId) -> Result<bool, StorageError> {
        let existed = self.get_document(id)?.is_some();

        let mut batch = WriteBatch::default();
        batch.delete_cf(&self.cf(CF_DOCUMENTS)?, DocumentKey::new(id).to_bytes());
        batch.delete_cf(&self.cf(CF_SNAPSHOTS)?, SnapshotKey::new(id).to_bytes());
        batch.delete_cf(&self.cf(CF_CHECKPOINTS)?, CheckpointKey::new(id).to_bytes());
        let blobs = self.cf(CF_BLOBS)?;
        batch.delete_cf(&blobs, BlobKey::Index(id.clone()).to_bytes());
        batch.delete_cf(&blobs, BlobKey::Graph(id.clone()).to_bytes());
        self.db.write(batch)?;

        debug!(existed, "Unregistered document");
        Ok(existed)
    }

    // ==================== Blobs ====================

    /// Store a single blob
    pub fn put_blob(&self, key: &BlobKey, bytes: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(CF_BLOBS)?;
        self.db.put_cf(&cf, key.to_bytes(), bytes)?;
        Ok(())
    }

    /// Get a blob by key
    pub fn get_blob(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_BLOBS)?;
        Ok(self.db.get_cf(&cf, key.to_bytes())?)
    }

    /// Store a document's index and graph blobs together with its
    /// checkpoint in one atomic batch. No other document's rows are
    /// touched.
    #[instrument(skip(self, index, graph, checkpoint), fields(document_id = %id))]
    pub fn put_derived(
        &self,
        id: &DocumentId,
        index: &[u8],
        graph: &[u8],
        checkpoint: &[u8],
    ) -> Result<(), StorageError> {
        let blobs = self.cf(CF_BLOBS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&blobs, BlobKey::Index(id.clone()).to_bytes(), index);
        batch.put_cf(&blobs, BlobKey::Graph(id.clone()).to_bytes(), graph);
        batch.put_cf(&self.cf(CF_CHECKPOINTS)?, CheckpointKey::new(id).to_bytes(), checkpoint);
        self.db.write(batch)?;
        Ok(())
    }

    /// Delete a document's blobs and checkpoint in one batch.
    #[instrument(skip(self), fields(document_id = %id))]
    pub fn delete_derived(&self, id: &DocumentId) -> Result<(), StorageError> {
        let blobs = self.cf(CF_BLOBS)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(&blobs, BlobKey::Index(id.clone()).to_bytes());
        batch.delete_cf(&blobs, BlobKey::Graph(id.clone()).to_bytes());
        batch.delete_cf(&self.cf(CF_CHECKPOINTS)?, CheckpointKey::new(id).to_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    /// Every blob of one kind, keyed by document. Rows with an undecodable
    /// key are skipped.
    pub fn list_blobs(&self, prefix: &[u8]) -> Result<Vec<(DocumentId, Vec<u8>)>, StorageError> {
        let mut blobs = Vec::new();
        for (key, value) in self.prefix_iterator(CF_BLOBS, prefix)? {
            match BlobKey::from_bytes(&key) {
                Ok(key) => blobs.push((key.document_id().clone(), value)),
                Err(e) => warn!(error = %e, "Skipping blob row with bad key"),
            }
        }
        Ok(blobs)
    }

    // ==================== Checkpoints ====================

    /// Store an indexing checkpoint for a document
    pub fn put_checkpoint(&self, id: &DocumentId, bytes: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        self.db.put_cf(&cf, CheckpointKey::new(id).to_bytes(), bytes)?;
        Ok(())
    }

    /// Get the indexing checkpoint for a document
    pub fn get_checkpoint(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        Ok(self.db.get_cf(&cf, CheckpointKey::new(id).to_bytes())?)
    }

    // ==================== Generic Column Family Access ====================

    /// Put a value into a specific column family.
    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    /// Get a value from a specific column family.
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(cf_name)?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    /// Delete a value from a specific column family.
    pub fn delete(&self, cf_name: &str, key: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(cf_name)?;
        self.db.delete_cf(&cf, key)?;
        Ok(())
    }

    /// Iterate over entries with a given prefix in a column family.
    ///
    /// Returns (key, value) pairs in key order.
    #[allow(clippy::type_complexity)]
    pub fn prefix_iterator(
        &self,
        cf_name: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let cf = self.cf(cf_name)?;

        let mut results = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            // Stop if we've passed the prefix
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }

        Ok(results)
    }

    /// Atomically replace `key` if its current value equals `expected`.
    ///
    /// `expected = None` means the key must be absent; `new = None` deletes.
    /// Returns whether the swap happened.
    pub fn compare_and_swap(
        &self,
        cf_name: &str,
        key: &[u8],
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool, StorageError> {
        let _guard = self
            .cas_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let cf = self.cf(cf_name)?;

        let current = self.db.get_cf(&cf, key)?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        match new {
            Some(value) => self.db.put_cf(&cf, key, value)?,
            None => self.db.delete_cf(&cf, key)?,
        }
        Ok(true)
    }

    // ===== Admin Operations =====

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(&cf)?;
            }
        }
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let mut stats = StorageStats::default();

        if let Some(cf) = self.db.cf_handle(CF_DOCUMENTS) {
            stats.document_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_SNAPSHOTS) {
            stats.snapshot_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_LEASES) {
            stats.lease_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_CHECKPOINTS) {
            stats.checkpoint_count = self.count_cf_entries(cf)?;
        }

        stats.index_blob_bytes = self.blob_bytes(BlobKey::INDEX_PREFIX)?;
        stats.graph_blob_bytes = self.blob_bytes(BlobKey::GRAPH_PREFIX)?;
        stats.disk_usage_bytes = self.get_disk_usage()?;

        Ok(stats)
    }

    fn blob_bytes(&self, prefix: &[u8]) -> Result<u64, StorageError> {
        Ok(self
            .prefix_iterator(CF_BLOBS, prefix)?
            .iter()
            .map(|(_, value)| value.len() as u64)
            .sum())
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);
        for item in iter {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> Result<u64, StorageError> {
        let path = self.db.path();
        let mut total_size = 0u64;

        if let Ok(entries) = std::fs::read_dir(path) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }

        Ok(total_size)
    }
}

/// Statistics about the storage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of registered documents
    pub document_count: u64,
    /// Number of stored source snapshots
    pub snapshot_count: u64,
    /// Number of lease rows
    pub lease_count: u64,
    /// Number of indexing checkpoints
    pub checkpoint_count: u64,
    /// Total size of the per-document index blobs
    pub index_blob_bytes: u64,
    /// Total size of the per-document graph blobs
    pub graph_blob_bytes: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}
