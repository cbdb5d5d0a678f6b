//! Where lease rows live.
//!
//! Every mutation is a compare-and-swap on the whole row so two instances
//! racing for the same scope cannot both win.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crossref_storage::column_families::CF_LEASES;
use crossref_storage::{LeaseKey, Storage};

use crate::error::CoordinationError;
use crate::lease::Lease;

pub trait LeaseStore: Send + Sync {
    fn load(&self, scope: &str) -> Result<Option<Lease>, CoordinationError>;

    /// Replace the row for `scope` if it currently equals `expected`.
    /// `new = None` removes it. Returns whether the swap happened.
    fn compare_and_swap(
        &self,
        scope: &str,
        expected: Option<&Lease>,
        new: Option<&Lease>,
    ) -> Result<bool, CoordinationError>;

    /// All rows, in scope order.
    fn list(&self) -> Result<Vec<Lease>, CoordinationError>;
}

/// Process-local lease table.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    rows: Mutex<BTreeMap<String, Lease>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn load(&self, scope: &str) -> Result<Option<Lease>, CoordinationError> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows.get(scope).cloned())
    }

    fn compare_and_swap(
        &self,
        scope: &str,
        expected: Option<&Lease>,
        new: Option<&Lease>,
    ) -> Result<bool, CoordinationError> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        if rows.get(scope) != expected {
            return Ok(false);
        }
        match new {
            Some(lease) => rows.insert(scope.to_string(), lease.clone()),
            None => rows.remove(scope),
        };
        Ok(true)
    }

    fn list(&self) -> Result<Vec<Lease>, CoordinationError> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows.values().cloned().collect())
    }
}

/// Lease table in the `leases` column family of the shared store.
pub struct StorageLeaseStore {
    storage: Arc<Storage>,
}

impl StorageLeaseStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl LeaseStore for StorageLeaseStore {
    fn load(&self, scope: &str) -> Result<Option<Lease>, CoordinationError> {
        let key = LeaseKey::new(scope).to_bytes();
        match self.storage.get(CF_LEASES, &key)? {
            Some(bytes) => Ok(Some(Lease::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn compare_and_swap(
        &self,
        scope: &str,
        expected: Option<&Lease>,
        new: Option<&Lease>,
    ) -> Result<bool, CoordinationError> {
        let key = LeaseKey::new(scope).to_bytes();
        let expected = expected.map(Lease::to_bytes).transpose()?;
        let new = new.map(Lease::to_bytes).transpose()?;
        Ok(self
            .storage
            .compare_and_swap(CF_LEASES, &key, expected.as_deref(), new.as_deref())?)
    }

    fn list(&self) -> Result<Vec<Lease>, CoordinationError> {
        let mut leases = Vec::new();
        for (key, value) in self.storage.prefix_iterator(CF_LEASES, LeaseKey::PREFIX)? {
            match Lease::from_bytes(&value) {
                Ok(lease) => leases.push(lease),
                Err(e) => warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "Skipping undecodable lease row"
                ),
            }
        }
        Ok(leases)
    }
}
