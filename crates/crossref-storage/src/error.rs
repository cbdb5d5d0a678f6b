//! Storage layer error types.

use thiserror::Error;

/// Errors raised by the store. Missing rows are `Ok(None)`, never errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// The database was opened without one of the crossref column families
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// A row key that does not follow the `{prefix}:{id}` layout
    #[error("Key error: {0}")]
    Key(String),

    /// A registry, snapshot or checkpoint row that does not decode
    #[error("Undecodable row: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_json_is_an_undecodable_row() {
        let json_err = serde_json::from_slice::<u32>(b"{").unwrap_err();
        let err: StorageError = json_err.into();
        assert!(matches!(err, StorageError::Serialization(_)));
        assert!(err.to_string().starts_with("Undecodable row: "));
    }
}
