//! Storage backends
//!
//! This module defines the Database/Session capability pair and the three
//! interchangeable backends: an in-memory map, an embedded ordered
//! key-value file, and a relational database.

pub mod kv;
pub mod ram;
pub mod sql;

use crate::config::{Driver, StorageConfig};
use std::sync::Arc;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key-value store error: {0}")]
    Kv(#[from] sled::Error),

    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Process-lifetime handle onto a storage backend.
///
/// Backend resources are released when the handle is dropped; callers keep
/// exactly one per process.
pub trait Database: Send + Sync {
    /// Acquire a session for one connection.
    fn open(&self) -> StorageResult<Box<dyn Session>>;
}

/// Per-connection storage handle. Never shared across connections; dropped
/// exactly once when the connection's serve loop exits for any reason.
pub trait Session: Send {
    /// Fetch the payload stored under `key` into `buf`, reusing its
    /// capacity when sufficient. A missing key leaves `buf` empty; that is
    /// not an error.
    fn load(&mut self, key: u64, buf: &mut Vec<u8>) -> StorageResult<()>;

    /// Store `data` under `key`, overwriting any existing entry.
    fn store(&mut self, key: u64, data: &[u8]) -> StorageResult<()>;
}

/// Open the backend selected by the configuration.
pub fn open_database(config: &StorageConfig) -> StorageResult<Arc<dyn Database>> {
    match config.driver {
        Driver::Ram => Ok(Arc::new(ram::RamDatabase::new())),
        Driver::Kv => Ok(Arc::new(kv::KvDatabase::open(&config.source)?)),
        Driver::Sqlite => Ok(Arc::new(sql::SqlDatabase::open(
            &config.source,
            config.lockless,
        )?)),
    }
}

/// Split a blob at the first zero byte into its metadata segment (before)
/// and payload segment (after). A blob with no zero byte is all metadata.
///
/// The kv and sql backends persist only the payload segment; the ram
/// backend never splits. This divergence is part of each backend's
/// contract, not something to unify.
pub(crate) fn split_blob(data: &[u8]) -> (&[u8], &[u8]) {
    match data.iter().position(|&b| b == 0) {
        Some(pos) => (&data[..pos], &data[pos + 1..]),
        None => (data, &[]),
    }
}

/// A fault in a backend that has no way to report failure over the wire.
/// The protocol offers no partial-failure response, so stop the process.
pub(crate) fn backend_fatal(context: &str, err: impl std::fmt::Display) -> ! {
    log::error!("{}: {}", context, err);
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_blob_at_first_zero() {
        let blob = b"meta\0payload";
        let (meta, payload) = split_blob(blob);
        assert_eq!(meta, b"meta");
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_split_blob_keeps_later_zeros() {
        let blob = b"m\0pay\0load";
        let (meta, payload) = split_blob(blob);
        assert_eq!(meta, b"m");
        assert_eq!(payload, b"pay\0load");
    }

    #[test]
    fn test_split_blob_without_zero_is_all_metadata() {
        let (meta, payload) = split_blob(b"no terminator");
        assert_eq!(meta, b"no terminator");
        assert!(payload.is_empty());
    }

    #[test]
    fn test_split_blob_leading_zero() {
        let (meta, payload) = split_blob(b"\0payload");
        assert!(meta.is_empty());
        assert_eq!(payload, b"payload");
    }
}
