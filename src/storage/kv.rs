//! Embedded ordered key-value backend
//!
//! One on-disk sled database with a single named tree. Keys are encoded as
//! 8 bytes big-endian, so the tree's lexicographic order matches numeric
//! key order (an implementation detail, not a correctness requirement).
//!
//! On store the blob is split at its first zero byte and only the payload
//! segment is persisted; the metadata segment is discarded and never comes
//! back on load.

use super::{backend_fatal, split_blob, Database, Session, StorageResult};
use crate::protocol;
use sled::Tree;
use std::path::Path;

const TREE_NAME: &str = "cache";

/// Embedded key-value cache database
pub struct KvDatabase {
    db: sled::Db,
    tree: Tree,
}

/// Session over the shared tree. Tree handles are reference-counted views
/// onto the one open database.
struct KvSession {
    tree: Tree,
}

impl KvDatabase {
    /// Open (or create) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { db, tree })
    }
}

impl Database for KvDatabase {
    fn open(&self) -> StorageResult<Box<dyn Session>> {
        Ok(Box::new(KvSession {
            tree: self.tree.clone(),
        }))
    }
}

impl Drop for KvDatabase {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            log::warn!("flush on close failed: {}", e);
        }
    }
}

impl Session for KvSession {
    fn load(&mut self, key: u64, buf: &mut Vec<u8>) -> StorageResult<()> {
        buf.clear();
        match self.tree.get(key.to_be_bytes()) {
            Ok(Some(payload)) => {
                protocol::grow(buf, payload.len());
                buf.extend_from_slice(&payload);
            }
            Ok(None) => {}
            // No way to report a partial failure over the wire.
            Err(e) => backend_fatal("cache tree read failed", e),
        }
        Ok(())
    }

    fn store(&mut self, key: u64, data: &[u8]) -> StorageResult<()> {
        let (_metadata, payload) = split_blob(data);
        if let Err(e) = self.tree.insert(key.to_be_bytes(), payload) {
            backend_fatal("cache tree write failed", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_db(dir: &TempDir) -> KvDatabase {
        KvDatabase::open(dir.path().join("cache.sled")).unwrap()
    }

    #[test]
    fn test_store_strips_metadata() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let mut s = db.open().unwrap();

        s.store(1, b"metadata\0payload bytes").unwrap();

        let mut buf = Vec::new();
        s.load(1, &mut buf).unwrap();
        assert_eq!(buf, b"payload bytes");
    }

    #[test]
    fn test_payload_keeps_interior_zeros() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let mut s = db.open().unwrap();

        s.store(2, b"m\0pay\0load").unwrap();

        let mut buf = Vec::new();
        s.load(2, &mut buf).unwrap();
        assert_eq!(buf, b"pay\0load");
    }

    #[test]
    fn test_blob_without_zero_stores_empty_payload() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let mut s = db.open().unwrap();

        s.store(3, b"all metadata no terminator").unwrap();

        let mut buf = vec![1, 2, 3];
        s.load(3, &mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_missing_key_is_empty_not_error() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let mut s = db.open().unwrap();

        let mut buf = vec![0xFF; 8];
        s.load(99, &mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overwrite_wins() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let mut s = db.open().unwrap();

        s.store(4, b"\0first").unwrap();
        s.store(4, b"\0second").unwrap();

        let mut buf = Vec::new();
        s.load(4, &mut buf).unwrap();
        assert_eq!(buf, b"second");
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.sled");

        {
            let db = KvDatabase::open(&path).unwrap();
            let mut s = db.open().unwrap();
            s.store(5, b"\0durable").unwrap();
        }

        let db = KvDatabase::open(&path).unwrap();
        let mut s = db.open().unwrap();
        let mut buf = Vec::new();
        s.load(5, &mut buf).unwrap();
        assert_eq!(buf, b"durable");
    }
}
