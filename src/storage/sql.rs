//! Relational backend
//!
//! One `cache` table keyed by hash, with the blob decomposed into a
//! metadata column (the bytes before the first zero byte) and a payload
//! column. Loads return only the payload. Each row is stamped with a local
//! wall-clock time on write.
//!
//! Two access modes: the default serializes every session behind one shared
//! connection and a mutex; lockless mode gives each session a dedicated
//! connection and lets the database manage concurrency itself.

use super::{split_blob, Database, Session, StorageResult};
use crate::protocol;
use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS cache (hash INTEGER PRIMARY KEY, size INTEGER, time TEXT, metadata TEXT, data BLOB);";
const STMT_PUT: &str = "INSERT OR REPLACE INTO cache VALUES (?1, ?2, ?3, ?4, ?5);";
const STMT_GET: &str = "SELECT data FROM cache WHERE hash = ?1;";
const STMT_SUM: &str = "SELECT COALESCE(SUM(size), 0) FROM cache;";
const STMT_COUNT: &str = "SELECT COUNT(*) FROM cache;";

/// Relational cache database
pub struct SqlDatabase {
    source: String,
    lockless: bool,
    conn: Arc<Mutex<Connection>>,
}

enum SqlSession {
    /// Default mode: all sessions serialized on one shared connection.
    Shared(Arc<Mutex<Connection>>),
    /// Lockless mode: this session owns its connection outright.
    Dedicated(Connection),
}

impl SqlDatabase {
    /// Open (or create) the database at `source` and ensure the schema.
    pub fn open(source: &str, lockless: bool) -> StorageResult<Self> {
        let conn = Connection::open(source)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            source: source.to_string(),
            lockless,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Total payload bytes across all entries. Maintenance query for
    /// external reporting, not used on the request path.
    pub fn total_size(&self) -> StorageResult<i64> {
        let conn = self.conn.lock().unwrap();
        let sum = conn.prepare_cached(STMT_SUM)?.query_row([], |row| row.get(0))?;
        Ok(sum)
    }

    /// Number of cached entries. Maintenance query for external reporting.
    pub fn entry_count(&self) -> StorageResult<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn
            .prepare_cached(STMT_COUNT)?
            .query_row([], |row| row.get(0))?;
        Ok(count)
    }
}

impl Database for SqlDatabase {
    fn open(&self) -> StorageResult<Box<dyn Session>> {
        if self.lockless {
            let conn = Connection::open(&self.source)?;
            Ok(Box::new(SqlSession::Dedicated(conn)))
        } else {
            Ok(Box::new(SqlSession::Shared(Arc::clone(&self.conn))))
        }
    }
}

impl SqlSession {
    fn with_conn<T>(&mut self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        match self {
            SqlSession::Shared(shared) => f(&shared.lock().unwrap()),
            SqlSession::Dedicated(conn) => f(conn),
        }
    }
}

impl Session for SqlSession {
    fn load(&mut self, key: u64, buf: &mut Vec<u8>) -> StorageResult<()> {
        buf.clear();
        let row: Option<Vec<u8>> = self.with_conn(|conn| {
            Ok(conn
                .prepare_cached(STMT_GET)?
                .query_row(params![key as i64], |row| row.get(0))
                .optional()?)
        })?;
        if let Some(payload) = row {
            protocol::grow(buf, payload.len());
            buf.extend_from_slice(&payload);
        }
        Ok(())
    }

    fn store(&mut self, key: u64, data: &[u8]) -> StorageResult<()> {
        let (metadata, payload) = split_blob(data);
        let time = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let metadata = String::from_utf8_lossy(metadata).into_owned();
        self.with_conn(|conn| {
            conn.prepare_cached(STMT_PUT)?.execute(params![
                key as i64,
                payload.len() as i64,
                time,
                metadata,
                payload
            ])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_db(dir: &TempDir, lockless: bool) -> SqlDatabase {
        let path = dir.path().join("cache.db");
        SqlDatabase::open(path.to_str().unwrap(), lockless).unwrap()
    }

    #[test]
    fn test_store_strips_metadata() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir, false);
        let mut s = db.open().unwrap();

        s.store(1, b"metadata\0payload bytes").unwrap();

        let mut buf = Vec::new();
        s.load(1, &mut buf).unwrap();
        assert_eq!(buf, b"payload bytes");
    }

    #[test]
    fn test_missing_key_is_empty_not_error() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir, false);
        let mut s = db.open().unwrap();

        let mut buf = vec![7; 7];
        s.load(404, &mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overwrite_wins() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir, false);
        let mut s = db.open().unwrap();

        s.store(2, b"\0first").unwrap();
        s.store(2, b"\0second").unwrap();

        let mut buf = Vec::new();
        s.load(2, &mut buf).unwrap();
        assert_eq!(buf, b"second");
    }

    #[test]
    fn test_high_bit_keys_round_trip() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir, false);
        let mut s = db.open().unwrap();

        // Keys above i64::MAX wrap through the signed column and back.
        let key = u64::MAX - 1;
        s.store(key, b"\0edge").unwrap();

        let mut buf = Vec::new();
        s.load(key, &mut buf).unwrap();
        assert_eq!(buf, b"edge");
    }

    #[test]
    fn test_maintenance_queries() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir, false);
        let mut s = db.open().unwrap();

        assert_eq!(db.entry_count().unwrap(), 0);
        assert_eq!(db.total_size().unwrap(), 0);

        s.store(1, b"m\x0012345").unwrap();
        s.store(2, b"m\x001234567890").unwrap();

        assert_eq!(db.entry_count().unwrap(), 2);
        assert_eq!(db.total_size().unwrap(), 15);
    }

    #[test]
    fn test_lockless_sessions_share_the_file() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir, true);

        let mut a = db.open().unwrap();
        let mut b = db.open().unwrap();

        a.store(5, b"\0from a").unwrap();

        let mut buf = Vec::new();
        b.load(5, &mut buf).unwrap();
        assert_eq!(buf, b"from a");
    }
}
