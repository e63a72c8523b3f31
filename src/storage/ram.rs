//! In-memory backend
//!
//! A single map shared by every session, guarded by one mutex. Blobs are
//! stored verbatim; unlike the on-disk backends there is no metadata
//! splitting. Contents vanish with the process.

use super::{Database, Session, StorageResult};
use crate::protocol;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const DEFAULT_CAPACITY: usize = 1000;

/// In-memory cache database
pub struct RamDatabase {
    map: Arc<Mutex<HashMap<u64, Vec<u8>>>>,
}

/// Session over the shared map
struct RamSession {
    map: Arc<Mutex<HashMap<u64, Vec<u8>>>>,
}

impl RamDatabase {
    pub fn new() -> Self {
        Self {
            map: Arc::new(Mutex::new(HashMap::with_capacity(DEFAULT_CAPACITY))),
        }
    }
}

impl Default for RamDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl Database for RamDatabase {
    fn open(&self) -> StorageResult<Box<dyn Session>> {
        Ok(Box::new(RamSession {
            map: Arc::clone(&self.map),
        }))
    }
}

impl Session for RamSession {
    fn load(&mut self, key: u64, buf: &mut Vec<u8>) -> StorageResult<()> {
        buf.clear();
        let map = self.map.lock().unwrap();
        if let Some(blob) = map.get(&key) {
            protocol::grow(buf, blob.len());
            buf.extend_from_slice(blob);
        }
        Ok(())
    }

    fn store(&mut self, key: u64, data: &[u8]) -> StorageResult<()> {
        let mut map = self.map.lock().unwrap();
        match map.get_mut(&key) {
            // Reuse the existing allocation when it is large enough.
            Some(slot) if slot.capacity() >= data.len() => {
                slot.clear();
                slot.extend_from_slice(data);
            }
            _ => {
                let mut blob = Vec::with_capacity(data.len());
                blob.extend_from_slice(data);
                map.insert(key, blob);
            }
        }
        Ok(())
    }
}
