//! In-memory storage backend for tests and short-lived caches.

use super::{BackendStats, StorageBackend, StoredRecord};
use crate::core::hasher::ContentHash;
use crate::error::StorageError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory storage backend
///
/// Nothing survives the process. Useful for testing and for embedding the
/// cache where persistence isn't needed.
pub struct InMemoryBackend {
    records: RwLock<HashMap<ContentHash, StoredRecord>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<ContentHash, StoredRecord>>, StorageError> {
        self.records
            .read()
            .map_err(|_| StorageError::LockPoisoned { backend: "in-memory" })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<ContentHash, StoredRecord>>, StorageError> {
        self.records
            .write()
            .map_err(|_| StorageError::LockPoisoned { backend: "in-memory" })
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, key: &ContentHash) -> Result<Option<StoredRecord>, StorageError> {
        Ok(self.read()?.get(key).cloned())
    }

    fn put(&self, record: StoredRecord) -> Result<(), StorageError> {
        self.write()?.insert(record.key, record);
        Ok(())
    }

    fn put_batch(&self, records: &[StoredRecord]) -> Result<(), StorageError> {
        let mut map = self.write()?;
        for record in records {
            map.insert(record.key, record.clone());
        }
        Ok(())
    }

    fn get_batch(&self, keys: &[ContentHash]) -> Result<Vec<StoredRecord>, StorageError> {
        let map = self.read()?;
        Ok(keys.iter().filter_map(|key| map.get(key).cloned()).collect())
    }

    fn remove(&self, key: &ContentHash) -> Result<bool, StorageError> {
        Ok(self.write()?.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<ContentHash>, StorageError> {
        Ok(self.read()?.keys().copied().collect())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<ContentHash>, StorageError> {
        let mut map = self.write()?;
        let mut purged = Vec::new();
        map.retain(|key, record| {
            let expired = record.expires_at <= now;
            if expired {
                purged.push(*key);
            }
            !expired
        });
        Ok(purged)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.write()?.clear();
        Ok(())
    }

    fn stats(&self) -> Result<BackendStats, StorageError> {
        let map = self.read()?;
        Ok(BackendStats {
            entry_count: map.len(),
            payload_bytes: map.values().map(|r| r.payload.len() as u64).sum(),
            raw_bytes: map.values().map(|r| r.raw_size).sum(),
        })
    }
}
