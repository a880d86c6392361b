//! # Storage Module
//!
//! Persists cache entries keyed by content hash.
//!
//! ## Failure policy
//! Callers of [`CacheStorage`] never see an error. A backend failure, a
//! checksum mismatch or an undecodable record is logged and reported as
//! "not found" (loads) or `false`/a smaller count (writes). The cache then
//! behaves as if the entry was never stored and the recognizer runs again.
//!
//! ## Backends
//! - `SqliteBackend` - Persistent storage using SQLite
//! - `InMemoryBackend` - For testing and ephemeral caches

mod codec;
mod memory;
mod sqlite;
mod traits;

pub use codec::{decode, encode, EncodedEntry};
pub use memory::InMemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::{StorageBackend, StoredRecord};

use crate::core::hasher::{ContentHash, PerceptualHash};
use crate::core::metadata::ImageMetadata;
use crate::core::recognition::RecognitionResult;
use crate::core::similarity::ImageSignature;
use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// A recognition result stored under the content hash of its image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub signature: ImageSignature,
    pub result: RecognitionResult,
    pub metadata: ImageMetadata,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn content_hash(&self) -> ContentHash {
        self.signature.content_hash()
    }

    pub fn perceptual_hash(&self) -> &PerceptualHash {
        self.signature.perceptual_hash()
    }

    /// Expired entries stay stored until swept but are never served
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Raw size accounting reported by a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStats {
    pub entry_count: usize,
    /// Bytes actually stored
    pub payload_bytes: u64,
    /// Bytes before compression
    pub raw_bytes: u64,
}

/// Storage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStatistics {
    pub entry_count: usize,
    /// Total size of stored payloads in bytes
    pub total_size_bytes: u64,
    /// Uncompressed over stored size; 1.0 when empty
    pub compression_ratio: f64,
}

impl From<BackendStats> for StorageStatistics {
    fn from(stats: BackendStats) -> Self {
        let compression_ratio = if stats.payload_bytes == 0 {
            1.0
        } else {
            stats.raw_bytes as f64 / stats.payload_bytes as f64
        };
        Self {
            entry_count: stats.entry_count,
            total_size_bytes: stats.payload_bytes,
            compression_ratio,
        }
    }
}

/// Never-failing facade over a [`StorageBackend`]
#[derive(Clone)]
pub struct CacheStorage {
    backend: Arc<dyn StorageBackend>,
}

impl CacheStorage {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(InMemoryBackend::new())
    }

    /// Open a SQLite-backed store; the only fallible constructor
    pub fn sqlite(path: &Path) -> Result<Self, StorageError> {
        Ok(Self::new(SqliteBackend::open(path)?))
    }

    /// Insert or replace the entry under `key`
    pub fn store(&self, key: &ContentHash, entry: &CachedEntry) -> bool {
        let record = match Self::to_record(key, entry) {
            Ok(record) => record,
            Err(error) => {
                warn!(key = %key.short(), %error, "Failed to encode cache entry");
                return false;
            }
        };

        match self.backend.put(record) {
            Ok(()) => true,
            Err(error) => {
                warn!(key = %key.short(), %error, "Failed to store cache entry");
                false
            }
        }
    }

    /// Entry stored under `key`, expired or not
    pub fn load(&self, key: &ContentHash) -> Option<CachedEntry> {
        match self.backend.get(key) {
            Ok(Some(record)) => Self::from_record(&record),
            Ok(None) => None,
            Err(error) => {
                warn!(key = %key.short(), %error, "Failed to load cache entry");
                None
            }
        }
    }

    /// Like [`Self::load`], but a backend failure is returned instead of
    /// reading as "not found". Undecodable records are still `None`: they will
    /// never load.
    pub fn try_load(&self, key: &ContentHash) -> Result<Option<CachedEntry>, StorageError> {
        Ok(self
            .backend
            .get(key)?
            .and_then(|record| Self::from_record(&record)))
    }

    /// Store several entries, returning how many were written.
    ///
    /// Tries one transaction first; if that fails every entry is retried on
    /// its own so one bad record cannot sink the rest.
    pub fn batch_store(&self, entries: &HashMap<ContentHash, CachedEntry>) -> usize {
        let records: Vec<StoredRecord> = entries
            .iter()
            .filter_map(|(key, entry)| match Self::to_record(key, entry) {
                Ok(record) => Some(record),
                Err(error) => {
                    warn!(key = %key.short(), %error, "Failed to encode cache entry");
                    None
                }
            })
            .collect();

        match self.backend.put_batch(&records) {
            Ok(()) => records.len(),
            Err(error) => {
                warn!(%error, count = records.len(), "Batch store failed, retrying entries individually");
                records
                    .into_iter()
                    .filter(|record| match self.backend.put(record.clone()) {
                        Ok(()) => true,
                        Err(error) => {
                            warn!(key = %record.key.short(), %error, "Failed to store cache entry");
                            false
                        }
                    })
                    .count()
            }
        }
    }

    /// Load several entries; keys that are missing or unreadable are absent
    pub fn batch_load(&self, keys: &[ContentHash]) -> HashMap<ContentHash, CachedEntry> {
        let records = match self.backend.get_batch(keys) {
            Ok(records) => records,
            Err(error) => {
                warn!(%error, count = keys.len(), "Batch load failed, loading entries individually");
                keys.iter()
                    .filter_map(|key| match self.backend.get(key) {
                        Ok(record) => record,
                        Err(error) => {
                            warn!(key = %key.short(), %error, "Failed to load cache entry");
                            None
                        }
                    })
                    .collect()
            }
        };

        records
            .iter()
            .filter_map(|record| Self::from_record(record).map(|entry| (record.key, entry)))
            .collect()
    }

    /// Remove the entry under `key`, returning whether it existed
    pub fn delete(&self, key: &ContentHash) -> bool {
        match self.backend.remove(key) {
            Ok(removed) => removed,
            Err(error) => {
                warn!(key = %key.short(), %error, "Failed to delete cache entry");
                false
            }
        }
    }

    pub fn statistics(&self) -> StorageStatistics {
        match self.backend.stats() {
            Ok(stats) => stats.into(),
            Err(error) => {
                warn!(%error, "Failed to read storage statistics");
                StorageStatistics::default()
            }
        }
    }

    /// Remove entries that expire at or before `now`, returning their keys
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<ContentHash> {
        self.backend.purge_expired(now).unwrap_or_else(|error| {
            warn!(%error, "Failed to purge expired cache entries");
            Vec::new()
        })
    }

    /// Every readable entry
    pub fn load_all(&self) -> Vec<CachedEntry> {
        let keys = self.backend.keys().unwrap_or_else(|error| {
            warn!(%error, "Failed to list cache entries");
            Vec::new()
        });
        let mut loaded = self.batch_load(&keys);
        // Keep backend order
        keys.iter().filter_map(|key| loaded.remove(key)).collect()
    }

    /// Remove every entry
    pub fn clear(&self) -> bool {
        match self.backend.clear() {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "Failed to clear cache storage");
                false
            }
        }
    }

    fn to_record(key: &ContentHash, entry: &CachedEntry) -> Result<StoredRecord, StorageError> {
        let encoded = encode(entry)?;
        Ok(StoredRecord {
            key: *key,
            payload: encoded.payload,
            raw_size: encoded.raw_size,
            checksum: encoded.checksum,
            stored_at: entry.stored_at,
            expires_at: entry.expires_at,
        })
    }

    fn from_record(record: &StoredRecord) -> Option<CachedEntry> {
        match decode(&record.key.to_hex(), &record.payload, record.checksum) {
            Ok(entry) => Some(entry),
            Err(error) => {
                warn!(key = %record.key.short(), %error, "Discarding unreadable cache entry");
                None
            }
        }
    }
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage").finish_non_exhaustive()
    }
}
