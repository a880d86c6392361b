//! Storage backend trait definition.

use super::BackendStats;
use crate::core::hasher::ContentHash;
use crate::error::StorageError;
use chrono::{DateTime, Utc};

/// One encoded entry as a backend sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: ContentHash,
    /// Compressed entry
    pub payload: Vec<u8>,
    /// Uncompressed size, for the compression ratio
    pub raw_size: u64,
    /// xxh3 of `payload`
    pub checksum: u64,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Trait for storage backends
///
/// Backends move opaque records around. Decoding, checksums and the
/// "never fail the caller" policy live in [`super::CacheStorage`].
pub trait StorageBackend: Send + Sync {
    /// Fetch a record by key
    fn get(&self, key: &ContentHash) -> Result<Option<StoredRecord>, StorageError>;

    /// Insert or replace a record
    fn put(&self, record: StoredRecord) -> Result<(), StorageError>;

    /// Insert or replace several records, all or nothing where the backend
    /// supports transactions
    fn put_batch(&self, records: &[StoredRecord]) -> Result<(), StorageError> {
        for record in records {
            self.put(record.clone())?;
        }
        Ok(())
    }

    /// Fetch several records; missing keys are simply absent
    fn get_batch(&self, keys: &[ContentHash]) -> Result<Vec<StoredRecord>, StorageError> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.get(key)? {
                found.push(record);
            }
        }
        Ok(found)
    }

    /// Remove a record, returning whether it existed
    fn remove(&self, key: &ContentHash) -> Result<bool, StorageError>;

    /// Every stored key
    fn keys(&self) -> Result<Vec<ContentHash>, StorageError>;

    /// Remove the records that expire at or before `now`, returning their keys.
    ///
    /// The expiry check and the delete happen as one step, so a record
    /// re-stored with a later expiry in the meantime is left alone.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<ContentHash>, StorageError>;

    /// Remove every record
    fn clear(&self) -> Result<(), StorageError>;

    /// Size accounting
    fn stats(&self) -> Result<BackendStats, StorageError>;
}
