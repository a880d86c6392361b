//! Record codec: JSON, gzip, xxh3 checksum over the compressed bytes.

use super::CachedEntry;
use crate::error::StorageError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use xxhash_rust::xxh3::xxh3_64;

/// A cache entry ready for a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEntry {
    pub payload: Vec<u8>,
    /// Size of the JSON before compression
    pub raw_size: u64,
    pub checksum: u64,
}

/// Encode an entry, refusing any that would not decode again.
///
/// serde_json writes non-finite floats as `null`, which then fails to
/// deserialize, so the JSON is read back once before it is accepted.
pub fn encode(entry: &CachedEntry) -> Result<EncodedEntry, StorageError> {
    let json =
        serde_json::to_vec(entry).map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
    serde_json::from_slice::<CachedEntry>(&json)
        .map_err(|e| StorageError::SerializationFailed(format!("entry does not read back: {}", e)))?;

    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.flush())
        .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
    let payload = encoder
        .finish()
        .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;

    Ok(EncodedEntry {
        checksum: xxh3_64(&payload),
        raw_size: json.len() as u64,
        payload,
    })
}

/// Verify and decode a stored payload. `key` only labels errors.
pub fn decode(key: &str, payload: &[u8], checksum: u64) -> Result<CachedEntry, StorageError> {
    if xxh3_64(payload) != checksum {
        return Err(StorageError::ChecksumMismatch {
            key: key.to_string(),
        });
    }

    let mut json = Vec::new();
    GzDecoder::new(payload)
        .read_to_end(&mut json)
        .map_err(|e| StorageError::SerializationFailed(format!("{}: {}", key, e)))?;

    serde_json::from_slice(&json)
        .map_err(|e| StorageError::SerializationFailed(format!("{}: {}", key, e)))
}
