//! # Error Module
//!
//! Error types for the recognition cache.
//!
//! ## Design Principles
//! - **Never panic** on user data - degenerate images and storage hiccups
//!   are absorbed and reported as "no match" rather than raised
//! - **Include context** - paths, keys, lengths, what went wrong
//! - **Only configuration bugs propagate** - a hash length mismatch means two
//!   fingerprints were produced under different settings

use std::path::PathBuf;
use thiserror::Error;

/// Top-level library error
#[derive(Error, Debug)]
pub enum RecognitionCacheError {
    #[error("Hashing error: {0}")]
    Hash(#[from] HashError),

    #[error("Similarity error: {0}")]
    Similarity(#[from] SimilarityError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors that occur while fingerprinting images
#[derive(Error, Debug)]
pub enum HashError {
    #[error(
        "Perceptual hash length mismatch: {left} vs {right} bits. \
         Both fingerprints must come from the same grid size."
    )]
    LengthMismatch { left: usize, right: usize },

    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Failed to decode image {path}: {reason}")]
    DecodeError { path: PathBuf, reason: String },

    #[error("Failed to open image file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that occur while scoring image similarity
#[derive(Error, Debug)]
pub enum SimilarityError {
    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("Comparison failed: {0}")]
    ComparisonFailed(String),

    #[error("Comparison exceeded its time budget of {budget_ms}ms")]
    TimedOut { budget_ms: u64 },
}

/// Errors raised by storage backends
///
/// These never reach callers of [`crate::core::storage::CacheStorage`]; they are
/// logged and turned into "not found" or `false` there.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open cache database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Cache corruption detected at {path}. Delete this file and try again.")]
    Corrupted { path: PathBuf },

    #[error("{backend} storage lock was poisoned by a panicking thread")]
    LockPoisoned { backend: &'static str },

    #[error("Stored record for {key} failed its checksum")]
    ChecksumMismatch { key: String },

    #[error("Failed to serialize cache entry: {0}")]
    SerializationFailed(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(error: rusqlite::Error) -> Self {
        StorageError::QueryFailed(error.to_string())
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, RecognitionCacheError>;
