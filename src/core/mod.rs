//! # Core Module
//!
//! The recognition cache engine, independent of any front end.
//!
//! ## Modules
//! - `hasher` - Content digests and perceptual hashes
//! - `similarity` - Multi-signal image similarity and the fuzzy index
//! - `storage` - Persists cache entries
//! - `manager` - Exact and fuzzy lookup, expiry, statistics
//! - `recognition` - Recognition result model
//! - `metadata` - Image metadata carried with results
//! - `loader` - Finds and decodes images on disk

pub mod hasher;
pub mod loader;
pub mod manager;
pub mod metadata;
pub mod recognition;
pub mod similarity;
pub mod storage;

// Re-export commonly used types
pub use hasher::{ContentHash, ImageFingerprint, PerceptualHash};
pub use manager::{CacheConfig, CacheManager, CacheStatistics};
pub use metadata::ImageMetadata;
pub use recognition::{RecognitionResult, RecognitionStrategy, RecognizedItem};
pub use similarity::{SimilarityCandidate, SimilarityMatcher};
pub use storage::{CacheStorage, CachedEntry};
