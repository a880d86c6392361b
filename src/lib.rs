//! # Recognition Cache
//!
//! Remembers image recognition results and serves them again for the same
//! photo or for a near-duplicate of it (a re-shot, a resize, a recompressed
//! copy), so the expensive recognizer only runs on genuinely new images.
//!
//! ## Architecture
//! - `core` - Hashing, similarity, storage and the cache manager
//! - `events` - Channel-based activity reporting
//! - `error` - Error types
//!
//! ## Example
//! ```rust,ignore
//! use recognition_cache::core::CacheManager;
//!
//! let cache = CacheManager::builder().build()?;
//! let result = match cache.get_cached_result(&image)? {
//!     Some(hit) => hit,
//!     None => {
//!         let fresh = recognizer.recognize(&image);
//!         cache.cache_result(&image, fresh.clone());
//!         fresh
//!     }
//! };
//! ```

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{RecognitionCacheError, Result};

/// Initialize tracing for the library
///
/// Called by the application entry point. `RUST_LOG` controls the filter and
/// `default_directive` applies when it is unset. Does nothing if a global
/// subscriber is already installed.
pub fn init_tracing(default_directive: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
