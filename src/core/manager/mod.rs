//! # Manager Module
//!
//! The one component applications talk to.
//!
//! ## Lookup order
//! 1. **Exact**: the entry stored under the image's content hash, if it has
//!    not expired
//! 2. **Fuzzy**: the most similar live entry at or above the configured
//!    threshold, returned with its similarity score
//! 3. **Miss**: the caller runs recognition and hands the result to
//!    [`CacheManager::cache_result`]
//!
//! Storage problems never surface here; they read as misses. The only error
//! a lookup returns is a perceptual hash length mismatch, which means the
//! cache holds entries fingerprinted under a different grid size.

use crate::core::hasher::ContentHash;
use crate::core::recognition::RecognitionResult;
use crate::core::similarity::{
    IndexConfig, IndexOptimization, IndexedEntry, MatcherConfig, SimilarityCandidate,
    SimilarityIndex, SimilarityMatcher,
};
use crate::core::storage::{CacheStorage, CachedEntry, StorageStatistics};
use crate::error::{RecognitionCacheError, Result};
use crate::events::{
    null_sender, Event, EventSender, LookupEvent, MaintenanceEvent, PreloadEvent, PreloadProgress,
    StoreEvent,
};
use chrono::{DateTime, Duration, Utc};
use image::DynamicImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One week
const DEFAULT_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a cached result is served
    pub ttl_seconds: u64,
    /// Minimum similarity for a fuzzy hit
    pub similarity_threshold: f64,
    pub matcher: MatcherConfig,
    pub index: IndexConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            similarity_threshold: 0.7,
            matcher: MatcherConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RecognitionCacheError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
            .map_err(|e| RecognitionCacheError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| RecognitionCacheError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RecognitionCacheError::Config(format!(
                "similarity_threshold must be within 0-1, got {}",
                self.similarity_threshold
            )));
        }
        if self.index.bands == 0 {
            return Err(RecognitionCacheError::Config(
                "index.bands must be positive".to_string(),
            ));
        }
        if i64::try_from(self.ttl_seconds).is_err() {
            return Err(RecognitionCacheError::Config(format!(
                "ttl_seconds is too large: {}",
                self.ttl_seconds
            )));
        }
        self.matcher.validate().map_err(RecognitionCacheError::Config)
    }

    fn ttl(&self) -> Duration {
        Duration::try_seconds(self.ttl_seconds as i64).unwrap_or(Duration::MAX)
    }
}

/// Usage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Entries in the in-memory similarity index
    pub memory_entries: usize,
    pub total_hits: u64,
    pub exact_hits: u64,
    pub fuzzy_hits: u64,
    pub misses: u64,
    pub total_lookups: u64,
    /// `total_hits / total_lookups`, 0 before the first lookup
    pub cache_hit_rate: f64,
    pub storage: StorageStatistics,
}

/// Builder for [`CacheManager`]
pub struct CacheManagerBuilder {
    config: CacheConfig,
    storage: Option<CacheStorage>,
    events: Option<EventSender>,
}

impl CacheManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            storage: None,
            events: None,
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ttl_seconds(mut self, seconds: u64) -> Self {
        self.config.ttl_seconds = seconds;
        self
    }

    pub fn similarity_threshold(mut self, threshold: f64) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Defaults to an in-memory store
    pub fn storage(mut self, storage: CacheStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and warm the similarity index from storage
    pub fn build(self) -> Result<CacheManager> {
        self.config.validate()?;

        let manager = CacheManager {
            matcher: SimilarityMatcher::new(self.config.matcher.clone()),
            index: RwLock::new(SimilarityIndex::new(self.config.index.clone())),
            storage: self.storage.unwrap_or_default(),
            events: self.events.unwrap_or_else(null_sender),
            config: self.config,
            exact_hits: AtomicU64::new(0),
            fuzzy_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        manager.warm_index();
        Ok(manager)
    }
}

impl Default for CacheManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Similarity-aware recognition cache
pub struct CacheManager {
    config: CacheConfig,
    matcher: SimilarityMatcher,
    storage: CacheStorage,
    index: RwLock<SimilarityIndex>,
    events: EventSender,
    exact_hits: AtomicU64,
    fuzzy_hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::new()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn matcher(&self) -> &SimilarityMatcher {
        &self.matcher
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    /// Cache `result` for `image`, replacing any previous entry.
    ///
    /// Returns `false` when nothing was cached: the image has no pixels, or
    /// storage refused the write.
    pub fn cache_result(&self, image: &DynamicImage, mut result: RecognitionResult) -> bool {
        let signature = self.matcher.signature(image);
        if !signature.is_attributable() {
            debug!("not caching result for an image without pixels");
            self.events.send(Event::Store(StoreEvent::Rejected {
                reason: "image has no pixels".to_string(),
            }));
            return false;
        }

        let key = signature.content_hash();
        let stored_at = Utc::now();
        let expires_at = stored_at
            .checked_add_signed(self.config.ttl())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        result.cache_expires_at = Some(expires_at);
        result.similarity_score = None;
        let entry = CachedEntry {
            signature: (*signature).clone(),
            metadata: result.image_metadata.clone(),
            result,
            stored_at,
            expires_at,
        };

        if !self.storage.store(&key, &entry) {
            self.events.send(Event::Store(StoreEvent::Rejected {
                reason: format!("storage refused {}", key.short()),
            }));
            return false;
        }

        self.index_write().insert(signature, expires_at);
        debug!(hash = %key.short(), %expires_at, "cached recognition result");
        self.events.send(Event::Store(StoreEvent::Stored {
            key: key.to_hex(),
            expires_at,
        }));
        true
    }

    /// Cached result for `image` or for a sufficiently similar image
    pub fn get_cached_result(&self, image: &DynamicImage) -> Result<Option<RecognitionResult>> {
        let signature = self.matcher.signature(image);
        if !signature.is_attributable() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let key = signature.content_hash();
        let now = Utc::now();

        if let Some(entry) = self.storage.load(&key) {
            if !entry.is_expired(now) {
                self.exact_hits.fetch_add(1, Ordering::Relaxed);
                debug!(hash = %key.short(), "exact cache hit");
                self.events
                    .send(Event::Lookup(LookupEvent::ExactHit { key: key.to_hex() }));
                let mut result = entry.result;
                result.similarity_score = None;
                return Ok(Some(result));
            }
            debug!(hash = %key.short(), "exact entry has expired");
            self.events
                .send(Event::Lookup(LookupEvent::Expired { key: key.to_hex() }));
        }

        let candidates: Vec<IndexedEntry> = self
            .index_read()
            .candidates(&signature, now)
            .into_iter()
            .filter(|c| c.content_hash() != key)
            .collect();

        let ranked = self.matcher.rank(
            &signature,
            &candidates,
            |c| c.signature.as_ref(),
            self.config.similarity_threshold,
        )?;

        for (position, similarity) in ranked {
            let matched = candidates[position].content_hash();
            match self.storage.try_load(&matched) {
                Ok(Some(entry)) if !entry.is_expired(now) => {
                    self.fuzzy_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        hash = %key.short(),
                        matched = %matched.short(),
                        similarity,
                        "fuzzy cache hit"
                    );
                    self.events.send(Event::Lookup(LookupEvent::FuzzyHit {
                        key: key.to_hex(),
                        matched_key: matched.to_hex(),
                        similarity,
                    }));
                    let mut result = entry.result;
                    result.similarity_score = Some(similarity);
                    return Ok(Some(result));
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    // Gone or unreadable; stop offering it as a candidate
                    self.index_write().remove(&matched);
                }
                Err(error) => {
                    warn!(matched = %matched.short(), %error, "Skipping fuzzy candidate storage could not load");
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.events
            .send(Event::Lookup(LookupEvent::Miss { key: key.to_hex() }));
        Ok(None)
    }

    /// Forget everything cached under `content_hash`
    pub fn invalidate_cache(&self, content_hash: &ContentHash) -> bool {
        let stored = self.storage.delete(content_hash);
        let indexed = self.index_write().remove(content_hash).is_some();
        self.matcher.forget(content_hash);

        let removed = stored || indexed;
        if removed {
            debug!(hash = %content_hash.short(), "invalidated cache entry");
            self.events.send(Event::Store(StoreEvent::Invalidated {
                key: content_hash.to_hex(),
            }));
        }
        removed
    }

    /// Remove every entry whose expiry has passed, returning how many
    pub fn cleanup_expired_cache(&self) -> usize {
        let now = Utc::now();

        let mut expired: HashSet<ContentHash> = self.storage.purge_expired(now).into_iter().collect();
        expired.extend(self.index_write().remove_expired(now));
        for key in &expired {
            self.matcher.forget(key);
        }

        if !expired.is_empty() {
            info!(removed = expired.len(), "Swept expired cache entries");
        }
        self.events.send(Event::Maintenance(MaintenanceEvent::Swept {
            removed: expired.len(),
        }));
        expired.len()
    }

    /// Live cached entries scoring at least `threshold` against `image`,
    /// most similar first. Read-only.
    pub fn find_similar_cached_results(
        &self,
        image: &DynamicImage,
        threshold: f64,
    ) -> Result<Vec<SimilarityCandidate>> {
        let signature = self.matcher.signature(image);
        let now = Utc::now();
        let candidates = self.index_read().candidates(&signature, now);

        let ranked = self
            .matcher
            .rank(&signature, &candidates, |c| c.signature.as_ref(), threshold)?;

        let keys: Vec<ContentHash> = ranked
            .iter()
            .map(|&(position, _)| candidates[position].content_hash())
            .collect();
        let mut loaded = self.storage.batch_load(&keys);

        Ok(ranked
            .into_iter()
            .zip(keys)
            .filter_map(|((_, similarity), key)| {
                let entry = loaded.remove(&key)?;
                (!entry.is_expired(now)).then_some(SimilarityCandidate { entry, similarity })
            })
            .collect())
    }

    /// Compute and memoize signatures ahead of lookups.
    ///
    /// Returns how many images produced a usable signature.
    pub fn preload_cache(&self, images: &[DynamicImage]) -> usize {
        let start = Instant::now();
        let total = images.len();
        self.events.send(Event::Preload(PreloadEvent::Started {
            total_images: total,
        }));

        let completed = AtomicUsize::new(0);
        let computed = images
            .par_iter()
            .filter(|image| {
                let usable = self.matcher.signature(image).is_attributable();
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                self.events
                    .send(Event::Preload(PreloadEvent::Progress(PreloadProgress {
                        completed: done,
                        total,
                    })));
                usable
            })
            .count();

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(computed, total, duration_ms, "Preloaded image signatures");
        self.events.send(Event::Preload(PreloadEvent::Completed {
            computed,
            skipped: total - computed,
            duration_ms,
        }));
        computed
    }

    /// Drop expired index entries and bucket the rest for faster lookups
    pub fn optimize_similarity_index(&self) -> IndexOptimization {
        let outcome = self.index_write().optimize(Utc::now());
        info!(
            entries = outcome.entries,
            pruned = outcome.pruned,
            buckets = outcome.buckets,
            bucketed = outcome.bucketed,
            "Optimized similarity index"
        );
        self.events
            .send(Event::Maintenance(MaintenanceEvent::IndexOptimized {
                entries: outcome.entries,
                pruned: outcome.pruned,
                buckets: outcome.buckets,
            }));
        outcome
    }

    pub fn statistics(&self) -> CacheStatistics {
        let exact_hits = self.exact_hits.load(Ordering::Relaxed);
        let fuzzy_hits = self.fuzzy_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_hits = exact_hits + fuzzy_hits;
        let total_lookups = total_hits + misses;

        CacheStatistics {
            memory_entries: self.index_read().len(),
            total_hits,
            exact_hits,
            fuzzy_hits,
            misses,
            total_lookups,
            cache_hit_rate: if total_lookups == 0 {
                0.0
            } else {
                total_hits as f64 / total_lookups as f64
            },
            storage: self.storage.statistics(),
        }
    }

    /// Rebuild the index from whatever storage holds
    fn warm_index(&self) {
        let now = Utc::now();
        let expected_bits = self.matcher.hasher().bit_length();
        let mut index = self.index_write();
        let mut mismatched = 0usize;

        for entry in self.storage.load_all() {
            if entry.is_expired(now) {
                continue;
            }
            if entry.perceptual_hash().len() != expected_bits {
                mismatched += 1;
            }
            index.insert(Arc::new(entry.signature), entry.expires_at);
        }

        if mismatched > 0 {
            warn!(
                mismatched,
                expected_bits, "Stored entries were fingerprinted with a different grid size"
            );
        }
        let entries = index.len();
        drop(index);

        if entries > 0 {
            info!(entries, "Warmed similarity index from storage");
        }
        self.events
            .send(Event::Maintenance(MaintenanceEvent::IndexWarmed { entries }));
    }

    fn index_read(&self) -> RwLockReadGuard<'_, SimilarityIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn index_write(&self) -> RwLockWriteGuard<'_, SimilarityIndex> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }
}
