//! # Similarity Index
//!
//! In-memory fuzzy-search index over cached signatures.
//!
//! Until it is optimized the index is a plain insertion-ordered scan. Once it
//! holds enough entries, [`SimilarityIndex::optimize`] buckets entries by
//! bands of their perceptual hash (locality-sensitive hashing), so a lookup
//! only scores entries that share at least one band with the target.
//!
//! ## Trade-offs
//! - More bands = higher recall (fewer missed near-duplicates)
//! - Fewer bands = fewer candidates per lookup
//! - Entries whose hash carries no detail (flat images) cannot be banded
//!   and are always scanned

use super::ImageSignature;
use crate::core::hasher::{ContentHash, PerceptualHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Index configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Number of bands to divide each perceptual hash into
    pub bands: usize,
    /// Below this many entries, optimizing keeps the linear scan
    pub min_entries_for_buckets: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            bands: 4,
            min_entries_for_buckets: 64,
        }
    }
}

/// One cached image as seen by fuzzy search
#[derive(Debug, Clone)]
pub struct IndexedEntry {
    pub signature: Arc<ImageSignature>,
    pub expires_at: DateTime<Utc>,
    sequence: u64,
}

impl IndexedEntry {
    pub fn content_hash(&self) -> ContentHash {
        self.signature.content_hash()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of [`SimilarityIndex::optimize`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptimization {
    /// Entries left in the index
    pub entries: usize,
    /// Expired entries dropped while optimizing
    pub pruned: usize,
    /// Number of non-empty band buckets
    pub buckets: usize,
    /// Whether lookups now go through buckets
    pub bucketed: bool,
}

/// Band tables built by `optimize`
#[derive(Debug)]
struct BandBuckets {
    /// Hash length the bands were laid out for
    bit_length: usize,
    /// Bit range of each band
    ranges: Vec<(usize, usize)>,
    /// Per band: band value -> entries
    tables: Vec<HashMap<u64, HashSet<ContentHash>>>,
    /// Entries that cannot be banded
    always_scan: HashSet<ContentHash>,
}

impl BandBuckets {
    fn new(bit_length: usize, bands: usize) -> Self {
        let bands = bands.clamp(1, bit_length.max(1));
        let ranges = (0..bands)
            .map(|b| (b * bit_length / bands, (b + 1) * bit_length / bands))
            .collect();
        Self {
            bit_length,
            ranges,
            tables: (0..bands).map(|_| HashMap::new()).collect(),
            always_scan: HashSet::new(),
        }
    }

    fn band_values(&self, hash: &PerceptualHash) -> Option<Vec<u64>> {
        if hash.len() != self.bit_length || !hash.carries_detail() {
            return None;
        }
        Some(
            self.ranges
                .iter()
                .map(|&(start, end)| {
                    (start..end).fold(0u64, |value, i| value.rotate_left(1) ^ hash.bit(i) as u64)
                })
                .collect(),
        )
    }

    fn insert(&mut self, key: ContentHash, hash: &PerceptualHash) {
        match self.band_values(hash) {
            Some(values) => {
                for (table, value) in self.tables.iter_mut().zip(values) {
                    table.entry(value).or_default().insert(key);
                }
            }
            None => {
                self.always_scan.insert(key);
            }
        }
    }

    fn remove(&mut self, key: &ContentHash, hash: &PerceptualHash) {
        match self.band_values(hash) {
            Some(values) => {
                for (table, value) in self.tables.iter_mut().zip(values) {
                    if let Some(bucket) = table.get_mut(&value) {
                        bucket.remove(key);
                        if bucket.is_empty() {
                            table.remove(&value);
                        }
                    }
                }
            }
            None => {
                self.always_scan.remove(key);
            }
        }
    }

    /// Keys sharing a band with `hash`, or `None` when the hash can't be banded
    fn candidates(&self, hash: &PerceptualHash) -> Option<HashSet<ContentHash>> {
        let values = self.band_values(hash)?;
        let mut keys: HashSet<ContentHash> = self.always_scan.clone();
        for (table, value) in self.tables.iter().zip(values) {
            if let Some(bucket) = table.get(&value) {
                keys.extend(bucket.iter().copied());
            }
        }
        Some(keys)
    }

    fn bucket_count(&self) -> usize {
        self.tables.iter().map(|t| t.len()).sum()
    }
}

/// Fuzzy-search index keyed by content hash
#[derive(Debug)]
pub struct SimilarityIndex {
    config: IndexConfig,
    entries: HashMap<ContentHash, IndexedEntry>,
    next_sequence: u64,
    buckets: Option<BandBuckets>,
}

impl SimilarityIndex {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            next_sequence: 0,
            buckets: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &ContentHash) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &ContentHash) -> Option<&IndexedEntry> {
        self.entries.get(key)
    }

    pub fn is_bucketed(&self) -> bool {
        self.buckets.is_some()
    }

    /// Add or replace an entry. Unattributable signatures are ignored.
    pub fn insert(&mut self, signature: Arc<ImageSignature>, expires_at: DateTime<Utc>) -> bool {
        if !signature.is_attributable() {
            return false;
        }
        let key = signature.content_hash();
        self.remove(&key);

        if let Some(buckets) = self.buckets.as_mut() {
            buckets.insert(key, signature.perceptual_hash());
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(
            key,
            IndexedEntry {
                signature,
                expires_at,
                sequence,
            },
        );
        true
    }

    pub fn remove(&mut self, key: &ContentHash) -> Option<IndexedEntry> {
        let entry = self.entries.remove(key)?;
        if let Some(buckets) = self.buckets.as_mut() {
            buckets.remove(key, entry.signature.perceptual_hash());
        }
        Some(entry)
    }

    /// Drop every entry expired at `now`, returning their keys
    pub fn remove_expired(&mut self, now: DateTime<Utc>) -> Vec<ContentHash> {
        let expired: Vec<ContentHash> = self
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.content_hash())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired
    }

    /// Live entries worth scoring against `target`, in insertion order
    pub fn candidates(&self, target: &ImageSignature, now: DateTime<Utc>) -> Vec<IndexedEntry> {
        let narrowed = self
            .buckets
            .as_ref()
            .and_then(|b| b.candidates(target.perceptual_hash()));

        let mut live: Vec<IndexedEntry> = match narrowed {
            Some(keys) => keys
                .iter()
                .filter_map(|k| self.entries.get(k))
                .filter(|e| !e.is_expired(now))
                .cloned()
                .collect(),
            None => self
                .entries
                .values()
                .filter(|e| !e.is_expired(now))
                .cloned()
                .collect(),
        };
        live.sort_by_key(|e| e.sequence);
        live
    }

    /// Prune expired entries and (re)build band buckets when large enough
    pub fn optimize(&mut self, now: DateTime<Utc>) -> IndexOptimization {
        let pruned = self.remove_expired(now).len();

        let bit_length = self
            .entries
            .values()
            .map(|e| e.signature.perceptual_hash().len())
            .max()
            .unwrap_or(0);

        if self.entries.len() < self.config.min_entries_for_buckets || bit_length == 0 {
            self.buckets = None;
        } else {
            let mut buckets = BandBuckets::new(bit_length, self.config.bands);
            for (key, entry) in &self.entries {
                buckets.insert(*key, entry.signature.perceptual_hash());
            }
            self.buckets = Some(buckets);
        }

        IndexOptimization {
            entries: self.entries.len(),
            pruned,
            buckets: self.buckets.as_ref().map_or(0, |b| b.bucket_count()),
            bucketed: self.buckets.is_some(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.buckets = None;
    }
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::new(IndexConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hasher::ImageFingerprint;
    use chrono::Duration;

    fn signature(seed: u8, bits: &[bool]) -> Arc<ImageSignature> {
        Arc::new(ImageSignature {
            fingerprint: ImageFingerprint {
                content_hash: ContentHash::from_bytes([seed; 32]),
                perceptual_hash: PerceptualHash::from_bits(bits.iter().copied()),
            },
            structure: vec![0.5; 4],
            histogram: vec![0.25; 4],
        })
    }

    fn pattern(seed: u8) -> Vec<bool> {
        (0..63).map(|i| (i as u8).wrapping_mul(seed) % 3 == 0).collect()
    }

    #[test]
    fn insert_and_remove() {
        let mut index = SimilarityIndex::default();
        let later = Utc::now() + Duration::hours(1);
        let sig = signature(1, &pattern(1));

        assert!(index.insert(sig.clone(), later));
        assert!(index.contains(&sig.content_hash()));
        assert!(index.remove(&sig.content_hash()).is_some());
        assert!(index.is_empty());
    }

    #[test]
    fn unattributable_signatures_are_not_indexed() {
        let mut index = SimilarityIndex::default();
        assert!(!index.insert(Arc::new(ImageSignature::empty()), Utc::now()));
        assert!(index.is_empty());
    }

    #[test]
    fn candidates_keep_insertion_order_and_skip_expired() {
        let mut index = SimilarityIndex::default();
        let now = Utc::now();

        index.insert(signature(3, &pattern(3)), now + Duration::hours(1));
        index.insert(signature(1, &pattern(1)), now - Duration::seconds(1));
        index.insert(signature(2, &pattern(2)), now + Duration::hours(1));

        let target = signature(9, &pattern(9));
        let keys: Vec<ContentHash> = index
            .candidates(&target, now)
            .iter()
            .map(|e| e.content_hash())
            .collect();

        assert_eq!(
            keys,
            vec![ContentHash::from_bytes([3; 32]), ContentHash::from_bytes([2; 32])]
        );
    }

    #[test]
    fn remove_expired_returns_keys() {
        let mut index = SimilarityIndex::default();
        let now = Utc::now();
        index.insert(signature(1, &pattern(1)), now);
        index.insert(signature(2, &pattern(2)), now + Duration::hours(1));

        let removed = index.remove_expired(now);

        assert_eq!(removed, vec![ContentHash::from_bytes([1; 32])]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn small_index_stays_linear() {
        let mut index = SimilarityIndex::default();
        index.insert(signature(1, &pattern(1)), Utc::now() + Duration::hours(1));

        let report = index.optimize(Utc::now());

        assert!(!report.bucketed);
        assert_eq!(report.entries, 1);
    }

    #[test]
    fn bucketed_index_narrows_candidates() {
        let config = IndexConfig {
            bands: 4,
            min_entries_for_buckets: 2,
        };
        let mut index = SimilarityIndex::new(config);
        let later = Utc::now() + Duration::hours(1);

        let ones = vec![true; 63];
        let alternating: Vec<bool> = (0..63).map(|i| i % 2 == 0).collect();
        index.insert(signature(1, &ones), later);
        index.insert(signature(2, &alternating), later);
        index.insert(signature(3, &[false; 63]), later);

        let report = index.optimize(Utc::now());
        assert!(report.bucketed);

        let target = signature(9, &ones);
        let keys: HashSet<ContentHash> = index
            .candidates(&target, Utc::now())
            .iter()
            .map(|e| e.content_hash())
            .collect();

        // Shares every band with the all-ones entry; flat entry is always scanned
        assert!(keys.contains(&ContentHash::from_bytes([1; 32])));
        assert!(keys.contains(&ContentHash::from_bytes([3; 32])));
        assert!(!keys.contains(&ContentHash::from_bytes([2; 32])));
    }

    #[test]
    fn buckets_follow_later_inserts_and_removals() {
        let config = IndexConfig {
            bands: 4,
            min_entries_for_buckets: 1,
        };
        let mut index = SimilarityIndex::new(config);
        let later = Utc::now() + Duration::hours(1);
        index.insert(signature(1, &pattern(1)), later);
        index.optimize(Utc::now());

        let ones = vec![true; 63];
        index.insert(signature(5, &ones), later);
        let target = signature(9, &ones);
        assert_eq!(index.candidates(&target, Utc::now()).len(), 1);

        index.remove(&ContentHash::from_bytes([5; 32]));
        assert!(index.candidates(&target, Utc::now()).is_empty());
    }
}
