//! # Similarity Module
//!
//! Scores how alike two images are by combining three independent signals:
//!
//! | Signal    | Measure                                         | Weight |
//! |-----------|-------------------------------------------------|--------|
//! | Hash      | `1 − normalized Hamming distance` of the pHash  | 0.40   |
//! | Structure | cosine of Sobel-edge + LBP feature vectors      | 0.35   |
//! | Color     | Bhattacharyya coefficient of R/G/B histograms   | 0.25   |
//!
//! A signal that is silent for *both* images (two flat pHashes, two feature
//! vectors without any edges) is left out and the remaining weights are
//! renormalized. Without this, any two solid-color images would look
//! structurally identical regardless of their colors.
//!
//! Per-image artifacts ([`ImageSignature`]) are memoized by content hash, so
//! comparing the same image repeatedly pays for the transforms once. The memo
//! is an LRU bounded by [`MatcherConfig::memo_capacity`].

mod features;
mod histogram;
mod index;
mod signature;

pub use index::{IndexConfig, IndexOptimization, IndexedEntry, SimilarityIndex};
pub use signature::ImageSignature;

use crate::core::hasher::{canonical_rgba, content_hash_rgba, ContentHash, HasherConfig, ImageHasher};
use crate::core::storage::CachedEntry;
use crate::error::{HashError, SimilarityError};
use image::{DynamicImage, RgbaImage};
use lru::LruCache;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Relative weight of each similarity signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityWeights {
    pub hash: f64,
    pub structure: f64,
    pub color: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            hash: 0.40,
            structure: 0.35,
            color: 0.25,
        }
    }
}

/// Matcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// DCT grid side for the perceptual hash
    pub grid_size: usize,
    /// Grayscale grid side for edge and texture features
    pub feature_grid_size: usize,
    /// Sampling step for Sobel magnitudes
    pub edge_stride: usize,
    /// Histogram bins per color channel
    pub histogram_bins: usize,
    pub weights: SimilarityWeights,
    /// Perceptual distance under which two images are "identical"
    pub near_identical_distance: f64,
    /// Budget for a single candidate comparison
    pub comparison_timeout_ms: u64,
    /// Budget for a whole `find_similar` batch
    pub batch_timeout_ms: u64,
    /// Most signatures kept memoized; least recently used go first
    pub memo_capacity: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            grid_size: 8,
            feature_grid_size: 32,
            edge_stride: 2,
            histogram_bins: 64,
            weights: SimilarityWeights::default(),
            near_identical_distance: 0.02,
            comparison_timeout_ms: 2_000,
            batch_timeout_ms: 10_000,
            memo_capacity: 1024,
        }
    }
}

impl MatcherConfig {
    /// Check the configuration for values the matcher cannot work with
    pub fn validate(&self) -> Result<(), String> {
        if self.grid_size < 2 {
            return Err(format!("grid_size must be at least 2, got {}", self.grid_size));
        }
        if self.feature_grid_size < 3 {
            return Err(format!(
                "feature_grid_size must be at least 3, got {}",
                self.feature_grid_size
            ));
        }
        if self.edge_stride == 0 {
            return Err("edge_stride must be positive".to_string());
        }
        if self.histogram_bins == 0 || self.histogram_bins > 256 {
            return Err(format!(
                "histogram_bins must be within 1-256, got {}",
                self.histogram_bins
            ));
        }
        let w = &self.weights;
        if w.hash < 0.0 || w.structure < 0.0 || w.color < 0.0 {
            return Err("similarity weights must be non-negative".to_string());
        }
        if w.color <= 0.0 {
            return Err("the color weight must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.near_identical_distance) {
            return Err("near_identical_distance must be within 0-1".to_string());
        }
        if self.memo_capacity == 0 {
            return Err("memo_capacity must be positive".to_string());
        }
        Ok(())
    }
}

/// Per-signal scores behind one similarity value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityBreakdown {
    /// Hash signal, `None` when both hashes carry no detail
    pub hash: Option<f64>,
    /// Structure signal, `None` when neither image has edges or texture
    pub structure: Option<f64>,
    pub color: f64,
    /// Weighted combination, in [0, 1]
    pub score: f64,
    /// Whether the content hashes matched (all signals skipped)
    pub exact: bool,
}

impl SimilarityBreakdown {
    fn exact() -> Self {
        Self {
            hash: Some(1.0),
            structure: Some(1.0),
            color: 1.0,
            score: 1.0,
            exact: true,
        }
    }

    fn combine(
        hash: Option<f64>,
        structure: Option<f64>,
        color: f64,
        weights: &SimilarityWeights,
    ) -> Self {
        let parts = [
            hash.map(|s| (s, weights.hash)),
            structure.map(|s| (s, weights.structure)),
            Some((color, weights.color)),
        ];
        let (weighted, total) = parts
            .iter()
            .flatten()
            .fold((0.0, 0.0), |(sum, total), (score, weight)| {
                (sum + score * weight, total + weight)
            });
        let score = if total > 0.0 {
            (weighted / total).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            hash,
            structure,
            color,
            score,
            exact: false,
        }
    }
}

/// A cached entry that cleared a similarity threshold
#[derive(Debug, Clone)]
pub struct SimilarityCandidate {
    pub entry: CachedEntry,
    pub similarity: f64,
}

/// Result of scoring one candidate inside a batch
enum Outcome {
    Scored(usize, f64),
    Skipped,
    Failed(SimilarityError),
    Fatal(HashError),
}

/// Multi-signal image matcher with memoized per-image artifacts
pub struct SimilarityMatcher {
    config: MatcherConfig,
    hasher: ImageHasher,
    memo: Mutex<LruCache<ContentHash, Arc<ImageSignature>>>,
}

impl SimilarityMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        let hasher = HasherConfig::new()
            .grid_size(config.grid_size)
            .near_identical_distance(config.near_identical_distance)
            .build();
        let capacity = NonZeroUsize::new(config.memo_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            hasher,
            memo: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn hasher(&self) -> &ImageHasher {
        &self.hasher
    }

    /// Signature for an image, reused while its content hash stays memoized
    pub fn signature(&self, image: &DynamicImage) -> Arc<ImageSignature> {
        let pixels = canonical_rgba(image);
        self.signature_of_pixels(content_hash_rgba(&pixels), &pixels)
    }

    fn signature_of_pixels(&self, content_hash: ContentHash, pixels: &RgbaImage) -> Arc<ImageSignature> {
        if content_hash.is_empty() {
            return Arc::new(ImageSignature::empty());
        }

        if let Some(found) = self.memo().get(&content_hash) {
            return Arc::clone(found);
        }

        // Computed without the lock; another thread may race us to it
        let computed = Arc::new(ImageSignature::compute(
            content_hash,
            pixels,
            &self.hasher,
            &self.config,
        ));

        let mut memo = self.memo();
        if let Some(found) = memo.get(&content_hash) {
            return Arc::clone(found);
        }
        if let Some((evicted, _)) = memo.push(content_hash, Arc::clone(&computed)) {
            if evicted != content_hash {
                debug!(hash = %evicted.short(), "evicted memoized signature");
            }
        }
        debug!(hash = %content_hash.short(), "memoized image signature");
        computed
    }

    /// Similarity of two images, in [0, 1]
    pub fn similarity(&self, a: &DynamicImage, b: &DynamicImage) -> Result<f64, SimilarityError> {
        Ok(self.explain(a, b)?.score)
    }

    /// Similarity of two images with the per-signal scores.
    ///
    /// Identical pixels are recognized from the content hashes alone; no
    /// signature is computed for them.
    pub fn explain(
        &self,
        a: &DynamicImage,
        b: &DynamicImage,
    ) -> Result<SimilarityBreakdown, SimilarityError> {
        let (pixels_a, pixels_b) = (canonical_rgba(a), canonical_rgba(b));
        let (hash_a, hash_b) = rayon::join(
            || content_hash_rgba(&pixels_a),
            || content_hash_rgba(&pixels_b),
        );
        if !hash_a.is_empty() && hash_a == hash_b {
            return Ok(SimilarityBreakdown::exact());
        }

        let (sig_a, sig_b) = rayon::join(
            || self.signature_of_pixels(hash_a, &pixels_a),
            || self.signature_of_pixels(hash_b, &pixels_b),
        );
        self.compare_signatures(&sig_a, &sig_b)
    }

    /// Score two signatures.
    ///
    /// Matching content hashes short-circuit to 1.0. Otherwise the three
    /// signals run in parallel and are combined with the configured weights.
    /// Fails only when both perceptual hashes are present but have different
    /// lengths.
    pub fn compare_signatures(
        &self,
        a: &ImageSignature,
        b: &ImageSignature,
    ) -> Result<SimilarityBreakdown, SimilarityError> {
        if a.is_attributable() && b.is_attributable() && a.content_hash() == b.content_hash() {
            return Ok(SimilarityBreakdown::exact());
        }

        let ((hash, structure), color) = rayon::join(
            || {
                rayon::join(
                    || hash_signal(a, b),
                    || features::cosine_similarity(&a.structure, &b.structure),
                )
            },
            || histogram::bhattacharyya(&a.histogram, &b.histogram),
        );

        Ok(SimilarityBreakdown::combine(
            hash?,
            structure,
            color,
            &self.config.weights,
        ))
    }

    /// Candidates scoring at least `threshold` against `target`, best first
    pub fn find_similar(
        &self,
        target: &DynamicImage,
        candidates: &[CachedEntry],
        threshold: f64,
    ) -> Result<Vec<SimilarityCandidate>, SimilarityError> {
        let signature = self.signature(target);
        let ranked = self.rank(&signature, candidates, |entry| &entry.signature, threshold)?;

        Ok(ranked
            .into_iter()
            .map(|(position, similarity)| SimilarityCandidate {
                entry: candidates[position].clone(),
                similarity,
            })
            .collect())
    }

    /// Score `items` against `target` in parallel.
    ///
    /// Returns `(position, score)` pairs at or above `threshold`, sorted by
    /// descending score with ties in input order. A comparison that panics,
    /// overruns its budget, or starts after the batch deadline is left out.
    pub(crate) fn rank<T, F>(
        &self,
        target: &ImageSignature,
        items: &[T],
        signature_of: F,
        threshold: f64,
    ) -> Result<Vec<(usize, f64)>, SimilarityError>
    where
        T: Sync,
        F: Fn(&T) -> &ImageSignature + Sync,
    {
        if !target.is_attributable() || items.is_empty() {
            return Ok(Vec::new());
        }

        let threshold = threshold.clamp(0.0, 1.0);
        let comparison_budget = Duration::from_millis(self.config.comparison_timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(self.config.batch_timeout_ms);

        let outcomes: Vec<Outcome> = items
            .par_iter()
            .enumerate()
            .map(|(position, item)| {
                if Instant::now() >= deadline {
                    return Outcome::Skipped;
                }

                let started = Instant::now();
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    let candidate = signature_of(item);
                    if !candidate.is_attributable() {
                        return Ok(None);
                    }
                    self.compare_signatures(target, candidate).map(Some)
                }));
                match result {
                    Err(_) => Outcome::Failed(SimilarityError::ComparisonFailed(format!(
                        "comparison against candidate {} panicked",
                        position
                    ))),
                    Ok(Err(SimilarityError::Hash(error))) => Outcome::Fatal(error),
                    Ok(Err(error)) => Outcome::Failed(error),
                    Ok(Ok(None)) => Outcome::Skipped,
                    Ok(Ok(Some(_))) if started.elapsed() > comparison_budget => {
                        Outcome::Failed(SimilarityError::TimedOut {
                            budget_ms: self.config.comparison_timeout_ms,
                        })
                    }
                    Ok(Ok(Some(breakdown))) => Outcome::Scored(position, breakdown.score),
                }
            })
            .collect();

        let mut ranked = Vec::new();
        let mut skipped = 0usize;
        for outcome in outcomes {
            match outcome {
                Outcome::Scored(position, score) if score >= threshold => {
                    ranked.push((position, score))
                }
                Outcome::Scored(..) => {}
                Outcome::Skipped => skipped += 1,
                Outcome::Failed(error) => warn!(%error, "excluded candidate from similarity batch"),
                Outcome::Fatal(error) => return Err(error.into()),
            }
        }
        if skipped > 0 {
            debug!(skipped, total = items.len(), "skipped candidates in similarity batch");
        }

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked)
    }

    /// Drop every memoized signature
    pub fn clear_cache(&self) {
        self.memo().clear();
    }

    /// Drop the memoized signature for one image
    pub fn forget(&self, content_hash: &ContentHash) -> bool {
        self.memo().pop(content_hash).is_some()
    }

    /// Number of memoized signatures
    pub fn memoized_count(&self) -> usize {
        self.memo().len()
    }

    fn memo(&self) -> MutexGuard<'_, LruCache<ContentHash, Arc<ImageSignature>>> {
        self.memo.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SimilarityMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

/// `1 − distance`, `None` when both hashes are flat, 0 for degenerate input
fn hash_signal(a: &ImageSignature, b: &ImageSignature) -> Result<Option<f64>, HashError> {
    let (ha, hb) = (a.perceptual_hash(), b.perceptual_hash());
    if ha.is_empty() || hb.is_empty() {
        return Ok(Some(0.0));
    }
    let distance = ha.distance(hb)?;
    if !ha.carries_detail() && !hb.carries_detail() {
        return Ok(None);
    }
    Ok(Some(1.0 - distance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hasher::{ImageFingerprint, PerceptualHash};
    use image::{ImageBuffer, Rgb};

    fn solid_image(width: u32, height: u32, r: u8, g: u8, b: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([r, g, b])))
    }

    fn stripes(width: u32, height: u32, period: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, _| {
            if (x / period) % 2 == 0 { Rgb([230, 40, 40]) } else { Rgb([20, 20, 120]) }
        }))
    }

    #[test]
    fn default_config_is_valid() {
        assert!(MatcherConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = MatcherConfig {
            histogram_bins: 0,
            ..MatcherConfig::default()
        };
        assert!(config.validate().is_err());

        let config = MatcherConfig {
            weights: SimilarityWeights {
                hash: -1.0,
                ..SimilarityWeights::default()
            },
            ..MatcherConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn same_pixels_short_circuit() {
        let matcher = SimilarityMatcher::default();
        let breakdown = matcher
            .explain(&stripes(64, 64, 8), &stripes(64, 64, 8))
            .unwrap();

        assert!(breakdown.exact);
        assert_eq!(breakdown.score, 1.0);
    }

    #[test]
    fn flat_images_skip_uninformative_signals() {
        let matcher = SimilarityMatcher::default();
        let breakdown = matcher
            .explain(
                &solid_image(100, 100, 255, 0, 0),
                &solid_image(100, 100, 0, 0, 255),
            )
            .unwrap();

        assert_eq!(breakdown.hash, None);
        assert_eq!(breakdown.structure, None);
        assert!((breakdown.score - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn flat_versus_textured_counts_every_signal() {
        let matcher = SimilarityMatcher::default();
        let breakdown = matcher
            .explain(&solid_image(64, 64, 128, 128, 128), &stripes(64, 64, 16))
            .unwrap();

        assert!(breakdown.hash.is_some());
        assert_eq!(breakdown.structure, Some(0.0));
        assert!(breakdown.score < 0.5);
    }

    #[test]
    fn degenerate_image_scores_zero() {
        let matcher = SimilarityMatcher::default();
        let empty = DynamicImage::ImageRgb8(ImageBuffer::new(0, 0));

        let score = matcher.similarity(&empty, &stripes(32, 32, 4)).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn mismatched_hash_lengths_are_an_error() {
        let matcher = SimilarityMatcher::default();
        let a = ImageSignature {
            fingerprint: ImageFingerprint {
                content_hash: ContentHash::from_bytes([1; 32]),
                perceptual_hash: PerceptualHash::from_bits((0..63).map(|i| i % 2 == 0)),
            },
            structure: vec![0.1; 8],
            histogram: vec![0.5; 6],
        };
        let b = ImageSignature {
            fingerprint: ImageFingerprint {
                content_hash: ContentHash::from_bytes([2; 32]),
                perceptual_hash: PerceptualHash::from_bits((0..255).map(|i| i % 2 == 0)),
            },
            ..a.clone()
        };

        let result = matcher.compare_signatures(&a, &b);
        assert!(matches!(
            result,
            Err(SimilarityError::Hash(HashError::LengthMismatch { left: 63, right: 255 }))
        ));
    }

    #[test]
    fn mismatched_feature_lengths_score_zero_for_that_signal() {
        let matcher = SimilarityMatcher::default();
        let hash = PerceptualHash::from_bits((0..63).map(|i| i % 3 == 0));
        let a = ImageSignature {
            fingerprint: ImageFingerprint {
                content_hash: ContentHash::from_bytes([1; 32]),
                perceptual_hash: hash.clone(),
            },
            structure: vec![0.5; 10],
            histogram: vec![1.0 / 64.0; 192],
        };
        let b = ImageSignature {
            fingerprint: ImageFingerprint {
                content_hash: ContentHash::from_bytes([2; 32]),
                perceptual_hash: hash,
            },
            structure: vec![0.5; 12],
            ..a.clone()
        };

        let breakdown = matcher.compare_signatures(&a, &b).unwrap();
        assert_eq!(breakdown.structure, Some(0.0));
        assert_eq!(breakdown.hash, Some(1.0));
    }

    #[test]
    fn signatures_are_memoized() {
        let matcher = SimilarityMatcher::default();
        let image = stripes(80, 60, 5);

        let first = matcher.signature(&image);
        let second = matcher.signature(&image);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(matcher.memoized_count(), 1);

        assert!(matcher.forget(&first.content_hash()));
        assert_eq!(matcher.memoized_count(), 0);

        matcher.signature(&image);
        matcher.clear_cache();
        assert_eq!(matcher.memoized_count(), 0);
    }

    #[test]
    fn degenerate_images_are_not_memoized() {
        let matcher = SimilarityMatcher::default();
        let empty = DynamicImage::ImageRgb8(ImageBuffer::new(0, 0));

        assert!(!matcher.signature(&empty).is_attributable());
        assert_eq!(matcher.memoized_count(), 0);
    }

    #[test]
    fn rank_orders_by_score_then_position() {
        let matcher = SimilarityMatcher::default();
        let target = matcher.signature(&solid_image(50, 50, 255, 0, 0));
        let items = vec![
            matcher.signature(&solid_image(50, 50, 0, 0, 255)),
            matcher.signature(&solid_image(40, 40, 255, 0, 0)),
            matcher.signature(&solid_image(30, 30, 255, 255, 0)),
            matcher.signature(&solid_image(20, 20, 255, 0, 0)),
        ];

        let ranked = matcher.rank(&target, &items, |s| &**s, 0.5).unwrap();
        let positions: Vec<usize> = ranked.iter().map(|(p, _)| *p).collect();

        assert_eq!(positions, vec![1, 3, 2]);
        assert!(ranked.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn panicking_comparison_is_left_out() {
        let matcher = SimilarityMatcher::default();
        let target = matcher.signature(&solid_image(50, 50, 255, 0, 0));
        let items = vec![
            matcher.signature(&solid_image(40, 40, 255, 0, 0)),
            matcher.signature(&solid_image(30, 30, 255, 0, 0)),
            matcher.signature(&solid_image(20, 20, 255, 0, 0)),
        ];

        let ranked = matcher
            .rank(
                &target,
                &items,
                |s| {
                    if s.content_hash() == items[1].content_hash() {
                        panic!("broken candidate");
                    }
                    &**s
                },
                0.5,
            )
            .unwrap();
        let positions: Vec<usize> = ranked.iter().map(|(p, _)| *p).collect();

        assert_eq!(positions, vec![0, 2]);
    }

    #[test]
    fn comparison_over_budget_is_dropped() {
        let matcher = SimilarityMatcher::new(MatcherConfig {
            comparison_timeout_ms: 0,
            ..MatcherConfig::default()
        });
        let target = matcher.signature(&stripes(64, 64, 8));
        let items = vec![matcher.signature(&stripes(64, 64, 4)), matcher.signature(&stripes(64, 64, 16))];

        assert!(matcher.rank(&target, &items, |s| &**s, 0.0).unwrap().is_empty());
    }

    #[test]
    fn exhausted_batch_budget_skips_the_rest() {
        let matcher = SimilarityMatcher::new(MatcherConfig {
            batch_timeout_ms: 0,
            ..MatcherConfig::default()
        });
        let target = matcher.signature(&stripes(64, 64, 8));
        let items = vec![matcher.signature(&stripes(64, 64, 8)), matcher.signature(&stripes(64, 64, 4))];

        assert!(matcher.rank(&target, &items, |s| &**s, 0.0).unwrap().is_empty());
    }

    #[test]
    fn budgets_keep_comparisons_that_finish_in_time() {
        let matcher = SimilarityMatcher::default();
        let target = matcher.signature(&stripes(64, 64, 8));
        let items = vec![matcher.signature(&stripes(64, 64, 8)), matcher.signature(&stripes(64, 64, 4))];

        let ranked = matcher.rank(&target, &items, |s| &**s, 0.0).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0], (0, 1.0));
    }

    #[test]
    fn identical_images_skip_signature_work() {
        let matcher = SimilarityMatcher::default();
        let breakdown = matcher
            .explain(&stripes(48, 48, 6), &stripes(48, 48, 6))
            .unwrap();

        assert!(breakdown.exact);
        assert_eq!(matcher.memoized_count(), 0);
    }

    #[test]
    fn memo_stays_within_capacity() {
        let matcher = SimilarityMatcher::new(MatcherConfig {
            memo_capacity: 16,
            ..MatcherConfig::default()
        });
        for shade in 0..200u32 {
            matcher.signature(&solid_image(12, 12, shade as u8, 0, 0));
        }
        assert_eq!(matcher.memoized_count(), 16);

        let recent = matcher.signature(&solid_image(12, 12, 199, 0, 0));
        let again = matcher.signature(&solid_image(12, 12, 199, 0, 0));
        assert!(Arc::ptr_eq(&recent, &again));
    }

    #[test]
    fn zero_memo_capacity_is_rejected() {
        let config = MatcherConfig {
            memo_capacity: 0,
            ..MatcherConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
