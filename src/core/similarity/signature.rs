//! Per-image similarity artifacts.

use super::{features, histogram, MatcherConfig};
use crate::core::hasher::{ContentHash, ImageFingerprint, ImageHasher, PerceptualHash};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Everything the matcher needs to compare an image without its pixels.
///
/// Signatures are memoized by content hash and persisted alongside each cache
/// entry, so fuzzy lookups never reload the original photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSignature {
    pub fingerprint: ImageFingerprint,
    /// Sobel magnitudes followed by LBP codes
    pub structure: Vec<f32>,
    /// Concatenated, per-channel normalized R/G/B histograms
    pub histogram: Vec<f32>,
}

impl ImageSignature {
    /// Signature of a degenerate image
    pub fn empty() -> Self {
        Self {
            fingerprint: ImageFingerprint::empty(),
            structure: Vec::new(),
            histogram: Vec::new(),
        }
    }

    /// Compute the three artifacts in parallel for an already-digested image
    pub(crate) fn compute(
        content_hash: ContentHash,
        pixels: &RgbaImage,
        hasher: &ImageHasher,
        config: &MatcherConfig,
    ) -> Self {
        if content_hash.is_empty() {
            return Self::empty();
        }

        let (perceptual_hash, (structure, histogram)) = rayon::join(
            || hasher.perceptual_hash_rgba(pixels),
            || {
                rayon::join(
                    || features::structure_features(pixels, config.feature_grid_size, config.edge_stride),
                    || histogram::color_histogram(pixels, config.histogram_bins),
                )
            },
        );

        Self {
            fingerprint: ImageFingerprint {
                content_hash,
                perceptual_hash,
            },
            structure,
            histogram,
        }
    }

    pub fn content_hash(&self) -> ContentHash {
        self.fingerprint.content_hash
    }

    pub fn perceptual_hash(&self) -> &PerceptualHash {
        &self.fingerprint.perceptual_hash
    }

    pub fn is_attributable(&self) -> bool {
        self.fingerprint.is_attributable()
    }
}
