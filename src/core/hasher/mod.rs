//! # Hasher Module
//!
//! Computes exact content digests and perceptual fingerprints for images.
//!
//! ## Content Hash
//! SHA-256 over the image dimensions and its canonical RGBA8 pixels. Two
//! images with identical pixels always share a content hash, regardless of the
//! color type they were decoded into. This is the exact-match cache key.
//!
//! ## Perceptual Hash (pHash)
//! 1. Reduce the image to a fixed grid (default 8x8), discarding aspect ratio
//! 2. Convert to grayscale with `0.299R + 0.587G + 0.114B`
//! 3. Apply a 2D DCT over the grid
//! 4. Take the mean of the AC coefficients (everything but `[0,0]`)
//! 5. Emit `1` for each AC coefficient above the mean, else `0`
//!
//! The result is always `grid_size² − 1` bits. Fingerprints are compared with
//! normalized Hamming distance.
//!
//! ## Degenerate Images
//! Images without pixels get [`ImageFingerprint::empty`]; nothing here ever
//! fails on user data.
//!
//! ## Example
//! ```rust,ignore
//! use recognition_cache::core::hasher::HasherConfig;
//!
//! let hasher = HasherConfig::new().grid_size(8).build();
//! let fingerprint = hasher.fingerprint(&image);
//! ```

mod fingerprint;
pub(crate) mod transform;

pub use fingerprint::{ContentHash, ImageFingerprint, PerceptualHash};

use crate::error::HashError;
use image::{DynamicImage, RgbaImage};
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// Configuration builder for [`ImageHasher`]
#[derive(Debug, Clone)]
pub struct HasherConfig {
    /// Side of the DCT grid (hash length is `grid_size² − 1`)
    grid_size: usize,
    /// Perceptual distance below which two images count as identical
    near_identical_distance: f64,
}

impl HasherConfig {
    /// Create a new hasher configuration with defaults
    pub fn new() -> Self {
        Self {
            grid_size: 8,
            near_identical_distance: 0.02,
        }
    }

    /// Set the DCT grid size
    ///
    /// - 8: 63 bits, the usual choice
    /// - 16: 255 bits, finer but more sensitive to noise
    pub fn grid_size(mut self, size: usize) -> Self {
        self.grid_size = size.max(2);
        self
    }

    /// Set the tolerance used by [`ImageHasher::identical`]
    pub fn near_identical_distance(mut self, distance: f64) -> Self {
        self.near_identical_distance = distance.clamp(0.0, 1.0);
        self
    }

    /// Build the hasher
    pub fn build(self) -> ImageHasher {
        ImageHasher { config: self }
    }
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes content and perceptual hashes
#[derive(Debug, Clone)]
pub struct ImageHasher {
    config: HasherConfig,
}

impl ImageHasher {
    /// Hasher with the default 8x8 grid
    pub fn new() -> Self {
        HasherConfig::new().build()
    }

    pub fn grid_size(&self) -> usize {
        self.config.grid_size
    }

    /// Length of every perceptual hash this hasher produces
    pub fn bit_length(&self) -> usize {
        self.config.grid_size * self.config.grid_size - 1
    }

    /// Exact-content digest used as the cache key
    pub fn content_hash(&self, image: &DynamicImage) -> ContentHash {
        content_hash_rgba(&canonical_rgba(image))
    }

    /// DCT-based perceptual fingerprint
    pub fn perceptual_hash(&self, image: &DynamicImage) -> PerceptualHash {
        self.perceptual_hash_rgba(&canonical_rgba(image))
    }

    /// Both hashes in one pass over the image conversion
    pub fn fingerprint(&self, image: &DynamicImage) -> ImageFingerprint {
        self.fingerprint_rgba(&canonical_rgba(image))
    }

    /// Normalized Hamming distance between two perceptual hashes.
    ///
    /// Fails with [`HashError::LengthMismatch`] when the hashes were produced
    /// with different grid sizes.
    pub fn hash_distance(
        &self,
        a: &PerceptualHash,
        b: &PerceptualHash,
    ) -> Result<f64, HashError> {
        a.distance(b)
    }

    /// Whether two images are the same picture.
    ///
    /// True when the content hashes match, or when both perceptual hashes
    /// carry detail and differ by less than the near-identical distance
    /// (tolerates re-encoding noise).
    pub fn identical(&self, a: &DynamicImage, b: &DynamicImage) -> bool {
        let fa = self.fingerprint(a);
        let fb = self.fingerprint(b);
        self.fingerprints_identical(&fa, &fb)
    }

    pub fn fingerprints_identical(&self, a: &ImageFingerprint, b: &ImageFingerprint) -> bool {
        if !a.is_attributable() || !b.is_attributable() {
            return false;
        }
        if a.content_hash == b.content_hash {
            return true;
        }
        if !a.perceptual_hash.carries_detail() || !b.perceptual_hash.carries_detail() {
            return false;
        }
        a.perceptual_hash
            .distance(&b.perceptual_hash)
            .map(|d| d < self.config.near_identical_distance)
            .unwrap_or(false)
    }

    pub(crate) fn fingerprint_rgba(&self, pixels: &RgbaImage) -> ImageFingerprint {
        let content_hash = content_hash_rgba(pixels);
        if content_hash.is_empty() {
            return ImageFingerprint::empty();
        }
        ImageFingerprint {
            content_hash,
            perceptual_hash: self.perceptual_hash_rgba(pixels),
        }
    }

    pub(crate) fn perceptual_hash_rgba(&self, pixels: &RgbaImage) -> PerceptualHash {
        let n = self.config.grid_size;
        let grid = transform::luma_grid(pixels, n, n);
        if grid.is_empty() {
            return PerceptualHash::empty();
        }
        if transform::is_flat(&grid) {
            return PerceptualHash::zeros(self.bit_length());
        }

        let coefficients = transform::dct_2d(&grid, n);
        let ac = &coefficients[1..];
        let mean = ac.iter().sum::<f64>() / ac.len() as f64;
        PerceptualHash::from_bits(ac.iter().map(|c| *c > mean))
    }
}

impl Default for ImageHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// View any image as RGBA8 without copying when it already is
pub(crate) fn canonical_rgba(image: &DynamicImage) -> Cow<'_, RgbaImage> {
    match image.as_rgba8() {
        Some(rgba) => Cow::Borrowed(rgba),
        None => Cow::Owned(image.to_rgba8()),
    }
}

pub(crate) fn content_hash_rgba(pixels: &RgbaImage) -> ContentHash {
    if pixels.width() == 0 || pixels.height() == 0 || pixels.as_raw().is_empty() {
        return ContentHash::EMPTY;
    }
    let mut hasher = Sha256::new();
    hasher.update(pixels.width().to_le_bytes());
    hasher.update(pixels.height().to_le_bytes());
    hasher.update(pixels.as_raw());
    ContentHash::from_bytes(hasher.finalize().into())
}
