//! # Metadata Module
//!
//! Descriptive metadata that travels with every recognition result.
//!
//! The cache treats [`ImageMetadata`] as opaque: whatever the recognition
//! service supplied comes back unchanged from exact and fuzzy hits.
//! [`ImageMetadata::analyze`] fills in the fields that can be measured from
//! pixels (dimensions, brightness, contrast, dominant colors); `has_text` and
//! `estimated_object_count` are left for the recognizer.

use crate::core::hasher::transform::luma;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Side of the thumbnail used for analysis
const ANALYSIS_SIZE: u32 = 256;

/// How many dominant colors to report
const DOMINANT_COLOR_COUNT: usize = 3;

/// Quantization step per channel when grouping colors
const COLOR_QUANTUM: u8 = 32;

/// Image metadata exposed to presentation layers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Encoded file size
    pub file_size_bytes: u64,
    /// Encoded format, e.g. "jpeg"
    pub format: String,
    /// Most common colors as `#RRGGBB`, most frequent first
    pub dominant_colors: Vec<String>,
    /// Mean luma, 0 (black) to 1 (white)
    pub brightness: f64,
    /// RMS contrast (luma standard deviation), 0 to 0.5
    pub contrast: f64,
    pub has_text: bool,
    pub estimated_object_count: u32,
}

impl ImageMetadata {
    /// Measure what can be measured from the pixels
    pub fn analyze(image: &DynamicImage, file_size_bytes: u64, format: impl Into<String>) -> Self {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Self {
                file_size_bytes,
                format: format.into(),
                ..Self::default()
            };
        }

        let thumbnail = if width > ANALYSIS_SIZE || height > ANALYSIS_SIZE {
            image.thumbnail(ANALYSIS_SIZE, ANALYSIS_SIZE).to_rgb8()
        } else {
            image.to_rgb8()
        };

        let (brightness, contrast) = brightness_contrast(&thumbnail);

        Self {
            width,
            height,
            file_size_bytes,
            format: format.into(),
            dominant_colors: dominant_colors(&thumbnail),
            brightness,
            contrast,
            has_text: false,
            estimated_object_count: 0,
        }
    }

    /// Human-readable dimensions
    pub fn dimensions_display(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Mean and standard deviation of luma, scaled to 0-1
fn brightness_contrast(pixels: &image::RgbImage) -> (f64, f64) {
    let values: Vec<f64> = pixels
        .pixels()
        .map(|p| luma(p[0], p[1], p[2]) / 255.0)
        .collect();

    if values.is_empty() {
        return (0.0, 0.0);
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    (mean, variance.sqrt())
}

/// Most frequent quantized colors, rendered at the center of their bucket
fn dominant_colors(pixels: &image::RgbImage) -> Vec<String> {
    let mut counts: HashMap<[u8; 3], usize> = HashMap::new();
    for pixel in pixels.pixels() {
        let key = pixel.0.map(|c| c / COLOR_QUANTUM);
        *counts.entry(key).or_default() += 1;
    }

    let mut ranked: Vec<([u8; 3], usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    ranked
        .into_iter()
        .take(DOMINANT_COLOR_COUNT)
        .map(|(bucket, _)| {
            let [r, g, b] = bucket.map(|q| q * COLOR_QUANTUM + COLOR_QUANTUM / 2);
            format!("#{:02X}{:02X}{:02X}", r, g, b)
        })
        .collect()
}
