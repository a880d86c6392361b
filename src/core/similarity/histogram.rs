//! Per-channel color histograms and the Bhattacharyya coefficient.

use image::RgbaImage;

const CHANNELS: usize = 3;

/// Normalized R, G and B histograms, concatenated.
///
/// Each channel sums to 1. Degenerate images produce an empty vector.
pub(crate) fn color_histogram(pixels: &RgbaImage, bins: usize) -> Vec<f32> {
    let pixel_count = pixels.width() as usize * pixels.height() as usize;
    if pixel_count == 0 || bins == 0 {
        return Vec::new();
    }

    let mut counts = vec![0u64; bins * CHANNELS];
    for pixel in pixels.pixels() {
        for channel in 0..CHANNELS {
            let bin = pixel.0[channel] as usize * bins / 256;
            counts[channel * bins + bin] += 1;
        }
    }

    counts
        .into_iter()
        .map(|count| (count as f64 / pixel_count as f64) as f32)
        .collect()
}

/// `Σ√(a[i]·b[i])` averaged over the three channels, in [0, 1].
///
/// Mismatched or empty histograms score 0.
pub(crate) fn bhattacharyya(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let coefficient: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as f64 * y as f64).sqrt())
        .sum();
    (coefficient / CHANNELS as f64).clamp(0.0, 1.0)
}
