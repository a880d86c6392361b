//! Structural features: Sobel edge magnitudes and Local Binary Patterns.
//!
//! Both are computed on a fixed-size grayscale grid so that feature vectors
//! from any two images have the same length.

use crate::core::hasher::transform::{luma_grid, FLAT_TOLERANCE};
use image::RgbaImage;

/// Largest Sobel magnitude possible on the 0-255 scale: `4 * 255 * sqrt(2)`
const MAX_SOBEL_MAGNITUDE: f64 = 1442.497_833_620_557_4;

/// Norms below this count as "no structure at all"
const ZERO_NORM: f64 = 1e-9;

/// Neighbour offsets, clockwise from the top-left
const LBP_NEIGHBOURS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
];

/// Build the structure feature vector for an image.
///
/// Layout: Sobel magnitudes sampled every `edge_stride` pixels over the grid
/// interior (normalized to [0, 1]), followed by one LBP code per interior pixel
/// (divided by 255). Degenerate images produce an empty vector.
pub(crate) fn structure_features(pixels: &RgbaImage, grid_size: usize, edge_stride: usize) -> Vec<f32> {
    if grid_size < 3 {
        return Vec::new();
    }
    let grid = luma_grid(pixels, grid_size, grid_size);
    if grid.is_empty() {
        return Vec::new();
    }

    let n = grid_size;
    let stride = edge_stride.max(1);
    let at = |x: usize, y: usize| grid[y * n + x];

    let mut features = Vec::with_capacity((n - 2) * (n - 2) * 2);

    for y in (1..n - 1).step_by(stride) {
        for x in (1..n - 1).step_by(stride) {
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            let magnitude = (gx * gx + gy * gy).sqrt();
            let magnitude = if magnitude < FLAT_TOLERANCE { 0.0 } else { magnitude };
            features.push((magnitude / MAX_SOBEL_MAGNITUDE).min(1.0) as f32);
        }
    }

    for y in 1..n - 1 {
        for x in 1..n - 1 {
            let center = at(x, y);
            let code = LBP_NEIGHBOURS
                .iter()
                .enumerate()
                .fold(0u8, |code, (bit, (dx, dy))| {
                    let nx = (x as isize + dx) as usize;
                    let ny = (y as isize + dy) as usize;
                    if at(nx, ny) > center + FLAT_TOLERANCE {
                        code | (0x80 >> bit)
                    } else {
                        code
                    }
                });
            features.push(code as f32 / 255.0);
        }
    }

    features
}

/// Cosine similarity of two non-negative feature vectors.
///
/// - `None` when neither vector has any structure (the metric says nothing)
/// - `Some(0.0)` for length mismatches or when only one side has structure
/// - otherwise the cosine, in [0, 1]
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return Some(0.0);
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b.iter()).fold(
        (0.0f64, 0.0f64, 0.0f64),
        |(dot, na, nb), (&x, &y)| {
            let (x, y) = (x as f64, y as f64);
            (dot + x * y, na + x * x, nb + y * y)
        },
    );
    let (norm_a, norm_b) = (norm_a.sqrt(), norm_b.sqrt());

    match (norm_a < ZERO_NORM, norm_b < ZERO_NORM) {
        (true, true) => None,
        (true, false) | (false, true) => Some(0.0),
        (false, false) => Some((dot / (norm_a * norm_b)).clamp(0.0, 1.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn checkerboard(size: u32, cell: u32) -> RgbaImage {
        ImageBuffer::from_fn(size, size, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    #[test]
    fn feature_length_depends_only_on_grid() {
        let small = structure_features(&checkerboard(40, 5), 32, 2);
        let large = structure_features(&checkerboard(300, 30), 32, 2);

        // 15x15 edge samples + 30x30 LBP codes
        assert_eq!(small.len(), 225 + 900);
        assert_eq!(large.len(), small.len());
    }

    #[test]
    fn flat_image_has_no_structure() {
        let flat: RgbaImage = ImageBuffer::from_pixel(100, 100, Rgba([10, 200, 30, 255]));
        let features = structure_features(&flat, 32, 2);

        assert!(features.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn textured_image_has_structure() {
        let features = structure_features(&checkerboard(128, 16), 32, 2);
        assert!(features.iter().any(|v| *v > 0.0));
        assert!(features.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn degenerate_image_has_empty_features() {
        assert!(structure_features(&RgbaImage::new(0, 0), 32, 2).is_empty());
    }

    #[test]
    fn cosine_handles_edge_cases() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), Some(0.0));

        let same = cosine_similarity(&[0.3, 0.4], &[0.3, 0.4]).unwrap();
        assert!((same - 1.0).abs() < 1e-9);

        let orthogonal = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(orthogonal.abs() < 1e-9);
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = structure_features(&checkerboard(64, 8), 32, 2);
        let b = structure_features(&checkerboard(64, 4), 32, 2);

        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }
}
