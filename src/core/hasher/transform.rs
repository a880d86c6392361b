//! Grayscale grid reduction and the 2D Discrete Cosine Transform.
//!
//! Both the perceptual hash and the structural features work on a small
//! grayscale grid. Reduction is done by area averaging in a single pass over
//! the source pixels, so large photos never need a full-size grayscale copy.

use image::RgbaImage;
use std::f64::consts::PI;

/// Grids whose value range is below this are treated as flat (no AC energy).
pub(crate) const FLAT_TOLERANCE: f64 = 1e-6;

/// ITU-R BT.601 luma, on the 0-255 scale
#[inline]
pub(crate) fn luma(r: u8, g: u8, b: u8) -> f64 {
    0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64
}

/// Reduce an image to a `cols x rows` grid of mean luma values, row-major.
///
/// Aspect ratio is discarded. When the source is smaller than the grid along
/// an axis, cells that receive no pixels take their nearest source pixel.
pub(crate) fn luma_grid(pixels: &RgbaImage, cols: usize, rows: usize) -> Vec<f64> {
    let width = pixels.width() as usize;
    let height = pixels.height() as usize;
    if width == 0 || height == 0 || cols == 0 || rows == 0 {
        return Vec::new();
    }

    let mut sums = vec![0.0f64; cols * rows];
    let mut counts = vec![0u32; cols * rows];

    for (x, y, pixel) in pixels.enumerate_pixels() {
        let cell_x = x as usize * cols / width;
        let cell_y = y as usize * rows / height;
        let cell = cell_y * cols + cell_x;
        let [r, g, b, _] = pixel.0;
        sums[cell] += luma(r, g, b);
        counts[cell] += 1;
    }

    (0..cols * rows)
        .map(|cell| {
            if counts[cell] > 0 {
                sums[cell] / counts[cell] as f64
            } else {
                let src_x = (cell % cols) * width / cols;
                let src_y = (cell / cols) * height / rows;
                let [r, g, b, _] = pixels.get_pixel(src_x as u32, src_y as u32).0;
                luma(r, g, b)
            }
        })
        .collect()
}

/// True when every value lies within [`FLAT_TOLERANCE`] of every other
pub(crate) fn is_flat(grid: &[f64]) -> bool {
    let (min, max) = grid
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    grid.is_empty() || max - min < FLAT_TOLERANCE
}

/// Orthonormal DCT-II basis: `table[k * n + i] = a(k) * cos(pi * (2i + 1) * k / 2n)`
fn dct_basis(n: usize) -> Vec<f64> {
    let mut table = vec![0.0; n * n];
    let scale_dc = (1.0 / n as f64).sqrt();
    let scale_ac = (2.0 / n as f64).sqrt();
    for k in 0..n {
        let scale = if k == 0 { scale_dc } else { scale_ac };
        for i in 0..n {
            table[k * n + i] =
                scale * (PI * (2 * i + 1) as f64 * k as f64 / (2 * n) as f64).cos();
        }
    }
    table
}

/// Separable 2D DCT-II of an `n x n` row-major grid.
///
/// Output is row-major with the DC coefficient at index 0.
pub(crate) fn dct_2d(grid: &[f64], n: usize) -> Vec<f64> {
    debug_assert_eq!(grid.len(), n * n);
    let basis = dct_basis(n);

    // Transform rows: rows[y][v] = sum_x grid[y][x] * basis[v][x]
    let mut rows = vec![0.0; n * n];
    for y in 0..n {
        for v in 0..n {
            rows[y * n + v] = (0..n).map(|x| grid[y * n + x] * basis[v * n + x]).sum();
        }
    }

    // Then columns: out[u][v] = sum_y basis[u][y] * rows[y][v]
    let mut out = vec![0.0; n * n];
    for u in 0..n {
        for v in 0..n {
            out[u * n + v] = (0..n).map(|y| basis[u * n + y] * rows[y * n + v]).sum();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbaImage {
        ImageBuffer::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]))
    }

    #[test]
    fn luma_uses_bt601_weights() {
        assert!((luma(255, 0, 0) - 76.245).abs() < 1e-9);
        assert!((luma(255, 255, 255) - 255.0).abs() < 1e-9);
    }

    #[test]
    fn solid_image_reduces_to_flat_grid() {
        let grid = luma_grid(&solid(100, 100, [0, 200, 0]), 8, 8);

        assert_eq!(grid.len(), 64);
        assert!(is_flat(&grid));
        assert!((grid[0] - luma(0, 200, 0)).abs() < 1e-9);
    }

    #[test]
    fn small_image_fills_every_cell() {
        let image = ImageBuffer::from_fn(3, 2, |x, _| {
            if x == 0 { Rgba([0, 0, 0, 255]) } else { Rgba([255, 255, 255, 255]) }
        });
        let grid = luma_grid(&image, 8, 8);

        assert_eq!(grid.len(), 64);
        assert!(grid.iter().all(|v| *v == 0.0 || (*v - 255.0).abs() < 1e-9));
        assert!(!is_flat(&grid));
    }

    #[test]
    fn empty_image_yields_empty_grid() {
        let grid = luma_grid(&RgbaImage::new(0, 0), 8, 8);
        assert!(grid.is_empty());
    }

    #[test]
    fn dct_of_constant_grid_has_only_dc_energy() {
        let grid = vec![100.0; 64];
        let coefficients = dct_2d(&grid, 8);

        assert!((coefficients[0] - 800.0).abs() < 1e-9);
        assert!(coefficients[1..].iter().all(|c| c.abs() < 1e-9));
    }

    #[test]
    fn dct_preserves_energy() {
        let grid: Vec<f64> = (0..16).map(|i| (i * 17 % 11) as f64).collect();
        let coefficients = dct_2d(&grid, 4);

        let spatial: f64 = grid.iter().map(|v| v * v).sum();
        let spectral: f64 = coefficients.iter().map(|v| v * v).sum();
        assert!((spatial - spectral).abs() < 1e-6);
    }
}
