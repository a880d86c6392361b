//! SIMD-accelerated downscaling of oversized images.

use crate::error::HashError;
use fast_image_resize::{images::Image, FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, RgbaImage};
use std::path::Path;

/// Target size that fits within `max_side` while keeping the aspect ratio
pub fn fit_within(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    if width <= max_side && height <= max_side {
        return (width, height);
    }
    let scale = max_side as f64 / width.max(height) as f64;
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

/// Shrink `image` so neither side exceeds `max_side`.
///
/// Smaller images are returned as they are. `path` only labels errors.
pub fn downscale(image: DynamicImage, max_side: u32, path: &Path) -> Result<DynamicImage, HashError> {
    let (width, height) = (image.width(), image.height());
    let (target_width, target_height) = fit_within(width, height, max_side);
    if (target_width, target_height) == (width, height) || width == 0 || height == 0 {
        return Ok(image);
    }

    let resize_error = |reason: String| HashError::DecodeError {
        path: path.to_path_buf(),
        reason,
    };

    let src = Image::from_vec_u8(width, height, image.into_rgba8().into_raw(), PixelType::U8x4)
        .map_err(|e| resize_error(format!("invalid source buffer: {}", e)))?;
    let mut dst = Image::new(target_width, target_height, PixelType::U8x4);

    let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
    Resizer::new()
        .resize(&src, &mut dst, &options)
        .map_err(|e| resize_error(format!("resize failed: {}", e)))?;

    RgbaImage::from_raw(target_width, target_height, dst.into_vec())
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| resize_error("resized buffer has the wrong size".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn fit_within_keeps_aspect_ratio() {
        assert_eq!(fit_within(4000, 3000, 1000), (1000, 750));
        assert_eq!(fit_within(300, 6000, 600), (30, 600));
        assert_eq!(fit_within(800, 600, 1000), (800, 600));
    }

    #[test]
    fn downscale_shrinks_large_images() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(400, 200, Rgb([10, 200, 30])));

        let small = downscale(image, 100, Path::new("test.png")).unwrap();

        assert_eq!((small.width(), small.height()), (100, 50));
        let pixel = small.to_rgba8().get_pixel(50, 25).0;
        assert!((pixel[1] as i32 - 200).abs() <= 2);
    }

    #[test]
    fn downscale_leaves_small_images_alone() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(40, 20, Rgb([1, 2, 3])));
        let same = downscale(image.clone(), 100, Path::new("test.png")).unwrap();
        assert_eq!(same, image);
    }
}
