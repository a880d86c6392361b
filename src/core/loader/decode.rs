//! Image decoding with a fast path for JPEG.
//!
//! zune-jpeg decodes JPEGs noticeably faster than the image crate; anything
//! it cannot handle falls back to `image::open`.

use crate::error::HashError;
use image::{DynamicImage, ImageBuffer};
use std::fs;
use std::path::Path;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

/// Image formats the loader recognizes by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
    Bmp,
    Tiff,
    Other,
}

impl ImageFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("jpg" | "jpeg") => Self::Jpeg,
            Some("png") => Self::Png,
            Some("webp") => Self::WebP,
            Some("gif") => Self::Gif,
            Some("bmp") => Self::Bmp,
            Some("tif" | "tiff") => Self::Tiff,
            _ => Self::Other,
        }
    }

    /// Name recorded in [`crate::core::metadata::ImageMetadata::format`]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Other => "unknown",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// Decode the file at `path`
pub fn decode(path: &Path) -> Result<DynamicImage, HashError> {
    match ImageFormat::from_path(path) {
        ImageFormat::Jpeg => decode_jpeg(path).or_else(|_| decode_fallback(path)),
        ImageFormat::Other => Err(HashError::UnsupportedFormat {
            format: path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("none")
                .to_string(),
        }),
        _ => decode_fallback(path),
    }
}

fn decode_jpeg(path: &Path) -> Result<DynamicImage, HashError> {
    let bytes = fs::read(path).map_err(|e| HashError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let options = DecoderOptions::new_fast().jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(&bytes, options);

    let pixels = decoder.decode().map_err(|e| HashError::DecodeError {
        path: path.to_path_buf(),
        reason: format!("zune-jpeg: {:?}", e),
    })?;
    let info = decoder.info().ok_or_else(|| HashError::DecodeError {
        path: path.to_path_buf(),
        reason: "missing JPEG header info".to_string(),
    })?;
    let (width, height) = (info.width as u32, info.height as u32);

    let buffer_error = || HashError::DecodeError {
        path: path.to_path_buf(),
        reason: format!("pixel buffer does not match {}x{}", width, height),
    };

    match decoder.get_output_colorspace().unwrap_or(ColorSpace::RGB) {
        ColorSpace::RGB => ImageBuffer::from_raw(width, height, pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(buffer_error),
        ColorSpace::RGBA => ImageBuffer::from_raw(width, height, pixels)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(buffer_error),
        ColorSpace::Luma => ImageBuffer::from_raw(width, height, pixels)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(buffer_error),
        _ => decode_fallback(path),
    }
}

fn decode_fallback(path: &Path) -> Result<DynamicImage, HashError> {
    image::open(path).map_err(|e| HashError::DecodeError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn format_detection_ignores_case() {
        assert_eq!(ImageFormat::from_path(Path::new("a.JPG")), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_path(Path::new("a.jpeg")), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_path(Path::new("a.Tif")), ImageFormat::Tiff);
        assert_eq!(ImageFormat::from_path(Path::new("notes.txt")), ImageFormat::Other);
        assert!(!ImageFormat::Other.is_supported());
    }

    #[test]
    fn decodes_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("red.png");
        RgbImage::from_pixel(12, 8, Rgb([255, 0, 0])).save(&path).unwrap();

        let image = decode(&path).unwrap();
        assert_eq!((image.width(), image.height()), (12, 8));
    }

    #[test]
    fn decodes_jpeg() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gray.jpg");
        RgbImage::from_pixel(16, 16, Rgb([128, 128, 128])).save(&path).unwrap();

        let image = decode(&path).unwrap();
        assert_eq!((image.width(), image.height()), (16, 16));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let result = decode(Path::new("/tmp/readme.md"));
        assert!(matches!(result, Err(HashError::UnsupportedFormat { format }) if format == "md"));
    }

    #[test]
    fn corrupt_file_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        assert!(matches!(decode(&path), Err(HashError::DecodeError { .. })));
    }
}
