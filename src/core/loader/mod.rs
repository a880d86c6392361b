//! # Loader Module
//!
//! Turns paths into decoded images ready for fingerprinting.
//!
//! - Files and directories are accepted; directories are walked with
//!   `walkdir` and filtered by extension
//! - JPEGs decode through zune-jpeg, everything else through `image`
//! - Images larger than `max_dimension` are downscaled first, so huge photos
//!   do not dominate hashing time. The content hash then describes the
//!   downscaled pixels; use the same loader settings for storing and
//!   looking up.

mod decode;
mod resize;

pub use decode::{decode, ImageFormat};
pub use resize::{downscale, fit_within};

use crate::core::metadata::ImageMetadata;
use crate::error::HashError;
use image::DynamicImage;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Longest side after loading; `None` keeps full resolution
    pub max_dimension: Option<u32>,
    pub follow_symlinks: bool,
    pub include_hidden: bool,
    /// Maximum directory depth (None = unlimited)
    pub max_depth: Option<usize>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_dimension: Some(2048),
            follow_symlinks: false,
            include_hidden: false,
            max_depth: None,
        }
    }
}

/// A decoded image and where it came from
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub path: PathBuf,
    pub image: DynamicImage,
    pub format: ImageFormat,
    pub file_size: u64,
    /// Dimensions before any downscaling
    pub original_width: u32,
    pub original_height: u32,
}

impl LoadedImage {
    /// Pixel-derived metadata, reporting the original dimensions
    pub fn metadata(&self) -> ImageMetadata {
        ImageMetadata {
            width: self.original_width,
            height: self.original_height,
            ..ImageMetadata::analyze(&self.image, self.file_size, self.format.as_str())
        }
    }
}

/// Finds and decodes images
#[derive(Debug, Clone, Default)]
pub struct ImageLoader {
    config: LoaderConfig,
}

impl ImageLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Decode one file
    pub fn load(&self, path: &Path) -> Result<LoadedImage, HashError> {
        let file_size = std::fs::metadata(path)
            .map_err(|e| HashError::IoError {
                path: path.to_path_buf(),
                source: e,
            })?
            .len();

        let image = decode(path)?;
        let (original_width, original_height) = (image.width(), image.height());
        let image = match self.config.max_dimension {
            Some(max_side) => downscale(image, max_side, path)?,
            None => image,
        };

        debug!(
            path = %path.display(),
            width = original_width,
            height = original_height,
            "loaded image"
        );
        Ok(LoadedImage {
            path: path.to_path_buf(),
            image,
            format: ImageFormat::from_path(path),
            file_size,
            original_width,
            original_height,
        })
    }

    /// Image files under `paths`, sorted and deduplicated.
    ///
    /// Plain files are taken as given if their extension is supported;
    /// unreadable directory entries are logged and skipped.
    pub fn collect_images(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut found = BTreeSet::new();

        for root in paths {
            if root.is_file() {
                if ImageFormat::from_path(root).is_supported() {
                    found.insert(root.clone());
                } else {
                    warn!(path = %root.display(), "Skipping file with unsupported extension");
                }
                continue;
            }

            let mut walker = WalkDir::new(root).follow_links(self.config.follow_symlinks);
            if let Some(depth) = self.config.max_depth {
                walker = walker.max_depth(depth);
            }

            let include_hidden = self.config.include_hidden;
            let entries = walker
                .into_iter()
                .filter_entry(|entry| include_hidden || entry.depth() == 0 || !is_hidden(entry.path()));

            for entry in entries {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        if ImageFormat::from_path(entry.path()).is_supported() {
                            found.insert(entry.into_path());
                        }
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "Skipping unreadable directory entry"),
                }
            }
        }

        found.into_iter().collect()
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with('.'))
}
