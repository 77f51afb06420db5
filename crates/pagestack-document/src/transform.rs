// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transform executor — pixel-level rotation and cropping persisted into the
// image cache.
//
// Every method here blocks on file I/O and image decoding. Callers run them
// on a background worker, never on the interaction thread. Failures come back
// as values; the caller keeps the pre-transform reference.

use std::collections::HashSet;
use std::path::Path;

use image::ImageFormat;
use pagestack_core::config::PipelineConfig;
use pagestack_core::error::{PipelineError, Result};
use pagestack_core::geometry::NormalizedRect;
use pagestack_core::types::{CapturedImage, ImageRef};
use tracing::{info, instrument};

use crate::cache::{INTERMEDIATE_PREFIX, ImageCache};
use crate::image::processor::ImageProcessor;

/// Runs crop/rotate transforms and owns the cache they write into.
#[derive(Debug, Clone)]
pub struct TransformExecutor {
    cache: ImageCache,
    jpeg_quality: u8,
}

impl TransformExecutor {
    pub fn new(cache: ImageCache, jpeg_quality: u8) -> Self {
        Self {
            cache,
            jpeg_quality,
        }
    }

    /// Build an executor whose cache lives where `config` says.
    pub fn from_config(config: &PipelineConfig, data_dir: &Path) -> Result<Self> {
        let cache = ImageCache::open(config.resolved_cache_dir(data_dir))?;
        Ok(Self::new(cache, config.jpeg_quality))
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    /// Copy externally referenced bytes into the app-private cache.
    pub fn copy_to_local_cache(&self, capture: &CapturedImage) -> Result<ImageRef> {
        self.cache.copy_in(capture)
    }

    /// Decode, rotate clockwise by `degrees`, and write a new cache file.
    ///
    /// A zero rotation returns the input reference untouched.
    #[instrument(skip(self), fields(image = %image_ref))]
    pub fn rotate_and_persist(&self, image_ref: &ImageRef, degrees: u16) -> Result<ImageRef> {
        if degrees % 360 == 0 {
            return Ok(image_ref.clone());
        }
        let source = local_path(image_ref)?;
        let rotated = ImageProcessor::open(&source)?.rotate_quarter_turns(degrees)?;
        let out = self.persist(&rotated, image_ref)?;
        info!(degrees, output = %out, "rotation persisted");
        Ok(out)
    }

    /// Decode, crop to `rect` (fractions of the true decoded size), and write
    /// a new cache file.
    #[instrument(skip(self), fields(image = %image_ref))]
    pub fn crop_and_persist(&self, image_ref: &ImageRef, rect: NormalizedRect) -> Result<ImageRef> {
        let source = local_path(image_ref)?;
        let cropped = ImageProcessor::open(&source)?.crop_normalized(rect);
        let out = self.persist(&cropped, image_ref)?;
        info!(output = %out, "crop persisted");
        Ok(out)
    }

    /// Delete superseded transform outputs that are not in `live`.
    pub fn cleanup_intermediates(&self, superseded: &[ImageRef], live: &HashSet<ImageRef>) -> usize {
        self.cache.remove_intermediates(superseded, live)
    }

    /// Write `processed` as a new intermediate, keeping the source's format
    /// when the encoder supports it and falling back to JPEG otherwise.
    fn persist(&self, processed: &ImageProcessor, source: &ImageRef) -> Result<ImageRef> {
        let extension = output_extension(source);
        let dest = self.cache.new_path(INTERMEDIATE_PREFIX, extension);
        if let Err(e) = processed.save(&dest, self.jpeg_quality) {
            std::fs::remove_file(&dest).ok();
            return Err(e);
        }
        Ok(ImageRef::from_path(dest))
    }
}

fn local_path(image_ref: &ImageRef) -> Result<std::path::PathBuf> {
    image_ref
        .to_path()
        .ok_or_else(|| PipelineError::UnsupportedImageRef(image_ref.to_string()))
}

fn output_extension(source: &ImageRef) -> &'static str {
    let format = source
        .extension()
        .and_then(|ext| ImageFormat::from_extension(ext));
    match format {
        Some(ImageFormat::Png) => "png",
        Some(ImageFormat::WebP) => "webp",
        Some(ImageFormat::Tiff) => "tiff",
        Some(ImageFormat::Bmp) => "bmp",
        _ => "jpg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{DynamicImage, Rgb, RgbImage};

    fn executor() -> (tempfile::TempDir, TransformExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::open(dir.path().join("cache")).unwrap();
        (dir, TransformExecutor::new(cache, 90))
    }

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> ImageRef {
        let path = dir.join(name);
        let img = RgbImage::from_pixel(width, height, Rgb([200, 10, 10]));
        DynamicImage::ImageRgb8(img).save(&path).unwrap();
        ImageRef::from_path(path)
    }

    #[test]
    fn crop_writes_new_intermediate() {
        let (dir, exec) = executor();
        let src = write_png(dir.path(), "page.png", 100, 80);

        let out = exec
            .crop_and_persist(&src, NormalizedRect::new(0.0, 0.0, 0.5, 0.5))
            .unwrap();

        assert_ne!(out, src);
        assert!(exec.cache().is_intermediate(&out));
        assert_eq!(out.extension().as_deref(), Some("png"));
        let reopened = ImageProcessor::open(out.to_path().unwrap()).unwrap();
        assert_eq!((reopened.width(), reopened.height()), (50, 40));
        assert!(src.to_path().unwrap().exists());
    }

    #[test]
    fn rotate_swaps_dimensions() {
        let (dir, exec) = executor();
        let src = write_png(dir.path(), "page.png", 30, 10);
        let out = exec.rotate_and_persist(&src, 270).unwrap();
        let reopened = ImageProcessor::open(out.to_path().unwrap()).unwrap();
        assert_eq!((reopened.width(), reopened.height()), (10, 30));
    }

    #[test]
    fn zero_rotation_is_identity() {
        let (dir, exec) = executor();
        let src = write_png(dir.path(), "page.png", 5, 5);
        assert_eq!(exec.rotate_and_persist(&src, 0).unwrap(), src);
    }

    #[test]
    fn undecodable_input_leaves_no_output() {
        let (dir, exec) = executor();
        let bogus = dir.path().join("broken.jpg");
        std::fs::write(&bogus, b"definitely not jpeg").unwrap();

        let err = exec
            .crop_and_persist(&ImageRef::from_path(&bogus), NormalizedRect::FULL)
            .unwrap_err();

        assert!(matches!(err, PipelineError::DecodeFailure(_)));
        assert_eq!(std::fs::read_dir(exec.cache().dir()).unwrap().count(), 0);
    }

    #[test]
    fn unknown_extension_falls_back_to_jpeg() {
        assert_eq!(output_extension(&ImageRef::new("/x/capture-1.bin")), "jpg");
        assert_eq!(output_extension(&ImageRef::new("/x/a.JPEG")), "jpg");
        assert_eq!(output_extension(&ImageRef::new("/x/a.png")), "png");
    }

    #[test]
    fn cleanup_removes_superseded_crop() {
        let (dir, exec) = executor();
        let src = write_png(dir.path(), "page.png", 20, 20);
        let first = exec.crop_and_persist(&src, NormalizedRect::new(0.0, 0.0, 0.8, 0.8)).unwrap();
        let second = exec.crop_and_persist(&first, NormalizedRect::new(0.0, 0.0, 0.5, 0.5)).unwrap();

        let live = HashSet::from([second.clone()]);
        assert_eq!(exec.cleanup_intermediates(&[first.clone()], &live), 1);
        assert!(!first.to_path().unwrap().exists());
        assert!(second.to_path().unwrap().exists());
    }
}
