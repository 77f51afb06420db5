// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// App-private image cache.
//
// Picker grants are not guaranteed to outlive the process or even the next
// navigation, so captured images are copied in here as soon as they arrive.
// Two kinds of file live side by side:
//
//   capture-<uuid>.<ext>  copies of source captures; never deleted by cleanup
//   xform-<uuid>.<ext>    crop/rotate outputs; deleted once unreferenced

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use pagestack_core::error::{PipelineError, Result};
use pagestack_core::types::{CapturedImage, ImageRef};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Filename prefix for copied source captures.
pub const CAPTURE_PREFIX: &str = "capture-";
/// Filename prefix for transform outputs.
pub const INTERMEDIATE_PREFIX: &str = "xform-";
/// Extension used when neither content type nor filename says anything.
pub const FALLBACK_EXTENSION: &str = "bin";

/// A directory of cached page images.
#[derive(Debug, Clone)]
pub struct ImageCache {
    dir: PathBuf,
}

impl ImageCache {
    /// Open (or create) the cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether `image_ref` points at a file directly inside this cache.
    pub fn contains(&self, image_ref: &ImageRef) -> bool {
        image_ref
            .to_path()
            .and_then(|p| p.parent().map(|parent| parent == self.dir))
            .unwrap_or(false)
    }

    /// Whether `image_ref` is a transform output owned by this cache.
    pub fn is_intermediate(&self, image_ref: &ImageRef) -> bool {
        self.contains(image_ref)
            && image_ref
                .file_name()
                .is_some_and(|name| name.starts_with(INTERMEDIATE_PREFIX))
    }

    /// A fresh, unused path for a new cache file.
    pub fn new_path(&self, prefix: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{prefix}{}.{extension}", Uuid::new_v4()))
    }

    /// Copy a captured image into the cache under a fresh name.
    ///
    /// The extension comes from the declared content type, then the source
    /// filename, then `bin`. A partially written copy is removed on failure.
    #[instrument(skip_all, fields(source = %capture.image_ref))]
    pub fn copy_in(&self, capture: &CapturedImage) -> Result<ImageRef> {
        let source = capture
            .image_ref
            .to_path()
            .ok_or_else(|| PipelineError::UnsupportedImageRef(capture.image_ref.to_string()))?;

        let extension = extension_for(capture.content_type.as_deref(), &capture.image_ref);
        let dest = self.new_path(CAPTURE_PREFIX, &extension);

        if let Err(e) = std::fs::copy(&source, &dest) {
            std::fs::remove_file(&dest).ok();
            return Err(e.into());
        }

        info!(dest = %dest.display(), "capture copied into cache");
        Ok(ImageRef::from_path(dest))
    }

    /// Delete superseded intermediates that nothing still references.
    ///
    /// Anything in `live` is kept, as is anything that is not an
    /// intermediate of this cache (source captures, files elsewhere).
    /// Returns how many files were deleted.
    pub fn remove_intermediates(&self, superseded: &[ImageRef], live: &HashSet<ImageRef>) -> usize {
        let mut removed = 0;
        for image_ref in superseded {
            if live.contains(image_ref) || !self.is_intermediate(image_ref) {
                continue;
            }
            let Some(path) = image_ref.to_path() else {
                continue;
            };
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "intermediate removed");
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove intermediate"),
            }
        }
        removed
    }
}

/// Pick a file extension for a capture.
pub fn extension_for(content_type: Option<&str>, image_ref: &ImageRef) -> String {
    content_type
        .and_then(extension_for_mime)
        .map(str::to_owned)
        .or_else(|| image_ref.extension())
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_owned())
}

/// Extension for a MIME type, ignoring parameters such as `; charset=`.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or_default().trim();
    match essence.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tiff"),
        "image/heic" => Some("heic"),
        "image/heif" => Some("heif"),
        "application/pdf" => Some("pdf"),
        _ => None,
    }
}
