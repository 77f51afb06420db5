// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor — decode, quarter-turn rotation, normalized crop, and
// save. Operates on in-memory images using the `image` crate.

use std::io::Write;
use std::path::Path;

use image::{DynamicImage, ImageError, ImageFormat};
use pagestack_core::error::PipelineError;
use pagestack_core::geometry::NormalizedRect;
use tracing::{debug, info, instrument};

/// Image processing pipeline operating on a single in-memory image.
///
/// Each transform consumes `self` and returns a new `ImageProcessor`, so
/// calls chain:
///
/// ```ignore
/// ImageProcessor::open("page.jpg")?
///     .crop_normalized(NormalizedRect::new(0.1, 0.1, 0.9, 0.9))
///     .rotate_quarter_turns(90)?
///     .save("out.jpg", 90)?;
/// ```
pub struct ImageProcessor {
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Load an image from a file path.
    ///
    /// A missing or unreadable file is an I/O failure; bytes that cannot be
    /// decoded are a decode failure.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let img = image::open(path.as_ref()).map_err(|err| image_err(path.as_ref(), err))?;
        debug!(width = img.width(), height = img.height(), "Image loaded");
        Ok(Self { image: img })
    }

    /// Wrap an already-decoded `DynamicImage`.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    // -- Transformations ------------------------------------------------------

    /// Rotate clockwise by a multiple of 90 degrees. Lossless.
    #[instrument(skip(self))]
    pub fn rotate_quarter_turns(self, degrees: u16) -> Result<Self, PipelineError> {
        let image = match degrees % 360 {
            0 => self.image,
            90 => self.image.rotate90(),
            180 => self.image.rotate180(),
            270 => self.image.rotate270(),
            other => {
                return Err(PipelineError::DecodeFailure(format!(
                    "rotation of {other} degrees is not a quarter turn"
                )));
            }
        };
        debug!(width = image.width(), height = image.height(), "Rotation applied");
        Ok(Self { image })
    }

    /// Crop to a rectangle given as fractions of the decoded dimensions.
    ///
    /// Pixel bounds are computed against the true image size and clamped to
    /// `[0, width] x [0, height]`, so floating-point drift from the viewport
    /// never reads outside the image. The result is at least 1x1.
    #[instrument(skip(self))]
    pub fn crop_normalized(self, rect: NormalizedRect) -> Self {
        let (x, y, w, h) = pixel_bounds(rect, self.image.width(), self.image.height());
        info!(x, y, w, h, "Cropping image");
        Self {
            image: self.image.crop_imm(x, y, w, h),
        }
    }

    // -- Output ---------------------------------------------------------------

    /// Write the image to `path`. The format is inferred from the file
    /// extension; JPEG output uses `jpeg_quality` (1-100).
    pub fn save(&self, path: impl AsRef<Path>, jpeg_quality: u8) -> Result<(), PipelineError> {
        let path = path.as_ref();
        let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Jpeg);

        if format == ImageFormat::Jpeg {
            let file = std::fs::File::create(path)?;
            let mut writer = std::io::BufWriter::new(file);
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                &mut writer,
                jpeg_quality.clamp(1, 100),
            );
            // JPEG has no alpha channel.
            self.image
                .to_rgb8()
                .write_with_encoder(encoder)
                .map_err(|err| image_err(path, err))?;
            writer.flush()?;
            return Ok(());
        }

        self.image
            .save_with_format(path, format)
            .map_err(|err| image_err(path, err))
    }
}

/// Map a normalized rectangle onto pixel bounds `(x, y, width, height)`.
pub fn pixel_bounds(rect: NormalizedRect, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let r = rect.clamped();
    let (w, h) = (f64::from(width), f64::from(height));

    let to_px = |fraction: f32, extent: f64| (f64::from(fraction) * extent).round() as u32;
    let left = to_px(r.left, w).min(width.saturating_sub(1));
    let top = to_px(r.top, h).min(height.saturating_sub(1));
    let right = to_px(r.right, w).min(width);
    let bottom = to_px(r.bottom, h).min(height);

    let out_w = right.saturating_sub(left).max(1);
    let out_h = bottom.saturating_sub(top).max(1);
    (left, top, out_w, out_h)
}

/// I/O errors stay I/O errors; everything else means the bytes were unusable.
fn image_err(path: &Path, err: ImageError) -> PipelineError {
    match err {
        ImageError::IoError(io) => PipelineError::Io(io),
        other => PipelineError::DecodeFailure(format!("{}: {other}", path.display())),
    }
}
