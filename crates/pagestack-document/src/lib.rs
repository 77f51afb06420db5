// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// pagestack-document — Image-side operations for the Pagestack capture
// pipeline.
//
// Provides the interactive crop geometry (hit-testing, constrained resize,
// normalization), in-memory image processing (quarter-turn rotation and
// normalized crop), the app-private image cache, and the transform executor
// that ties the latter two together.

pub mod cache;
pub mod crop;
pub mod image;
pub mod transform;

// Re-export the primary items so callers can use `pagestack_document::ImageCache` etc.
pub use cache::ImageCache;
pub use crop::{HandleKind, hit_test, normalize, resize};
pub use self::image::processor::ImageProcessor;
pub use transform::TransformExecutor;
