// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Constrained handle resize and coordinate normalization.

use pagestack_core::geometry::{CropRect, NormalizedRect, Point, Size};

use super::handles::HandleKind;

/// Displace the edges driven by `handle` by `delta`.
///
/// Every moving edge is clamped independently: first into `bounds`, then so
/// that it stays at least `min_size` away from the opposite edge. The
/// min-size clamp is applied last, so `left <= right - min_size` and
/// `top <= bottom - min_size` hold for any delta. Edges the handle does not
/// drive are returned unchanged.
pub fn resize(
    rect: CropRect,
    handle: HandleKind,
    delta: Point,
    bounds: CropRect,
    min_size: f32,
) -> CropRect {
    let mut out = rect;

    if handle.moves_left() {
        out.left = (rect.left + delta.x)
            .max(bounds.left)
            .min(rect.right - min_size);
    }
    if handle.moves_right() {
        out.right = (rect.right + delta.x)
            .min(bounds.right)
            .max(rect.left + min_size);
    }
    if handle.moves_top() {
        out.top = (rect.top + delta.y)
            .max(bounds.top)
            .min(rect.bottom - min_size);
    }
    if handle.moves_bottom() {
        out.bottom = (rect.bottom + delta.y)
            .min(bounds.bottom)
            .max(rect.top + min_size);
    }

    out
}

/// Express `rect` as fractions of a container of `container` size whose
/// origin is the viewport origin.
pub fn normalize(rect: CropRect, container: Size) -> NormalizedRect {
    normalize_within(rect, CropRect::covering(container))
}

/// Express `rect` as fractions of `bounds`, for images drawn with an offset
/// (letterboxed) inside the viewport.
///
/// A degenerate container yields the full rectangle.
pub fn normalize_within(rect: CropRect, bounds: CropRect) -> NormalizedRect {
    let width = bounds.width();
    let height = bounds.height();
    if width <= 0.0 || height <= 0.0 {
        return NormalizedRect::FULL;
    }

    NormalizedRect::new(
        (rect.left - bounds.left) / width,
        (rect.top - bounds.top) / height,
        (rect.right - bounds.left) / width,
        (rect.bottom - bounds.top) / height,
    )
    .clamped()
}
