// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Crop handles and pointer hit-testing.

use pagestack_core::geometry::{CropRect, Point};

/// One of the eight drag points on a crop rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Top,
    Bottom,
    Left,
    Right,
}

impl HandleKind {
    /// All handles, corners first. This is also the hit-test priority order.
    pub const ALL: [HandleKind; 8] = [
        Self::TopLeft,
        Self::TopRight,
        Self::BottomLeft,
        Self::BottomRight,
        Self::Top,
        Self::Bottom,
        Self::Left,
        Self::Right,
    ];

    pub fn is_corner(&self) -> bool {
        matches!(
            self,
            Self::TopLeft | Self::TopRight | Self::BottomLeft | Self::BottomRight
        )
    }

    /// Whether dragging this handle displaces the left edge.
    pub fn moves_left(&self) -> bool {
        matches!(self, Self::TopLeft | Self::BottomLeft | Self::Left)
    }

    pub fn moves_right(&self) -> bool {
        matches!(self, Self::TopRight | Self::BottomRight | Self::Right)
    }

    pub fn moves_top(&self) -> bool {
        matches!(self, Self::TopLeft | Self::TopRight | Self::Top)
    }

    pub fn moves_bottom(&self) -> bool {
        matches!(self, Self::BottomLeft | Self::BottomRight | Self::Bottom)
    }
}

/// Find the handle under `point`, if any.
///
/// Corners win over edges: a corner matches when both axes are within
/// `touch_radius` of it. An edge matches when its own axis is within
/// `touch_radius` and the other axis lies strictly between the rectangle's
/// bounds on that edge. `None` means the gesture should be ignored.
pub fn hit_test(point: Point, rect: CropRect, touch_radius: f32) -> Option<HandleKind> {
    let near = |a: f32, b: f32| (a - b).abs() <= touch_radius;
    let between = |v: f32, lo: f32, hi: f32| v > lo && v < hi;

    let corners = [
        (HandleKind::TopLeft, rect.left, rect.top),
        (HandleKind::TopRight, rect.right, rect.top),
        (HandleKind::BottomLeft, rect.left, rect.bottom),
        (HandleKind::BottomRight, rect.right, rect.bottom),
    ];
    for (kind, x, y) in corners {
        if near(point.x, x) && near(point.y, y) {
            return Some(kind);
        }
    }

    if near(point.y, rect.top) && between(point.x, rect.left, rect.right) {
        return Some(HandleKind::Top);
    }
    if near(point.y, rect.bottom) && between(point.x, rect.left, rect.right) {
        return Some(HandleKind::Bottom);
    }
    if near(point.x, rect.left) && between(point.y, rect.top, rect.bottom) {
        return Some(HandleKind::Left);
    }
    if near(point.x, rect.right) && between(point.y, rect.top, rect.bottom) {
        return Some(HandleKind::Right);
    }

    None
}
