// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Crop interaction geometry — pure, synchronous, stateless.
//
// Runs once per pointer-move event on the interaction thread, so nothing in
// here allocates, logs, or touches I/O. The caller owns the current
// `CropRect` and feeds it back in on every event.

pub mod handles;
pub mod resize;

pub use handles::{HandleKind, hit_test};
pub use resize::{normalize, normalize_within, resize};
