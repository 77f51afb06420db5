// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pagestack — Core page types, geometry, and error definitions shared across
// all crates.

pub mod config;
pub mod data_dir;
pub mod error;
pub mod geometry;
pub mod human_errors;
pub mod types;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use geometry::*;
pub use types::*;
