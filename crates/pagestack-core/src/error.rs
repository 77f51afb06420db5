// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Pagestack.
//
// Nothing in the capture pipeline is fatal. Every variant here is either
// reported to the caller without mutating anything (capacity), or absorbed
// by keeping the previous valid state (decode, I/O, corrupt restore).

use thiserror::Error;

/// Top-level error type for all Pagestack operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    // -- Collection errors --
    #[error("page limit exceeded: {current} pages + {requested} new > {max}")]
    CapacityExceeded {
        requested: usize,
        current: usize,
        max: usize,
    },

    // -- Image errors --
    #[error("image decode failed: {0}")]
    DecodeFailure(String),

    #[error("unsupported image reference: {0}")]
    UnsupportedImageRef(String),

    // -- Storage / persistence --
    #[error("persisted page state is corrupt: {0}")]
    CorruptPersistedState(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Scheduling / batch flow --
    #[error("background worker failed: {0}")]
    Worker(String),

    #[error("invalid batch state: {0}")]
    InvalidBatchState(String),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PipelineError>;
