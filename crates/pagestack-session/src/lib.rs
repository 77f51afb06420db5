// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// pagestack-session — The in-progress capture session.
//
// Owns the ordered page collection and its invariants, persists it through a
// crash-resilient key-value store after every mutation, schedules image I/O
// on a background worker, and sequences metadata entry before the pages are
// handed to the upload stage.

pub mod batch;
pub mod codec;
pub mod manager;
pub mod store;
pub mod worker;

pub use batch::{BatchMetadataCoordinator, BatchOutcome, BatchState};
pub use codec::EncodedPages;
pub use manager::{CropCompletion, IngestReport, PageCollectionManager, PendingRemoval};
pub use store::{MemoryStateStore, SqliteStateStore, StateStore};
pub use worker::Worker;
