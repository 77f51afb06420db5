// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Batch metadata coordinator — sequences metadata entry between editing and
// upload, then bakes deferred rotations into the pages.
//
// State machine:
//
//   ModeSelection ──SingleDocument──▶ SharedMetadataEntry ──submit──▶ Finished
//         │
//         └──IndividualDocuments──▶ StepByStep{cursor} ──finish (last)──▶ Finished

use pagestack_core::error::{PipelineError, Result};
use pagestack_core::types::{FinalizedPage, MetadataMode, Page, PageId, PageMetadata, UploadBatch};
use pagestack_document::TransformExecutor;
use pagestack_document::cache::{CAPTURE_PREFIX, INTERMEDIATE_PREFIX};
use tracing::{debug, info, instrument, warn};

use crate::worker::Worker;

/// Where the coordinator is in the metadata flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    ModeSelection,
    SharedMetadataEntry,
    /// Editing the page at zero-based `cursor`.
    StepByStep { cursor: usize },
    Finished,
}

/// The page currently being edited in step-by-step mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepView {
    pub index: usize,
    pub total: usize,
    pub page: Page,
    pub form: PageMetadata,
}

/// What the metadata flow hands to finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub mode: MetadataMode,
    /// Set in `SingleDocument` mode only.
    pub shared_metadata: Option<PageMetadata>,
    pub pages: Vec<Page>,
}

/// Drives metadata entry over a snapshot of the collection.
///
/// Forms saved while stepping queue up in `take_saved` so the collection can
/// persist them before the flow finishes.
#[derive(Debug)]
pub struct BatchMetadataCoordinator {
    pages: Vec<Page>,
    state: BatchState,
    shared: PageMetadata,
    form: PageMetadata,
    saved: Vec<(PageId, PageMetadata)>,
}

impl BatchMetadataCoordinator {
    pub fn new(pages: Vec<Page>) -> Self {
        Self {
            pages,
            state: BatchState::ModeSelection,
            shared: PageMetadata::default(),
            form: PageMetadata::default(),
            saved: Vec::new(),
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Choose between one shared record and one record per page.
    pub fn select_mode(&mut self, mode: MetadataMode) -> Result<()> {
        if self.state != BatchState::ModeSelection {
            return Err(invalid("mode already selected"));
        }
        if self.pages.is_empty() {
            return Err(invalid("no pages to describe"));
        }
        self.state = match mode {
            MetadataMode::SingleDocument => BatchState::SharedMetadataEntry,
            MetadataMode::IndividualDocuments => {
                self.form = seed_form(&self.pages[0]);
                BatchState::StepByStep { cursor: 0 }
            }
        };
        debug!(?mode, "metadata mode selected");
        Ok(())
    }

    // -- Shared ---------------------------------------------------------------

    pub fn shared_form(&self) -> &PageMetadata {
        &self.shared
    }

    pub fn set_shared_form(&mut self, metadata: PageMetadata) {
        self.shared = metadata;
    }

    /// Apply the shared record to the whole collection. Terminal.
    pub fn submit_shared(&mut self) -> Result<BatchOutcome> {
        if self.state != BatchState::SharedMetadataEntry {
            return Err(invalid("not entering shared metadata"));
        }
        self.state = BatchState::Finished;
        info!(pages = self.pages.len(), "shared metadata submitted");
        Ok(BatchOutcome {
            mode: MetadataMode::SingleDocument,
            shared_metadata: Some(std::mem::take(&mut self.shared)),
            pages: std::mem::take(&mut self.pages),
        })
    }

    // -- Step by step ---------------------------------------------------------

    pub fn current_step(&self) -> Option<StepView> {
        let BatchState::StepByStep { cursor } = self.state else {
            return None;
        };
        Some(StepView {
            index: cursor,
            total: self.pages.len(),
            page: self.pages[cursor].clone(),
            form: self.form.clone(),
        })
    }

    /// The form for the current page, while stepping.
    pub fn form(&self) -> Option<&PageMetadata> {
        matches!(self.state, BatchState::StepByStep { .. }).then_some(&self.form)
    }

    pub fn update_form(&mut self, metadata: PageMetadata) -> Result<()> {
        self.cursor()?;
        self.form = metadata;
        Ok(())
    }

    /// Save the current form and advance. `Ok(false)` at the last page.
    pub fn next(&mut self) -> Result<bool> {
        let cursor = self.cursor()?;
        self.save_form(cursor);
        if cursor + 1 >= self.pages.len() {
            return Ok(false);
        }
        self.move_to(cursor + 1);
        Ok(true)
    }

    /// Save the current form and step back. `Ok(false)` at the first page.
    pub fn previous(&mut self) -> Result<bool> {
        let cursor = self.cursor()?;
        self.save_form(cursor);
        if cursor == 0 {
            return Ok(false);
        }
        self.move_to(cursor - 1);
        Ok(true)
    }

    /// Save the current form and finish. Only valid on the last page.
    pub fn finish(&mut self) -> Result<BatchOutcome> {
        let cursor = self.cursor()?;
        if cursor + 1 != self.pages.len() {
            return Err(invalid("finish is only possible on the last page"));
        }
        self.save_form(cursor);
        self.state = BatchState::Finished;
        info!(pages = self.pages.len(), "per-page metadata complete");
        Ok(BatchOutcome {
            mode: MetadataMode::IndividualDocuments,
            shared_metadata: None,
            pages: std::mem::take(&mut self.pages),
        })
    }

    /// Forms saved since the last call, oldest first.
    pub fn take_saved(&mut self) -> Vec<(PageId, PageMetadata)> {
        std::mem::take(&mut self.saved)
    }

    fn cursor(&self) -> Result<usize> {
        match self.state {
            BatchState::StepByStep { cursor } => Ok(cursor),
            _ => Err(invalid("not stepping through pages")),
        }
    }

    fn save_form(&mut self, cursor: usize) {
        let page = &mut self.pages[cursor];
        page.metadata = Some(self.form.clone());
        self.saved.push((page.id, self.form.clone()));
    }

    fn move_to(&mut self, cursor: usize) {
        self.form = seed_form(&self.pages[cursor]);
        self.state = BatchState::StepByStep { cursor };
        debug!(cursor, "step changed");
    }
}

fn invalid(reason: &str) -> PipelineError {
    PipelineError::InvalidBatchState(reason.to_owned())
}

/// The page's own metadata, with a title derived from its file name when it
/// has none.
fn seed_form(page: &Page) -> PageMetadata {
    let mut form = page.metadata.clone().unwrap_or_default();
    if form.title.is_none() {
        form.title = Some(default_title(page));
    }
    form
}

/// A human title for a page: its file stem with `_` and `-` as spaces.
///
/// Generated cache names carry no meaning, so those pages get `Page <n>`.
pub fn default_title(page: &Page) -> String {
    let stem = page
        .image_ref
        .file_stem()
        .filter(|s| !s.starts_with(CAPTURE_PREFIX) && !s.starts_with(INTERMEDIATE_PREFIX))
        .unwrap_or_default();
    let title = stem
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        format!("Page {}", page.position)
    } else {
        title
    }
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

/// Bake each page's deferred rotation into a new image on the worker.
///
/// A rotation that fails keeps the page's current image and reports
/// `rotation_applied = false`.
#[instrument(skip_all, fields(pages = pages.len()))]
pub async fn finalize_pages(
    executor: &TransformExecutor,
    worker: &Worker,
    pages: Vec<Page>,
) -> Vec<FinalizedPage> {
    let mut finalized = Vec::with_capacity(pages.len());
    for page in pages {
        if page.rotation_degrees == 0 {
            finalized.push(FinalizedPage {
                image_ref: page.image_ref,
                rotation_applied: true,
                metadata: page.metadata,
            });
            continue;
        }

        let exec = executor.clone();
        let source = page.image_ref.clone();
        let degrees = page.rotation_degrees;
        let rotated = worker
            .run(move || exec.rotate_and_persist(&source, degrees))
            .await;
        let (image_ref, rotation_applied) = match rotated {
            Ok(image_ref) => (image_ref, true),
            Err(e) => {
                warn!(page = %page.id, degrees, error = %e, "rotation failed, original image kept");
                (page.image_ref, false)
            }
        };
        finalized.push(FinalizedPage {
            image_ref,
            rotation_applied,
            metadata: page.metadata,
        });
    }
    finalized
}

/// Finalize an outcome into the batch handed to the upload stage.
///
/// Single-document batches carry their metadata once, at the batch level.
pub async fn finalize_outcome(
    executor: &TransformExecutor,
    worker: &Worker,
    outcome: BatchOutcome,
) -> UploadBatch {
    let mut pages = finalize_pages(executor, worker, outcome.pages).await;
    if outcome.mode == MetadataMode::SingleDocument {
        for page in &mut pages {
            page.metadata = None;
        }
    }
    UploadBatch {
        mode: outcome.mode,
        shared_metadata: outcome.shared_metadata,
        pages,
    }
}
