// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page collection manager — the single writer of the in-progress session.
//
// Structural operations (add, remove, undo, move, rotate, clear) run
// synchronously and persist before returning. Crops are dispatched to the
// background worker; their results come back as `CropCompletion` messages on
// a channel and are applied here by page id, never by position. A completion
// for a page that has since left the collection, or one overtaken by a newer
// crop of the same page, is discarded and its output file deleted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pagestack_core::config::PipelineConfig;
use pagestack_core::error::{PipelineError, Result};
use pagestack_core::geometry::{CropRect, NormalizedRect, Size};
use pagestack_core::types::{
    CapturedImage, ImageRef, Page, PageId, PageMetadata, SourceKind, UploadBatch,
};
use pagestack_document::TransformExecutor;
use pagestack_document::crop::normalize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::batch::{self, BatchMetadataCoordinator, BatchOutcome};
use crate::codec;
use crate::store::{self, StateStore};
use crate::worker::Worker;

/// The most recently removed page, kept for a single undo. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRemoval {
    pub page: Page,
    /// Zero-based index the page occupied before removal.
    pub index: usize,
}

/// Result of one background crop.
#[derive(Debug)]
pub struct CropCompletion {
    pub page_id: PageId,
    /// The image the crop read from.
    pub source: ImageRef,
    /// Dispatch order; a later crop of the same page has a larger value.
    pub generation: u64,
    pub outcome: Result<ImageRef>,
}

#[derive(Debug)]
struct InFlightCrop {
    page_id: PageId,
    source: ImageRef,
    generation: u64,
}

/// What `ingest` did with each capture.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub added: Vec<Page>,
    pub failed: Vec<(ImageRef, PipelineError)>,
}

/// Owns the ordered page collection and its invariants.
pub struct PageCollectionManager {
    pages: Vec<Page>,
    pending_removal: Option<PendingRemoval>,
    max_pages: usize,
    min_crop_size: f32,
    store: Box<dyn StateStore>,
    executor: Arc<TransformExecutor>,
    worker: Worker,
    completions_tx: mpsc::UnboundedSender<CropCompletion>,
    completions_rx: mpsc::UnboundedReceiver<CropCompletion>,
    /// Every dispatched crop not yet committed.
    in_flight: Vec<InFlightCrop>,
    next_generation: u64,
    /// Generation of the crop each page's current image came from.
    committed: HashMap<PageId, u64>,
    snapshots: watch::Sender<Arc<[Page]>>,
}

impl PageCollectionManager {
    /// An empty collection. Nothing is read from `store`.
    pub fn new(
        config: &PipelineConfig,
        executor: TransformExecutor,
        store: Box<dyn StateStore>,
        worker: Worker,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (snapshots, _) = watch::channel(Arc::<[Page]>::from(Vec::new()));
        Self {
            pages: Vec::new(),
            pending_removal: None,
            max_pages: config.max_pages,
            min_crop_size: config.min_crop_size,
            store,
            executor: Arc::new(executor),
            worker,
            completions_tx,
            completions_rx,
            in_flight: Vec::new(),
            next_generation: 0,
            committed: HashMap::new(),
            snapshots,
        }
    }

    /// Rebuild the collection from `store`.
    ///
    /// Unreadable or inconsistent state is discarded: the session starts
    /// empty and the empty state is written back.
    #[instrument(skip_all)]
    pub fn restore(
        config: &PipelineConfig,
        executor: TransformExecutor,
        store: Box<dyn StateStore>,
        worker: Worker,
    ) -> Self {
        let mut manager = Self::new(config, executor, store, worker);
        let decoded = store::read_pages(manager.store.as_ref())
            .and_then(|encoded| codec::decode(&encoded));
        match decoded {
            Ok(pages) => {
                info!(pages = pages.len(), "session restored");
                manager.pages = pages;
                manager.renumber();
                manager.publish();
            }
            Err(e) => {
                warn!(error = %e, "persisted session unusable, starting empty");
                manager.persist();
            }
        }
        manager
    }

    // -- Reads ----------------------------------------------------------------

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    pub fn get(&self, page_id: PageId) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == page_id)
    }

    /// The page at a 1-based position.
    pub fn at_position(&self, position: usize) -> Option<&Page> {
        position.checked_sub(1).and_then(|i| self.pages.get(i))
    }

    pub fn pending_removal(&self) -> Option<&PendingRemoval> {
        self.pending_removal.as_ref()
    }

    /// Number of dispatched crops whose completion has not been committed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn executor(&self) -> &TransformExecutor {
        &self.executor
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// The latest immutable snapshot.
    pub fn snapshot(&self) -> Arc<[Page]> {
        self.snapshots.borrow().clone()
    }

    /// Receive a new snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Arc<[Page]>> {
        self.snapshots.subscribe()
    }

    // -- Structural operations ------------------------------------------------

    /// Append one page per image reference.
    ///
    /// Rejected without any change when the collection would exceed its
    /// capacity.
    #[instrument(skip_all, fields(count = image_refs.len(), kind = kind.as_str()))]
    pub fn add(&mut self, image_refs: Vec<ImageRef>, kind: SourceKind) -> Result<Vec<Page>> {
        self.check_capacity(image_refs.len())?;
        if image_refs.is_empty() {
            return Ok(Vec::new());
        }

        let start = self.pages.len();
        self.pages
            .extend(image_refs.into_iter().map(|image_ref| Page::new(image_ref, kind)));
        self.renumber();

        let added = self.pages[start..].to_vec();
        info!(added = added.len(), total = self.pages.len(), "pages added");
        self.changed();
        Ok(added)
    }

    /// Copy captures into the local cache on the worker, then add the ones
    /// that copied as a single batch.
    ///
    /// Captures already inside the cache are used as-is. A capture that
    /// cannot be copied is skipped and reported in `failed`.
    #[instrument(skip_all, fields(count = captures.len(), kind = kind.as_str()))]
    pub async fn ingest(
        &mut self,
        captures: Vec<CapturedImage>,
        kind: SourceKind,
    ) -> Result<IngestReport> {
        self.check_capacity(captures.len())?;

        let mut local = Vec::with_capacity(captures.len());
        let mut failed = Vec::new();
        for capture in captures {
            if self.executor.cache().contains(&capture.image_ref) {
                local.push(capture.image_ref);
                continue;
            }
            let source = capture.image_ref.clone();
            let executor = Arc::clone(&self.executor);
            match self
                .worker
                .run(move || executor.copy_to_local_cache(&capture))
                .await
            {
                Ok(image_ref) => local.push(image_ref),
                Err(e) => {
                    warn!(source = %source, error = %e, "capture could not be copied, skipped");
                    failed.push((source, e));
                }
            }
        }

        let added = self.add(local, kind)?;
        Ok(IngestReport { added, failed })
    }

    /// Remove a page, keeping it for a single undo. Unknown ids are ignored.
    ///
    /// Any earlier pending removal becomes permanent.
    #[instrument(skip(self))]
    pub fn remove(&mut self, page_id: PageId) -> bool {
        let Some(index) = self.index_of(page_id) else {
            debug!("remove of unknown page ignored");
            return false;
        };

        let page = self.pages.remove(index);
        let superseded = self.pending_removal.replace(PendingRemoval { page, index });
        self.renumber();
        info!(index, remaining = self.pages.len(), "page removed");
        self.changed();

        if let Some(old) = superseded {
            self.release(vec![old.page.image_ref]);
        }
        true
    }

    /// Put the pending removal back where it was.
    ///
    /// Returns `Ok(false)` when nothing is pending. If pages were added since
    /// the removal and the collection is full, the undo is rejected and stays
    /// pending.
    pub fn undo_remove(&mut self) -> Result<bool> {
        if self.pending_removal.is_none() {
            return Ok(false);
        }
        self.check_capacity(1)?;
        let Some(PendingRemoval { page, index }) = self.pending_removal.take() else {
            return Ok(false);
        };

        let index = index.min(self.pages.len());
        let page_id = page.id;
        self.pages.insert(index, page);
        self.renumber();
        info!(page = %page_id, index, "removal undone");
        self.changed();
        Ok(true)
    }

    /// Make the pending removal permanent.
    pub fn dismiss_undo(&mut self) -> bool {
        let Some(pending) = self.pending_removal.take() else {
            return false;
        };
        debug!(page = %pending.page.id, "undo dismissed");
        self.release(vec![pending.page.image_ref]);
        true
    }

    /// Move the page at zero-based `from` so it ends up at `to`.
    ///
    /// Out-of-range indices are ignored.
    pub fn move_page(&mut self, from: usize, to: usize) -> bool {
        let len = self.pages.len();
        if from >= len || to >= len {
            debug!(from, to, len, "move out of range ignored");
            return false;
        }
        if from == to {
            return false;
        }

        let page = self.pages.remove(from);
        self.pages.insert(to, page);
        self.renumber();
        info!(from, to, "page moved");
        self.changed();
        true
    }

    /// Record a further quarter turn clockwise. The pixels are untouched
    /// until finalization.
    pub fn rotate(&mut self, page_id: PageId) -> bool {
        let Some(page) = self.pages.iter_mut().find(|p| p.id == page_id) else {
            return false;
        };
        page.rotate_clockwise();
        info!(page = %page_id, degrees = page.rotation_degrees, "page rotated");
        self.changed();
        true
    }

    /// Replace a page's per-page metadata.
    pub fn set_metadata(&mut self, page_id: PageId, metadata: Option<PageMetadata>) -> bool {
        let Some(page) = self.pages.iter_mut().find(|p| p.id == page_id) else {
            return false;
        };
        page.metadata = metadata;
        debug!(page = %page_id, "metadata updated");
        self.changed();
        true
    }

    /// Record the forms a metadata flow has saved so far, by page id.
    ///
    /// Edits for pages no longer in the collection are dropped. Returns how
    /// many pages were updated.
    pub fn record_saved_forms(&mut self, coordinator: &mut BatchMetadataCoordinator) -> usize {
        let mut recorded = 0;
        for (page_id, metadata) in coordinator.take_saved() {
            if let Some(page) = self.pages.iter_mut().find(|p| p.id == page_id) {
                page.metadata = Some(metadata);
                recorded += 1;
            }
        }
        if recorded > 0 {
            debug!(recorded, "step metadata recorded");
            self.changed();
        }
        recorded
    }

    /// Empty the collection and delete the intermediates it referenced.
    pub fn clear(&mut self) {
        self.committed.clear();
        let mut released: Vec<ImageRef> = self.pages.drain(..).map(|p| p.image_ref).collect();
        if let Some(pending) = self.pending_removal.take() {
            released.push(pending.page.image_ref);
        }
        info!(released = released.len(), "collection cleared");
        self.changed();
        self.release(released);
    }

    // -- Crop -----------------------------------------------------------------

    /// Dispatch a crop of `page_id` to the worker.
    ///
    /// Returns `false` (and does nothing) for an unknown page or a
    /// full-frame rectangle. The result must be committed later through
    /// `commit`, `process_ready`, or `settle`.
    #[instrument(skip_all, fields(page = %page_id))]
    pub fn apply_crop(&mut self, page_id: PageId, rect: NormalizedRect) -> bool {
        let Some(page) = self.get(page_id) else {
            debug!("crop requested for unknown page");
            return false;
        };
        let rect = rect.clamped();
        if rect.is_full() {
            debug!("full-frame crop, nothing to do");
            return false;
        }

        let source = page.image_ref.clone();
        let generation = self.next_generation;
        self.next_generation += 1;
        self.in_flight.push(InFlightCrop {
            page_id,
            source: source.clone(),
            generation,
        });

        let executor = Arc::clone(&self.executor);
        let input = source.clone();
        let job = self
            .worker
            .run(move || executor.crop_and_persist(&input, rect));
        let tx = self.completions_tx.clone();
        self.worker.spawn(async move {
            let outcome = job.await;
            if tx
                .send(CropCompletion {
                    page_id,
                    source,
                    generation,
                    outcome,
                })
                .is_err()
            {
                debug!("collection dropped before crop completed");
            }
        });

        debug!(in_flight = self.in_flight.len(), "crop dispatched");
        true
    }

    /// Normalize a viewport-space crop rectangle and dispatch it.
    ///
    /// Rectangles smaller than the configured minimum are ignored.
    pub fn commit_crop(&mut self, page_id: PageId, rect: CropRect, viewport: Size) -> bool {
        if !rect.is_valid(self.min_crop_size) {
            debug!(page = %page_id, "crop rectangle below minimum size ignored");
            return false;
        }
        self.apply_crop(page_id, normalize(rect, viewport))
    }

    /// Apply one crop result. Returns whether a page's image changed.
    pub fn commit(&mut self, completion: CropCompletion) -> bool {
        let CropCompletion {
            page_id,
            source,
            generation,
            outcome,
        } = completion;

        if let Some(slot) = self
            .in_flight
            .iter()
            .position(|c| c.page_id == page_id && c.generation == generation)
        {
            self.in_flight.swap_remove(slot);
        }

        let cropped = match outcome {
            Ok(cropped) => cropped,
            Err(e) => {
                warn!(page = %page_id, error = %e, "crop failed, original image kept");
                self.release(vec![source]);
                return false;
            }
        };

        let Some(page) = self.pages.iter_mut().find(|p| p.id == page_id) else {
            warn!(page = %page_id, "crop finished for a page no longer in the collection, discarded");
            self.release(vec![cropped, source]);
            return false;
        };

        if self.committed.get(&page_id).is_some_and(|latest| *latest > generation) {
            debug!(page = %page_id, generation, "crop overtaken by a newer one, discarded");
            self.release(vec![cropped, source]);
            return false;
        }

        let superseded = std::mem::replace(&mut page.image_ref, cropped);
        self.committed.insert(page_id, generation);
        info!(page = %page_id, image = %page.image_ref, "crop committed");
        self.changed();
        self.release(vec![superseded, source]);
        true
    }

    /// Wait for the next crop result. `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<CropCompletion> {
        if self.in_flight.is_empty() {
            return None;
        }
        self.completions_rx.recv().await
    }

    /// Commit crop results until nothing is in flight. Returns how many
    /// changed a page.
    pub async fn settle(&mut self) -> usize {
        let mut applied = 0;
        while let Some(completion) = self.next_completion().await {
            if self.commit(completion) {
                applied += 1;
            }
        }
        applied
    }

    /// Commit whatever results have already arrived, without waiting.
    pub fn process_ready(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            if self.commit(completion) {
                applied += 1;
            }
        }
        applied
    }

    // -- Handoff --------------------------------------------------------------

    /// Bake deferred rotations into the pages of `outcome`, hand them off as
    /// an upload batch, and empty the collection.
    ///
    /// Waits for in-flight crops first so the batch sees their results. The
    /// outcome must cover exactly the pages in the collection; otherwise it
    /// is rejected and nothing changes. The handed-off files are not deleted.
    #[instrument(skip_all, fields(pages = outcome.pages.len()))]
    pub async fn finalize(&mut self, mut outcome: BatchOutcome) -> Result<UploadBatch> {
        if outcome.pages.is_empty() {
            return Err(PipelineError::InvalidBatchState(
                "no pages to finalize".into(),
            ));
        }
        self.settle().await;

        let handed: HashSet<PageId> = outcome.pages.iter().map(|p| p.id).collect();
        let present: HashSet<PageId> = self.pages.iter().map(|p| p.id).collect();
        if handed != present || handed.len() != outcome.pages.len() {
            warn!(
                outcome = outcome.pages.len(),
                collection = self.pages.len(),
                "outcome does not match the collection, not finalized"
            );
            return Err(PipelineError::InvalidBatchState(
                "pages changed since metadata entry began".into(),
            ));
        }

        for page in &mut outcome.pages {
            if let Some(current) = self.pages.iter().find(|p| p.id == page.id) {
                page.image_ref = current.image_ref.clone();
                page.rotation_degrees = current.rotation_degrees;
                page.position = current.position;
            }
        }
        outcome.pages.sort_by_key(|p| p.position);
        let mut released: Vec<ImageRef> =
            outcome.pages.iter().map(|p| p.image_ref.clone()).collect();

        let upload = batch::finalize_outcome(&self.executor, &self.worker, outcome).await;

        released.extend(self.pages.drain(..).map(|p| p.image_ref));
        self.committed.clear();
        if let Some(pending) = self.pending_removal.take() {
            released.push(pending.page.image_ref);
        }
        self.changed();

        let mut live = self.live_refs();
        live.extend(upload.pages.iter().map(|p| p.image_ref.clone()));
        self.executor.cleanup_intermediates(&released, &live);

        info!(pages = upload.pages.len(), mode = ?upload.mode, "batch handed off");
        Ok(upload)
    }

    // -- Internals ------------------------------------------------------------

    fn index_of(&self, page_id: PageId) -> Option<usize> {
        self.pages.iter().position(|p| p.id == page_id)
    }

    fn check_capacity(&self, requested: usize) -> Result<()> {
        let current = self.pages.len();
        if current + requested > self.max_pages {
            return Err(PipelineError::CapacityExceeded {
                requested,
                current,
                max: self.max_pages,
            });
        }
        Ok(())
    }

    fn renumber(&mut self) {
        for (index, page) in self.pages.iter_mut().enumerate() {
            page.position = index + 1;
        }
    }

    fn changed(&mut self) {
        self.persist();
        self.publish();
    }

    /// Write failures are logged; the in-memory collection stays
    /// authoritative.
    fn persist(&self) {
        let result = codec::encode(&self.pages)
            .and_then(|encoded| store::write_pages(self.store.as_ref(), &encoded));
        if let Err(e) = result {
            warn!(error = %e, "failed to persist page collection");
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.pages.clone().into());
    }

    /// Every reference something may still read from.
    fn live_refs(&self) -> HashSet<ImageRef> {
        self.pages
            .iter()
            .map(|p| p.image_ref.clone())
            .chain(self.pending_removal.iter().map(|r| r.page.image_ref.clone()))
            .chain(self.in_flight.iter().map(|c| c.source.clone()))
            .collect()
    }

    fn release(&self, candidates: Vec<ImageRef>) {
        let live = self.live_refs();
        let removed = self.executor.cleanup_intermediates(&candidates, &live);
        if removed > 0 {
            debug!(removed, "intermediates cleaned up");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use ::image::{DynamicImage, Rgb, RgbImage};
    use pagestack_core::types::MetadataMode;
    use pagestack_document::ImageCache;
    use pagestack_document::cache::{CAPTURE_PREFIX, INTERMEDIATE_PREFIX};
    use proptest::prelude::*;

    use super::*;
    use crate::batch::BatchMetadataCoordinator;
    use crate::store::{KEY_IDS, KEY_URIS, MemoryStateStore};

    struct Harness {
        dir: tempfile::TempDir,
        store: MemoryStateStore,
        manager: PageCollectionManager,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStateStore::new();
        let manager = manager_with(dir.path(), store.clone());
        Harness {
            dir,
            store,
            manager,
        }
    }

    fn manager_with(root: &Path, store: MemoryStateStore) -> PageCollectionManager {
        let cache = ImageCache::open(root.join("cache")).unwrap();
        let executor = TransformExecutor::new(cache, 90);
        let worker = Worker::try_current().unwrap();
        PageCollectionManager::restore(&PipelineConfig::default(), executor, Box::new(store), worker)
    }

    fn refs(names: &[&str]) -> Vec<ImageRef> {
        names
            .iter()
            .map(|n| ImageRef::new(format!("/scans/{n}.jpg")))
            .collect()
    }

    fn many(n: usize) -> Vec<ImageRef> {
        (0..n).map(|i| ImageRef::new(format!("/scans/{i}.jpg"))).collect()
    }

    fn ids(manager: &PageCollectionManager) -> Vec<PageId> {
        manager.pages().iter().map(|p| p.id).collect()
    }

    fn positions(manager: &PageCollectionManager) -> Vec<usize> {
        manager.pages().iter().map(|p| p.position).collect()
    }

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> ImageRef {
        let path = dir.join(name);
        let img = RgbImage::from_pixel(width, height, Rgb([10, 120, 200]));
        DynamicImage::ImageRgb8(img).save(&path).unwrap();
        ImageRef::from_path(path)
    }

    fn dimensions(image_ref: &ImageRef) -> (u32, u32) {
        ::image::image_dimensions(image_ref.to_path().unwrap()).unwrap()
    }

    fn intermediates(h: &Harness) -> Vec<PathBuf> {
        std::fs::read_dir(h.manager.executor().cache().dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(INTERMEDIATE_PREFIX))
            })
            .collect()
    }

    // -- Structure --

    #[tokio::test]
    async fn reorder_remove_undo_scenario() {
        let mut h = harness();
        let added = h.manager.add(refs(&["a", "b", "c"]), SourceKind::Scanner).unwrap();
        let (a, b, c) = (added[0].id, added[1].id, added[2].id);

        assert!(h.manager.move_page(0, 2));
        assert_eq!(ids(&h.manager), vec![b, c, a]);

        assert!(h.manager.remove(c));
        assert_eq!(ids(&h.manager), vec![b, a]);
        assert_eq!(positions(&h.manager), vec![1, 2]);

        assert!(h.manager.undo_remove().unwrap());
        assert_eq!(ids(&h.manager), vec![b, c, a]);
        assert_eq!(positions(&h.manager), vec![1, 2, 3]);
        assert!(h.manager.pending_removal().is_none());
    }

    #[tokio::test]
    async fn capacity_is_enforced_without_mutation() {
        let mut h = harness();
        let err = h.manager.add(many(21), SourceKind::Files).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CapacityExceeded {
                requested: 21,
                current: 0,
                max: 20
            }
        ));
        assert!(h.manager.is_empty());
        assert_eq!(h.store.get(KEY_IDS).unwrap(), None);

        h.manager.add(many(20), SourceKind::Files).unwrap();
        assert_eq!(h.manager.len(), 20);
        assert!(matches!(
            h.manager.add(many(1), SourceKind::Files),
            Err(PipelineError::CapacityExceeded { .. })
        ));
        assert_eq!(h.manager.len(), 20);
    }

    #[tokio::test]
    async fn second_remove_discards_first_undo() {
        let mut h = harness();
        let added = h.manager.add(refs(&["a", "b", "c"]), SourceKind::Scanner).unwrap();
        h.manager.remove(added[0].id);
        h.manager.remove(added[1].id);

        assert!(h.manager.undo_remove().unwrap());
        assert_eq!(ids(&h.manager), vec![added[1].id, added[2].id]);
        assert!(!h.manager.undo_remove().unwrap());
        assert!(h.manager.get(added[0].id).is_none());
    }

    #[tokio::test]
    async fn undo_past_capacity_is_rejected_and_kept() {
        let mut h = harness();
        let added = h.manager.add(many(20), SourceKind::Scanner).unwrap();
        h.manager.remove(added[3].id);
        h.manager.add(refs(&["late"]), SourceKind::Scanner).unwrap();

        assert!(matches!(
            h.manager.undo_remove(),
            Err(PipelineError::CapacityExceeded { .. })
        ));
        assert_eq!(h.manager.pending_removal().unwrap().page.id, added[3].id);
    }

    #[tokio::test]
    async fn undo_index_is_clamped() {
        let mut h = harness();
        let added = h.manager.add(refs(&["a", "b", "c"]), SourceKind::Scanner).unwrap();
        h.manager.remove(added[2].id);
        let bystander = h.manager.pages()[0].id;
        // Shrink the collection without touching the pending entry.
        let pending = h.manager.pending_removal.take();
        h.manager.remove(bystander);
        h.manager.pending_removal = pending;

        assert!(h.manager.undo_remove().unwrap());
        assert_eq!(ids(&h.manager), vec![added[1].id, added[2].id]);
    }

    #[tokio::test]
    async fn unknown_ids_and_bad_indices_are_no_ops() {
        let mut h = harness();
        h.manager.add(refs(&["a", "b"]), SourceKind::Scanner).unwrap();
        let before = h.manager.pages().to_vec();

        assert!(!h.manager.remove(PageId::new()));
        assert!(!h.manager.rotate(PageId::new()));
        assert!(!h.manager.move_page(0, 2));
        assert!(!h.manager.move_page(5, 0));
        assert!(!h.manager.undo_remove().unwrap());
        assert!(!h.manager.dismiss_undo());
        assert_eq!(h.manager.pages(), &before[..]);
    }

    #[tokio::test]
    async fn four_rotations_restore_original() {
        let mut h = harness();
        let id = h.manager.add(refs(&["a"]), SourceKind::Scanner).unwrap()[0].id;
        for expected in [90, 180, 270, 0] {
            assert!(h.manager.rotate(id));
            assert_eq!(h.manager.get(id).unwrap().rotation_degrees, expected);
        }
    }

    #[tokio::test]
    async fn snapshots_follow_mutations() {
        let mut h = harness();
        let mut rx = h.manager.subscribe();
        h.manager.add(refs(&["a", "b"]), SourceKind::Gallery).unwrap();

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(h.manager.snapshot(), snapshot);

        h.manager.clear();
        assert!(rx.borrow_and_update().is_empty());
    }

    // -- Persistence --

    #[tokio::test]
    async fn every_mutation_is_restorable() {
        let mut h = harness();
        let added = h.manager.add(refs(&["a", "b", "c"]), SourceKind::Gallery).unwrap();
        h.manager.rotate(added[1].id);
        h.manager.set_metadata(
            added[2].id,
            Some(PageMetadata {
                title: Some("Invoice | March".into()),
                ..Default::default()
            }),
        );
        h.manager.move_page(2, 0);

        let restored = manager_with(h.dir.path(), h.store.clone());
        assert_eq!(restored.pages(), h.manager.pages());
    }

    #[tokio::test]
    async fn corrupt_state_restores_empty() {
        let h = harness();
        h.store.put(KEY_URIS, "/a.jpg|/b.jpg").unwrap();
        h.store.put(KEY_IDS, &PageId::new().to_string()).unwrap();

        let restored = manager_with(h.dir.path(), h.store.clone());
        assert!(restored.is_empty());
        assert_eq!(h.store.get(KEY_URIS).unwrap(), None);
        assert_eq!(h.store.get(KEY_IDS).unwrap(), None);
    }

    #[tokio::test]
    async fn pending_removal_is_not_persisted() {
        let mut h = harness();
        let added = h.manager.add(refs(&["a", "b"]), SourceKind::Scanner).unwrap();
        h.manager.remove(added[0].id);

        let mut restored = manager_with(h.dir.path(), h.store.clone());
        assert_eq!(ids(&restored), vec![added[1].id]);
        assert!(!restored.undo_remove().unwrap());
    }

    // -- Ingest --

    #[tokio::test]
    async fn ingest_copies_into_cache_and_reports_failures() {
        let mut h = harness();
        let src = write_png(h.dir.path(), "receipt.png", 8, 8);
        let captures = vec![
            CapturedImage::new(src.clone()).with_content_type("image/png"),
            CapturedImage::new(ImageRef::new("/nowhere/lost.jpg")),
        ];

        let report = h.manager.ingest(captures, SourceKind::Files).await.unwrap();

        assert_eq!(report.added.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, PipelineError::Io(_)));
        let page = &h.manager.pages()[0];
        assert!(h.manager.executor().cache().contains(&page.image_ref));
        assert!(page.image_ref.file_name().unwrap().starts_with(CAPTURE_PREFIX));
        assert_eq!(page.image_ref.extension().as_deref(), Some("png"));
        assert_eq!(page.source_kind, SourceKind::Files);
        assert!(src.to_path().unwrap().exists());
    }

    #[tokio::test]
    async fn ingest_checks_capacity_before_copying() {
        let mut h = harness();
        h.manager.add(many(19), SourceKind::Scanner).unwrap();
        let src = write_png(h.dir.path(), "a.png", 4, 4);
        let captures = vec![CapturedImage::new(src.clone()), CapturedImage::new(src)];

        assert!(matches!(
            h.manager.ingest(captures, SourceKind::Gallery).await,
            Err(PipelineError::CapacityExceeded { requested: 2, .. })
        ));
        assert_eq!(
            std::fs::read_dir(h.manager.executor().cache().dir()).unwrap().count(),
            0
        );
    }

    // -- Crop --

    #[tokio::test]
    async fn crop_lands_on_page_id_after_reorder() {
        let mut h = harness();
        let a = write_png(h.dir.path(), "a.png", 100, 80);
        let b = write_png(h.dir.path(), "b.png", 100, 80);
        let added = h.manager.add(vec![a.clone(), b], SourceKind::Scanner).unwrap();
        let target = added[1].id;

        assert!(h.manager.apply_crop(target, NormalizedRect::new(0.0, 0.0, 0.5, 0.5)));
        h.manager.move_page(1, 0);
        assert_eq!(h.manager.settle().await, 1);

        let cropped = h.manager.get(target).unwrap();
        assert_eq!(cropped.position, 1);
        assert!(h.manager.executor().cache().is_intermediate(&cropped.image_ref));
        assert_eq!(dimensions(&cropped.image_ref), (50, 40));
        assert_eq!(h.manager.get(added[0].id).unwrap().image_ref, a);
        assert_eq!(h.manager.in_flight(), 0);
    }

    #[tokio::test]
    async fn crop_for_removed_page_is_discarded() {
        let mut h = harness();
        let src = write_png(h.dir.path(), "a.png", 60, 60);
        let id = h.manager.add(vec![src.clone()], SourceKind::Scanner).unwrap()[0].id;

        h.manager.apply_crop(id, NormalizedRect::new(0.1, 0.1, 0.9, 0.9));
        h.manager.remove(id);

        assert_eq!(h.manager.settle().await, 0);
        assert!(intermediates(&h).is_empty());
        assert_eq!(h.manager.pending_removal().unwrap().page.image_ref, src);
    }

    #[tokio::test]
    async fn failed_crop_keeps_original() {
        let mut h = harness();
        let broken = h.dir.path().join("broken.jpg");
        std::fs::write(&broken, b"not a jpeg").unwrap();
        let src = ImageRef::from_path(&broken);
        let id = h.manager.add(vec![src.clone()], SourceKind::Files).unwrap()[0].id;

        assert!(h.manager.apply_crop(id, NormalizedRect::new(0.0, 0.0, 0.5, 0.5)));
        assert_eq!(h.manager.settle().await, 0);
        assert_eq!(h.manager.get(id).unwrap().image_ref, src);
    }

    #[tokio::test]
    async fn recrop_removes_superseded_intermediate() {
        let mut h = harness();
        let src = write_png(h.dir.path(), "a.png", 80, 80);
        let id = h.manager.add(vec![src], SourceKind::Scanner).unwrap()[0].id;

        h.manager.apply_crop(id, NormalizedRect::new(0.0, 0.0, 0.75, 0.75));
        h.manager.settle().await;
        let first = h.manager.get(id).unwrap().image_ref.clone();

        h.manager.apply_crop(id, NormalizedRect::new(0.0, 0.0, 0.5, 0.5));
        h.manager.settle().await;
        let second = h.manager.get(id).unwrap().image_ref.clone();

        assert!(!first.to_path().unwrap().exists());
        assert_eq!(intermediates(&h), vec![second.to_path().unwrap()]);
        assert_eq!(dimensions(&second), (30, 30));
    }

    #[tokio::test]
    async fn older_crop_finishing_last_is_dropped() {
        let mut h = harness();
        let src = write_png(h.dir.path(), "a.png", 80, 80);
        let id = h.manager.add(vec![src], SourceKind::Scanner).unwrap()[0].id;

        h.manager.apply_crop(id, NormalizedRect::new(0.0, 0.0, 0.75, 0.75));
        h.manager.apply_crop(id, NormalizedRect::new(0.0, 0.0, 0.5, 0.5));
        let mut done = vec![
            h.manager.next_completion().await.unwrap(),
            h.manager.next_completion().await.unwrap(),
        ];
        done.sort_by_key(|c| std::cmp::Reverse(c.generation));
        let older = done.pop().unwrap();
        let newer = done.pop().unwrap();

        assert!(h.manager.commit(newer));
        assert!(!h.manager.commit(older));

        let current = h.manager.get(id).unwrap().image_ref.clone();
        assert_eq!(dimensions(&current), (40, 40));
        assert_eq!(intermediates(&h), vec![current.to_path().unwrap()]);
        assert_eq!(h.manager.in_flight(), 0);
    }

    #[tokio::test]
    async fn viewport_crop_is_normalized_and_size_checked() {
        let mut h = harness();
        let src = write_png(h.dir.path(), "a.png", 200, 100);
        let id = h.manager.add(vec![src], SourceKind::Scanner).unwrap()[0].id;
        let viewport = Size::new(400.0, 200.0);

        assert!(!h.manager.commit_crop(id, CropRect::new(0.0, 0.0, 10.0, 10.0), viewport));
        assert!(!h.manager.commit_crop(id, CropRect::covering(viewport), viewport));
        assert!(h.manager.commit_crop(id, CropRect::new(0.0, 0.0, 200.0, 200.0), viewport));
        h.manager.settle().await;

        assert_eq!(dimensions(&h.manager.get(id).unwrap().image_ref), (100, 100));
    }

    #[tokio::test]
    async fn next_completion_is_none_when_idle() {
        let mut h = harness();
        assert!(h.manager.next_completion().await.is_none());
        assert_eq!(h.manager.process_ready(), 0);
    }

    #[tokio::test]
    async fn clear_removes_intermediates_only() {
        let mut h = harness();
        let src = write_png(h.dir.path(), "a.png", 40, 40);
        let id = h.manager.add(vec![src.clone()], SourceKind::Scanner).unwrap()[0].id;
        h.manager.apply_crop(id, NormalizedRect::new(0.0, 0.0, 0.5, 0.5));
        h.manager.settle().await;
        assert_eq!(intermediates(&h).len(), 1);

        h.manager.clear();
        assert!(h.manager.is_empty());
        assert!(intermediates(&h).is_empty());
        assert!(src.to_path().unwrap().exists());
        assert_eq!(h.store.get(KEY_URIS).unwrap(), None);
    }

    // -- Finalization --

    #[tokio::test]
    async fn finalize_waits_for_crops_and_bakes_rotation() {
        let mut h = harness();
        let src = write_png(h.dir.path(), "a.png", 40, 20);
        let id = h.manager.add(vec![src], SourceKind::Scanner).unwrap()[0].id;
        h.manager.rotate(id);

        // Snapshot taken before the crop lands.
        let mut coordinator = BatchMetadataCoordinator::new(h.manager.pages().to_vec());
        h.manager.apply_crop(id, NormalizedRect::new(0.0, 0.0, 1.0, 0.5));

        coordinator.select_mode(MetadataMode::SingleDocument).unwrap();
        coordinator.set_shared_form(PageMetadata {
            title: Some("Lease".into()),
            ..Default::default()
        });
        let outcome = coordinator.submit_shared().unwrap();
        let upload = h.manager.finalize(outcome).await.unwrap();

        assert_eq!(upload.mode, MetadataMode::SingleDocument);
        assert_eq!(upload.shared_metadata.unwrap().title.as_deref(), Some("Lease"));
        assert_eq!(upload.pages.len(), 1);
        assert!(upload.pages[0].rotation_applied);
        assert_eq!(dimensions(&upload.pages[0].image_ref), (10, 40));
        assert!(h.manager.is_empty());
        // Only the handed-off file remains.
        assert_eq!(intermediates(&h), vec![upload.pages[0].image_ref.to_path().unwrap()]);
    }

    #[tokio::test]
    async fn finalize_rejects_outcome_from_stale_snapshot() {
        let mut h = harness();
        let a = write_png(h.dir.path(), "a.png", 40, 40);
        let b = write_png(h.dir.path(), "b.png", 40, 40);
        h.manager.add(vec![a], SourceKind::Scanner).unwrap();

        let mut stale = BatchMetadataCoordinator::new(h.manager.pages().to_vec());
        let late = h.manager.add(vec![b], SourceKind::Scanner).unwrap()[0].id;
        h.manager.apply_crop(late, NormalizedRect::new(0.0, 0.0, 0.5, 0.5));
        stale.select_mode(MetadataMode::SingleDocument).unwrap();

        assert!(matches!(
            h.manager.finalize(stale.submit_shared().unwrap()).await,
            Err(PipelineError::InvalidBatchState(_))
        ));
        assert_eq!(h.manager.len(), 2);
        let cropped = h.manager.get(late).unwrap().image_ref.clone();
        assert!(h.manager.executor().cache().is_intermediate(&cropped));
        assert!(cropped.to_path().unwrap().exists());

        // A page removed after the snapshot is just as stale.
        let mut before_remove = BatchMetadataCoordinator::new(h.manager.pages().to_vec());
        h.manager.remove(late);
        before_remove.select_mode(MetadataMode::SingleDocument).unwrap();
        assert!(
            h.manager
                .finalize(before_remove.submit_shared().unwrap())
                .await
                .is_err()
        );
        assert_eq!(h.manager.len(), 1);

        let mut fresh = BatchMetadataCoordinator::new(h.manager.pages().to_vec());
        fresh.select_mode(MetadataMode::SingleDocument).unwrap();
        let upload = h.manager.finalize(fresh.submit_shared().unwrap()).await.unwrap();
        assert_eq!(upload.pages.len(), 1);
        assert!(h.manager.is_empty());
    }

    #[tokio::test]
    async fn step_edits_survive_restore() {
        let mut h = harness();
        let added = h.manager.add(refs(&["a", "b"]), SourceKind::Gallery).unwrap();
        let mut c = BatchMetadataCoordinator::new(h.manager.pages().to_vec());
        c.select_mode(MetadataMode::IndividualDocuments).unwrap();
        c.update_form(PageMetadata {
            title: Some("Edited".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(c.next().unwrap());
        assert_eq!(h.manager.record_saved_forms(&mut c), 1);

        let restored = manager_with(h.dir.path(), h.store.clone());
        let title = |m: &PageCollectionManager, id| {
            m.get(id).and_then(|p| p.metadata.clone()).and_then(|m| m.title)
        };
        assert_eq!(title(&restored, added[0].id).as_deref(), Some("Edited"));
        assert_eq!(title(&restored, added[1].id), None);

        let mut resumed = BatchMetadataCoordinator::new(restored.pages().to_vec());
        resumed.select_mode(MetadataMode::IndividualDocuments).unwrap();
        assert_eq!(resumed.form().unwrap().title.as_deref(), Some("Edited"));
    }

    #[tokio::test]
    async fn finalize_rejects_empty_outcome() {
        let mut h = harness();
        let outcome = BatchOutcome {
            mode: MetadataMode::SingleDocument,
            shared_metadata: None,
            pages: Vec::new(),
        };
        assert!(matches!(
            h.manager.finalize(outcome).await,
            Err(PipelineError::InvalidBatchState(_))
        ));
    }

    // -- Properties --

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize),
        Remove(usize),
        Move(usize, usize),
        Undo,
        Rotate(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1usize..4).prop_map(Op::Add),
            (0usize..24).prop_map(Op::Remove),
            (0usize..24, 0usize..24).prop_map(|(from, to)| Op::Move(from, to)),
            Just(Op::Undo),
            (0usize..24).prop_map(Op::Rotate),
        ]
    }

    proptest! {
        #[test]
        fn positions_stay_contiguous(ops in proptest::collection::vec(op(), 0..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let _guard = runtime.enter();
            let dir = tempfile::tempdir().unwrap();
            let mut manager = manager_with(dir.path(), MemoryStateStore::new());

            for op in ops {
                let id_at = |m: &PageCollectionManager, i: usize| {
                    m.pages().get(i).map(|p| p.id).unwrap_or_default()
                };
                match op {
                    Op::Add(n) => {
                        let _ = manager.add(many(n), SourceKind::Scanner);
                    }
                    Op::Remove(i) => {
                        let id = id_at(&manager, i);
                        manager.remove(id);
                    }
                    Op::Move(from, to) => {
                        manager.move_page(from, to);
                    }
                    Op::Undo => {
                        let _ = manager.undo_remove();
                    }
                    Op::Rotate(i) => {
                        let id = id_at(&manager, i);
                        manager.rotate(id);
                    }
                }
                let expected: Vec<usize> = (1..=manager.len()).collect();
                prop_assert_eq!(positions(&manager), expected);
                prop_assert!(manager.len() <= manager.max_pages());
            }
        }
    }
}
