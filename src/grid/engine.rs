//! The grid engine: decode workers, slot coordination, prefetch trigger,
//! and export spawning.
//!
//! One foreground caller (the UI's control thread) owns the engine and
//! drives it with `request_slot` / `poll_updates`; decode workers and the
//! export thread run in parallel with it and with each other. Workers only
//! ever touch the store and the shared cache; slot and selection state
//! stay foreground-only, so the generation check happens without locks.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::export::{self, ExportFormat, ExportOutcome, ProgressObserver};
use crate::grid::cache::{DecodedImage, ImageCache};
use crate::grid::decode::{self, CancelToken};
use crate::grid::prefetch::{
    lookahead_window, PendingSet, DEFAULT_PREFETCH_BATCH, DEFAULT_PREFETCH_TRIGGER,
};
use crate::grid::slots::{RequestOutcome, SlotTable, SlotTicket};
use crate::selection::SelectionState;
use crate::store::{ImageId, ImageStore, MMS_PART_ROOT};

/// Default number of decode worker threads.
const DEFAULT_WORKERS: usize = 2;

/// Maximum number of decode worker threads.
const MAX_WORKERS: usize = 4;

/// Default target cell size for grid decodes, in pixels.
const DEFAULT_FIT_SIZE: u32 = 256;

/// Default cache capacity in bytes.
const DEFAULT_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// How long a worker sleeps on an empty queue before re-checking shutdown.
const WORKER_RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Tuning knobs for the engine. Defaults mirror the values the original
/// grid shipped with.
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Store root prepended to ids when forming fetch locations.
    pub store_root: String,
    pub workers: usize,
    /// Target cell size for grid decodes.
    pub fit_size: u32,
    pub cache_capacity_bytes: usize,
    /// Ids per look-ahead batch.
    pub prefetch_batch: usize,
    /// Fire a prefetch when a completion lands within this many positions
    /// of the last visible slot.
    pub prefetch_trigger: usize,
    /// Directory receiving the session export archive.
    pub export_dir: PathBuf,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            store_root: MMS_PART_ROOT.to_owned(),
            workers: DEFAULT_WORKERS,
            fit_size: DEFAULT_FIT_SIZE,
            cache_capacity_bytes: DEFAULT_CACHE_CAPACITY,
            prefetch_batch: DEFAULT_PREFETCH_BATCH,
            prefetch_trigger: DEFAULT_PREFETCH_TRIGGER,
            export_dir: export::default_export_dir(),
        }
    }
}

/// What a slot should display right now.
pub enum SlotContent {
    /// Cache hit; the slot is bound and can draw immediately.
    Ready(DecodedImage),
    /// A decode is in flight; keep the placeholder until `poll_updates`
    /// delivers the image.
    Placeholder,
}

/// A validated completion: the slot is still bound to this request and
/// should now draw `image`.
pub struct SlotUpdate {
    pub slot: usize,
    pub index: usize,
    pub id: ImageId,
    pub image: DecodedImage,
}

enum Job {
    Decode {
        id: ImageId,
        ticket: SlotTicket,
        position: usize,
        cancel: CancelToken,
    },
    /// Sequential batch decode; results go to the cache only.
    Prefetch { ids: Vec<ImageId> },
}

struct WorkerEvent {
    ticket: SlotTicket,
    position: usize,
    id: ImageId,
    image: DecodedImage,
}

#[derive(Clone)]
struct WorkerCtx {
    store: Arc<dyn ImageStore>,
    cache: Arc<ImageCache>,
    store_root: String,
    fit_size: u32,
}

/// Asynchronous image loading bound to a recyclable grid of view slots.
pub struct GridEngine {
    store: Arc<dyn ImageStore>,
    cache: Arc<ImageCache>,
    config: GridConfig,
    ids: Vec<ImageId>,
    selection: SelectionState,
    slots: SlotTable,
    prefetched: PendingSet,
    visible_range: (usize, usize),
    job_tx: Sender<Job>,
    event_rx: Receiver<WorkerEvent>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl GridEngine {
    pub fn new(store: Arc<dyn ImageStore>, config: GridConfig) -> Self {
        let cache = Arc::new(ImageCache::new(config.cache_capacity_bytes));
        let (job_tx, job_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_count = config.workers.clamp(1, MAX_WORKERS);
        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx = job_rx.clone();
            let tx = event_tx.clone();
            let shutdown = Arc::clone(&shutdown);
            let ctx = WorkerCtx {
                store: Arc::clone(&store),
                cache: Arc::clone(&cache),
                store_root: config.store_root.clone(),
                fit_size: config.fit_size,
            };

            let handle = thread::Builder::new()
                .name(format!("grid-decode-{worker_id}"))
                .spawn(move || worker_loop(worker_id, rx, tx, shutdown, ctx))
                .expect("Failed to spawn decode worker");
            workers.push(handle);
        }

        debug!(workers = worker_count, "started grid decode workers");

        Self {
            store,
            cache,
            config,
            ids: Vec::new(),
            selection: SelectionState::new(0),
            slots: SlotTable::new(),
            prefetched: PendingSet::new(),
            visible_range: (0, 0),
            job_tx,
            event_rx,
            workers,
            shutdown,
        }
    }

    /// Replaces the displayed collection. Selection and slot bindings are
    /// rebuilt; the prefetch dedup set and the warm cache survive so a
    /// revisited conversation stays fast.
    pub fn set_collection(&mut self, ids: Vec<ImageId>) {
        debug!(count = ids.len(), "collection supplied");
        self.selection.reset(ids.len());
        self.slots = SlotTable::new();
        self.visible_range = (0, 0);
        self.ids = ids;
    }

    pub fn collection_len(&self) -> usize {
        self.ids.len()
    }

    pub fn image_id(&self, index: usize) -> Option<&ImageId> {
        self.ids.get(index)
    }

    /// The shared image cache; mainly useful for diagnostics.
    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Requests the content for `slot`, now showing collection item
    /// `index`. A cache hit binds the slot immediately; otherwise a decode
    /// job is issued (unless the same one is already in flight) and the
    /// slot keeps its placeholder until `poll_updates`.
    pub fn request_slot(&mut self, slot: usize, index: usize) -> SlotContent {
        let Some(id) = self.ids.get(index).cloned() else {
            return SlotContent::Placeholder;
        };

        if let Some(image) = self.cache.get(&id) {
            self.slots.bind_direct(slot, &id);
            return SlotContent::Ready(image);
        }

        match self.slots.request(slot, &id) {
            RequestOutcome::InFlight(_) => SlotContent::Placeholder,
            RequestOutcome::Spawn(ticket, cancel) => {
                let job = Job::Decode {
                    id,
                    ticket,
                    position: index,
                    cancel,
                };
                if self.job_tx.send(job).is_err() {
                    warn!("decode workers are gone; slot keeps its placeholder");
                }
                SlotContent::Placeholder
            }
        }
    }

    /// Updates the window of collection indices currently on screen; feeds
    /// the prefetch trigger.
    pub fn set_visible_range(&mut self, first: usize, last: usize) {
        self.visible_range = (first, last);
    }

    /// Drains completed decodes, dropping any whose slot has been rebound
    /// since. A completion landing near the trailing visible edge tops up
    /// the look-ahead.
    pub fn poll_updates(&mut self) -> Vec<SlotUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            if !self.slots.complete(event.ticket, &event.id) {
                trace!(id = %event.id, slot = event.ticket.slot, "dropping stale completion");
                continue;
            }

            let (_, last_visible) = self.visible_range;
            if last_visible.saturating_sub(event.position) < self.config.prefetch_trigger {
                self.prefetch(self.config.prefetch_batch);
            }

            updates.push(SlotUpdate {
                slot: event.ticket.slot,
                index: event.position,
                id: event.id,
                image: event.image,
            });
        }
        updates
    }

    /// Issues a look-ahead batch for up to `count` items past the last
    /// visible slot. Already-prefetched and cache-resident ids are skipped;
    /// the rest are decoded sequentially into the cache with no per-item
    /// slot updates.
    pub fn prefetch(&mut self, count: usize) {
        let (_, last_visible) = self.visible_range;
        let window = lookahead_window(last_visible, self.ids.len(), count);

        let mut batch = Vec::new();
        for index in window {
            let id = &self.ids[index];
            if self.prefetched.contains(id) || self.cache.contains(id) {
                continue;
            }
            self.prefetched.insert(id);
            batch.push(id.clone());
        }

        if !batch.is_empty() {
            debug!(count = batch.len(), "issuing look-ahead batch");
            if self.job_tx.send(Job::Prefetch { ids: batch }).is_err() {
                warn!("decode workers are gone; look-ahead dropped");
            }
        }
    }

    pub fn toggle_selection(&mut self, index: usize) {
        self.selection.toggle(index);
    }

    /// Select-all / deselect-all through the single control.
    pub fn select_all(&mut self) {
        self.selection.select_all();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selection.is_selected(index)
    }

    pub fn selected_indices(&self) -> Vec<usize> {
        self.selection.selected_indices()
    }

    /// Selected ids in ascending index order, the order the export
    /// archive will use.
    pub fn selected_ids(&self) -> Vec<ImageId> {
        self.selection
            .selected_indices()
            .into_iter()
            .filter_map(|i| self.ids.get(i).cloned())
            .collect()
    }

    /// Starts an export of the current selection on its own thread,
    /// independent of (and concurrent with) the decode workers.
    ///
    /// An empty selection is rejected here, synchronously, before any
    /// background work starts.
    pub fn spawn_export<O>(
        &mut self,
        format: ExportFormat,
        observer: O,
    ) -> Result<JoinHandle<Result<ExportOutcome>>>
    where
        O: ProgressObserver + Send + 'static,
    {
        let ids = self.selected_ids();
        if ids.is_empty() {
            return Err(Error::EmptySelection);
        }

        let store = Arc::clone(&self.store);
        let store_root = self.config.store_root.clone();
        let out_dir = self.config.export_dir.clone();

        let handle = thread::Builder::new().name("mms-export".to_owned()).spawn(
            move || {
                export::export_images(
                    store.as_ref(),
                    &store_root,
                    &ids,
                    format,
                    &out_dir,
                    &observer,
                )
            },
        )?;
        Ok(handle)
    }

    /// Signals the workers and joins them. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("shutting down grid engine");
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for GridEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    worker_id: usize,
    rx: Receiver<Job>,
    tx: Sender<WorkerEvent>,
    shutdown: Arc<AtomicBool>,
    ctx: WorkerCtx,
) {
    debug!(worker_id, "decode worker started");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match rx.recv_timeout(WORKER_RECV_TIMEOUT) {
            Ok(Job::Decode {
                id,
                ticket,
                position,
                cancel,
            }) => {
                let image = load_and_cache(&ctx, &id, &cancel);

                // A cancelled task keeps its cache write but must not touch
                // display state.
                if cancel.is_cancelled() {
                    trace!(id = %id, "decode cancelled after cache write");
                    continue;
                }
                // Store miss: the slot simply keeps its placeholder.
                let Some(image) = image else { continue };

                let event = WorkerEvent {
                    ticket,
                    position,
                    id,
                    image,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            Ok(Job::Prefetch { ids }) => {
                for id in ids {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    if ctx.cache.contains(&id) {
                        continue;
                    }
                    let _ = load_and_cache(&ctx, &id, &CancelToken::new());
                }
            }
            Err(flume::RecvTimeoutError::Timeout) => continue,
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker_id, "decode worker stopped");
}

/// Cache-first load; a successful decode lands in the cache exactly once
/// regardless of whether the requesting slot still wants it.
fn load_and_cache(ctx: &WorkerCtx, id: &ImageId, cancel: &CancelToken) -> Option<DecodedImage> {
    if let Some(image) = ctx.cache.get(id) {
        return Some(image);
    }
    let image = decode::load_fitted(ctx.store.as_ref(), &ctx.store_root, id, ctx.fit_size, cancel)?;
    ctx.cache.put(id.clone(), Arc::clone(&image));
    Some(image)
}
