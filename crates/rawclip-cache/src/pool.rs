//! Decode worker pool.
//!
//! Workers loop claim, decode, debayer, convert, publish until nothing in
//! the window is claimable or the stop flag is set. The live-worker count
//! has its own lock and condvar; a drain waits on that condvar until the
//! count reaches zero. Lock order is live count, then find lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex, RwLock};
use rawclip_core::{RawImage, Result};
use rawclip_media::{
    debayer, ChunkSet, CorrectionChain, DebayerAlgorithm, DecodeReport, DecodeScratch,
    FrameSource, RawFrameDecoder, SharedChunks,
};
use tracing::{debug, info, warn};

use crate::arena::CacheArena;
use crate::config::ProcessingSettings;
use crate::state::{Claim, StateTable};

/// Notifications from the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    FrameCached(usize),
    FrameFailed { frame: usize, reason: String },
}

/// Correction chain and debayer strategy in effect for new decodes.
#[derive(Debug)]
pub(crate) struct Pipeline {
    pub chain: CorrectionChain,
    pub debayer: DebayerAlgorithm,
}

impl Pipeline {
    pub fn new(settings: &ProcessingSettings) -> Self {
        Self {
            chain: CorrectionChain::from_settings(&settings.corrections),
            debayer: settings.debayer,
        }
    }
}

/// Where workers get their file handles.
#[derive(Debug)]
pub(crate) enum ChunkFiles {
    Shared(SharedChunks),
    PerWorker(ChunkSet),
}

impl ChunkFiles {
    pub fn open_source(&self) -> Result<Box<dyn FrameSource + Send>> {
        Ok(match self {
            Self::Shared(shared) => Box::new(shared.clone()),
            Self::PerWorker(set) => Box::new(set.open()?),
        })
    }
}

/// Live-worker count, held apart from [`CacheShared`] so the last worker
/// can release its share of the cache before reporting the pool drained.
#[derive(Debug, Default)]
pub(crate) struct WorkerCount {
    live: Mutex<usize>,
    drained: Condvar,
}

impl WorkerCount {
    pub fn live(&self) -> usize {
        *self.live.lock()
    }
}

/// State shared between the clip context and its workers.
///
/// Fields drop in declaration order: the table, arena and decoder (with
/// the frame index) go before the chunk files.
pub(crate) struct CacheShared {
    pub table: StateTable,
    pub arena: RwLock<CacheArena>,
    pub decoder: RawFrameDecoder,
    pub pipeline: RwLock<Arc<Pipeline>>,
    pub workers: Arc<WorkerCount>,
    pub target_workers: usize,
    pub enabled: AtomicBool,
    pub closed: AtomicBool,
    pub events: Sender<CacheEvent>,
    /// Correction reports, tagged with the pipeline that produced them
    reports: Mutex<HashMap<usize, (Arc<Pipeline>, DecodeReport)>>,
    next_worker_id: AtomicUsize,
    pub files: ChunkFiles,
}

impl CacheShared {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table: StateTable,
        arena: CacheArena,
        decoder: RawFrameDecoder,
        pipeline: Pipeline,
        target_workers: usize,
        enabled: bool,
        events: Sender<CacheEvent>,
        files: ChunkFiles,
    ) -> Self {
        Self {
            table,
            arena: RwLock::new(arena),
            decoder,
            pipeline: RwLock::new(Arc::new(pipeline)),
            workers: Arc::new(WorkerCount::default()),
            target_workers,
            enabled: AtomicBool::new(enabled),
            closed: AtomicBool::new(false),
            events,
            reports: Mutex::new(HashMap::new()),
            next_worker_id: AtomicUsize::new(0),
            files,
        }
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.pipeline.read())
    }

    /// Flip the enabled flag under the live-worker lock, so a concurrent
    /// `ensure_workers` either sees the new value or has already counted
    /// the workers it started.
    pub fn set_enabled(&self, enabled: bool) {
        let _live = self.workers.live.lock();
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Mark the pool closed; same locking as [`Self::set_enabled`].
    pub fn set_closed(&self) -> bool {
        let _live = self.workers.live.lock();
        self.enabled.store(false, Ordering::Release);
        self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn record_report(&self, frame: usize, pipeline: &Arc<Pipeline>, report: DecodeReport) {
        if !report.stages_run.is_empty() {
            self.reports
                .lock()
                .insert(frame, (Arc::clone(pipeline), report));
        }
    }

    pub fn report(&self, frame: usize) -> Option<DecodeReport> {
        let current = self.pipeline();
        match self.reports.lock().get(&frame) {
            Some((pipeline, report)) if Arc::ptr_eq(pipeline, &current) => Some(report.clone()),
            _ => None,
        }
    }

    pub fn clear_reports(&self) {
        self.reports.lock().clear();
    }

    fn emit(&self, event: CacheEvent) {
        // a full channel drops the event
        let _ = self.events.try_send(event);
    }
}

/// Decode `frame` to RGB in cache storage layout, along with the report
/// of the correction chain.
pub(crate) fn render_frame(
    decoder: &RawFrameDecoder,
    source: &mut dyn FrameSource,
    frame: usize,
    pipeline: &Pipeline,
    raw: &mut RawImage,
    scratch: &mut DecodeScratch,
) -> Result<(Vec<u16>, DecodeReport)> {
    let report = decoder.decode_frame(source, frame, &pipeline.chain, raw, scratch)?;
    let meta = decoder.metadata();
    let mut rgb = debayer(&raw.data, meta.width, meta.height, meta.cfa, pipeline.debayer);
    to_storage_layout(&mut rgb, meta.black_level, meta.white_level);
    Ok((rgb, report))
}

/// Rescale samples from `[black, white]` to the full 16-bit range, with
/// rounding. Values outside the range are clamped.
pub fn to_storage_layout(samples: &mut [u16], black: u32, white: u32) {
    let range = white.saturating_sub(black).max(1) as u64;
    for v in samples.iter_mut() {
        let signal = (*v as u64).saturating_sub(black as u64).min(range);
        *v = ((signal * 65535 + range / 2) / range) as u16;
    }
}

/// Start workers until the pool is back at its target size, if caching is
/// enabled and there is something to claim.
pub(crate) fn ensure_workers(shared: &Arc<CacheShared>) {
    let mut live = shared.workers.live.lock();
    // checked under the live lock; see `CacheShared::set_enabled`
    if !shared.enabled.load(Ordering::Acquire) || shared.closed.load(Ordering::Acquire) {
        return;
    }
    if !shared.table.has_claimable() {
        return;
    }
    let before = *live;
    while *live < shared.target_workers {
        let id = shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let worker_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("rawclip-cache-{id}"))
            .spawn(move || run_worker(worker_shared, id));
        match spawned {
            Ok(_) => *live += 1,
            Err(e) => {
                warn!(error = %e, "Failed to spawn cache worker");
                break;
            }
        }
    }
    if *live > before {
        info!(started = *live - before, live = *live, "Cache workers started");
    }
}

/// Set the stop flag and block until every worker has exited. The stop flag
/// stays set; the caller clears it.
pub(crate) fn stop_and_drain(shared: &CacheShared) {
    shared.table.set_stop(true);
    let mut live = shared.workers.live.lock();
    while *live > 0 {
        shared.workers.drained.wait(&mut live);
    }
    debug!("Cache workers drained");
}

fn run_worker(shared: Arc<CacheShared>, id: usize) {
    let workers = Arc::clone(&shared.workers);
    let opened = shared.files.open_source();
    let mut source = match opened {
        Ok(source) => source,
        Err(e) => {
            warn!(worker = id, error = %e, "Cache worker could not open chunk files");
            let mut live = workers.live.lock();
            drop(shared);
            retire(&workers, &mut live);
            return;
        }
    };
    let mut raw = RawImage::new(0, 0);
    let mut scratch = DecodeScratch::new();

    loop {
        let next = shared.table.claim();
        let claim = match next {
            Some(claim) => claim,
            None => {
                // Re-check under the live lock so a concurrent reset either
                // sees this worker counted or has its work picked up here.
                let mut live = workers.live.lock();
                let retry = shared.table.claim();
                match retry {
                    Some(claim) => {
                        drop(live);
                        claim
                    }
                    None => {
                        drop(source);
                        drop(shared);
                        retire(&workers, &mut live);
                        debug!(worker = id, "Cache worker exiting");
                        return;
                    }
                }
            }
        };
        process_claim(&shared, &mut *source, claim, &mut raw, &mut scratch);
    }
}

fn retire(workers: &WorkerCount, live: &mut usize) {
    *live -= 1;
    if *live == 0 {
        workers.drained.notify_all();
    }
}

fn process_claim(
    shared: &CacheShared,
    source: &mut dyn FrameSource,
    claim: Claim,
    raw: &mut RawImage,
    scratch: &mut DecodeScratch,
) {
    let pipeline = shared.pipeline();
    match render_frame(&shared.decoder, source, claim.frame, &pipeline, raw, scratch) {
        Ok((rgb, report)) => {
            let stored = shared
                .arena
                .read()
                .write_slot(claim.frame, &rgb, || shared.table.is_current(claim));
            if stored {
                // visible before the frame is, so a reader of a cached frame finds it
                shared.record_report(claim.frame, &pipeline, report);
            }
            if stored && shared.table.publish(claim) {
                debug!(frame = claim.frame, "Frame cached");
                shared.emit(CacheEvent::FrameCached(claim.frame));
            } else {
                debug!(frame = claim.frame, "Dropped stale decode");
            }
        }
        Err(e) => {
            let reason = e.reason();
            warn!(frame = claim.frame, error = %e, "Frame decode failed");
            shared.table.abandon(claim);
            shared.emit(CacheEvent::FrameFailed {
                frame: claim.frame,
                reason,
            });
        }
    }
}
