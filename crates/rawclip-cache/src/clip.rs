//! Clip context: the handle a player holds for one open clip.
//!
//! Owns the decoder, the frame arena, the state table and the worker pool.
//! `get_frame` serves from the arena when it can and falls back to a
//! synchronous decode on the calling thread otherwise.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use rawclip_core::{RawClipError, RawImage, Result, RgbFrame};
use rawclip_media::{
    build_index, scan_chunks, ChunkSet, ContainerMetadata, DecodeReport, DecodeScratch,
    FrameIndex, FrameSource, RawFrameDecoder, SharedChunks,
};
use tracing::{debug, info, warn};

use crate::arena::CacheArena;
use crate::config::{CacheConfig, ClipOptions, FileAccess, PlaybackQuality, ProcessingSettings};
use crate::pool::{
    ensure_workers, render_frame, stop_and_drain, CacheEvent, CacheShared, ChunkFiles, Pipeline,
};
use crate::state::{CacheState, Settled, StateTable};

/// Events buffered before the pool starts dropping them.
const EVENT_CAPACITY: usize = 256;

/// Granularity of the `Highest` quality wait.
const WAIT_SLICE: Duration = Duration::from_millis(5);

/// Where `get_frame` found the pixels it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Copied from the frame arena
    Cache,
    /// Copied from the last synchronous decode
    Fallback,
    /// Decoded on the calling thread
    Decoded,
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub frame_limit: usize,
    pub arena_bytes: u64,
    pub cached: usize,
    pub in_flight: usize,
    pub failed: usize,
    pub live_workers: usize,
    pub caching_enabled: bool,
    pub arena_writes: u64,
}

/// The most recent synchronous decode, tagged with the pipeline it ran.
struct FallbackFrame {
    frame: usize,
    pipeline: Arc<Pipeline>,
    data: Vec<u16>,
}

/// File handles and buffers for decodes on the consumer thread.
struct ConsumerDecode {
    source: Box<dyn FrameSource + Send>,
    raw: RawImage,
    scratch: DecodeScratch,
}

/// An open clip.
///
/// Dropping the context stops the pool and waits for every worker before
/// the arena and file handles are released.
pub struct ClipContext {
    shared: Arc<CacheShared>,
    config: Mutex<CacheConfig>,
    quality: Mutex<PlaybackQuality>,
    max_wait: Duration,
    /// Serialises resize, enable/disable, reset and processing changes
    reconfigure: Mutex<()>,
    fallback: Mutex<Option<FallbackFrame>>,
    consumer: Mutex<ConsumerDecode>,
    events: Receiver<CacheEvent>,
}

impl std::fmt::Debug for ClipContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipContext")
            .field("frames", &self.frame_count())
            .field("config", &self.config())
            .field("quality", &self.quality())
            .finish_non_exhaustive()
    }
}

impl ClipContext {
    /// Open the clip at `path` (the first chunk) along with its numbered
    /// continuation chunks, index it and start the worker pool.
    pub fn open<P: AsRef<Path>>(path: P, options: ClipOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref();

        let chunks = ChunkSet::discover(path)?;
        let mut handles = chunks.open()?;
        let metadata = scan_chunks(handles.files_mut())?;
        let index = build_index(
            handles.files_mut(),
            metadata.frame_count,
            metadata.audio_count,
            options.index_limit,
        )?;
        let decoder = RawFrameDecoder::new(Arc::new(metadata), Arc::new(index));

        let meta = decoder.metadata();
        let frame_bytes = meta.rgb_frame_bytes();
        let frame_samples = RgbFrame::sample_count(meta.width, meta.height);
        let config = match options.cache_frames {
            Some(frames) => CacheConfig::from_frames(frames, frame_bytes, decoder.frame_count()),
            None => CacheConfig::from_megabytes(
                options.cache_megabytes,
                frame_bytes,
                decoder.frame_count(),
            ),
        };
        let arena = CacheArena::allocate(config.frame_limit, frame_samples)?;
        let table = StateTable::new(config.frame_limit)?;

        let (files, source): (ChunkFiles, Box<dyn FrameSource + Send>) = match options.file_access
        {
            FileAccess::Shared => {
                let shared = SharedChunks::new(handles);
                (ChunkFiles::Shared(shared.clone()), Box::new(shared))
            }
            FileAccess::PerWorker => (ChunkFiles::PerWorker(chunks), Box::new(handles)),
        };

        info!(
            path = %path.display(),
            frames = decoder.frame_count(),
            width = meta.width,
            height = meta.height,
            cache_frames = config.frame_limit,
            workers = options.workers,
            "Opened clip"
        );

        let (tx, rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let shared = Arc::new(CacheShared::new(
            table,
            arena,
            decoder,
            Pipeline::new(&options.processing),
            options.workers,
            options.caching_enabled,
            tx,
            files,
        ));
        ensure_workers(&shared);

        Ok(Self {
            shared,
            config: Mutex::new(config),
            quality: Mutex::new(options.quality),
            max_wait: Duration::from_millis(options.max_wait_ms),
            reconfigure: Mutex::new(()),
            fallback: Mutex::new(None),
            consumer: Mutex::new(ConsumerDecode {
                source,
                raw: RawImage::new(0, 0),
                scratch: DecodeScratch::new(),
            }),
            events: rx,
        })
    }

    /// Copy frame `frame` into `out`, resizing it to the clip dimensions.
    ///
    /// A frame that fails to decode is reported as
    /// [`RawClipError::FrameUnavailable`]; `out` is left unspecified.
    pub fn get_frame(&self, frame: usize, out: &mut RgbFrame) -> Result<FrameOrigin> {
        let count = self.frame_count();
        if frame >= count {
            return Err(RawClipError::FrameOutOfRange { frame, count });
        }
        let meta = self.metadata();
        out.width = meta.width;
        out.height = meta.height;
        out.data
            .resize(RgbFrame::sample_count(meta.width, meta.height), 0);

        if self.read_cached(frame, &mut out.data) {
            return Ok(FrameOrigin::Cache);
        }
        if self.read_fallback(frame, &mut out.data) {
            return Ok(FrameOrigin::Fallback);
        }

        if frame < self.shared.table.len() {
            self.shared.table.request(frame);
            ensure_workers(&self.shared);
            if self.quality() == PlaybackQuality::Highest
                && self.wait_for_cache(frame)
                && self.read_cached(frame, &mut out.data)
            {
                return Ok(FrameOrigin::Cache);
            }
        }

        self.decode_fallback(frame, &mut out.data)?;
        Ok(FrameOrigin::Decoded)
    }

    fn read_cached(&self, frame: usize, dst: &mut [u16]) -> bool {
        let table = &self.shared.table;
        self.shared
            .arena
            .read()
            .read_slot(frame, dst, || table.state(frame) == Some(CacheState::Cached))
    }

    /// The fallback frame is only served while the cache has nothing better
    /// coming: the frame is not cached and not being cached, or it lies
    /// outside the window.
    fn read_fallback(&self, frame: usize, dst: &mut [u16]) -> bool {
        if !matches!(
            self.shared.table.state(frame),
            None | Some(CacheState::NotCached)
        ) {
            return false;
        }
        let current = self.shared.pipeline();
        let fallback = self.fallback.lock();
        match fallback.as_ref() {
            Some(f)
                if f.frame == frame
                    && Arc::ptr_eq(&f.pipeline, &current)
                    && f.data.len() == dst.len() =>
            {
                dst.copy_from_slice(&f.data);
                true
            }
            _ => false,
        }
    }

    /// Wait for the pool to cache `frame`. Gives up on failure, on an empty
    /// pool, or once `max_wait` has passed.
    fn wait_for_cache(&self, frame: usize) -> bool {
        if self.shared.workers.live() == 0 {
            return self.shared.table.wait_settled(frame, Duration::ZERO) == Settled::Cached;
        }
        let deadline = Instant::now() + self.max_wait;
        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!(frame, "Timed out waiting for the cache");
                return false;
            }
            match self.shared.table.wait_settled(frame, WAIT_SLICE.min(deadline - now)) {
                Settled::Cached => return true,
                Settled::Failed => return false,
                Settled::Waiting => {}
            }
            if self.shared.workers.live() == 0 {
                return false;
            }
        }
    }

    fn decode_fallback(&self, frame: usize, dst: &mut [u16]) -> Result<()> {
        let pipeline = self.shared.pipeline();
        let rendered = {
            let mut consumer = self.consumer.lock();
            let ConsumerDecode {
                source,
                raw,
                scratch,
            } = &mut *consumer;
            render_frame(&self.shared.decoder, &mut **source, frame, &pipeline, raw, scratch)
        };
        let (data, report) = rendered.map_err(|e| {
            warn!(frame, error = %e, "Synchronous decode failed");
            RawClipError::FrameUnavailable {
                frame,
                reason: e.reason(),
            }
        })?;
        dst.copy_from_slice(&data);
        self.shared.record_report(frame, &pipeline, report);
        *self.fallback.lock() = Some(FallbackFrame {
            frame,
            pipeline,
            data,
        });
        Ok(())
    }

    /// Resize the arena to a byte budget. Workers are drained first.
    pub fn set_cache_megabytes(&self, megabytes: u64) -> Result<CacheConfig> {
        let config =
            CacheConfig::from_megabytes(megabytes, self.frame_bytes(), self.frame_count());
        self.resize(config)?;
        Ok(config)
    }

    /// Resize the arena to hold `frames` frames. Workers are drained first.
    pub fn set_cache_frames(&self, frames: usize) -> Result<CacheConfig> {
        let config = CacheConfig::from_frames(frames, self.frame_bytes(), self.frame_count());
        self.resize(config)?;
        Ok(config)
    }

    fn resize(&self, config: CacheConfig) -> Result<()> {
        self.resize_with(config, |_| {})
    }

    /// Resize, calling `drained` with the old arena once no worker is left.
    /// A failed allocation leaves a zero-sized cache.
    pub(crate) fn resize_with(
        &self,
        config: CacheConfig,
        drained: impl FnOnce(&CacheArena),
    ) -> Result<()> {
        let _guard = self.reconfigure.lock();
        stop_and_drain(&self.shared);

        let frame_samples = {
            let meta = self.metadata();
            RgbFrame::sample_count(meta.width, meta.height)
        };
        let result = {
            let mut arena = self.shared.arena.write();
            drained(&*arena);
            // release the old arena before allocating its replacement
            *arena = CacheArena::empty();
            let resized = CacheArena::allocate(config.frame_limit, frame_samples).and_then(|a| {
                self.shared.table.resize(config.frame_limit)?;
                Ok(a)
            });
            match resized {
                Ok(new_arena) => {
                    *arena = new_arena;
                    *self.config.lock() = config;
                    Ok(())
                }
                Err(e) => {
                    self.shared.table.clear();
                    *self.config.lock() = CacheConfig::default();
                    Err(e)
                }
            }
        };

        *self.fallback.lock() = None;
        self.shared.table.set_stop(false);
        ensure_workers(&self.shared);

        match &result {
            Ok(()) => info!(
                frames = config.frame_limit,
                megabytes = config.megabytes(),
                "Cache resized"
            ),
            Err(e) => warn!(error = %e, "Cache resize failed, cache disabled until resized"),
        }
        result
    }

    /// Start (or restart) the worker pool.
    pub fn enable_caching(&self) {
        let _guard = self.reconfigure.lock();
        self.shared.set_enabled(true);
        self.shared.table.set_stop(false);
        ensure_workers(&self.shared);
        info!("Caching enabled");
    }

    /// Stop the worker pool and wait for it to drain. Cached frames stay
    /// readable.
    pub fn disable_caching(&self) {
        let _guard = self.reconfigure.lock();
        self.shared.set_enabled(false);
        stop_and_drain(&self.shared);
        self.shared.table.set_stop(false);
        info!("Caching disabled");
    }

    /// Whether any decode worker is running.
    pub fn is_caching(&self) -> bool {
        self.shared.workers.live() > 0
    }

    /// Forget every cached frame and failure count; workers start over.
    pub fn reset_cache(&self) {
        let _guard = self.reconfigure.lock();
        self.shared.table.reset();
        ensure_workers(&self.shared);
        debug!("Cache reset");
    }

    pub fn set_quality(&self, quality: PlaybackQuality) {
        *self.quality.lock() = quality;
    }

    pub fn quality(&self) -> PlaybackQuality {
        *self.quality.lock()
    }

    /// Swap the correction chain and debayer strategy. Cached frames and the
    /// fallback frame were rendered with the old settings and are dropped.
    pub fn set_processing(&self, settings: &ProcessingSettings) {
        let _guard = self.reconfigure.lock();
        *self.shared.pipeline.write() = Arc::new(Pipeline::new(settings));
        *self.fallback.lock() = None;
        self.shared.table.reset();
        self.shared.clear_reports();
        ensure_workers(&self.shared);
        info!(debayer = ?settings.debayer, "Processing settings changed");
    }

    /// Receiver for pool notifications. Events are dropped while the
    /// channel is full.
    pub fn events(&self) -> Receiver<CacheEvent> {
        self.events.clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        let counts = self.shared.table.counts();
        let arena = self.shared.arena.read();
        CacheStats {
            frame_limit: arena.frame_limit(),
            arena_bytes: arena.capacity_bytes(),
            cached: counts.cached,
            in_flight: counts.in_flight,
            failed: counts.failed,
            live_workers: self.shared.workers.live(),
            caching_enabled: self.shared.enabled.load(Ordering::Acquire),
            arena_writes: arena.write_count(),
        }
    }

    /// Correction report from the latest decode of `frame` under the current
    /// processing settings. `None` when no correction ran or the frame has
    /// not been decoded since the settings last changed.
    pub fn frame_report(&self, frame: usize) -> Option<DecodeReport> {
        self.shared.report(frame)
    }

    /// Cache state of `frame`, or `None` outside the cache window.
    pub fn frame_state(&self, frame: usize) -> Option<CacheState> {
        self.shared.table.state(frame)
    }

    pub fn metadata(&self) -> &ContainerMetadata {
        self.shared.decoder.metadata()
    }

    pub fn index(&self) -> &FrameIndex {
        self.shared.decoder.index()
    }

    pub fn frame_count(&self) -> usize {
        self.shared.decoder.frame_count()
    }

    pub fn config(&self) -> CacheConfig {
        *self.config.lock()
    }

    /// Size of one cached RGB frame in bytes.
    pub fn frame_bytes(&self) -> u64 {
        self.metadata().rgb_frame_bytes()
    }

    /// Stop the pool and release the clip.
    pub fn close(self) {
        drop(self);
    }

    fn shutdown(&self) {
        if self.shared.set_closed() {
            return;
        }
        stop_and_drain(&self.shared);
        *self.shared.arena.write() = CacheArena::empty();
        self.shared.table.clear();
        *self.fallback.lock() = None;
        info!(frames = self.frame_count(), "Closed clip");
    }
}

impl Drop for ClipContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
