//! Cache sizing and clip options.

use rawclip_core::memory_budget::{DEFAULT_CACHE_MEGABYTES, DEFAULT_WORKERS, MEGABYTE};
use rawclip_core::{RawClipError, Result};
use rawclip_media::{CorrectionSettings, DebayerAlgorithm};
use serde::{Deserialize, Serialize};

/// Arena budget: a byte limit and the number of frames it holds.
///
/// `frame_limit = min(byte_limit, total_bytes) / frame_bytes`, so the arena
/// (`frame_limit * frame_bytes`) never exceeds `byte_limit` and never holds
/// more frames than the clip has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheConfig {
    pub byte_limit: u64,
    pub frame_limit: usize,
}

impl CacheConfig {
    /// Size from a byte budget.
    pub fn from_bytes(byte_limit: u64, frame_bytes: u64, frame_count: usize) -> Self {
        let total = frame_bytes.saturating_mul(frame_count as u64);
        let frame_limit = if frame_bytes == 0 {
            0
        } else {
            (byte_limit.min(total) / frame_bytes) as usize
        };
        Self {
            byte_limit,
            frame_limit,
        }
    }

    /// Size from a budget in megabytes (2^20 bytes).
    pub fn from_megabytes(megabytes: u64, frame_bytes: u64, frame_count: usize) -> Self {
        Self::from_bytes(megabytes.saturating_mul(MEGABYTE), frame_bytes, frame_count)
    }

    /// Size from a frame count; the byte limit follows from it.
    pub fn from_frames(frames: usize, frame_bytes: u64, frame_count: usize) -> Self {
        let frame_limit = frames.min(frame_count);
        Self {
            byte_limit: frame_limit as u64 * frame_bytes,
            frame_limit,
        }
    }

    /// Arena size for this configuration.
    pub fn arena_bytes(&self, frame_bytes: u64) -> u64 {
        self.frame_limit as u64 * frame_bytes
    }

    /// Byte limit in whole megabytes.
    pub fn megabytes(&self) -> u64 {
        self.byte_limit / MEGABYTE
    }
}

/// How `get_frame` treats a frame that is not cached yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackQuality {
    /// Wait for the pool to cache the frame, up to the configured wait
    #[default]
    Highest,
    /// Decode synchronously into the fallback slot
    LowLatency,
}

/// How decode threads reach the chunk files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAccess {
    /// One set of handles; seek and read happen under a lock
    Shared,
    /// Every worker opens its own handles
    #[default]
    PerWorker,
}

/// Correction toggles plus the debayer strategy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub corrections: CorrectionSettings,
    pub debayer: DebayerAlgorithm,
}

/// Options for opening a clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipOptions {
    /// Arena budget in megabytes
    pub cache_megabytes: u64,
    /// Arena size in frames; overrides `cache_megabytes` when set
    pub cache_frames: Option<usize>,
    /// Decode worker threads
    pub workers: usize,
    /// Start the worker pool on open
    pub caching_enabled: bool,
    pub quality: PlaybackQuality,
    pub file_access: FileAccess,
    pub processing: ProcessingSettings,
    /// Stop indexing after this many frames (0 indexes the whole clip)
    pub index_limit: usize,
    /// Longest `get_frame` waits for the pool in `Highest` quality
    pub max_wait_ms: u64,
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self {
            cache_megabytes: DEFAULT_CACHE_MEGABYTES,
            cache_frames: None,
            workers: DEFAULT_WORKERS.min(num_cpus::get()),
            caching_enabled: true,
            quality: PlaybackQuality::default(),
            file_access: FileAccess::default(),
            processing: ProcessingSettings::default(),
            index_limit: 0,
            max_wait_ms: 2000,
        }
    }
}

impl ClipOptions {
    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| RawClipError::InvalidParameter(format!("clip options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RawClipError::InvalidParameter(
                "worker count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
