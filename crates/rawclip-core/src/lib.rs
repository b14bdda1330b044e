//! RawClip Core - Foundation types for raw video decoding
//!
//! This crate provides the fundamental types used throughout RawClip:
//! - Error types shared by the container, decoder and cache layers
//! - Flat sensor and RGB frame buffers with stride accessors
//! - Frame rate and frame-accurate time representation

pub mod error;
pub mod frame;
pub mod time;

pub use error::{CodecError, RawClipError, Result};
pub use frame::{CfaColor, CfaPattern, RawImage, RgbFrame};
pub use time::{FrameRate, RationalTime};

/// Memory budget constants for the decoded-frame cache.
pub mod memory_budget {
    /// Default cache budget for decoded frames in RAM.
    pub const DEFAULT_CACHE_MEGABYTES: u64 = 1024;

    /// Bytes in one megabyte as used by cache limits.
    pub const MEGABYTE: u64 = 1 << 20;

    /// Default number of decode worker threads.
    pub const DEFAULT_WORKERS: usize = 4;

    /// Bytes per stored RGB frame channel sample (16-bit storage).
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Channels per stored RGB pixel.
    pub const RGB_CHANNELS: usize = 3;
}
