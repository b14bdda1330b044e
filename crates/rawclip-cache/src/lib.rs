//! RawClip Cache - Bounded frame cache and decode worker pool
//!
//! This crate handles:
//! - Sizing the RGB frame arena from a byte or frame budget
//! - The per-frame state table and the next-frame dispatcher
//! - Background decode workers and their drain protocol
//! - The clip context players use to fetch frames

pub mod arena;
pub mod clip;
pub mod config;
pub mod pool;
pub mod state;

pub use arena::CacheArena;
pub use clip::{CacheStats, ClipContext, FrameOrigin};
pub use config::{CacheConfig, ClipOptions, FileAccess, PlaybackQuality, ProcessingSettings};
pub use pool::{to_storage_layout, CacheEvent};
pub use state::{CacheState, Claim, Settled, StateCounts, StateTable, MAX_DECODE_ATTEMPTS};
