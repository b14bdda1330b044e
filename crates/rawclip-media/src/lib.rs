//! RawClip Media - container parsing and raw frame decoding
//!
//! This crate handles:
//! - Scanning the tagged-block container into metadata and counts
//! - Building the random-access frame index
//! - Reading frames through shared or per-thread chunk handles
//! - Bit unpacking and entropy decoding of frame payloads
//! - The fixed-order sensor correction chain
//! - Colour reconstruction (debayer) strategies

pub mod chunks;
pub mod codec;
pub mod container;
pub mod corrections;
pub mod debayer;
pub mod decoder;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixture;
pub mod index;
pub mod unpack;

pub use chunks::{ChunkHandles, ChunkSet, FrameSource, SharedChunks};
pub use codec::{DeltaCodec, EntropyCodec};
pub use container::{scan, scan_chunks, AudioInfo, ContainerMetadata, ExposureInfo, ScanSummary};
pub use corrections::{CorrectionChain, CorrectionSettings, CorrectionStage, DecodeReport, StageKind};
pub use debayer::{debayer, Debayer, DebayerAlgorithm};
pub use decoder::{DecodeScratch, RawFrameDecoder};
pub use index::{build_index, AudioIndexEntry, FrameIndex, FrameIndexEntry};
pub use unpack::{pack_bits, packed_len, unpack_bits};
