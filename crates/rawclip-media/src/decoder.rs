//! Raw frame decoder: index entry to corrected sensor image.

use std::io;
use std::sync::Arc;

use rawclip_core::{RawClipError, RawImage, Result};
use tracing::trace;

use crate::chunks::FrameSource;
use crate::codec::{DeltaCodec, EntropyCodec};
use crate::container::ContainerMetadata;
use crate::corrections::{CorrectionChain, DecodeReport};
use crate::index::FrameIndex;
use crate::unpack::unpack_bits;

/// Reusable per-thread buffers for payload bytes and unpack words.
#[derive(Debug, Default)]
pub struct DecodeScratch {
    bytes: Vec<u8>,
    words: Vec<u16>,
}

impl DecodeScratch {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Decodes single frames of one clip.
///
/// The decoder itself holds no file handles; each call reads through the
/// [`FrameSource`] the caller owns, so any number of threads can share one
/// decoder.
#[derive(Clone)]
pub struct RawFrameDecoder {
    metadata: Arc<ContainerMetadata>,
    index: Arc<FrameIndex>,
    codec: Arc<dyn EntropyCodec>,
}

impl std::fmt::Debug for RawFrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrameDecoder")
            .field("frames", &self.index.len())
            .field("codec", &self.codec.name())
            .finish()
    }
}

impl RawFrameDecoder {
    /// Decoder using the built-in [`DeltaCodec`] for compressed clips.
    pub fn new(metadata: Arc<ContainerMetadata>, index: Arc<FrameIndex>) -> Self {
        Self::with_codec(metadata, index, Arc::new(DeltaCodec))
    }

    pub fn with_codec(
        metadata: Arc<ContainerMetadata>,
        index: Arc<FrameIndex>,
        codec: Arc<dyn EntropyCodec>,
    ) -> Self {
        Self {
            metadata,
            index,
            codec,
        }
    }

    pub fn metadata(&self) -> &ContainerMetadata {
        &self.metadata
    }

    pub fn index(&self) -> &FrameIndex {
        &self.index
    }

    /// Number of decodable frames.
    pub fn frame_count(&self) -> usize {
        self.index.len()
    }

    /// Decode `frame` into `out` and run the correction chain over it.
    ///
    /// `out` is reshaped to the clip resolution. Its contents are
    /// unspecified after an error and must not be used.
    pub fn decode_frame(
        &self,
        source: &mut dyn FrameSource,
        frame: usize,
        chain: &CorrectionChain,
        out: &mut RawImage,
        scratch: &mut DecodeScratch,
    ) -> Result<DecodeReport> {
        let meta = &*self.metadata;
        let entry = self.index.get(frame).ok_or(RawClipError::FrameOutOfRange {
            frame,
            count: self.index.len(),
        })?;
        out.reshape(meta.width, meta.height);

        if meta.compressed {
            scratch.bytes.resize(entry.byte_size as usize, 0);
            source.read_exact_at(entry.chunk, entry.byte_offset, &mut scratch.bytes)?;
            self.codec.decode_into(
                &scratch.bytes,
                meta.width,
                meta.height,
                meta.bit_depth,
                &mut out.data,
            )?;
        } else {
            let needed = meta.packed_frame_bytes();
            if (entry.byte_size as usize) < needed {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "frame {} payload is {} bytes, packed frame needs {}",
                        frame, entry.byte_size, needed
                    ),
                )
                .into());
            }
            scratch.bytes.resize(needed, 0);
            source.read_exact_at(entry.chunk, entry.byte_offset, &mut scratch.bytes)?;
            if !unpack_bits(&scratch.bytes, meta.bit_depth, &mut out.data, &mut scratch.words) {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
        }

        let report = chain.run(out, meta);
        trace!(frame, stages = report.stages_run.len(), "Decoded frame");
        Ok(report)
    }
}
