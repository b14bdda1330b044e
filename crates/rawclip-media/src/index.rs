//! Random-access frame index.
//!
//! The second pass over the container. Every `VIDF` and `AUDF` block
//! carries its own frame number, and entries are placed by that number, so
//! the index does not depend on the physical order of blocks on disk.

use std::io::{Read, Seek, SeekFrom};

use rawclip_core::{RawClipError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::container::{
    body_size, read_block_body, read_block_header, tags, BlockHeader, FieldReader,
    BLOCK_HEADER_SIZE,
};

/// Location of one video frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameIndexEntry {
    /// Chunk file holding the frame
    pub chunk: u32,
    /// Absolute offset of the payload within the chunk
    pub byte_offset: u64,
    /// Payload size in bytes
    pub byte_size: u32,
}

/// Location of one audio frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioIndexEntry {
    pub chunk: u32,
    pub byte_offset: u64,
    pub byte_size: u32,
}

/// Frame number to payload location, for video and audio.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameIndex {
    video: Vec<FrameIndexEntry>,
    audio: Vec<AudioIndexEntry>,
}

impl FrameIndex {
    /// Number of indexed video frames.
    pub fn len(&self) -> usize {
        self.video.len()
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_empty()
    }

    pub fn get(&self, frame: usize) -> Option<FrameIndexEntry> {
        self.video.get(frame).copied()
    }

    pub fn video(&self) -> &[FrameIndexEntry] {
        &self.video
    }

    pub fn audio(&self) -> &[AudioIndexEntry] {
        &self.audio
    }
}

/// Parsed header of a frame block: its number and payload location.
struct FramePayload {
    number: u32,
    offset: u64,
    size: u32,
}

fn read_frame_payload<R: Read>(
    reader: &mut R,
    header: &BlockHeader,
    pos: u64,
    body_len: usize,
    number_skip: usize,
) -> Result<FramePayload> {
    let body = read_block_body(reader, header, pos, body_len)?;
    let mut f = FieldReader::new(&body);
    f.skip(8); // timestamp
    let number = f.u32();
    f.skip(number_skip);
    let frame_space = f.u32();

    let header_len = BLOCK_HEADER_SIZE + body_len as u64;
    let payload_start = header_len + frame_space as u64;
    if payload_start > header.size as u64 {
        return Err(RawClipError::InvalidBlock(format!(
            "{} block at offset {} has frame space {} past its size {}",
            header.tag_str(),
            pos,
            frame_space,
            header.size
        )));
    }
    Ok(FramePayload {
        number,
        offset: pos + payload_start,
        size: header.size - payload_start as u32,
    })
}

fn try_slots<T>(count: usize) -> Result<Vec<Option<T>>> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(count)
        .map_err(|_| RawClipError::AllocationError {
            bytes: (count * std::mem::size_of::<Option<T>>()) as u64,
        })?;
    slots.resize_with(count, || None);
    Ok(slots)
}

/// Build the frame index over every chunk of a clip.
///
/// `frame_count` and `audio_count` come from the scan pass. With `limit`
/// set to 0 the whole clip is indexed and every frame number below
/// `frame_count` must be present. A nonzero `limit` stops after that many
/// video blocks for a preview open; the index then ends at the first frame
/// number not seen.
pub fn build_index<R: Read + Seek>(
    chunks: &mut [R],
    frame_count: usize,
    audio_count: usize,
    limit: usize,
) -> Result<FrameIndex> {
    let mut video: Vec<Option<FrameIndexEntry>> = try_slots(frame_count)?;
    let mut audio: Vec<Option<AudioIndexEntry>> = try_slots(audio_count)?;
    let mut seen = 0usize;

    'chunks: for (chunk, reader) in chunks.iter_mut().enumerate() {
        let chunk = chunk as u32;
        let len = reader.seek(SeekFrom::End(0))?;
        let mut pos = 0u64;

        while pos < len {
            let header = read_block_header(reader, pos, len)?;

            match header.tag {
                tags::VIDEO_FRAME => {
                    let payload =
                        read_frame_payload(reader, &header, pos, body_size::VIDEO_FRAME, 8)?;
                    let n = payload.number as usize;
                    let slot = video.get_mut(n).ok_or_else(|| {
                        RawClipError::InvalidBlock(format!(
                            "frame number {} at offset {} outside clip of {} frames",
                            n, pos, frame_count
                        ))
                    })?;
                    if slot.is_some() {
                        warn!(frame = n, offset = pos, "Duplicate frame number, keeping the later block");
                    }
                    *slot = Some(FrameIndexEntry {
                        chunk,
                        byte_offset: payload.offset,
                        byte_size: payload.size,
                    });

                    seen += 1;
                    if limit > 0 && seen >= limit {
                        debug!(limit, "Preview limit reached");
                        break 'chunks;
                    }
                }
                tags::AUDIO_FRAME => {
                    let payload =
                        read_frame_payload(reader, &header, pos, body_size::AUDIO_FRAME, 0)?;
                    let n = payload.number as usize;
                    match audio.get_mut(n) {
                        Some(slot) => {
                            *slot = Some(AudioIndexEntry {
                                chunk,
                                byte_offset: payload.offset,
                                byte_size: payload.size,
                            })
                        }
                        None => warn!(frame = n, offset = pos, "Audio frame number out of range"),
                    }
                }
                _ => {}
            }

            pos += header.size as u64;
        }
    }

    let video = if limit == 0 {
        video
            .into_iter()
            .enumerate()
            .map(|(n, entry)| {
                entry.ok_or_else(|| RawClipError::InvalidBlock(format!("frame {n} missing")))
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        video.into_iter().map_while(|entry| entry).collect()
    };

    let audio_expected = audio.len();
    let audio: Vec<AudioIndexEntry> = audio.into_iter().map_while(|entry| entry).collect();
    if limit == 0 && audio.len() < audio_expected {
        warn!(
            indexed = audio.len(),
            expected = audio_expected,
            "Audio index ends at first missing frame"
        );
    }

    debug!(video = video.len(), audio = audio.len(), "Frame index built");
    Ok(FrameIndex { video, audio })
}
