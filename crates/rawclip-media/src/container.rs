//! Block scanner for the tagged-block raw video container.
//!
//! A container file is a flat sequence of blocks:
//!
//! ```text
//! +------+------------+----------------------+---------+
//! | tag  | block size | tag-specific header  | payload |
//! | [4]  | u32 LE     |                      |         |
//! +------+------------+----------------------+---------+
//! ```
//!
//! The size covers the whole block including the 8-byte `{tag, size}`
//! prefix, so the next block always starts at `block_start + size`.
//! Unknown tags are skipped by size. A clip may be split over several
//! chunk files; each chunk is a self-contained block sequence.

use std::io::{Read, Seek, SeekFrom};

use rawclip_core::{CfaPattern, FrameRate, RationalTime, RawClipError, Result, RgbFrame};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Size of the `{tag, size}` prefix common to every block.
pub const BLOCK_HEADER_SIZE: u64 = 8;

/// Video class flag marking entropy-coded frame payloads.
pub const VIDEO_CLASS_COMPRESSED: u16 = 0x20;

/// Block tags understood by the scanner.
pub mod tags {
    pub const FILE_HEADER: [u8; 4] = *b"MLVI";
    pub const RAW_INFO: [u8; 4] = *b"RAWI";
    pub const AUDIO_INFO: [u8; 4] = *b"WAVI";
    pub const EXPOSURE: [u8; 4] = *b"EXPO";
    pub const LENS: [u8; 4] = *b"LENS";
    pub const IDENTITY: [u8; 4] = *b"IDNT";
    pub const VIDEO_FRAME: [u8; 4] = *b"VIDF";
    pub const AUDIO_FRAME: [u8; 4] = *b"AUDF";
    pub const PADDING: [u8; 4] = *b"NULL";
}

/// Body sizes (after the 8-byte prefix) of the fixed-layout blocks.
pub(crate) mod body_size {
    pub const FILE_HEADER: usize = 44;
    pub const RAW_INFO: usize = 28;
    pub const AUDIO_INFO: usize = 24;
    pub const EXPOSURE: usize = 20;
    pub const NAME: usize = 40;
    /// timestamp, frame number, crop/pan, frame space
    pub const VIDEO_FRAME: usize = 24;
    /// timestamp, frame number, frame space
    pub const AUDIO_FRAME: usize = 16;
}

/// The `{tag, size}` prefix of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub tag: [u8; 4],
    pub size: u32,
}

impl BlockHeader {
    /// Printable tag for logs and errors.
    pub fn tag_str(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }
}

/// Read the block header at `pos`, checking that the whole block fits in `len`.
pub(crate) fn read_block_header<R: Read + Seek>(
    reader: &mut R,
    pos: u64,
    len: u64,
) -> Result<BlockHeader> {
    if pos + BLOCK_HEADER_SIZE > len {
        return Err(RawClipError::ContainerTruncated {
            offset: pos,
            needed: BLOCK_HEADER_SIZE,
            available: len - pos,
        });
    }
    reader.seek(SeekFrom::Start(pos))?;
    let mut raw = [0u8; BLOCK_HEADER_SIZE as usize];
    reader.read_exact(&mut raw)?;
    let header = BlockHeader {
        tag: [raw[0], raw[1], raw[2], raw[3]],
        size: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
    };

    if (header.size as u64) < BLOCK_HEADER_SIZE {
        return Err(RawClipError::InvalidBlock(format!(
            "{} block at offset {} declares size {}",
            header.tag_str(),
            pos,
            header.size
        )));
    }
    if pos + header.size as u64 > len {
        return Err(RawClipError::ContainerTruncated {
            offset: pos,
            needed: header.size as u64,
            available: len - pos,
        });
    }
    Ok(header)
}

/// Read the first `needed` body bytes of a block whose header was just read.
pub(crate) fn read_block_body<R: Read>(
    reader: &mut R,
    header: &BlockHeader,
    pos: u64,
    needed: usize,
) -> Result<Vec<u8>> {
    let available = header.size as usize - BLOCK_HEADER_SIZE as usize;
    if available < needed {
        return Err(RawClipError::InvalidBlock(format!(
            "{} block at offset {} is {} bytes, need at least {}",
            header.tag_str(),
            pos,
            header.size,
            needed + BLOCK_HEADER_SIZE as usize
        )));
    }
    let mut body = vec![0u8; needed];
    reader.read_exact(&mut body)?;
    Ok(body)
}

/// Little-endian field reader over a block body.
pub(crate) struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    pub(crate) fn bytes(&mut self, n: usize) -> &'a [u8] {
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        out
    }

    pub(crate) fn u16(&mut self) -> u16 {
        let b = self.bytes(2);
        u16::from_le_bytes([b[0], b[1]])
    }

    pub(crate) fn u32(&mut self) -> u32 {
        let b = self.bytes(4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub(crate) fn u64(&mut self) -> u64 {
        let b = self.bytes(8);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        u64::from_le_bytes(raw)
    }
}

/// Fields of the `MLVI` file header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub guid: u64,
    pub file_num: u16,
    pub file_count: u16,
    pub video_class: u16,
    pub audio_class: u16,
    pub video_frames: u32,
    pub audio_frames: u32,
    pub frame_rate: FrameRate,
}

/// Fields of the `RAWI` sensor info block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInfo {
    pub width: u16,
    pub height: u16,
    pub bits_per_pixel: u32,
    pub black_level: u32,
    pub white_level: u32,
    pub cfa_code: u32,
}

/// Audio format from the `WAVI` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

/// Exposure settings from the `EXPO` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureInfo {
    pub iso: u32,
    pub shutter_us: u64,
}

/// Everything collected by one scan pass.
///
/// Singleton blocks keep their first occurrence; frame blocks are counted.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub file: Option<FileHeader>,
    pub raw: Option<RawInfo>,
    pub audio: Option<AudioInfo>,
    pub exposure: Option<ExposureInfo>,
    pub lens: Option<String>,
    pub camera: Option<String>,
    pub frame_count: usize,
    pub audio_count: usize,
    pub unknown_blocks: usize,
}

impl ScanSummary {
    /// Fold the summary of a later chunk into this one.
    pub fn merge(&mut self, other: ScanSummary) {
        if self.file.is_none() {
            self.file = other.file;
        }
        if self.raw.is_none() {
            self.raw = other.raw;
        }
        if self.audio.is_none() {
            self.audio = other.audio;
        }
        if self.exposure.is_none() {
            self.exposure = other.exposure;
        }
        if self.lens.is_none() {
            self.lens = other.lens;
        }
        if self.camera.is_none() {
            self.camera = other.camera;
        }
        self.frame_count += other.frame_count;
        self.audio_count += other.audio_count;
        self.unknown_blocks += other.unknown_blocks;
    }

    /// Validate the collected headers and produce the clip metadata.
    pub fn into_metadata(self) -> Result<ContainerMetadata> {
        let file = self
            .file
            .ok_or_else(|| RawClipError::InvalidBlock("missing MLVI file header".into()))?;
        let raw = self
            .raw
            .ok_or_else(|| RawClipError::InvalidBlock("missing RAWI sensor info".into()))?;

        if !(10..=16).contains(&raw.bits_per_pixel) {
            return Err(RawClipError::InvalidBlock(format!(
                "unsupported bit depth {}",
                raw.bits_per_pixel
            )));
        }
        if raw.width == 0 || raw.height == 0 {
            return Err(RawClipError::InvalidBlock(format!(
                "invalid resolution {}x{}",
                raw.width, raw.height
            )));
        }
        if raw.white_level <= raw.black_level {
            return Err(RawClipError::InvalidBlock(format!(
                "white level {} not above black level {}",
                raw.white_level, raw.black_level
            )));
        }
        let cfa = CfaPattern::from_code(raw.cfa_code).ok_or_else(|| {
            RawClipError::InvalidBlock(format!("unknown CFA pattern code {}", raw.cfa_code))
        })?;
        let frame_rate = if file.frame_rate.is_valid() {
            file.frame_rate
        } else {
            FrameRate::default()
        };

        Ok(ContainerMetadata {
            width: raw.width as u32,
            height: raw.height as u32,
            bit_depth: raw.bits_per_pixel as u8,
            black_level: raw.black_level,
            white_level: raw.white_level,
            cfa,
            compressed: file.video_class & VIDEO_CLASS_COMPRESSED != 0,
            frame_count: self.frame_count,
            audio_count: self.audio_count,
            frame_rate,
            declared_frames: file.video_frames,
            file_count: file.file_count,
            camera: self.camera,
            lens: self.lens,
            exposure: self.exposure,
            audio: self.audio,
        })
    }
}

/// Aggregated clip-level metadata, fixed once the scan completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub width: u32,
    pub height: u32,
    /// Bits per packed sample (10..=16)
    pub bit_depth: u8,
    pub black_level: u32,
    pub white_level: u32,
    pub cfa: CfaPattern,
    /// Frame payloads are entropy coded rather than bit packed
    pub compressed: bool,
    /// Number of `VIDF` blocks found
    pub frame_count: usize,
    /// Number of `AUDF` blocks found
    pub audio_count: usize,
    pub frame_rate: FrameRate,
    /// Frame count the file header claims (may be 0 for unfinished recordings)
    pub declared_frames: u32,
    pub file_count: u16,
    pub camera: Option<String>,
    pub lens: Option<String>,
    pub exposure: Option<ExposureInfo>,
    pub audio: Option<AudioInfo>,
}

impl ContainerMetadata {
    /// Photosites per frame.
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes of a bit-packed uncompressed frame.
    #[inline]
    pub fn packed_frame_bytes(&self) -> usize {
        crate::unpack::packed_len(self.sample_count(), self.bit_depth)
    }

    /// Bytes of one decoded RGB frame in cache storage layout.
    #[inline]
    pub fn rgb_frame_bytes(&self) -> u64 {
        RgbFrame::byte_size(self.width, self.height)
    }

    /// Decoded size of the whole clip in bytes.
    #[inline]
    pub fn total_rgb_bytes(&self) -> u64 {
        self.rgb_frame_bytes() * self.frame_count as u64
    }

    /// Presentation time of a frame.
    pub fn frame_time(&self, frame: usize) -> RationalTime {
        RationalTime::from_frames(frame as i64, self.frame_rate)
    }

    /// Clip duration.
    pub fn duration(&self) -> RationalTime {
        self.frame_time(self.frame_count)
    }
}

fn read_name(body: &[u8]) -> Option<String> {
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    let name = String::from_utf8_lossy(&body[..end]).trim().to_string();
    (!name.is_empty()).then_some(name)
}

/// Walk one chunk file and collect its metadata and frame counts.
///
/// The loop is bounded by the stream length: a block that runs past the end
/// fails with [`RawClipError::ContainerTruncated`].
pub fn scan<R: Read + Seek>(reader: &mut R) -> Result<ScanSummary> {
    let len = reader.seek(SeekFrom::End(0))?;
    let mut summary = ScanSummary::default();
    let mut pos = 0u64;

    while pos < len {
        let header = read_block_header(reader, pos, len)?;

        match header.tag {
            tags::FILE_HEADER if summary.file.is_none() => {
                let body = read_block_body(reader, &header, pos, body_size::FILE_HEADER)?;
                let mut f = FieldReader::new(&body);
                f.skip(8); // version string
                let guid = f.u64();
                let file_num = f.u16();
                let file_count = f.u16();
                f.skip(4); // file flags
                let video_class = f.u16();
                let audio_class = f.u16();
                let video_frames = f.u32();
                let audio_frames = f.u32();
                let fps_num = f.u32();
                let fps_den = f.u32();
                summary.file = Some(FileHeader {
                    guid,
                    file_num,
                    file_count,
                    video_class,
                    audio_class,
                    video_frames,
                    audio_frames,
                    frame_rate: FrameRate::new(fps_num, fps_den),
                });
            }
            tags::RAW_INFO if summary.raw.is_none() => {
                let body = read_block_body(reader, &header, pos, body_size::RAW_INFO)?;
                let mut f = FieldReader::new(&body);
                f.skip(8); // timestamp
                summary.raw = Some(RawInfo {
                    width: f.u16(),
                    height: f.u16(),
                    bits_per_pixel: f.u32(),
                    black_level: f.u32(),
                    white_level: f.u32(),
                    cfa_code: f.u32(),
                });
            }
            tags::AUDIO_INFO if summary.audio.is_none() => {
                let body = read_block_body(reader, &header, pos, body_size::AUDIO_INFO)?;
                let mut f = FieldReader::new(&body);
                f.skip(8);
                let format = f.u16();
                let channels = f.u16();
                let sample_rate = f.u32();
                f.skip(6); // bytes per second, block align
                let bits_per_sample = f.u16();
                summary.audio = Some(AudioInfo {
                    format,
                    channels,
                    sample_rate,
                    bits_per_sample,
                });
            }
            tags::EXPOSURE if summary.exposure.is_none() => {
                let body = read_block_body(reader, &header, pos, body_size::EXPOSURE)?;
                let mut f = FieldReader::new(&body);
                f.skip(8);
                summary.exposure = Some(ExposureInfo {
                    iso: f.u32(),
                    shutter_us: f.u64(),
                });
            }
            tags::LENS if summary.lens.is_none() => {
                let body = read_block_body(reader, &header, pos, body_size::NAME)?;
                summary.lens = read_name(&body[8..]);
            }
            tags::IDENTITY if summary.camera.is_none() => {
                let body = read_block_body(reader, &header, pos, body_size::NAME)?;
                summary.camera = read_name(&body[8..]);
            }
            tags::VIDEO_FRAME => summary.frame_count += 1,
            tags::AUDIO_FRAME => summary.audio_count += 1,
            tags::FILE_HEADER
            | tags::RAW_INFO
            | tags::AUDIO_INFO
            | tags::EXPOSURE
            | tags::LENS
            | tags::IDENTITY
            | tags::PADDING => {}
            _ => {
                debug!(tag = %header.tag_str(), offset = pos, "Skipping unknown block");
                summary.unknown_blocks += 1;
            }
        }

        pos += header.size as u64;
    }

    Ok(summary)
}

/// Scan every chunk of a clip and merge the results into clip metadata.
pub fn scan_chunks<R: Read + Seek>(chunks: &mut [R]) -> Result<ContainerMetadata> {
    let mut merged = ScanSummary::default();
    for (i, chunk) in chunks.iter_mut().enumerate() {
        let summary = scan(chunk)?;
        debug!(
            chunk = i,
            frames = summary.frame_count,
            audio = summary.audio_count,
            "Scanned chunk"
        );
        merged.merge(summary);
    }
    let metadata = merged.into_metadata()?;
    info!(
        width = metadata.width,
        height = metadata.height,
        bit_depth = metadata.bit_depth,
        frames = metadata.frame_count,
        compressed = metadata.compressed,
        fps = %metadata.frame_rate,
        "Container scanned"
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{ClipBuilder, ClipWriter};
    use std::io::Cursor;

    fn small_clip() -> Vec<u8> {
        ClipBuilder::new(8, 4, 12)
            .levels(128, 4095)
            .camera("Test Body")
            .flat_frames(3, 1000)
            .build()
    }

    #[test]
    fn test_scan_counts_and_metadata() {
        let bytes = small_clip();
        let summary = scan(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(summary.frame_count, 3);
        assert_eq!(summary.camera.as_deref(), Some("Test Body"));

        let meta = summary.into_metadata().unwrap();
        assert_eq!((meta.width, meta.height, meta.bit_depth), (8, 4, 12));
        assert_eq!((meta.black_level, meta.white_level), (128, 4095));
        assert!(!meta.compressed);
        assert_eq!(meta.packed_frame_bytes(), 8 * 4 * 12 / 8);
    }

    #[test]
    fn test_unknown_tags_are_skipped() {
        let mut w = ClipWriter::new();
        w.file_header(0, 1, 24, 1, 1);
        w.block(*b"ZZZZ", &[0xAB; 13]);
        w.raw_info(4, 2, 10, 0, 1023, CfaPattern::Rggb);
        w.block(*b"QQQQ", &[]);
        let summary = scan(&mut Cursor::new(w.finish())).unwrap();
        assert_eq!(summary.unknown_blocks, 2);
        assert!(summary.raw.is_some());
    }

    #[test]
    fn test_singletons_keep_first_occurrence() {
        let mut w = ClipWriter::new();
        w.file_header(0, 1, 24, 1, 1);
        w.raw_info(4, 2, 10, 0, 1023, CfaPattern::Rggb);
        w.raw_info(16, 16, 14, 0, 16383, CfaPattern::Bggr);
        let meta = scan(&mut Cursor::new(w.finish()))
            .unwrap()
            .into_metadata()
            .unwrap();
        assert_eq!((meta.width, meta.height, meta.bit_depth), (4, 2, 10));
    }

    #[test]
    fn test_truncated_final_block() {
        let mut bytes = small_clip();
        bytes.truncate(bytes.len() - 5);
        let err = scan(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, RawClipError::ContainerTruncated { .. }));
    }

    #[test]
    fn test_truncated_block_header() {
        let mut bytes = small_clip();
        bytes.extend_from_slice(b"VID");
        let err = scan(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(
            err,
            RawClipError::ContainerTruncated { needed: 8, available: 3, .. }
        ));
    }

    #[test]
    fn test_undersized_block_is_rejected() {
        let mut bytes = small_clip();
        bytes.extend_from_slice(b"NULL");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        let err = scan(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, RawClipError::InvalidBlock(_)));
    }

    #[test]
    fn test_missing_raw_info_fails_metadata() {
        let mut w = ClipWriter::new();
        w.file_header(0, 1, 24, 1, 1);
        let err = scan(&mut Cursor::new(w.finish()))
            .unwrap()
            .into_metadata()
            .unwrap_err();
        assert!(matches!(err, RawClipError::InvalidBlock(_)));
    }

    #[test]
    fn test_bad_bit_depth_rejected() {
        let mut w = ClipWriter::new();
        w.file_header(0, 1, 24, 1, 1);
        w.raw_info(4, 2, 8, 0, 255, CfaPattern::Rggb);
        let err = scan(&mut Cursor::new(w.finish()))
            .unwrap()
            .into_metadata()
            .unwrap_err();
        assert!(err.to_string().contains("bit depth"));
    }

    #[test]
    fn test_chunks_merge_counts() {
        let first = small_clip();
        let mut second = ClipWriter::new();
        second.file_header(VIDEO_CLASS_COMPRESSED, 2, 50, 1, 2);
        second.video_frame(3, 0, &[0u8; 48]);
        second.audio_frame(0, 0, &[0u8; 16]);
        let mut chunks = vec![Cursor::new(first), Cursor::new(second.finish())];
        let meta = scan_chunks(&mut chunks).unwrap();
        assert_eq!(meta.frame_count, 4);
        assert_eq!(meta.audio_count, 1);
        // the first chunk's file header wins
        assert!(!meta.compressed);
        assert_eq!(meta.frame_rate, FrameRate::FPS_24);
    }

    #[test]
    fn test_frame_time() {
        let meta = scan(&mut Cursor::new(small_clip()))
            .unwrap()
            .into_metadata()
            .unwrap();
        assert_eq!(meta.frame_time(48), RationalTime::new(2, 1));
        assert_eq!(meta.duration(), RationalTime::new(3, 24));
    }
}
