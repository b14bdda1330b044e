//! Synthetic container writer for tests.
//!
//! [`ClipWriter`] emits individual blocks in the on-disk layout read by
//! [`crate::container`]; [`ClipBuilder`] assembles a complete clip from
//! sample buffers, optionally writing frames in a shuffled physical order.

use rawclip_core::CfaPattern;

use crate::codec::{DeltaCodec, EntropyCodec};
use crate::container::{tags, VIDEO_CLASS_COMPRESSED};
use crate::unpack::pack_bits;

/// Low-level block emitter.
#[derive(Debug, Default)]
pub struct ClipWriter {
    buf: Vec<u8>,
}

impl ClipWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write position, i.e. the offset of the next block.
    pub fn position(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Emit a block with an arbitrary tag and body.
    pub fn block(&mut self, tag: [u8; 4], body: &[u8]) {
        self.buf.extend_from_slice(&tag);
        self.buf
            .extend_from_slice(&(8 + body.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(body);
    }

    pub fn file_header(
        &mut self,
        video_class: u16,
        file_count: u16,
        fps_num: u32,
        fps_den: u32,
        file_num: u16,
    ) {
        let mut body = Vec::with_capacity(44);
        body.extend_from_slice(b"v2.0\0\0\0\0");
        body.extend_from_slice(&0x5eed_u64.to_le_bytes());
        body.extend_from_slice(&file_num.to_le_bytes());
        body.extend_from_slice(&file_count.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&video_class.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&fps_num.to_le_bytes());
        body.extend_from_slice(&fps_den.to_le_bytes());
        self.block(tags::FILE_HEADER, &body);
    }

    pub fn raw_info(
        &mut self,
        width: u16,
        height: u16,
        bits_per_pixel: u32,
        black_level: u32,
        white_level: u32,
        cfa: CfaPattern,
    ) {
        let mut body = Vec::with_capacity(28);
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&width.to_le_bytes());
        body.extend_from_slice(&height.to_le_bytes());
        body.extend_from_slice(&bits_per_pixel.to_le_bytes());
        body.extend_from_slice(&black_level.to_le_bytes());
        body.extend_from_slice(&white_level.to_le_bytes());
        body.extend_from_slice(&cfa.code().to_le_bytes());
        self.block(tags::RAW_INFO, &body);
    }

    fn name_block(&mut self, tag: [u8; 4], name: &str) {
        let mut body = vec![0u8; 40];
        let bytes = name.as_bytes();
        let n = bytes.len().min(32);
        body[8..8 + n].copy_from_slice(&bytes[..n]);
        self.block(tag, &body);
    }

    pub fn camera(&mut self, name: &str) {
        self.name_block(tags::IDENTITY, name);
    }

    pub fn lens(&mut self, name: &str) {
        self.name_block(tags::LENS, name);
    }

    /// Emit a `VIDF` block and return the absolute offset of its payload.
    pub fn video_frame(&mut self, frame_number: u32, frame_space: u32, payload: &[u8]) -> u64 {
        let mut body = Vec::with_capacity(24 + frame_space as usize + payload.len());
        body.extend_from_slice(&(frame_number as u64 * 1000).to_le_bytes());
        body.extend_from_slice(&frame_number.to_le_bytes());
        body.extend_from_slice(&[0u8; 8]); // crop / pan
        body.extend_from_slice(&frame_space.to_le_bytes());
        body.extend(std::iter::repeat(0xEEu8).take(frame_space as usize));
        body.extend_from_slice(payload);
        let payload_offset = self.position() + 8 + 24 + frame_space as u64;
        self.block(tags::VIDEO_FRAME, &body);
        payload_offset
    }

    /// Emit an `AUDF` block and return the absolute offset of its payload.
    pub fn audio_frame(&mut self, frame_number: u32, frame_space: u32, payload: &[u8]) -> u64 {
        let mut body = Vec::with_capacity(16 + frame_space as usize + payload.len());
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&frame_number.to_le_bytes());
        body.extend_from_slice(&frame_space.to_le_bytes());
        body.extend(std::iter::repeat(0u8).take(frame_space as usize));
        body.extend_from_slice(payload);
        let payload_offset = self.position() + 8 + 16 + frame_space as u64;
        self.block(tags::AUDIO_FRAME, &body);
        payload_offset
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Assembles a complete single-chunk clip from frame samples.
#[derive(Debug, Clone)]
pub struct ClipBuilder {
    width: u16,
    height: u16,
    bit_depth: u8,
    black_level: u32,
    white_level: u32,
    cfa: CfaPattern,
    compressed: bool,
    fps: (u32, u32),
    camera: Option<String>,
    frames: Vec<Vec<u16>>,
    order: Option<Vec<usize>>,
    frame_space: u32,
    audio_frames: usize,
}

impl ClipBuilder {
    pub fn new(width: u16, height: u16, bit_depth: u8) -> Self {
        Self {
            width,
            height,
            bit_depth,
            black_level: 0,
            white_level: (1u32 << bit_depth) - 1,
            cfa: CfaPattern::Rggb,
            compressed: false,
            fps: (24, 1),
            camera: None,
            frames: Vec::new(),
            order: None,
            frame_space: 0,
            audio_frames: 0,
        }
    }

    pub fn levels(mut self, black: u32, white: u32) -> Self {
        self.black_level = black;
        self.white_level = white;
        self
    }

    pub fn cfa(mut self, cfa: CfaPattern) -> Self {
        self.cfa = cfa;
        self
    }

    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn frame_rate(mut self, num: u32, den: u32) -> Self {
        self.fps = (num, den);
        self
    }

    pub fn camera(mut self, name: &str) -> Self {
        self.camera = Some(name.to_string());
        self
    }

    /// Padding inserted between each frame header and its payload.
    pub fn frame_space(mut self, frame_space: u32) -> Self {
        self.frame_space = frame_space;
        self
    }

    pub fn audio_frames(mut self, count: usize) -> Self {
        self.audio_frames = count;
        self
    }

    /// Append a frame; `samples` must hold `width * height` values.
    pub fn frame(mut self, samples: Vec<u16>) -> Self {
        assert_eq!(samples.len(), self.width as usize * self.height as usize);
        self.frames.push(samples);
        self
    }

    /// Append `count` frames filled with a constant value.
    pub fn flat_frames(mut self, count: usize, value: u16) -> Self {
        let n = self.width as usize * self.height as usize;
        for _ in 0..count {
            self.frames.push(vec![value; n]);
        }
        self
    }

    /// Physical write order of the frames (a permutation of frame numbers).
    pub fn write_order(mut self, order: Vec<usize>) -> Self {
        self.order = Some(order);
        self
    }

    /// Encoded payload of frame `n` as it will be written.
    pub fn payload(&self, n: usize) -> Vec<u8> {
        let samples = &self.frames[n];
        if self.compressed {
            DeltaCodec
                .encode(samples, self.width as u32, self.height as u32, self.bit_depth)
                .expect("fixture samples fit the declared bit depth")
        } else {
            pack_bits(samples, self.bit_depth)
        }
    }

    /// Build the clip and return the bytes plus each frame's payload offset,
    /// indexed by frame number.
    pub fn build_with_offsets(&self) -> (Vec<u8>, Vec<u64>) {
        let mut w = ClipWriter::new();
        let class = if self.compressed {
            VIDEO_CLASS_COMPRESSED | 0x01
        } else {
            0x01
        };
        w.file_header(class, 1, self.fps.0, self.fps.1, 0);
        w.raw_info(
            self.width,
            self.height,
            self.bit_depth as u32,
            self.black_level,
            self.white_level,
            self.cfa,
        );
        if let Some(camera) = &self.camera {
            w.camera(camera);
        }

        let order: Vec<usize> = self
            .order
            .clone()
            .unwrap_or_else(|| (0..self.frames.len()).collect());
        let mut offsets = vec![0u64; self.frames.len()];
        for (i, &n) in order.iter().enumerate() {
            offsets[n] = w.video_frame(n as u32, self.frame_space, &self.payload(n));
            if i < self.audio_frames {
                w.audio_frame(i as u32, 0, &[0u8; 64]);
            }
        }
        (w.finish(), offsets)
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_with_offsets().0
    }
}
