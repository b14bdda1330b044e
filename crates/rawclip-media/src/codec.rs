//! Lossless entropy codec interface and the built-in delta codec.
//!
//! Compressed frame payloads are handed to an [`EntropyCodec`] together with
//! the dimensions and bit depth declared by the container. The codec must
//! reject a stream whose own header disagrees with those values.

use rawclip_core::CodecError;

/// A lossless codec for single-channel sensor frames.
pub trait EntropyCodec: Send + Sync {
    /// Codec name for logs.
    fn name(&self) -> &str;

    /// Decode `compressed` into `out`, which holds exactly `width * height`
    /// samples.
    fn decode_into(
        &self,
        compressed: &[u8],
        width: u32,
        height: u32,
        bit_depth: u8,
        out: &mut [u16],
    ) -> Result<(), CodecError>;

    /// Encode `width * height` samples.
    fn encode(
        &self,
        samples: &[u16],
        width: u32,
        height: u32,
        bit_depth: u8,
    ) -> Result<Vec<u8>, CodecError>;

    /// Decode into a freshly allocated buffer.
    fn decode(
        &self,
        compressed: &[u8],
        width: u32,
        height: u32,
        bit_depth: u8,
    ) -> Result<Vec<u16>, CodecError> {
        let mut out = vec![0u16; width as usize * height as usize];
        self.decode_into(compressed, width, height, bit_depth, &mut out)?;
        Ok(out)
    }
}

const MAGIC: [u8; 4] = *b"RCDC";
const HEADER_LEN: usize = 12;

/// Predictive delta codec.
///
/// Stream layout: `"RCDC"`, `u16` width, `u16` height, `u8` bit depth,
/// three reserved bytes, then one zig-zag LEB128 varint per sample holding
/// the difference to its predictor. The predictor is the same-colour
/// neighbour two columns to the left, or two rows up in the first two
/// columns, or mid-range for the top-left 2x2 cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaCodec;

#[inline]
fn predictor(out: &[u16], width: usize, row: usize, col: usize, mid: u16) -> u16 {
    if col >= 2 {
        out[row * width + col - 2]
    } else if row >= 2 {
        out[(row - 2) * width + col]
    } else {
        mid
    }
}

#[inline]
fn zigzag(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

#[inline]
fn unzigzag(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

fn check_depth(bit_depth: u8) -> Result<(), CodecError> {
    if (10..=16).contains(&bit_depth) {
        Ok(())
    } else {
        Err(CodecError::UnsupportedBitDepth(bit_depth))
    }
}

impl EntropyCodec for DeltaCodec {
    fn name(&self) -> &str {
        "delta"
    }

    fn decode_into(
        &self,
        compressed: &[u8],
        width: u32,
        height: u32,
        bit_depth: u8,
        out: &mut [u16],
    ) -> Result<(), CodecError> {
        check_depth(bit_depth)?;
        if compressed.len() < HEADER_LEN || compressed[..4] != MAGIC {
            return Err(CodecError::Corrupt("missing stream header".into()));
        }
        let stream_width = u16::from_le_bytes([compressed[4], compressed[5]]) as u32;
        let stream_height = u16::from_le_bytes([compressed[6], compressed[7]]) as u32;
        let stream_depth = compressed[8];
        if stream_width != width || stream_height != height {
            return Err(CodecError::DimensionMismatch {
                expected_width: width,
                expected_height: height,
                width: stream_width,
                height: stream_height,
            });
        }
        if stream_depth != bit_depth {
            return Err(CodecError::BitDepthMismatch {
                expected: bit_depth,
                got: stream_depth,
            });
        }
        let w = width as usize;
        if out.len() != w * height as usize {
            return Err(CodecError::Corrupt(format!(
                "output holds {} samples, frame has {}",
                out.len(),
                w * height as usize
            )));
        }

        let max = ((1u32 << bit_depth) - 1) as i32;
        let mid = 1u16 << (bit_depth - 1);
        let mut pos = HEADER_LEN;
        for i in 0..out.len() {
            let mut value = 0u32;
            let mut shift = 0;
            loop {
                let byte = *compressed
                    .get(pos)
                    .ok_or_else(|| CodecError::Corrupt(format!("stream ends at sample {i}")))?;
                pos += 1;
                value |= ((byte & 0x7F) as u32) << shift;
                if byte & 0x80 == 0 {
                    break;
                }
                shift += 7;
                if shift > 21 {
                    return Err(CodecError::Corrupt(format!("overlong varint at sample {i}")));
                }
            }
            let (row, col) = (i / w, i % w);
            let sample = predictor(out, w, row, col, mid) as i32 + unzigzag(value);
            if !(0..=max).contains(&sample) {
                return Err(CodecError::Corrupt(format!(
                    "sample {i} decodes to {sample}, outside 0..={max}"
                )));
            }
            out[i] = sample as u16;
        }
        if pos != compressed.len() {
            return Err(CodecError::Corrupt(format!(
                "{} trailing bytes",
                compressed.len() - pos
            )));
        }
        Ok(())
    }

    fn encode(
        &self,
        samples: &[u16],
        width: u32,
        height: u32,
        bit_depth: u8,
    ) -> Result<Vec<u8>, CodecError> {
        check_depth(bit_depth)?;
        let w = width as usize;
        if samples.len() != w * height as usize || width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(CodecError::Corrupt(format!(
                "{} samples cannot form a {}x{} frame",
                samples.len(),
                width,
                height
            )));
        }
        let max = ((1u32 << bit_depth) - 1) as u16;
        let mid = 1u16 << (bit_depth - 1);

        let mut out = Vec::with_capacity(HEADER_LEN + samples.len() * 2);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&(width as u16).to_le_bytes());
        out.extend_from_slice(&(height as u16).to_le_bytes());
        out.push(bit_depth);
        out.extend_from_slice(&[0u8; 3]);

        for (i, &sample) in samples.iter().enumerate() {
            if sample > max {
                return Err(CodecError::Corrupt(format!(
                    "sample {i} value {sample} exceeds {bit_depth}-bit range"
                )));
            }
            let (row, col) = (i / w, i % w);
            let delta = sample as i32 - predictor(samples, w, row, col, mid) as i32;
            let mut v = zigzag(delta);
            loop {
                let byte = (v & 0x7F) as u8;
                v >>= 7;
                if v == 0 {
                    out.push(byte);
                    break;
                }
                out.push(byte | 0x80);
            }
        }
        Ok(out)
    }
}
