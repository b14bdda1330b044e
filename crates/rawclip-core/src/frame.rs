//! Frame buffer types for sensor data and reconstructed RGB frames.
//!
//! Both buffers are a single flat allocation indexed through an explicit
//! `(row, col)` accessor with a fixed stride, so no per-row allocations or
//! pointer tables exist anywhere in the pipeline.

use serde::{Deserialize, Serialize};

use crate::memory_budget::{BYTES_PER_SAMPLE, RGB_CHANNELS};

/// Colour of a photosite in the colour-filter mosaic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfaColor {
    Red,
    Green,
    Blue,
}

/// Layout of the 2x2 colour-filter cell, named by its top-left, top-right,
/// bottom-left and bottom-right sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CfaPattern {
    #[default]
    Rggb,
    Bggr,
    Grbg,
    Gbrg,
}

impl CfaPattern {
    /// Decode the pattern code stored in the container.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Rggb),
            1 => Some(Self::Bggr),
            2 => Some(Self::Grbg),
            3 => Some(Self::Gbrg),
            _ => None,
        }
    }

    /// Pattern code as written to the container.
    pub fn code(self) -> u32 {
        match self {
            Self::Rggb => 0,
            Self::Bggr => 1,
            Self::Grbg => 2,
            Self::Gbrg => 3,
        }
    }

    /// Colour of the photosite at `(row, col)`.
    #[inline]
    pub fn color_at(self, row: usize, col: usize) -> CfaColor {
        let cell = [
            [CfaColor::Red, CfaColor::Green, CfaColor::Green, CfaColor::Blue],
            [CfaColor::Blue, CfaColor::Green, CfaColor::Green, CfaColor::Red],
            [CfaColor::Green, CfaColor::Red, CfaColor::Blue, CfaColor::Green],
            [CfaColor::Green, CfaColor::Blue, CfaColor::Red, CfaColor::Green],
        ];
        let idx = match self {
            Self::Rggb => 0,
            Self::Bggr => 1,
            Self::Grbg => 2,
            Self::Gbrg => 3,
        };
        cell[idx][(row & 1) * 2 + (col & 1)]
    }
}

/// Single-channel sensor image (one `u16` per photosite).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    /// Width in photosites
    pub width: u32,
    /// Height in photosites
    pub height: u32,
    /// Samples in row-major order, stride == width
    pub data: Vec<u16>,
}

impl RawImage {
    /// Create a zero-filled image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u16; width as usize * height as usize],
        }
    }

    /// Wrap existing samples. Returns `None` when the length does not match.
    pub fn from_samples(width: u32, height: u32, data: Vec<u16>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// Number of samples per row.
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize
    }

    /// Flat offset of `(row, col)`.
    #[inline]
    pub fn offset(&self, row: usize, col: usize) -> usize {
        row * self.stride() + col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u16 {
        self.data[self.offset(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: u16) {
        let idx = self.offset(row, col);
        self.data[idx] = value;
    }

    /// Get a row of samples.
    #[inline]
    pub fn row(&self, row: usize) -> &[u16] {
        let start = row * self.stride();
        &self.data[start..start + self.stride()]
    }

    /// Get a mutable row of samples.
    #[inline]
    pub fn row_mut(&mut self, row: usize) -> &mut [u16] {
        let stride = self.stride();
        let start = row * stride;
        &mut self.data[start..start + stride]
    }

    /// Resize in place, reusing the allocation when possible.
    pub fn reshape(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.data.resize(width as usize * height as usize, 0);
    }
}

/// Interleaved 16-bit RGB frame as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` samples, RGB interleaved
    pub data: Vec<u16>,
}

impl RgbFrame {
    /// Create a black frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u16; Self::sample_count(width, height)],
        }
    }

    /// Number of `u16` samples in a frame of this size.
    #[inline]
    pub fn sample_count(width: u32, height: u32) -> usize {
        width as usize * height as usize * RGB_CHANNELS
    }

    /// Size of a frame of this size in bytes.
    #[inline]
    pub fn byte_size(width: u32, height: u32) -> u64 {
        (Self::sample_count(width, height) * BYTES_PER_SAMPLE) as u64
    }

    /// RGB triple at `(row, col)`.
    #[inline]
    pub fn pixel(&self, row: usize, col: usize) -> [u16; 3] {
        let i = (row * self.width as usize + col) * RGB_CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Raw bytes in native endianness, e.g. for texture upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rggb_layout() {
        let p = CfaPattern::Rggb;
        assert_eq!(p.color_at(0, 0), CfaColor::Red);
        assert_eq!(p.color_at(0, 1), CfaColor::Green);
        assert_eq!(p.color_at(1, 0), CfaColor::Green);
        assert_eq!(p.color_at(1, 1), CfaColor::Blue);
        assert_eq!(p.color_at(2, 2), CfaColor::Red);
    }

    #[test]
    fn test_pattern_code_roundtrip() {
        for p in [CfaPattern::Rggb, CfaPattern::Bggr, CfaPattern::Grbg, CfaPattern::Gbrg] {
            assert_eq!(CfaPattern::from_code(p.code()), Some(p));
        }
        assert_eq!(CfaPattern::from_code(7), None);
    }

    #[test]
    fn test_raw_image_accessors() {
        let mut img = RawImage::new(4, 3);
        img.set(2, 1, 77);
        assert_eq!(img.get(2, 1), 77);
        assert_eq!(img.row(2), &[0, 77, 0, 0]);
        assert_eq!(img.offset(2, 1), 9);
    }

    #[test]
    fn test_from_samples_checks_length() {
        assert!(RawImage::from_samples(2, 2, vec![0; 4]).is_some());
        assert!(RawImage::from_samples(2, 2, vec![0; 5]).is_none());
    }

    #[test]
    fn test_rgb_frame_size() {
        let frame = RgbFrame::new(1920, 1080);
        assert_eq!(frame.data.len(), 1920 * 1080 * 3);
        assert_eq!(RgbFrame::byte_size(1920, 1080), 1920 * 1080 * 6);
        assert_eq!(frame.as_bytes().len() as u64, RgbFrame::byte_size(1920, 1080));
    }
}
