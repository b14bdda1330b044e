//! Sensor correction chain.
//!
//! Stages run in a fixed order over the unpacked sensor image. Later
//! stages assume the earlier ones already ran, so [`CorrectionChain`]
//! always sorts its stages by [`StageKind`] regardless of how they were
//! supplied. The built-in stages are simple reference versions; callers
//! can plug in their own through [`CorrectionStage`].

use rawclip_core::{CfaColor, RawImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::container::ContainerMetadata;

/// Correction stages in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Deflicker,
    PatternNoise,
    FocusPixels,
    BadPixels,
    ChromaSmooth,
    VerticalStripes,
}

impl StageKind {
    pub const ORDER: [StageKind; 6] = [
        StageKind::Deflicker,
        StageKind::PatternNoise,
        StageKind::FocusPixels,
        StageKind::BadPixels,
        StageKind::ChromaSmooth,
        StageKind::VerticalStripes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Deflicker => "deflicker",
            Self::PatternNoise => "pattern-noise",
            Self::FocusPixels => "focus-pixels",
            Self::BadPixels => "bad-pixels",
            Self::ChromaSmooth => "chroma-smooth",
            Self::VerticalStripes => "vertical-stripes",
        }
    }
}

/// Side outputs of decoding one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeReport {
    /// Exposure adjustment suggested by deflicker, in stops
    pub exposure_bias_ev: Option<f32>,
    /// Stages that ran, in order
    pub stages_run: SmallVec<[StageKind; 6]>,
}

/// One step of the correction chain.
pub trait CorrectionStage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Correct `image` in place.
    fn apply(&self, image: &mut RawImage, meta: &ContainerMetadata, report: &mut DecodeReport);
}

/// Per-stage toggles and parameters. Everything is off by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionSettings {
    pub deflicker: bool,
    /// Target median as a fraction of the black-to-white range
    pub deflicker_target: f32,
    pub pattern_noise: bool,
    pub focus_pixels: bool,
    /// Focus pixel positions as `[row, col]`
    pub focus_pixel_map: Vec<[u32; 2]>,
    pub bad_pixels: bool,
    /// Deviation from the neighbour mean, as a fraction of the
    /// black-to-white range, above which a photosite is replaced
    pub bad_pixel_threshold: f32,
    pub chroma_smooth: bool,
    pub vertical_stripes: bool,
}

impl Default for CorrectionSettings {
    fn default() -> Self {
        Self {
            deflicker: false,
            deflicker_target: 0.18,
            pattern_noise: false,
            focus_pixels: false,
            focus_pixel_map: Vec::new(),
            bad_pixels: false,
            bad_pixel_threshold: 0.25,
            chroma_smooth: false,
            vertical_stripes: false,
        }
    }
}

/// Ordered set of correction stages.
#[derive(Default)]
pub struct CorrectionChain {
    stages: Vec<Box<dyn CorrectionStage>>,
}

impl std::fmt::Debug for CorrectionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.kind().name()))
            .finish()
    }
}

impl CorrectionChain {
    /// Chain from arbitrary stages, sorted into running order.
    pub fn new(mut stages: Vec<Box<dyn CorrectionStage>>) -> Self {
        stages.sort_by_key(|stage| stage.kind());
        Self { stages }
    }

    /// Chain of the built-in stages enabled in `settings`.
    pub fn from_settings(settings: &CorrectionSettings) -> Self {
        let mut stages: Vec<Box<dyn CorrectionStage>> = Vec::new();
        if settings.deflicker {
            stages.push(Box::new(Deflicker {
                target: settings.deflicker_target,
            }));
        }
        if settings.pattern_noise {
            stages.push(Box::new(PatternNoise));
        }
        if settings.focus_pixels {
            stages.push(Box::new(FocusPixels {
                map: settings.focus_pixel_map.clone(),
            }));
        }
        if settings.bad_pixels {
            stages.push(Box::new(BadPixels {
                threshold: settings.bad_pixel_threshold,
            }));
        }
        if settings.chroma_smooth {
            stages.push(Box::new(ChromaSmooth));
        }
        if settings.vertical_stripes {
            stages.push(Box::new(VerticalStripes));
        }
        Self::new(stages)
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    /// Run every stage over `image`.
    pub fn run(&self, image: &mut RawImage, meta: &ContainerMetadata) -> DecodeReport {
        let mut report = DecodeReport::default();
        for stage in &self.stages {
            stage.apply(image, meta, &mut report);
            report.stages_run.push(stage.kind());
        }
        report
    }
}

#[inline]
fn sample_max(meta: &ContainerMetadata) -> i32 {
    ((1u32 << meta.bit_depth) - 1) as i32
}

#[inline]
fn clamp_sample(v: i32, max: i32) -> u16 {
    v.clamp(0, max) as u16
}

/// Mean of the same-colour neighbours two photosites away horizontally and
/// vertically, read from `src`.
fn same_color_mean(src: &[u16], width: usize, height: usize, row: usize, col: usize) -> Option<i32> {
    let mut sum = 0i32;
    let mut n = 0i32;
    if col >= 2 {
        sum += src[row * width + col - 2] as i32;
        n += 1;
    }
    if col + 2 < width {
        sum += src[row * width + col + 2] as i32;
        n += 1;
    }
    if row >= 2 {
        sum += src[(row - 2) * width + col] as i32;
        n += 1;
    }
    if row + 2 < height {
        sum += src[(row + 2) * width + col] as i32;
        n += 1;
    }
    (n > 0).then(|| sum / n)
}

/// Suggests an exposure bias from the frame median. Pixels are untouched.
struct Deflicker {
    target: f32,
}

impl CorrectionStage for Deflicker {
    fn kind(&self) -> StageKind {
        StageKind::Deflicker
    }

    fn apply(&self, image: &mut RawImage, meta: &ContainerMetadata, report: &mut DecodeReport) {
        let mut histogram = vec![0u32; 1usize << meta.bit_depth];
        for &v in &image.data {
            if let Some(bin) = histogram.get_mut(v as usize) {
                *bin += 1;
            }
        }
        let half = image.data.len() as u64 / 2;
        let mut acc = 0u64;
        let mut median = 0usize;
        for (value, &count) in histogram.iter().enumerate() {
            acc += count as u64;
            if acc > half {
                median = value;
                break;
            }
        }

        let black = meta.black_level as f32;
        let range = (meta.white_level - meta.black_level) as f32;
        let signal = median as f32 - black;
        if signal > 0.0 {
            report.exposure_bias_ev = Some((self.target * range / signal).log2());
        }
    }
}

/// Removes per-row offsets, matching each row's mean to the frame mean.
struct PatternNoise;

impl CorrectionStage for PatternNoise {
    fn kind(&self) -> StageKind {
        StageKind::PatternNoise
    }

    fn apply(&self, image: &mut RawImage, meta: &ContainerMetadata, _report: &mut DecodeReport) {
        let width = image.stride();
        if width == 0 || image.data.is_empty() {
            return;
        }
        let total: u64 = image.data.iter().map(|&v| v as u64).sum();
        let frame_mean = (total / image.data.len() as u64) as i32;
        let max = sample_max(meta);

        image.data.par_chunks_mut(width).for_each(|row| {
            let row_mean = (row.iter().map(|&v| v as u64).sum::<u64>() / width as u64) as i32;
            let shift = frame_mean - row_mean;
            if shift != 0 {
                for v in row.iter_mut() {
                    *v = clamp_sample(*v as i32 + shift, max);
                }
            }
        });
    }
}

/// Replaces the photosites in a fixed map with their same-colour neighbours.
struct FocusPixels {
    map: Vec<[u32; 2]>,
}

impl CorrectionStage for FocusPixels {
    fn kind(&self) -> StageKind {
        StageKind::FocusPixels
    }

    fn apply(&self, image: &mut RawImage, _meta: &ContainerMetadata, _report: &mut DecodeReport) {
        let (width, height) = (image.width as usize, image.height as usize);
        for &[row, col] in &self.map {
            let (row, col) = (row as usize, col as usize);
            if row >= height || col >= width {
                continue;
            }
            if let Some(mean) = same_color_mean(&image.data, width, height, row, col) {
                image.set(row, col, mean as u16);
            }
        }
    }
}

/// Replaces photosites that deviate strongly from their same-colour
/// neighbours.
struct BadPixels {
    threshold: f32,
}

impl CorrectionStage for BadPixels {
    fn kind(&self) -> StageKind {
        StageKind::BadPixels
    }

    fn apply(&self, image: &mut RawImage, meta: &ContainerMetadata, _report: &mut DecodeReport) {
        let (width, height) = (image.width as usize, image.height as usize);
        if width == 0 {
            return;
        }
        let limit = (self.threshold * (meta.white_level - meta.black_level) as f32) as i32;
        let src = image.data.clone();

        image
            .data
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(row, out)| {
                for (col, v) in out.iter_mut().enumerate() {
                    if let Some(mean) = same_color_mean(&src, width, height, row, col) {
                        if (*v as i32 - mean).abs() > limit {
                            *v = mean as u16;
                        }
                    }
                }
            });
    }
}

/// Median-filters the red and blue photosites against their four
/// same-colour neighbours.
struct ChromaSmooth;

impl CorrectionStage for ChromaSmooth {
    fn kind(&self) -> StageKind {
        StageKind::ChromaSmooth
    }

    fn apply(&self, image: &mut RawImage, meta: &ContainerMetadata, _report: &mut DecodeReport) {
        let (width, height) = (image.width as usize, image.height as usize);
        if width < 5 || height < 5 {
            return;
        }
        let cfa = meta.cfa;
        let src = image.data.clone();

        image
            .data
            .par_chunks_mut(width)
            .enumerate()
            .skip(2)
            .take(height - 4)
            .for_each(|(row, out)| {
                for col in 2..width - 2 {
                    if cfa.color_at(row, col) == CfaColor::Green {
                        continue;
                    }
                    let mut window = [
                        src[row * width + col],
                        src[row * width + col - 2],
                        src[row * width + col + 2],
                        src[(row - 2) * width + col],
                        src[(row + 2) * width + col],
                    ];
                    window.sort_unstable();
                    out[col] = window[2];
                }
            });
    }
}

/// Equalizes column gains within each colour channel.
struct VerticalStripes;

impl CorrectionStage for VerticalStripes {
    fn kind(&self) -> StageKind {
        StageKind::VerticalStripes
    }

    fn apply(&self, image: &mut RawImage, meta: &ContainerMetadata, _report: &mut DecodeReport) {
        let (width, height) = (image.width as usize, image.height as usize);
        if width < 2 || height < 2 {
            return;
        }
        let black = meta.black_level as f64;
        let max = sample_max(meta);

        // Column sums split by row parity, since a column holds two colours.
        let mut sums = vec![[0f64; 2]; width];
        for row in 0..height {
            for (col, &v) in image.row(row).iter().enumerate() {
                sums[col][row & 1] += (v as f64 - black).max(0.0);
            }
        }

        // Reference per colour: mean over all columns of the same parity.
        let mut reference = [[0f64; 2]; 2];
        for (col, s) in sums.iter().enumerate() {
            reference[col & 1][0] += s[0];
            reference[col & 1][1] += s[1];
        }
        let columns_per_parity = [width.div_ceil(2) as f64, (width / 2) as f64];
        for parity in 0..2 {
            for half in 0..2 {
                reference[parity][half] /= columns_per_parity[parity];
            }
        }

        let gains: Vec<[f64; 2]> = sums
            .iter()
            .enumerate()
            .map(|(col, s)| {
                let mut g = [1.0; 2];
                for half in 0..2 {
                    if s[half] > 0.0 {
                        g[half] = reference[col & 1][half] / s[half];
                    }
                }
                g
            })
            .collect();

        image
            .data
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(row, out)| {
                for (col, v) in out.iter_mut().enumerate() {
                    let gain = gains[col][row & 1];
                    let corrected = (*v as f64 - black) * gain + black;
                    *v = clamp_sample(corrected.round() as i32, max);
                }
            });
    }
}
