//! Colour reconstruction from CFA samples to interleaved RGB.

use rawclip_core::{CfaColor, CfaPattern};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A colour reconstruction strategy.
pub trait Debayer: Send + Sync {
    fn name(&self) -> &str;

    /// Produce `width * height * 3` interleaved RGB samples from `raw`.
    fn debayer(&self, raw: &[u16], width: u32, height: u32, pattern: CfaPattern) -> Vec<u16>;
}

/// Built-in strategies selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebayerAlgorithm {
    /// Every channel takes the photosite value
    Identity,
    /// Each 2x2 CFA cell is replicated
    Nearest,
    /// Neighbour averaging per channel
    #[default]
    Bilinear,
}

impl DebayerAlgorithm {
    pub fn strategy(self) -> &'static dyn Debayer {
        match self {
            Self::Identity => &Identity,
            Self::Nearest => &Nearest,
            Self::Bilinear => &Bilinear,
        }
    }
}

/// Debayer with a built-in strategy.
pub fn debayer(
    raw: &[u16],
    width: u32,
    height: u32,
    pattern: CfaPattern,
    algorithm: DebayerAlgorithm,
) -> Vec<u16> {
    algorithm.strategy().debayer(raw, width, height, pattern)
}

#[inline]
fn channel(color: CfaColor) -> usize {
    match color {
        CfaColor::Red => 0,
        CfaColor::Green => 1,
        CfaColor::Blue => 2,
    }
}

struct Identity;

impl Debayer for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn debayer(&self, raw: &[u16], _width: u32, _height: u32, _pattern: CfaPattern) -> Vec<u16> {
        raw.iter().flat_map(|&v| [v, v, v]).collect()
    }
}

struct Nearest;

impl Debayer for Nearest {
    fn name(&self) -> &str {
        "nearest"
    }

    fn debayer(&self, raw: &[u16], width: u32, height: u32, pattern: CfaPattern) -> Vec<u16> {
        let (w, h) = (width as usize, height as usize);
        if w < 2 || h < 2 {
            return Identity.debayer(raw, width, height, pattern);
        }
        let mut out = vec![0u16; w * h * 3];
        out.par_chunks_mut(w * 3).enumerate().for_each(|(row, line)| {
            // a trailing odd row or column reuses the last full cell
            let r0 = (row & !1).min(h - 2);
            for col in 0..w {
                let c0 = (col & !1).min(w - 2);
                let mut sums = [0u32; 3];
                let mut counts = [0u32; 3];
                for r in r0..r0 + 2 {
                    for c in c0..c0 + 2 {
                        let ch = channel(pattern.color_at(r, c));
                        sums[ch] += raw[r * w + c] as u32;
                        counts[ch] += 1;
                    }
                }
                for ch in 0..3 {
                    line[col * 3 + ch] = (sums[ch] / counts[ch].max(1)) as u16;
                }
            }
        });
        out
    }
}

struct Bilinear;

impl Debayer for Bilinear {
    fn name(&self) -> &str {
        "bilinear"
    }

    fn debayer(&self, raw: &[u16], width: u32, height: u32, pattern: CfaPattern) -> Vec<u16> {
        let (w, h) = (width as usize, height as usize);
        let mut out = vec![0u16; w * h * 3];
        if w == 0 {
            return out;
        }
        out.par_chunks_mut(w * 3).enumerate().for_each(|(row, line)| {
            for col in 0..w {
                let own = channel(pattern.color_at(row, col));
                let value = raw[row * w + col];
                let mut sums = [0u32; 3];
                let mut counts = [0u32; 3];
                for r in row.saturating_sub(1)..(row + 2).min(h) {
                    for c in col.saturating_sub(1)..(col + 2).min(w) {
                        let ch = channel(pattern.color_at(r, c));
                        sums[ch] += raw[r * w + c] as u32;
                        counts[ch] += 1;
                    }
                }
                for ch in 0..3 {
                    line[col * 3 + ch] = if ch == own || counts[ch] == 0 {
                        value
                    } else {
                        (sums[ch] / counts[ch]) as u16
                    };
                }
            }
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_replicates_sample() {
        let rgb = debayer(&[1, 2, 3, 4], 2, 2, CfaPattern::Rggb, DebayerAlgorithm::Identity);
        assert_eq!(rgb, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]);
    }

    #[test]
    fn test_nearest_fills_cell() {
        // R=100, G=200/300, B=400
        let raw = [100, 200, 300, 400];
        let rgb = debayer(&raw, 2, 2, CfaPattern::Rggb, DebayerAlgorithm::Nearest);
        for px in rgb.chunks(3) {
            assert_eq!(px, &[100, 250, 400]);
        }
    }

    #[test]
    fn test_nearest_odd_edges() {
        let raw: Vec<u16> = (0..15).collect();
        let rgb = debayer(&raw, 5, 3, CfaPattern::Bggr, DebayerAlgorithm::Nearest);
        assert_eq!(rgb.len(), 45);
        // (2, 4) reuses the BGGR cell at rows 1..3, columns 3..5:
        // R at (1, 3) = 8, G at (1, 4) and (2, 3) = 9 and 13, B at (2, 4) = 14
        let last = &rgb[(2 * 5 + 4) * 3..];
        assert_eq!(last, &[8, 11, 14]);
    }

    #[test]
    fn test_bilinear_flat_field() {
        let raw = vec![777u16; 6 * 4];
        let rgb = debayer(&raw, 6, 4, CfaPattern::Grbg, DebayerAlgorithm::Bilinear);
        assert!(rgb.iter().all(|&v| v == 777));
    }

    #[test]
    fn test_bilinear_keeps_own_channel() {
        let raw: Vec<u16> = (0..16).map(|i| i * 10).collect();
        let rgb = debayer(&raw, 4, 4, CfaPattern::Rggb, DebayerAlgorithm::Bilinear);
        // (1, 1) is blue in RGGB
        assert_eq!(rgb[(4 + 1) * 3 + 2], 50);
        // its red is the mean of the diagonal reds 0, 20, 80 and 100
        assert_eq!(rgb[(4 + 1) * 3], 50);
    }

    #[test]
    fn test_algorithm_serde_names() {
        assert_eq!(
            serde_json::to_string(&DebayerAlgorithm::Identity).unwrap(),
            "\"identity\""
        );
        assert_eq!(DebayerAlgorithm::default(), DebayerAlgorithm::Bilinear);
        assert_eq!(DebayerAlgorithm::Nearest.strategy().name(), "nearest");
    }
}
