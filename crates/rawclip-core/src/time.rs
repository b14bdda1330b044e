//! Frame timing.
//!
//! A clip header stores its rate as a fraction (`fps_num / fps_den`), so
//! frame timestamps stay exact fractions of a second.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds as an exact fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RationalTime(Rational64);

impl RationalTime {
    pub const ZERO: Self = Self(Rational64::new_raw(0, 1));

    /// `seconds_num / seconds_den` seconds.
    pub fn new(seconds_num: i64, seconds_den: i64) -> Self {
        Self(Rational64::new(seconds_num, seconds_den))
    }

    /// Start time of `frame` when frame 0 starts at zero.
    pub fn from_frames(frame: i64, rate: FrameRate) -> Self {
        Self(rate.period() * frame)
    }

    pub fn to_seconds_f64(self) -> f64 {
        *self.0.numer() as f64 / *self.0.denom() as f64
    }

    /// The frame showing at this time (rounded down).
    pub fn to_frames(self, rate: FrameRate) -> i64 {
        (self.0 / rate.period()).floor().to_integer()
    }
}

impl Default for RationalTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for RationalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.to_seconds_f64())
    }
}

/// Frames per second as read from the clip header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub const FPS_23_976: Self = Self::new(24000, 1001);
    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_25: Self = Self::new(25, 1);

    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Headers written mid-recording can carry a zero in either field.
    pub fn is_valid(self) -> bool {
        self.numerator != 0 && self.denominator != 0
    }

    pub fn to_fps_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Length of one frame.
    pub fn frame_duration(self) -> RationalTime {
        RationalTime(self.period())
    }

    fn period(self) -> Rational64 {
        Rational64::new(self.denominator as i64, self.numerator as i64)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_24
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator != 0 && self.numerator % self.denominator == 0 {
            write!(f, "{} fps", self.numerator / self.denominator)
        } else {
            write!(f, "{:.3} fps", self.to_fps_f64())
        }
    }
}
