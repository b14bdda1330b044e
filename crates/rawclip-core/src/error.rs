//! Error types for RawClip.

use thiserror::Error;

/// Main error type for RawClip operations.
#[derive(Error, Debug)]
pub enum RawClipError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A block header or body extends past the end of its file.
    #[error("Container truncated at offset {offset}: need {needed} bytes, {available} available")]
    ContainerTruncated {
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Allocation of {bytes} bytes failed")]
    AllocationError { bytes: u64 },

    #[error("Frame {frame} out of range (clip has {count} frames)")]
    FrameOutOfRange { frame: usize, count: usize },

    /// The frame could not be decoded; no pixel data is returned.
    #[error("Frame {frame} unavailable: {reason}")]
    FrameUnavailable { frame: usize, reason: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Errors raised by an entropy codec when it rejects its input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("dimension mismatch: expected {expected_width}x{expected_height}, stream has {width}x{height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    #[error("bit depth mismatch: expected {expected}, stream has {got}")]
    BitDepthMismatch { expected: u8, got: u8 },

    #[error("unsupported bit depth: {0}")]
    UnsupportedBitDepth(u8),

    #[error("corrupt stream: {0}")]
    Corrupt(String),
}

/// Result type alias for RawClip operations.
pub type Result<T> = std::result::Result<T, RawClipError>;

impl RawClipError {
    /// Short human-readable reason, used when a frame failure is reported
    /// to consumers as [`RawClipError::FrameUnavailable`].
    pub fn reason(&self) -> String {
        match self {
            Self::FrameUnavailable { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_converts() {
        let err: RawClipError = CodecError::UnsupportedBitDepth(9).into();
        assert!(matches!(err, RawClipError::Codec(CodecError::UnsupportedBitDepth(9))));
        assert_eq!(err.to_string(), "Codec error: unsupported bit depth: 9");
    }

    #[test]
    fn test_unavailable_reason_is_not_nested() {
        let err = RawClipError::FrameUnavailable {
            frame: 3,
            reason: "short read".into(),
        };
        assert_eq!(err.reason(), "short read");
    }
}
