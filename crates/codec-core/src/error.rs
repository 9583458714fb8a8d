//! Error handling for codec operations.

use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while configuring or running a codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The requested codec name is not known to this crate.
    #[error("unsupported codec: {name}")]
    UnsupportedCodec {
        /// The name that failed to resolve.
        name: String,
    },

    /// The frame size does not satisfy the codec's constraints.
    #[error("invalid frame size: {samples} samples")]
    InvalidFrameSize {
        /// The rejected sample count.
        samples: usize,
    },

    /// The input frame does not match the configured size.
    #[error("frame length mismatch: expected {expected} samples, got {actual}")]
    FrameLengthMismatch {
        /// Configured samples per frame.
        expected: usize,
        /// Samples actually supplied.
        actual: usize,
    },

    /// The output buffer cannot hold the result.
    #[error("buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall {
        /// Bytes the operation would produce.
        needed: usize,
        /// Bytes available in the output buffer.
        actual: usize,
    },

    /// The payload cannot be decoded.
    #[error("invalid payload: {details}")]
    InvalidPayload {
        /// What made the payload unusable.
        details: String,
    },
}

impl CodecError {
    /// Create a new unsupported codec error.
    pub fn unsupported_codec(name: impl Into<String>) -> Self {
        Self::UnsupportedCodec { name: name.into() }
    }

    /// Create a new invalid payload error.
    pub fn invalid_payload(details: impl Into<String>) -> Self {
        Self::InvalidPayload {
            details: details.into(),
        }
    }
}
