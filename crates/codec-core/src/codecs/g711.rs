//! G.711 µ-law (PCMU) and A-law (PCMA).
//!
//! The companding arithmetic lives in [`reference`] as pure per-sample
//! functions; this module wraps them in the [`AudioCodec`] contract with a
//! variant selector. G.711 carries one byte per sample in both directions.

pub mod reference;

pub use reference::{alaw_compress, alaw_expand, ulaw_compress, ulaw_expand};

use tracing::trace;

use crate::error::{CodecError, Result};
use crate::types::AudioCodec;

/// G.711 companding law.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Variant {
    /// µ-law (PCMU, static payload type 0).
    MuLaw,
    /// A-law (PCMA, static payload type 8).
    ALaw,
}

/// A G.711 codec instance.
///
/// Stateless apart from the configured frame size.
pub struct G711Codec {
    variant: G711Variant,
    frame_size: usize,
}

impl G711Codec {
    /// Create an unconfigured codec for the given law.
    pub fn new(variant: G711Variant) -> Self {
        Self {
            variant,
            frame_size: 0,
        }
    }

    /// Create an unconfigured µ-law codec.
    pub fn new_pcmu() -> Self {
        Self::new(G711Variant::MuLaw)
    }

    /// Create an unconfigured A-law codec.
    pub fn new_pcma() -> Self {
        Self::new(G711Variant::ALaw)
    }

    /// The companding law of this instance.
    pub fn variant(&self) -> G711Variant {
        self.variant
    }
}

impl AudioCodec for G711Codec {
    fn configure(&mut self, samples_per_frame: usize) -> Result<()> {
        if samples_per_frame == 0 {
            return Err(CodecError::InvalidFrameSize {
                samples: samples_per_frame,
            });
        }
        self.frame_size = samples_per_frame;
        Ok(())
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn encode(&self, samples: &[i16], payload: &mut [u8]) -> Result<usize> {
        if samples.len() != self.frame_size {
            return Err(CodecError::FrameLengthMismatch {
                expected: self.frame_size,
                actual: samples.len(),
            });
        }
        if payload.len() < samples.len() {
            return Err(CodecError::BufferTooSmall {
                needed: samples.len(),
                actual: payload.len(),
            });
        }

        let out = &mut payload[..samples.len()];
        match self.variant {
            G711Variant::MuLaw => reference::ulaw_compress_frame(samples, out),
            G711Variant::ALaw => reference::alaw_compress_frame(samples, out),
        }

        trace!("{:?} encoded {} samples", self.variant, samples.len());
        Ok(samples.len())
    }

    fn decode(&self, payload: &[u8], samples: &mut [i16]) -> Result<usize> {
        if payload.is_empty() {
            return Err(CodecError::invalid_payload("empty payload"));
        }

        let count = payload.len().min(samples.len());
        match self.variant {
            G711Variant::MuLaw => reference::ulaw_expand_frame(&payload[..count], &mut samples[..count]),
            G711Variant::ALaw => reference::alaw_expand_frame(&payload[..count], &mut samples[..count]),
        }

        trace!("{:?} decoded {} bytes", self.variant, count);
        Ok(count)
    }
}
