//! # voxcall-codec-core: Narrow-Band PCM Codecs
//!
//! Bit-exact ITU-T G.711 µ-law (PCMU) and A-law (PCMA) for the voxcall
//! media stack. Both laws compress 16-bit linear PCM to one byte per sample
//! and are stateless, so a single configured instance can serve concurrent
//! encode and decode paths.
//!
//! ## Usage
//!
//! ```
//! use voxcall_codec_core::{from_name, AudioCodec};
//!
//! let mut codec = from_name("PCMU")?;
//! codec.configure(160)?;
//!
//! let samples = [0i16; 160];
//! let mut payload = [0u8; 160];
//! let written = codec.encode(&samples, &mut payload)?;
//! assert_eq!(written, 160);
//!
//! let mut decoded = [0i16; 160];
//! let count = codec.decode(&payload[..written], &mut decoded)?;
//! assert_eq!(count, 160);
//! # Ok::<(), voxcall_codec_core::CodecError>(())
//! ```
//!
//! The raw companding primitives are also exposed for callers that work a
//! sample at a time:
//!
//! ```
//! use voxcall_codec_core::codecs::g711::{ulaw_compress, ulaw_expand};
//!
//! assert_eq!(ulaw_compress(0), 0xFF);
//! assert_eq!(ulaw_expand(0xFF), 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codecs;
pub mod error;
pub mod types;

pub use codecs::from_name;
pub use error::{CodecError, Result};
pub use types::AudioCodec;

/// RTP codec names this crate can resolve.
pub const SUPPORTED_CODECS: &[&str] = &["PCMU", "PCMA"];
