//! Codec implementations and the by-name factory.

pub mod g711;

use crate::error::{CodecError, Result};
use crate::types::AudioCodec;

use g711::{G711Codec, G711Variant};

/// Resolve a codec by its RTP name.
///
/// Knows `"PCMU"` (G.711 µ-law) and `"PCMA"` (G.711 A-law). The returned
/// codec still needs [`AudioCodec::configure`] before use.
pub fn from_name(name: &str) -> Result<Box<dyn AudioCodec>> {
    match name {
        "PCMU" => Ok(Box::new(G711Codec::new(G711Variant::MuLaw))),
        "PCMA" => Ok(Box::new(G711Codec::new(G711Variant::ALaw))),
        other => Err(CodecError::unsupported_codec(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_sensitive() {
        assert!(from_name("pcmu").is_err());
        assert!(from_name("PCMU").is_ok());
    }
}
