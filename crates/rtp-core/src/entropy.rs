//! Entropy for the random RTP identifiers.
//!
//! Each session seeds its initial sequence number, timestamp and SSRC from
//! an [`EntropySource`] at prepare time (2 + 4 + 4 bytes).

use std::io;

use rand::rngs::OsRng;
use rand::RngCore;

/// A source of unpredictable bytes.
pub trait EntropySource {
    /// Fill `buf` with random bytes.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

/// The operating system RNG, freely shared across sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEntropy;

impl EntropySource for SystemEntropy {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
    }
}
