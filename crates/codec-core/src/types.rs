//! The codec contract shared by all PCM codecs.

use crate::error::Result;

/// A narrow-band PCM codec.
///
/// Implementations are stateless once configured: `encode` and `decode`
/// take `&self`, so one instance can serve a sender and a receiver thread
/// at the same time. Both operations write into caller-supplied buffers and
/// never allocate.
pub trait AudioCodec: Send + Sync {
    /// Fix the number of samples carried by one packet.
    ///
    /// Any positive count is acceptable to the G.711 family; other codecs
    /// may constrain it further.
    fn configure(&mut self, samples_per_frame: usize) -> Result<()>;

    /// The configured samples per frame (0 before [`Self::configure`]).
    fn frame_size(&self) -> usize;

    /// Encode one frame of 16-bit PCM into `payload`.
    ///
    /// `samples` must hold exactly one configured frame. Returns the number
    /// of payload bytes written.
    fn encode(&self, samples: &[i16], payload: &mut [u8]) -> Result<usize>;

    /// Decode `payload` into 16-bit PCM.
    ///
    /// Writes at most `samples.len()` samples and returns the number
    /// written.
    fn decode(&self, payload: &[u8], samples: &mut [i16]) -> Result<usize>;
}
