//! Audio device contracts.
//!
//! Capture and playback hardware are external collaborators; the session
//! relies only on the blocking contracts below. All audio is 16-bit signed
//! PCM, mono, at the session's sample rate.

use std::io;

/// Capture source selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// The platform microphone path.
    Microphone,
}

/// Playback routing selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStream {
    /// The in-call voice path.
    VoiceCall,
}

/// Parameters for opening a capture device.
#[derive(Debug, Clone)]
pub struct CaptureParams {
    /// Where the samples come from.
    pub source: CaptureSource,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Device buffer hint in samples, `None` for the device default.
    pub buffer_frames: Option<usize>,
}

/// Parameters for opening a playback device.
#[derive(Debug, Clone)]
pub struct PlaybackParams {
    /// Where the samples go.
    pub stream: PlaybackStream,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Device buffer hint in samples, `None` for the device default.
    pub buffer_frames: Option<usize>,
}

/// Blocking microphone reader.
///
/// `read` blocks until samples are available and returns the count actually
/// read. Devices recover from transient glitches internally, so anything
/// short of the requested frame is terminal for the sender.
pub trait CaptureDevice: Send {
    /// Start capturing.
    fn start(&mut self) -> io::Result<()>;
    /// Stop capturing. Idempotent.
    fn stop(&mut self);
    /// Read one frame, blocking until it is complete.
    fn read(&mut self, samples: &mut [i16]) -> io::Result<usize>;
}

/// Blocking loudspeaker writer.
///
/// `write` returns the count actually written; a short write is terminal
/// for the receiver.
pub trait PlaybackDevice: Send {
    /// Start playback.
    fn start(&mut self) -> io::Result<()>;
    /// Stop playback. Idempotent.
    fn stop(&mut self);
    /// Write one frame, blocking until the device has taken it.
    fn write(&mut self, samples: &[i16]) -> io::Result<usize>;
}

/// Factory for the platform's audio devices.
pub trait AudioBackend {
    /// Open a capture device with the given parameters.
    fn open_capture(&self, params: &CaptureParams) -> io::Result<Box<dyn CaptureDevice>>;
    /// Open a playback device with the given parameters.
    fn open_playback(&self, params: &PlaybackParams) -> io::Result<Box<dyn PlaybackDevice>>;
}
