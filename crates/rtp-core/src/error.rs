//! Error handling for the media endpoint.

use std::io;

use thiserror::Error;
use voxcall_codec_core::CodecError;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors surfaced to the session owner.
///
/// Per-packet problems are not represented here: the worker loops log them
/// and carry on. Socket creation and association report plain
/// [`io::Error`]s so the OS errno reaches the caller unchanged.
#[derive(Error, Debug)]
pub enum StreamError {
    /// A configuration parameter is out of range or inconsistent.
    #[error("invalid stream configuration: {details}")]
    InvalidConfig {
        /// What was wrong with the parameters.
        details: String,
    },

    /// The socket handed to `prepare` has no associated remote peer.
    #[error("socket has no associated remote peer")]
    NotAssociated,

    /// An RTP payload type outside 0..=127.
    #[error("invalid payload type {value}")]
    InvalidPayloadType {
        /// The rejected value.
        value: u8,
    },

    /// A device could not be opened.
    #[error("failed to open {direction} device: {source}")]
    DeviceOpen {
        /// `"capture"` or `"playback"`.
        direction: &'static str,
        /// The device's own error.
        #[source]
        source: io::Error,
    },

    /// A device could not be started.
    #[error("failed to start {direction} device: {source}")]
    DeviceStart {
        /// `"capture"` or `"playback"`.
        direction: &'static str,
        /// The device's own error.
        #[source]
        source: io::Error,
    },

    /// A worker thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        /// Thread name.
        name: &'static str,
        /// The OS error.
        #[source]
        source: io::Error,
    },

    /// A worker thread panicked and its state was lost.
    #[error("{name} worker state was lost")]
    WorkerLost {
        /// `"sender"` or `"receiver"`.
        name: &'static str,
    },

    /// The entropy source could not deliver bytes.
    #[error("entropy source failed: {source}")]
    Entropy {
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// A DTMF event outside 0..=15.
    #[error("invalid DTMF event {event}")]
    InvalidDtmfEvent {
        /// The rejected digit.
        event: u8,
    },

    /// DTMF was requested while not sending or without a DTMF payload type.
    #[error("DTMF is not available on this stream")]
    DtmfUnavailable,

    /// The single-digit hand-off slot stayed busy through the back-off.
    #[error("DTMF injection slot is busy")]
    DtmfBusy,

    /// A codec error during configuration.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl StreamError {
    /// Create a new invalid configuration error.
    pub fn invalid_config(details: impl Into<String>) -> Self {
        Self::InvalidConfig {
            details: details.into(),
        }
    }
}
