//! # voxcall-rtp-core: Bidirectional RTP/UDP Voice Endpoint
//!
//! The media core of a voice call: given a paired UDP socket (local port
//! bound, remote peer fixed) and a narrow-band PCM codec from
//! `voxcall-codec-core`, an [`AudioStream`] captures microphone frames,
//! encodes them into RTP packets and transmits them on a steady cadence,
//! while simultaneously receiving peer RTP, decoding it and rendering PCM
//! to the loudspeaker. Telephony keypad digits travel in-band as RFC 2833
//! telephony events on their own payload type.
//!
//! ## Pieces
//!
//! - [`socket::RtpSocket`]: a bound UDP endpoint that honors the RTP
//!   even-port discipline and offers a deadline-bounded, truncating
//!   receive.
//! - [`jitter::JitterBuffer`]: a six-slot ring the receiver drains the
//!   socket into, bounding buffered latency to five packets.
//! - [`packet`]: header framing for outgoing audio and telephony events,
//!   and validation/stripping of incoming datagrams.
//! - [`session::AudioStream`]: configuration, lifecycle, DTMF injection and
//!   the two worker threads.
//!
//! Capture and playback devices and the entropy source are external
//! collaborators, abstracted behind the traits in [`device`] and
//! [`entropy`].
//!
//! ## Example
//!
//! ```no_run
//! use std::net::IpAddr;
//! use voxcall_rtp_core::RtpSocket;
//!
//! let mut socket = RtpSocket::bind(IpAddr::from([127, 0, 0, 1]))?;
//! assert_eq!(socket.local_port() % 2, 0);
//! socket.associate(IpAddr::from([192, 0, 2, 10]), 50004)?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! With an associated socket, an audio backend and an entropy source, a
//! session is assembled with [`AudioStream::prepare`] and driven through
//! `start_sending` / `start_receiving` / `send_dtmf` / `stop_*`.
//!
//! ## Threading
//!
//! Each running direction owns one OS thread; blocking I/O (device reads
//! and writes, timed socket receives) is the only suspension mechanism.
//! Stopping is cooperative: the control thread clears the direction flag
//! and joins, and the worker observes the flag after its next blocking call
//! returns.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod entropy;
pub mod error;
pub mod jitter;
pub mod packet;
pub mod session;
pub mod socket;

pub use device::{
    AudioBackend, CaptureDevice, CaptureParams, CaptureSource, PlaybackDevice, PlaybackParams,
    PlaybackStream,
};
pub use entropy::{EntropySource, SystemEntropy};
pub use error::{Result, StreamError};
pub use jitter::JitterBuffer;
pub use packet::{ParsedPacket, RTP_HEADER_SIZE};
pub use session::{AudioStream, AudioStreamConfig, StreamStats};
pub use socket::RtpSocket;
