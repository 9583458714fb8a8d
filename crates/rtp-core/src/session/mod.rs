//! The audio session: configuration, lifecycle, DTMF injection and the two
//! worker threads.
//!
//! An [`AudioStream`] owns the session socket, the codec, both audio
//! devices and up to two worker threads. Each direction keeps its mutable
//! working set (device handle, RTP counters, jitter buffer) in a state cell
//! that the worker takes when it starts and returns when it exits, so a
//! stopped direction can be restarted and sequence numbers continue where
//! they left off.
//!
//! Stopping is cooperative: `stop_*` clears the direction flag, joins the
//! worker (which notices the flag once its current blocking call returns)
//! and then stops the device. A worker that hits a fatal condition (short
//! device read/write, encode failure) clears its own flag, stops its device
//! and exits, leaving the opposite direction running.

mod receiver;
mod sender;

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;
use voxcall_codec_core::{self as codec_core, AudioCodec};

use crate::device::{
    AudioBackend, CaptureDevice, CaptureParams, CaptureSource, PlaybackDevice, PlaybackParams,
    PlaybackStream,
};
use crate::entropy::EntropySource;
use crate::error::{Result, StreamError};
use crate::jitter::{JitterBuffer, SLOT_SLACK};
use crate::packet;
use crate::socket::RtpSocket;

use receiver::ReceiverState;
use sender::SenderState;

/// Fixed microphone boost applied when `boost_mic_gain` is set.
const MIC_GAIN_FACTOR: i32 = 8;

/// Sentinel meaning "no pending DTMF digit" in the hand-off slot.
const DTMF_NONE: i32 = -1;

/// Parameters for [`AudioStream::prepare`].
#[derive(Debug, Clone)]
pub struct AudioStreamConfig {
    /// RTP codec name, `"PCMU"` or `"PCMA"`.
    pub codec: String,
    /// Sample rate in Hz. Must exceed `sample_count`.
    pub sample_rate: u32,
    /// Samples carried by one packet.
    pub sample_count: usize,
    /// RTP payload type for audio packets (0..=127).
    pub codec_payload_type: u8,
    /// RTP payload type for telephony events, `None` to disable DTMF.
    pub dtmf_payload_type: Option<u8>,
    /// Apply the fixed capture gain boost.
    pub boost_mic_gain: bool,
}

impl AudioStreamConfig {
    /// 20 ms PCMU at 8 kHz with the conventional payload types.
    pub fn pcmu_8k() -> Self {
        Self {
            codec: "PCMU".to_string(),
            sample_rate: 8000,
            sample_count: 160,
            codec_payload_type: 0,
            dtmf_payload_type: Some(101),
            boost_mic_gain: false,
        }
    }

    /// 20 ms PCMA at 8 kHz with the conventional payload types.
    pub fn pcma_8k() -> Self {
        Self {
            codec: "PCMA".to_string(),
            codec_payload_type: 8,
            ..Self::pcmu_8k()
        }
    }
}

/// Counters accumulated over the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStats {
    /// Audio and telephony-event packets emitted.
    pub packets_sent: u64,
    /// Packets accepted, decoded and played.
    pub packets_received: u64,
    /// Datagrams discarded by the receive drain.
    pub packets_dropped: u64,
}

#[derive(Default)]
struct StatsCells {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    packets_dropped: AtomicU64,
}

/// State shared between the control thread and both workers.
struct StreamShared {
    socket: RtpSocket,
    codec: Box<dyn AudioCodec>,
    sample_rate: u32,
    sample_count: usize,
    codec_magic: u32,
    dtmf_magic: Option<u32>,
    send_interval_us: u64,
    boost_mic_gain: bool,
    epoch: Instant,
    sending: AtomicBool,
    receiving: AtomicBool,
    muted: AtomicBool,
    next_dtmf: AtomicI32,
    stats: StatsCells,
}

struct Worker<S> {
    state: Arc<Mutex<Option<S>>>,
    handle: Option<JoinHandle<()>>,
}

impl<S> Worker<S> {
    fn new(state: S) -> Self {
        Self {
            state: Arc::new(Mutex::new(Some(state))),
            handle: None,
        }
    }
}

fn lock<S>(cell: &Mutex<Option<S>>) -> MutexGuard<'_, Option<S>> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A bidirectional RTP voice session over one paired UDP socket.
pub struct AudioStream {
    shared: Arc<StreamShared>,
    sender: Worker<SenderState>,
    receiver: Worker<ReceiverState>,
}

impl AudioStream {
    /// Validate the configuration and assemble a session.
    ///
    /// Opens both devices (with a double-buffer hint of `2 × sample_count`
    /// samples, falling back to the device default when the hint is
    /// rejected), seeds the local sequence number, timestamp and SSRC from
    /// `entropy`, and precomputes the header magics and the send interval.
    /// The socket must already be associated with the remote peer.
    pub fn prepare(
        socket: RtpSocket,
        config: &AudioStreamConfig,
        backend: &dyn AudioBackend,
        entropy: &mut dyn EntropySource,
    ) -> Result<Self> {
        if !socket.is_associated() {
            return Err(StreamError::NotAssociated);
        }
        // One packet per second is not a usable cadence.
        if config.sample_count == 0 || config.sample_rate as usize <= config.sample_count {
            return Err(StreamError::invalid_config(format!(
                "sample rate {} must exceed sample count {}",
                config.sample_rate, config.sample_count
            )));
        }
        if config.codec_payload_type > 127 {
            return Err(StreamError::InvalidPayloadType {
                value: config.codec_payload_type,
            });
        }
        if let Some(pt) = config.dtmf_payload_type {
            if pt > 127 {
                return Err(StreamError::InvalidPayloadType { value: pt });
            }
        }

        let mut codec = codec_core::from_name(&config.codec)?;
        codec.configure(config.sample_count)?;

        let capture = open_capture(backend, config)?;
        let playback = open_playback(backend, config)?;

        let mut sequence = [0u8; 2];
        let mut timestamp = [0u8; 4];
        let mut ssrc = [0u8; 4];
        for buf in [&mut sequence[..], &mut timestamp[..], &mut ssrc[..]] {
            entropy
                .fill(buf)
                .map_err(|source| StreamError::Entropy { source })?;
        }

        // 0.8x the nominal frame period, in the original's integer order.
        let send_interval_us =
            (1000 * config.sample_count as u64 / u64::from(config.sample_rate)) * 800;

        let shared = Arc::new(StreamShared {
            socket,
            codec,
            sample_rate: config.sample_rate,
            sample_count: config.sample_count,
            codec_magic: packet::payload_magic(config.codec_payload_type),
            dtmf_magic: config.dtmf_payload_type.map(packet::payload_magic),
            send_interval_us,
            boost_mic_gain: config.boost_mic_gain,
            epoch: Instant::now(),
            sending: AtomicBool::new(false),
            receiving: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            next_dtmf: AtomicI32::new(DTMF_NONE),
            stats: StatsCells::default(),
        });

        debug!(
            "prepared {} stream: {} Hz, {} samples/packet, interval {} us",
            config.codec, config.sample_rate, config.sample_count, send_interval_us
        );

        Ok(Self {
            sender: Worker::new(SenderState::new(
                capture,
                u16::from_ne_bytes(sequence),
                u32::from_ne_bytes(timestamp),
                u32::from_ne_bytes(ssrc),
                config.sample_count,
            )),
            receiver: Worker::new(ReceiverState::new(
                playback,
                JitterBuffer::new(SLOT_SLACK + 2 * config.sample_count),
                config.sample_count,
            )),
            shared,
        })
    }

    /// Begin capturing and transmitting. No-op while already sending.
    pub fn start_sending(&mut self) -> Result<()> {
        if self.shared.sending.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(handle) = self.sender.handle.take() {
            let _ = handle.join();
        }

        let mut state = lock(&self.sender.state)
            .take()
            .ok_or(StreamError::WorkerLost { name: "sender" })?;
        state.reset_for_start();
        self.shared.next_dtmf.store(DTMF_NONE, Ordering::Release);

        if let Err(source) = state.device_mut().start() {
            *lock(&self.sender.state) = Some(state);
            return Err(StreamError::DeviceStart {
                direction: "capture",
                source,
            });
        }

        self.shared.sending.store(true, Ordering::Release);
        *lock(&self.sender.state) = Some(state);

        let shared = Arc::clone(&self.shared);
        let cell = Arc::clone(&self.sender.state);
        match thread::Builder::new()
            .name("rtp-sender".to_string())
            .spawn(move || sender::run(shared, cell))
        {
            Ok(handle) => {
                self.sender.handle = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.shared.sending.store(false, Ordering::Release);
                if let Some(state) = lock(&self.sender.state).as_mut() {
                    state.device_mut().stop();
                }
                Err(StreamError::ThreadSpawn {
                    name: "rtp-sender",
                    source,
                })
            }
        }
    }

    /// Begin receiving and playing. No-op while already receiving.
    ///
    /// Forgets the previously learned remote SSRC and timestamp; the next
    /// accepted packet re-learns them.
    pub fn start_receiving(&mut self) -> Result<()> {
        if self.shared.receiving.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(handle) = self.receiver.handle.take() {
            let _ = handle.join();
        }

        let mut state = lock(&self.receiver.state)
            .take()
            .ok_or(StreamError::WorkerLost { name: "receiver" })?;
        state.reset_for_start();

        if let Err(source) = state.device_mut().start() {
            *lock(&self.receiver.state) = Some(state);
            return Err(StreamError::DeviceStart {
                direction: "playback",
                source,
            });
        }

        self.shared.receiving.store(true, Ordering::Release);
        *lock(&self.receiver.state) = Some(state);

        let shared = Arc::clone(&self.shared);
        let cell = Arc::clone(&self.receiver.state);
        match thread::Builder::new()
            .name("rtp-receiver".to_string())
            .spawn(move || receiver::run(shared, cell))
        {
            Ok(handle) => {
                self.receiver.handle = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.shared.receiving.store(false, Ordering::Release);
                if let Some(state) = lock(&self.receiver.state).as_mut() {
                    state.device_mut().stop();
                }
                Err(StreamError::ThreadSpawn {
                    name: "rtp-receiver",
                    source,
                })
            }
        }
    }

    /// Queue a telephony event (0..=15) for in-band transmission.
    ///
    /// Valid only while sending on a stream configured with a DTMF payload
    /// type. The hand-off slot holds a single digit; if the sender has not
    /// consumed the previous one yet, the call backs off for two frame
    /// periods and then gives up.
    pub fn send_dtmf(&self, event: u8) -> Result<()> {
        if event > 15 {
            return Err(StreamError::InvalidDtmfEvent { event });
        }
        if self.shared.dtmf_magic.is_none() || !self.shared.sending.load(Ordering::Acquire) {
            return Err(StreamError::DtmfUnavailable);
        }
        if self.try_queue_dtmf(event) {
            return Ok(());
        }
        thread::sleep(Duration::from_micros(2 * self.shared.send_interval_us));
        if self.try_queue_dtmf(event) {
            Ok(())
        } else {
            Err(StreamError::DtmfBusy)
        }
    }

    fn try_queue_dtmf(&self, event: u8) -> bool {
        self.shared
            .next_dtmf
            .compare_exchange(
                DTMF_NONE,
                i32::from(event),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Stop the sender thread and the capture device. Idempotent.
    pub fn stop_sending(&mut self) {
        self.shared.sending.store(false, Ordering::Release);
        if let Some(handle) = self.sender.handle.take() {
            let _ = handle.join();
            debug!("sender stopped after {} packet(s)", self.stats().packets_sent);
        }
        if let Some(state) = lock(&self.sender.state).as_mut() {
            state.device_mut().stop();
        }
    }

    /// Stop the receiver thread and the playback device. Idempotent.
    pub fn stop_receiving(&mut self) {
        self.shared.receiving.store(false, Ordering::Release);
        if let Some(handle) = self.receiver.handle.take() {
            let _ = handle.join();
            let stats = self.stats();
            debug!(
                "receiver stopped after {} packet(s), {} dropped",
                stats.packets_received, stats.packets_dropped
            );
        }
        if let Some(state) = lock(&self.receiver.state).as_mut() {
            state.device_mut().stop();
        }
    }

    /// The session socket.
    pub fn socket(&self) -> &RtpSocket {
        &self.shared.socket
    }

    /// Whether the sender thread is running.
    pub fn is_sending(&self) -> bool {
        self.shared.sending.load(Ordering::Acquire)
    }

    /// Whether the receiver thread is running.
    pub fn is_receiving(&self) -> bool {
        self.shared.receiving.load(Ordering::Acquire)
    }

    /// Replace captured audio with silence while set.
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
    }

    /// Whether capture is muted.
    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Relaxed)
    }

    /// A snapshot of the session counters.
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            packets_sent: self.shared.stats.packets_sent.load(Ordering::Relaxed),
            packets_received: self.shared.stats.packets_received.load(Ordering::Relaxed),
            packets_dropped: self.shared.stats.packets_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.stop_sending();
        self.stop_receiving();
    }
}

fn open_capture(
    backend: &dyn AudioBackend,
    config: &AudioStreamConfig,
) -> Result<Box<dyn CaptureDevice>> {
    let hinted = CaptureParams {
        source: CaptureSource::Microphone,
        sample_rate: config.sample_rate,
        buffer_frames: Some(2 * config.sample_count),
    };
    backend
        .open_capture(&hinted)
        .or_else(|_| {
            backend.open_capture(&CaptureParams {
                buffer_frames: None,
                ..hinted
            })
        })
        .map_err(|source| StreamError::DeviceOpen {
            direction: "capture",
            source,
        })
}

fn open_playback(
    backend: &dyn AudioBackend,
    config: &AudioStreamConfig,
) -> Result<Box<dyn PlaybackDevice>> {
    let hinted = PlaybackParams {
        stream: PlaybackStream::VoiceCall,
        sample_rate: config.sample_rate,
        buffer_frames: Some(2 * config.sample_count),
    };
    backend
        .open_playback(&hinted)
        .or_else(|_| {
            backend.open_playback(&PlaybackParams {
                buffer_frames: None,
                ..hinted
            })
        })
        .map_err(|source| StreamError::DeviceOpen {
            direction: "playback",
            source,
        })
}
