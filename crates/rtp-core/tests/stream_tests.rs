//! End-to-end session tests over loopback UDP with in-memory devices.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use voxcall_codec_core::codecs::g711::{alaw_compress, ulaw_compress};
use voxcall_rtp_core::{
    packet, AudioBackend, AudioStream, AudioStreamConfig, CaptureDevice, CaptureParams,
    EntropySource, PlaybackDevice, PlaybackParams, RtpSocket, StreamError,
};

const FRAME: usize = 160;
const WIRE_LEN: usize = packet::RTP_HEADER_SIZE + FRAME;

fn localhost() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

/// Deterministic entropy: zero seed for sequence, timestamp and SSRC.
struct ZeroEntropy;

impl EntropySource for ZeroEntropy {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()> {
        buf.fill(0);
        Ok(())
    }
}

/// Capture device producing a constant level, one frame per read.
struct ToneCapture {
    level: i16,
}

impl CaptureDevice for ToneCapture {
    fn start(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn read(&mut self, samples: &mut [i16]) -> io::Result<usize> {
        samples.fill(self.level);
        Ok(samples.len())
    }
}

/// Capture device that fails with a short read after a few good frames.
struct FailingCapture {
    reads_left: usize,
}

impl CaptureDevice for FailingCapture {
    fn start(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn read(&mut self, samples: &mut [i16]) -> io::Result<usize> {
        if self.reads_left == 0 {
            return Ok(samples.len() - 1);
        }
        self.reads_left -= 1;
        samples.fill(0);
        Ok(samples.len())
    }
}

/// Playback device recording every frame it is handed.
#[derive(Clone, Default)]
struct RecordingPlayback {
    frames: Arc<Mutex<Vec<Vec<i16>>>>,
}

impl RecordingPlayback {
    fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl PlaybackDevice for RecordingPlayback {
    fn start(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn write(&mut self, samples: &[i16]) -> io::Result<usize> {
        self.frames.lock().unwrap().push(samples.to_vec());
        Ok(samples.len())
    }
}

/// Backend handing out the fakes above.
struct TestBackend {
    capture_level: i16,
    capture_failures_after: Option<usize>,
    playback: RecordingPlayback,
    capture_opens: Arc<AtomicUsize>,
    reject_buffer_hint: bool,
}

impl TestBackend {
    fn new(capture_level: i16) -> Self {
        Self {
            capture_level,
            capture_failures_after: None,
            playback: RecordingPlayback::default(),
            capture_opens: Arc::new(AtomicUsize::new(0)),
            reject_buffer_hint: false,
        }
    }
}

impl AudioBackend for TestBackend {
    fn open_capture(&self, params: &CaptureParams) -> io::Result<Box<dyn CaptureDevice>> {
        self.capture_opens.fetch_add(1, Ordering::Relaxed);
        if self.reject_buffer_hint && params.buffer_frames.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer hint rejected",
            ));
        }
        match self.capture_failures_after {
            Some(reads) => Ok(Box::new(FailingCapture { reads_left: reads })),
            None => Ok(Box::new(ToneCapture {
                level: self.capture_level,
            })),
        }
    }

    fn open_playback(&self, _params: &PlaybackParams) -> io::Result<Box<dyn PlaybackDevice>> {
        Ok(Box::new(self.playback.clone()))
    }
}

struct Fixture {
    stream: AudioStream,
    peer: UdpSocket,
    playback: RecordingPlayback,
}

impl Fixture {
    fn new(config: &AudioStreamConfig, backend: TestBackend) -> Self {
        let _ = tracing_subscriber::fmt::try_init();
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut socket = RtpSocket::bind(localhost()).unwrap();
        socket
            .associate(localhost(), peer.local_addr().unwrap().port())
            .unwrap();
        let playback = backend.playback.clone();
        let stream = AudioStream::prepare(socket, config, &backend, &mut ZeroEntropy).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        Self {
            stream,
            peer,
            playback,
        }
    }

    fn session_addr(&self) -> SocketAddr {
        SocketAddr::new(localhost(), self.stream.socket().local_port())
    }

    fn recv_packet(&self) -> Vec<u8> {
        let mut buf = [0u8; 2048];
        let (len, _) = self.peer.recv_from(&mut buf).unwrap();
        buf[..len].to_vec()
    }
}

fn audio_packet(sequence: u16, timestamp: u32, ssrc: u32) -> Vec<u8> {
    let mut buf = vec![0u8; WIRE_LEN];
    packet::write_audio_header(&mut buf, packet::payload_magic(0), sequence, timestamp, ssrc);
    buf[packet::RTP_HEADER_SIZE..].fill(0xFF);
    buf
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn prepare_rejects_sample_rate_not_above_sample_count() {
    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut socket = RtpSocket::bind(localhost()).unwrap();
    socket
        .associate(localhost(), peer.local_addr().unwrap().port())
        .unwrap();

    let config = AudioStreamConfig {
        sample_count: 8000,
        ..AudioStreamConfig::pcmu_8k()
    };
    let err = AudioStream::prepare(socket, &config, &TestBackend::new(0), &mut ZeroEntropy)
        .err()
        .expect("8000/8000 must be rejected");
    assert!(matches!(err, StreamError::InvalidConfig { .. }));
}

#[test]
fn prepare_rejects_unknown_codec_and_bad_payload_types() {
    let backend = TestBackend::new(0);
    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();

    let make_socket = || {
        let mut socket = RtpSocket::bind(localhost()).unwrap();
        socket
            .associate(localhost(), peer.local_addr().unwrap().port())
            .unwrap();
        socket
    };

    let config = AudioStreamConfig {
        codec: "G722".to_string(),
        ..AudioStreamConfig::pcmu_8k()
    };
    assert!(matches!(
        AudioStream::prepare(make_socket(), &config, &backend, &mut ZeroEntropy),
        Err(StreamError::Codec(_))
    ));

    let config = AudioStreamConfig {
        codec_payload_type: 200,
        ..AudioStreamConfig::pcmu_8k()
    };
    assert!(matches!(
        AudioStream::prepare(make_socket(), &config, &backend, &mut ZeroEntropy),
        Err(StreamError::InvalidPayloadType { value: 200 })
    ));

    let config = AudioStreamConfig {
        dtmf_payload_type: Some(128),
        ..AudioStreamConfig::pcmu_8k()
    };
    assert!(matches!(
        AudioStream::prepare(make_socket(), &config, &backend, &mut ZeroEntropy),
        Err(StreamError::InvalidPayloadType { value: 128 })
    ));
}

#[test]
fn prepare_requires_an_associated_socket() {
    let socket = RtpSocket::bind(localhost()).unwrap();
    assert!(matches!(
        AudioStream::prepare(
            socket,
            &AudioStreamConfig::pcmu_8k(),
            &TestBackend::new(0),
            &mut ZeroEntropy
        ),
        Err(StreamError::NotAssociated)
    ));
}

#[test]
fn prepare_falls_back_when_the_buffer_hint_is_rejected() {
    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut socket = RtpSocket::bind(localhost()).unwrap();
    socket
        .associate(localhost(), peer.local_addr().unwrap().port())
        .unwrap();

    let mut backend = TestBackend::new(0);
    backend.reject_buffer_hint = true;
    let opens = Arc::clone(&backend.capture_opens);
    let stream =
        AudioStream::prepare(socket, &AudioStreamConfig::pcmu_8k(), &backend, &mut ZeroEntropy);
    assert!(stream.is_ok());
    assert_eq!(opens.load(Ordering::Relaxed), 2);
}

#[test]
fn first_pcmu_packet_is_bit_exact() {
    let mut fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), TestBackend::new(0));
    fixture.stream.start_sending().unwrap();
    let packet = fixture.recv_packet();
    fixture.stream.stop_sending();

    assert_eq!(packet.len(), WIRE_LEN);
    assert_eq!(packet[0], 0x80);
    assert_eq!(packet[1], 0x00);
    // Zero-seeded counters are incremented before the first emit.
    assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 1);
    assert_eq!(
        u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
        FRAME as u32
    );
    assert_eq!(&packet[8..12], &[0, 0, 0, 0]);
    let silence = ulaw_compress(0);
    assert!(packet[12..].iter().all(|&b| b == silence));
}

#[test]
fn pcma_packets_carry_the_alaw_encoding() {
    let mut fixture = Fixture::new(&AudioStreamConfig::pcma_8k(), TestBackend::new(32767));
    fixture.stream.start_sending().unwrap();
    let packet = fixture.recv_packet();
    fixture.stream.stop_sending();

    assert_eq!(packet[0], 0x80);
    assert_eq!(packet[1], 8);
    let expected = alaw_compress(32767);
    assert!(packet[12..].iter().all(|&b| b == expected));
}

#[test]
fn muted_capture_encodes_silence() {
    let mut fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), TestBackend::new(12345));
    fixture.stream.set_muted(true);
    assert!(fixture.stream.is_muted());
    fixture.stream.start_sending().unwrap();
    let packet = fixture.recv_packet();
    fixture.stream.stop_sending();

    let silence = ulaw_compress(0);
    assert!(packet[12..].iter().all(|&b| b == silence));
}

#[test]
fn mic_gain_boost_multiplies_by_eight() {
    let config = AudioStreamConfig {
        boost_mic_gain: true,
        ..AudioStreamConfig::pcmu_8k()
    };
    let mut fixture = Fixture::new(&config, TestBackend::new(1000));
    fixture.stream.start_sending().unwrap();
    let packet = fixture.recv_packet();
    fixture.stream.stop_sending();

    let expected = ulaw_compress(8000);
    assert!(packet[12..].iter().all(|&b| b == expected));
}

#[test]
fn sequence_numbers_are_consecutive_across_audio_packets() {
    let mut fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), TestBackend::new(0));
    fixture.stream.start_sending().unwrap();
    let first = fixture.recv_packet();
    let second = fixture.recv_packet();
    let third = fixture.recv_packet();
    fixture.stream.stop_sending();

    let seq = |p: &[u8]| u16::from_be_bytes([p[2], p[3]]);
    let ts = |p: &[u8]| u32::from_be_bytes([p[4], p[5], p[6], p[7]]);
    assert_eq!(seq(&second).wrapping_sub(seq(&first)), 1);
    assert_eq!(seq(&third).wrapping_sub(seq(&second)), 1);
    assert_eq!(ts(&second).wrapping_sub(ts(&first)), FRAME as u32);
    assert_eq!(ts(&third).wrapping_sub(ts(&second)), FRAME as u32);
}

#[test]
fn dtmf_event_emits_a_duration_tracked_train() {
    let mut fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), TestBackend::new(0));
    fixture.stream.start_sending().unwrap();
    // Make sure the sender is live before injecting.
    let _ = fixture.recv_packet();
    fixture.stream.send_dtmf(5).unwrap();

    let mut train = Vec::new();
    let mut sequences = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while train.len() < 10 {
        assert!(Instant::now() < deadline, "DTMF train did not complete");
        let packet = fixture.recv_packet();
        sequences.push(u16::from_be_bytes([packet[2], packet[3]]));
        if packet.len() == packet::DTMF_PACKET_SIZE {
            train.push(packet);
        }
    }
    // The event is over; the next frames must be audio again.
    let resumed = fixture.recv_packet();
    fixture.stream.stop_sending();
    assert_eq!(resumed.len(), WIRE_LEN);

    // Sequence numbers are consecutive across audio and event packets.
    for pair in sequences.windows(2) {
        assert_eq!(pair[1].wrapping_sub(pair[0]), 1);
    }

    let word1 = |p: &[u8]| u32::from_be_bytes([p[4], p[5], p[6], p[7]]);
    let duration = |p: &[u8]| u16::from_be_bytes([p[14], p[15]]);
    for (i, packet) in train.iter().enumerate() {
        assert_eq!(packet[0], 0x80);
        assert_eq!(packet[1], 101);
        assert_eq!(packet[12], 5);
        assert_eq!(word1(packet), word1(&train[0]), "start timestamp repeats");
        assert_eq!(duration(packet) as usize, FRAME * (i + 1));
        let end = packet[13] & 0x80 != 0;
        assert_eq!(end, i == 9, "end bit only on the final packet");
        assert_eq!(packet[13] & 0x7F, 0, "reserved and volume bits are zero");
    }
}

#[test]
fn dtmf_requires_a_running_sender_and_a_valid_digit() {
    let fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), TestBackend::new(0));
    assert!(matches!(
        fixture.stream.send_dtmf(16),
        Err(StreamError::InvalidDtmfEvent { event: 16 })
    ));
    assert!(matches!(
        fixture.stream.send_dtmf(5),
        Err(StreamError::DtmfUnavailable)
    ));

    let config = AudioStreamConfig {
        dtmf_payload_type: None,
        ..AudioStreamConfig::pcmu_8k()
    };
    let mut fixture = Fixture::new(&config, TestBackend::new(0));
    fixture.stream.start_sending().unwrap();
    assert!(matches!(
        fixture.stream.send_dtmf(5),
        Err(StreamError::DtmfUnavailable)
    ));
    fixture.stream.stop_sending();
}

#[test]
fn receiver_learns_and_enforces_the_remote_identity() {
    let mut fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), TestBackend::new(0));
    fixture.stream.start_receiving().unwrap();
    let target = fixture.session_addr();

    fixture
        .peer
        .send_to(&audio_packet(1, 1000, 0xDEAD_BEEF), target)
        .unwrap();
    wait_until("first frame", || fixture.playback.frame_count() == 1);

    fixture
        .peer
        .send_to(&audio_packet(2, 1160, 0xDEAD_BEEF), target)
        .unwrap();
    wait_until("second frame", || fixture.playback.frame_count() == 2);

    // Wrong SSRC, then a timestamp running backwards: both dropped.
    fixture
        .peer
        .send_to(&audio_packet(3, 1320, 0xCAFE_BABE), target)
        .unwrap();
    fixture
        .peer
        .send_to(&audio_packet(4, 500, 0xDEAD_BEEF), target)
        .unwrap();
    thread::sleep(Duration::from_millis(200));

    fixture.stream.stop_receiving();
    assert_eq!(fixture.playback.frame_count(), 2);
    assert_eq!(fixture.stream.stats().packets_received, 2);
}

#[test]
fn timestamp_admission_uses_the_signed_modular_difference() {
    let mut fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), TestBackend::new(0));
    let target = fixture.session_addr();
    fixture.stream.start_receiving().unwrap();

    // A forward step across the 2^32 wrap is a small positive difference.
    fixture
        .peer
        .send_to(&audio_packet(1, u32::MAX - 80, 0xDEAD_BEEF), target)
        .unwrap();
    wait_until("pre-wrap frame", || fixture.playback.frame_count() == 1);
    fixture
        .peer
        .send_to(&audio_packet(2, 80, 0xDEAD_BEEF), target)
        .unwrap();
    wait_until("post-wrap frame", || fixture.playback.frame_count() == 2);

    // Half a cycle backwards is a negative difference and is dropped.
    fixture
        .peer
        .send_to(&audio_packet(3, 80u32.wrapping_sub(1 << 31), 0xDEAD_BEEF), target)
        .unwrap();
    thread::sleep(Duration::from_millis(150));
    fixture.stream.stop_receiving();
    assert_eq!(fixture.playback.frame_count(), 2);
}

#[test]
fn receiver_restart_forgets_the_learned_identity() {
    let mut fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), TestBackend::new(0));
    let target = fixture.session_addr();

    fixture.stream.start_receiving().unwrap();
    fixture
        .peer
        .send_to(&audio_packet(1, 9000, 0xDEAD_BEEF), target)
        .unwrap();
    wait_until("first frame", || fixture.playback.frame_count() == 1);
    fixture.stream.stop_receiving();

    fixture.stream.start_receiving().unwrap();
    // A new source with an older timestamp is acceptable after restart.
    fixture
        .peer
        .send_to(&audio_packet(1, 100, 0xCAFE_BABE), target)
        .unwrap();
    wait_until("frame after restart", || fixture.playback.frame_count() == 2);
    fixture.stream.stop_receiving();
}

#[test]
fn backlog_beyond_the_ring_is_dropped_and_counted() {
    let mut fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), TestBackend::new(0));
    let target = fixture.session_addr();

    // Eight packets queue up before the receiver starts. The first tick
    // pops one, refills the ring with four and discards the rest.
    for i in 0..8u16 {
        fixture
            .peer
            .send_to(
                &audio_packet(i + 1, 1000 + 160 * u32::from(i), 0xDEAD_BEEF),
                target,
            )
            .unwrap();
    }
    thread::sleep(Duration::from_millis(100));

    fixture.stream.start_receiving().unwrap();
    wait_until("five frames", || fixture.playback.frame_count() == 5);
    fixture.stream.stop_receiving();

    let stats = fixture.stream.stats();
    assert_eq!(stats.packets_received, 5);
    assert_eq!(stats.packets_dropped, 3);
}

#[test]
fn malformed_and_foreign_packets_do_not_reach_playback() {
    let mut fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), TestBackend::new(0));
    let target = fixture.session_addr();
    fixture.stream.start_receiving().unwrap();

    // Too short, wrong payload type, empty payload.
    fixture.peer.send_to(&[0x80u8; 4], target).unwrap();
    let mut wrong_pt = audio_packet(1, 1000, 0x1234_5678);
    wrong_pt[1] = 0x08;
    fixture.peer.send_to(&wrong_pt, target).unwrap();
    fixture
        .peer
        .send_to(&audio_packet(2, 1100, 0x1234_5678)[..12], target)
        .unwrap();
    thread::sleep(Duration::from_millis(150));

    // A valid packet still goes through afterwards.
    fixture
        .peer
        .send_to(&audio_packet(3, 1200, 0x1234_5678), target)
        .unwrap();
    wait_until("valid frame", || fixture.playback.frame_count() == 1);
    fixture.stream.stop_receiving();
    assert_eq!(fixture.stream.stats().packets_received, 1);
}

#[test]
fn sender_restart_continues_the_sequence() {
    let mut fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), TestBackend::new(0));
    fixture.stream.start_sending().unwrap();
    let _ = fixture.recv_packet();
    fixture.stream.stop_sending();

    // Flush whatever was in flight when the sender stopped.
    fixture
        .peer
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let mut last_seq = None;
    let mut buf = [0u8; 2048];
    while let Ok((len, _)) = fixture.peer.recv_from(&mut buf) {
        assert!(len >= 4);
        last_seq = Some(u16::from_be_bytes([buf[2], buf[3]]));
    }
    let last_seq = last_seq.unwrap_or(1);

    fixture
        .peer
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    fixture.stream.start_sending().unwrap();
    let packet = fixture.recv_packet();
    fixture.stream.stop_sending();
    assert_eq!(
        u16::from_be_bytes([packet[2], packet[3]]),
        last_seq.wrapping_add(1)
    );
}

#[test]
fn short_capture_read_terminates_the_sender_only() {
    let mut backend = TestBackend::new(0);
    backend.capture_failures_after = Some(2);
    let mut fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), backend);

    fixture.stream.start_receiving().unwrap();
    fixture.stream.start_sending().unwrap();
    wait_until("sender to die", || !fixture.stream.is_sending());
    assert!(fixture.stream.is_receiving());

    fixture.stream.stop_sending();
    fixture.stream.stop_receiving();
    assert_eq!(fixture.stream.stats().packets_sent, 2);
}

#[test]
fn stop_is_idempotent_and_drop_is_clean() {
    let mut fixture = Fixture::new(&AudioStreamConfig::pcmu_8k(), TestBackend::new(0));
    fixture.stream.start_sending().unwrap();
    fixture.stream.start_receiving().unwrap();
    assert!(fixture.stream.is_sending());
    assert!(fixture.stream.is_receiving());

    // Starting again while running is a no-op.
    fixture.stream.start_sending().unwrap();
    fixture.stream.start_receiving().unwrap();

    fixture.stream.stop_sending();
    fixture.stream.stop_sending();
    fixture.stream.stop_receiving();
    fixture.stream.stop_receiving();
    assert!(!fixture.stream.is_sending());
    assert!(!fixture.stream.is_receiving());
    // Drop runs the stops once more.
}
