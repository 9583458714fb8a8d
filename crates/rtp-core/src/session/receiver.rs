//! Deadline-bounded receive → jitter buffer → validate → decode → play
//! loop.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::device::PlaybackDevice;
use crate::jitter::JitterBuffer;
use crate::packet;

use super::StreamShared;

/// The receiver's working set, owned by the worker thread while it runs.
pub(super) struct ReceiverState {
    device: Box<dyn PlaybackDevice>,
    jitter: JitterBuffer,
    remote_ssrc: u32,
    remote_timestamp: u32,
    frame: Vec<i16>,
}

impl ReceiverState {
    pub(super) fn new(
        device: Box<dyn PlaybackDevice>,
        jitter: JitterBuffer,
        sample_count: usize,
    ) -> Self {
        Self {
            device,
            jitter,
            remote_ssrc: 0,
            remote_timestamp: 0,
            frame: vec![0; sample_count],
        }
    }

    /// Forget the learned remote identifiers; zero means "not learned".
    pub(super) fn reset_for_start(&mut self) {
        self.remote_ssrc = 0;
        self.remote_timestamp = 0;
    }

    pub(super) fn device_mut(&mut self) -> &mut dyn PlaybackDevice {
        self.device.as_mut()
    }
}

/// Thread body: run ticks until stopped or a fatal playback failure.
pub(super) fn run(shared: Arc<StreamShared>, cell: Arc<Mutex<Option<ReceiverState>>>) {
    let Some(mut state) = super::lock(&cell).take() else {
        return;
    };
    while shared.receiving.load(Ordering::Acquire) {
        if !tick(&shared, &mut state) {
            shared.receiving.store(false, Ordering::Release);
            state.device.stop();
            break;
        }
    }
    *super::lock(&cell) = Some(state);
}

/// One iteration, bounded by one frame period.
///
/// Returns `false` when the thread must terminate.
fn tick(shared: &StreamShared, state: &mut ReceiverState) -> bool {
    let deadline = Instant::now() + Duration::from_micros(shared.send_interval_us);

    if state.jitter.is_empty() {
        let received = match state.jitter.write_slot() {
            Some(slot) => match shared.socket.receive(slot, Some(deadline)) {
                Ok(len) => len,
                Err(err) => {
                    debug!("receive failed: {}", err);
                    0
                }
            },
            None => 0,
        };
        if received == 0 {
            // No audio this tick.
            return true;
        }
        state.jitter.commit(received);
    }

    let Some(index) = state.jitter.pop() else {
        return true;
    };

    drain(shared, &mut state.jitter);

    let (buf, wire_len) = state.jitter.slot(index);
    let parsed = match packet::parse_packet(buf, wire_len, shared.codec_magic) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!("{}", err);
            return true;
        }
    };

    if state.remote_timestamp != 0 {
        let difference = parsed.timestamp.wrapping_sub(state.remote_timestamp) as i32;
        if difference < 0 {
            debug!("decrescent timestamp (difference = {})", difference);
            return true;
        }
    }
    if state.remote_ssrc != 0 && parsed.ssrc != state.remote_ssrc {
        debug!(
            "wrong ssrc ({:#010X} != {:#010X})",
            parsed.ssrc, state.remote_ssrc
        );
        return true;
    }

    let decoded = match shared.codec.decode(parsed.payload, &mut state.frame) {
        Ok(n) if n > 0 => n,
        Ok(_) => {
            debug!("decoder produced no samples");
            return true;
        }
        Err(err) => {
            debug!("decode failed: {}", err);
            return true;
        }
    };

    // Learn the remote identifiers only from packets that decoded; a
    // malformed source must not be promoted to "learned".
    state.remote_timestamp = parsed.timestamp;
    state.remote_ssrc = parsed.ssrc;
    shared.stats.packets_received.fetch_add(1, Ordering::Relaxed);

    match state.device.write(&state.frame[..decoded]) {
        Ok(written) if written == decoded => true,
        Ok(written) => {
            debug!("playback accepted {} of {} samples", written, decoded);
            false
        }
        Err(err) => {
            debug!("playback write failed: {}", err);
            false
        }
    }
}

/// Empty the socket into the remaining slots, discarding the overflow.
///
/// Bounds buffered latency: whatever arrived beyond the ring's capacity
/// during this frame is dropped now rather than queued behind the decoder.
fn drain(shared: &StreamShared, jitter: &mut JitterBuffer) {
    let mut dropped: u64 = 0;
    loop {
        match jitter.write_slot() {
            Some(slot) => match shared.socket.receive(slot, None) {
                Ok(len) if len > 0 => jitter.commit(len),
                _ => break,
            },
            None => match shared.socket.receive(&mut [], None) {
                Ok(len) if len > 0 => dropped += 1,
                _ => break,
            },
        }
    }
    if dropped > 0 {
        debug!("Drop {} packet(s)", dropped);
        shared
            .stats
            .packets_dropped
            .fetch_add(dropped, Ordering::Relaxed);
    }
}
