//! Capture → encode → pace → send loop, with the telephony-event
//! submachine interleaved.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use crate::device::CaptureDevice;
use crate::packet;

use super::{StreamShared, DTMF_NONE, MIC_GAIN_FACTOR};

/// The sender's working set, owned by the worker thread while it runs.
pub(super) struct SenderState {
    device: Box<dyn CaptureDevice>,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    timer_us: u64,
    dtmf_event: Option<u8>,
    dtmf_duration: u32,
    frame: Vec<i16>,
    packet: Vec<u8>,
}

impl SenderState {
    pub(super) fn new(
        device: Box<dyn CaptureDevice>,
        sequence: u16,
        timestamp: u32,
        ssrc: u32,
        sample_count: usize,
    ) -> Self {
        Self {
            device,
            sequence,
            timestamp,
            ssrc,
            timer_us: 0,
            dtmf_event: None,
            dtmf_duration: 0,
            frame: vec![0; sample_count],
            packet: vec![0; packet::RTP_HEADER_SIZE + 2 * sample_count],
        }
    }

    /// Clear the pacing accumulator and any half-sent DTMF event.
    pub(super) fn reset_for_start(&mut self) {
        self.timer_us = 0;
        self.dtmf_event = None;
        self.dtmf_duration = 0;
    }

    pub(super) fn device_mut(&mut self) -> &mut dyn CaptureDevice {
        self.device.as_mut()
    }
}

/// Thread body: run ticks until stopped or a fatal capture/encode failure.
pub(super) fn run(shared: Arc<StreamShared>, cell: Arc<Mutex<Option<SenderState>>>) {
    let Some(mut state) = super::lock(&cell).take() else {
        return;
    };
    while shared.sending.load(Ordering::Acquire) {
        if !tick(&shared, &mut state) {
            shared.sending.store(false, Ordering::Release);
            state.device.stop();
            break;
        }
    }
    *super::lock(&cell) = Some(state);
}

/// One frame: capture, choose audio or telephony event, emit.
///
/// Returns `false` when the thread must terminate.
fn tick(shared: &StreamShared, state: &mut SenderState) -> bool {
    // The capture device has its own fault recovery; a short read means it
    // already gave up.
    match state.device.read(&mut state.frame) {
        Ok(n) if n == state.frame.len() => {}
        Ok(n) => {
            debug!("capture returned {} of {} samples", n, state.frame.len());
            return false;
        }
        Err(err) => {
            debug!("capture read failed: {}", err);
            return false;
        }
    }

    if shared.muted.load(Ordering::Relaxed) {
        state.frame.fill(0);
    } else if shared.boost_mic_gain {
        boost_gain(&mut state.frame, MIC_GAIN_FACTOR);
    }

    state.sequence = state.sequence.wrapping_add(1);
    state.timestamp = state.timestamp.wrapping_add(shared.sample_count as u32);

    let pending = shared.next_dtmf.swap(DTMF_NONE, Ordering::AcqRel);
    if pending != DTMF_NONE {
        state.dtmf_event = Some(pending as u8);
        state.dtmf_duration = 0;
    }

    if let (Some(digit), Some(magic)) = (state.dtmf_event, shared.dtmf_magic) {
        state.dtmf_duration += shared.sample_count as u32;
        // Keep the event roughly 200 ms long.
        let end_of_event = state.dtmf_duration * 5 >= shared.sample_rate;
        let event_start = state.timestamp.wrapping_sub(state.dtmf_duration);
        let event_packet = packet::dtmf_packet(
            magic,
            state.sequence,
            event_start,
            state.ssrc,
            digit,
            state.dtmf_duration,
            end_of_event,
        );
        if end_of_event {
            state.dtmf_event = None;
        }
        match shared.socket.send(&event_packet) {
            Ok(_) => {
                shared.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => trace!("telephony-event send failed: {}", err),
        }
        return true;
    }

    packet::write_audio_header(
        &mut state.packet,
        shared.codec_magic,
        state.sequence,
        state.timestamp,
        state.ssrc,
    );
    let payload_len = match shared
        .codec
        .encode(&state.frame, &mut state.packet[packet::RTP_HEADER_SIZE..])
    {
        Ok(n) if n > 0 => n,
        Ok(_) => {
            debug!("codec produced an empty payload");
            return false;
        }
        Err(err) => {
            debug!("encode failed: {}", err);
            return false;
        }
    };
    let length = packet::RTP_HEADER_SIZE + payload_len;

    pace(shared, state);

    match shared.socket.send(&state.packet[..length]) {
        Ok(_) => {
            shared.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => trace!("send failed: {}", err),
    }
    true
}

/// Delay frames that arrive early so the emit cadence converges on the
/// frame period.
///
/// The threshold is 0.8x the nominal period: a late frame is never held
/// back, so delay introduced downstream cannot compound.
fn pace(shared: &StreamShared, state: &mut SenderState) {
    let now = shared.epoch.elapsed().as_micros() as u64;
    let mut interval = now as i64 - state.timer_us as i64;
    if interval > 0 && (interval as u64) < shared.send_interval_us {
        thread::sleep(Duration::from_micros(
            shared.send_interval_us - interval as u64,
        ));
        interval = shared.send_interval_us as i64;
    }
    state.timer_us = (state.timer_us as i64).wrapping_add(interval) as u64;
}

/// Multiply samples by `factor`, saturating to the symmetric 16-bit range.
fn boost_gain(samples: &mut [i16], factor: i32) {
    let limit = 32768 / factor;
    for sample in samples.iter_mut() {
        let value = i32::from(*sample);
        *sample = if value >= limit {
            i16::MAX
        } else if value <= -limit {
            -i16::MAX
        } else {
            (value * factor) as i16
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boost_gain_scales_and_saturates() {
        let mut samples = [0i16, 100, -100, 4000, 4096, -4096, 32767, -32768];
        boost_gain(&mut samples, 8);
        assert_eq!(
            samples,
            [0, 800, -800, 32000, 32767, -32767, 32767, -32767]
        );
    }
}
