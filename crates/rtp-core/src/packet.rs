//! RTP packet framing and validation.
//!
//! Outgoing packets are RTP version 2 with no padding, no extension and no
//! CSRC list, so the whole header is three 32-bit words. Word 0 is built
//! from a precomputed per-payload-type "magic" with the sequence number in
//! the low half; word 1 is the timestamp; word 2 is the SSRC. Words 0 and 1
//! are network order. The SSRC is opaque: it is a random 32-bit value
//! emitted in storage order and only ever compared against the same bytes
//! coming back, so it is never byte-swapped.
//!
//! Incoming datagrams may carry a CSRC list, a header extension and
//! padding; all three are stripped before the payload reaches the codec.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Fixed RTP header length.
pub const RTP_HEADER_SIZE: usize = 12;

/// Total length of a telephony-event packet.
pub const DTMF_PACKET_SIZE: usize = 16;

/// Mask selecting the version bits and payload type from header word 0.
pub const MAGIC_MASK: u32 = 0xC07F_0000;

/// End-of-event flag inside telephony-event word 3.
const DTMF_END_FLAG: u32 = 1 << 23;

/// Precompute the word-0 magic for a payload type.
///
/// The high half encodes version 2 with no padding, extension, CSRC or
/// marker plus the payload type; the low half is left free for the
/// sequence number.
pub fn payload_magic(payload_type: u8) -> u32 {
    (0x8000 | u32::from(payload_type)) << 16
}

/// Write the 12-byte header into the front of `packet`.
///
/// # Panics
///
/// Panics if `packet` is shorter than [`RTP_HEADER_SIZE`].
pub fn write_audio_header(packet: &mut [u8], magic: u32, sequence: u16, timestamp: u32, ssrc: u32) {
    let mut buf = &mut packet[..RTP_HEADER_SIZE];
    buf.put_u32(magic | u32::from(sequence));
    buf.put_u32(timestamp);
    buf.put_slice(&ssrc.to_ne_bytes());
}

/// Build one 16-byte telephony-event packet (RFC 2833).
///
/// `event_timestamp` is the event's start timestamp, repeated across every
/// packet of the event. Word 3 carries the digit in the top byte, the end
/// flag, a zero volume, and the duration in samples in the low half.
pub fn dtmf_packet(
    magic: u32,
    sequence: u16,
    event_timestamp: u32,
    ssrc: u32,
    digit: u8,
    duration: u32,
    end_of_event: bool,
) -> [u8; DTMF_PACKET_SIZE] {
    let mut packet = [0u8; DTMF_PACKET_SIZE];
    write_audio_header(&mut packet, magic, sequence, event_timestamp, ssrc);

    let mut word3 = (u32::from(digit) << 24) | (duration & 0xFFFF);
    if end_of_event {
        word3 |= DTMF_END_FLAG;
    }
    let mut buf = &mut packet[RTP_HEADER_SIZE..];
    buf.put_u32(word3);
    packet
}

/// A validated incoming packet, borrowed from its receive slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPacket<'a> {
    /// Header timestamp, host order.
    pub timestamp: u32,
    /// SSRC in storage order.
    pub ssrc: u32,
    /// Codec payload with CSRC list, extension and padding stripped.
    pub payload: &'a [u8],
}

/// Reasons a datagram is dropped before reaching the codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Shorter than the fixed RTP header.
    #[error("datagram shorter than the RTP header")]
    Truncated,

    /// CSRC list, extension or padding ran past the end of the datagram.
    #[error("header fields run past the end of the datagram")]
    MalformedHeader,

    /// Version or payload type did not match this session.
    #[error("wrong magic ({found:#010X} != {expected:#010X})")]
    WrongMagic {
        /// The session's expected magic.
        expected: u32,
        /// The masked word 0 actually seen.
        found: u32,
    },
}

/// Validate a received datagram and strip it down to its payload.
///
/// `buf` is the receive slot and `wire_len` the true datagram length as
/// reported by the socket. When `wire_len` exceeds `buf.len()` the tail was
/// truncated on receive; the padding byte is only honored when the datagram
/// fit entirely, since otherwise the last byte is not the padding count.
pub fn parse_packet(buf: &[u8], wire_len: usize, magic: u32) -> Result<ParsedPacket<'_>, PacketError> {
    if wire_len < RTP_HEADER_SIZE || buf.len() < RTP_HEADER_SIZE {
        return Err(PacketError::Truncated);
    }
    let data = &buf[..wire_len.min(buf.len())];

    let first = data[0];
    let mut offset = RTP_HEADER_SIZE + usize::from(first & 0x0F) * 4;
    if first & 0x10 != 0 {
        if data.len() < offset + 4 {
            return Err(PacketError::MalformedHeader);
        }
        let words = usize::from(u16::from_be_bytes([data[offset + 2], data[offset + 3]]));
        offset += 4 + words * 4;
    }

    let mut length = wire_len;
    if first & 0x20 != 0 && wire_len <= buf.len() {
        length = length
            .checked_sub(usize::from(data[length - 1]))
            .ok_or(PacketError::MalformedHeader)?;
    }
    let payload_len = length
        .checked_sub(offset)
        .ok_or(PacketError::MalformedHeader)?;

    let mut header = &data[..RTP_HEADER_SIZE];
    let found = header.get_u32() & MAGIC_MASK;
    if found != magic {
        return Err(PacketError::WrongMagic {
            expected: magic,
            found,
        });
    }
    let timestamp = header.get_u32();
    let ssrc = u32::from_ne_bytes([data[8], data[9], data[10], data[11]]);

    let start = offset.min(data.len());
    let end = (offset + payload_len).min(data.len());
    Ok(ParsedPacket {
        timestamp,
        ssrc,
        payload: &data[start..end],
    })
}
