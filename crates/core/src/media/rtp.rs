use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::error::{Result, RtspError};

/// Size of the fixed RTP header; the encoded header is always this long.
pub const RTP_HEADER_LEN: usize = 12;

/// RTP protocol version written by [`RtpPacket::new`].
pub const RTP_VERSION: u8 = 2;

/// Virtual media clock rate for video (90 kHz).
pub const CLOCK_RATE: u32 = 90_000;

/// Static payload type for JPEG video.
pub const PAYLOAD_TYPE_JPEG: u8 = 26;

/// An RTP packet: fixed header fields plus opaque payload.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// No CSRC list is ever written or read: `csrc_count` travels as a plain
/// 4-bit field, and [`decode`](Self::decode) accepts any value in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// 2 bits.
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    /// 4 bits.
    pub csrc_count: u8,
    pub marker: bool,
    /// 7 bits.
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Version 2 packet with padding, extension and CSRC count cleared.
    pub fn new(
        payload_type: u8,
        marker: bool,
        sequence_number: u16,
        timestamp: u32,
        ssrc: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            payload,
        }
    }

    /// Serialize the 12-byte header (network byte order) followed by the payload.
    ///
    /// Fields wider than their bit slot are masked, so the header length
    /// never depends on field values.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RTP_HEADER_LEN + self.payload.len());
        buf.push(
            ((self.version & 0x03) << 6)
                | ((self.padding as u8) << 5)
                | ((self.extension as u8) << 4)
                | (self.csrc_count & 0x0F),
        );
        buf.push(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.extend_from_slice(&self.sequence_number.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a datagram.
    ///
    /// Fails with [`RtspError::PacketTooShort`] below 12 bytes. Otherwise
    /// every header field is taken as-is (no version or CSRC checks) and
    /// the rest of the buffer becomes the payload.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RTP_HEADER_LEN {
            return Err(RtspError::PacketTooShort { len: buf.len() });
        }

        Ok(Self {
            version: buf[0] >> 6,
            padding: buf[0] & 0x20 != 0,
            extension: buf[0] & 0x10 != 0,
            csrc_count: buf[0] & 0x0F,
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7F,
            sequence_number: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            payload: buf[RTP_HEADER_LEN..].to_vec(),
        })
    }
}

/// Snapshot of a packetizer's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketizerStats {
    pub packets_sent: u64,
    pub ssrc: u32,
    pub next_sequence: u16,
    pub current_timestamp: u32,
}

/// Per-stream RTP sequencing and timestamp state.
///
/// - **SSRC**: fixed for the packetizer's lifetime, random by default.
/// - **Sequence number**: starts at 0, +1 per packet, wraps at 65536.
/// - **Timestamp**: a 90 kHz base taken from the wall clock when the
///   stream starts, advanced by the monotonic time elapsed since then.
#[derive(Debug)]
pub struct RtpPacketizer {
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
    timestamp_base: u32,
    started: Instant,
    packets_sent: u64,
}

impl RtpPacketizer {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let timestamp_base = (since_epoch.as_secs_f64() * CLOCK_RATE as f64) as u64 as u32;

        tracing::debug!(
            payload_type,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP packetizer created"
        );
        Self {
            payload_type,
            ssrc,
            sequence: 0,
            timestamp_base,
            started: Instant::now(),
            packets_sent: 0,
        }
    }

    /// Create with a random SSRC so concurrent streams stay distinguishable.
    pub fn with_random_ssrc(payload_type: u8) -> Self {
        Self::new(payload_type, rand::random::<u32>())
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// Sequence number the next packet will carry.
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// Current position of the 90 kHz media clock.
    pub fn current_timestamp(&self) -> u32 {
        let elapsed = self.started.elapsed().as_secs_f64() * CLOCK_RATE as f64;
        self.timestamp_base.wrapping_add(elapsed as u64 as u32)
    }

    /// Wrap one frame into a packet and advance the sequence number.
    pub fn packetize(&mut self, payload: &[u8], marker: bool) -> RtpPacket {
        let packet = RtpPacket::new(
            self.payload_type,
            marker,
            self.sequence,
            self.current_timestamp(),
            self.ssrc,
            payload.to_vec(),
        );
        self.sequence = self.sequence.wrapping_add(1);
        self.packets_sent += 1;
        packet
    }

    pub fn stats(&self) -> PacketizerStats {
        PacketizerStats {
            packets_sent: self.packets_sent,
            ssrc: self.ssrc,
            next_sequence: self.sequence,
            current_timestamp: self.current_timestamp(),
        }
    }
}
