//! Media side: RTP framing, clip sources and the clip namespace.
//!
//! ## RTP overview (RFC 3550)
//!
//! Every stored frame travels as exactly one RTP packet. The 12-byte fixed
//! header ([`rtp::RtpPacket`]) carries:
//!
//! - **Sequence number** (16-bit, wrapping), one step per packet.
//! - **Timestamp** (32-bit), a 90 kHz media clock.
//! - **SSRC** (32-bit), chosen at random per stream.
//! - **Marker bit**, always set: each packet is a complete frame.
//!
//! Frames are opaque here. No codec-aware fragmentation is done, so a clip
//! must already be split into datagram-sized units.

pub mod library;
pub mod rtp;
pub mod source;

pub use library::MediaLibrary;
pub use rtp::{RtpPacket, RtpPacketizer};
pub use source::{FrameSource, SourceKind};
