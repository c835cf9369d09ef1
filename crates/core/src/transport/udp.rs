use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::Result;
use crate::media::RtpPacket;

/// Largest datagram [`recv_packet`](UdpTransport::recv_packet) accepts.
pub const MAX_DATAGRAM: usize = 65_536;

/// UDP endpoint for RTP delivery.
///
/// Each SETUP binds its own ephemeral socket, owned by the session's
/// stream and moved into the pacer while it runs. Sends are
/// fire-and-forget: no loss detection, no retransmission.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind an ephemeral UDP socket on all interfaces.
    pub fn bind() -> Result<Self> {
        Self::bind_addr("0.0.0.0:0")
    }

    /// Bind to a specific address (`127.0.0.1:0` in tests).
    pub fn bind_addr(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send raw bytes to a specific socket address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, addr)?)
    }

    /// Encode and send one packet.
    pub fn send_packet(&self, packet: &RtpPacket, addr: SocketAddr) -> Result<usize> {
        self.send_to(&packet.encode(), addr)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.socket.set_read_timeout(timeout)?)
    }

    /// Receive one datagram and decode it.
    ///
    /// A datagram under 12 bytes yields
    /// [`RtspError::PacketTooShort`](crate::RtspError::PacketTooShort);
    /// callers drop it and keep reading.
    pub fn recv_packet(&self) -> Result<(RtpPacket, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, from) = self.socket.recv_from(&mut buf)?;
        let packet = RtpPacket::decode(&buf[..len])?;
        tracing::trace!(%from, seq = packet.sequence_number, len, "RTP packet received");
        Ok((packet, from))
    }
}
