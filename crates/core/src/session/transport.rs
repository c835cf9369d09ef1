use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Result, RtspError};

const SERVER_PORT_MAX: u32 = 65534;

/// Negotiated RTP/RTCP transport parameters for a session.
///
/// Created during SETUP from the client's `Transport` header and the
/// server's allocated port pair.
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/UDP;client_port=6000-6001
///
/// Server → Client:
///   Transport: RTP/UDP;client_port=6000-6001;server_port=25000-25001
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub client_rtp_port: u16,
    pub client_rtcp_port: u16,
    /// Advertised to the client; media leaves from the stream's own socket.
    pub server_rtp_port: u16,
    pub server_rtcp_port: u16,
    /// Full socket address for RTP delivery (`client_ip:client_rtp_port`).
    pub client_addr: SocketAddr,
}

impl Transport {
    /// Value of the `Transport` header in the SETUP response.
    pub fn response_header(&self) -> String {
        format!(
            "RTP/UDP;client_port={}-{};server_port={}-{}",
            self.client_rtp_port,
            self.client_rtcp_port,
            self.server_rtp_port,
            self.server_rtcp_port
        )
    }
}

/// Client port pair requested in a SETUP `Transport` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    pub client_rtp_port: u16,
    pub client_rtcp_port: u16,
}

impl TransportHeader {
    /// Parse `...client_port=<port>[-<port>]` out of a `Transport` value.
    ///
    /// When only one port is given the RTCP port is the next one up.
    ///
    /// ```
    /// use clipcast::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/UDP;client_port=6000").unwrap();
    /// assert_eq!(th.client_rtp_port, 6000);
    /// assert_eq!(th.client_rtcp_port, 6001);
    ///
    /// assert!(TransportHeader::parse("RTP/UDP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let ports = header
            .split(';')
            .find_map(|part| part.trim().strip_prefix("client_port="))?;

        let mut pair = ports.splitn(2, '-');
        let rtp: u16 = pair.next()?.trim().parse().ok()?;
        let rtcp = match pair.next() {
            Some(rtcp) => rtcp.trim().parse().ok()?,
            None => rtp.checked_add(1)?,
        };

        Some(TransportHeader {
            client_rtp_port: rtp,
            client_rtcp_port: rtcp,
        })
    }

    /// Port pair used when the client sent no usable `Transport` header.
    pub fn fallback(port: u16) -> Self {
        TransportHeader {
            client_rtp_port: port,
            client_rtcp_port: port.saturating_add(1),
        }
    }
}

/// Hands out server-side (RTP, RTCP) port pairs.
///
/// Ports come from a shared counter starting at `base`, two at a time;
/// past 65534 the counter wraps back to `base`.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    base: u32,
    next: Arc<AtomicU32>,
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self {
            base: base as u32,
            next: Arc::new(AtomicU32::new(base as u32)),
        }
    }

    pub fn allocate(&self) -> Result<(u16, u16)> {
        let rtp = self.next.fetch_add(2, Ordering::SeqCst);
        if rtp <= SERVER_PORT_MAX {
            tracing::trace!(rtp_port = rtp, rtcp_port = rtp + 1, "allocated server ports");
            return Ok((rtp as u16, rtp as u16 + 1));
        }

        if self.base > SERVER_PORT_MAX {
            return Err(RtspError::PortRangeExhausted);
        }
        tracing::warn!(rtp, base = self.base, "server port range exhausted, wrapping");
        self.next.store(self.base, Ordering::SeqCst);
        let rtp = self.next.fetch_add(2, Ordering::SeqCst);
        Ok((rtp as u16, rtp as u16 + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_pair() {
        let th = TransportHeader::parse("RTP/UDP;client_port=6000-6001").unwrap();
        assert_eq!(th.client_rtp_port, 6000);
        assert_eq!(th.client_rtcp_port, 6001);
    }

    #[test]
    fn parse_single_port() {
        let th = TransportHeader::parse("RTP/AVP;unicast; client_port=7000").unwrap();
        assert_eq!(th, TransportHeader::fallback(7000));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(TransportHeader::parse("RTP/UDP;client_port=abc").is_none());
        assert!(TransportHeader::parse("RTP/UDP;client_port=70000").is_none());
        assert!(TransportHeader::parse("RTP/UDP;unicast").is_none());
    }

    #[test]
    fn response_header_lists_both_pairs() {
        let transport = Transport {
            client_rtp_port: 6000,
            client_rtcp_port: 6001,
            server_rtp_port: 25000,
            server_rtcp_port: 25001,
            client_addr: "127.0.0.1:6000".parse().unwrap(),
        };
        assert_eq!(
            transport.response_header(),
            "RTP/UDP;client_port=6000-6001;server_port=25000-25001"
        );
    }

    #[test]
    fn allocator_hands_out_even_pairs() {
        let ports = PortAllocator::new(25000);
        assert_eq!(ports.allocate().unwrap(), (25000, 25001));
        assert_eq!(ports.clone().allocate().unwrap(), (25002, 25003));
    }

    #[test]
    fn allocator_wraps() {
        let ports = PortAllocator::new(65532);
        assert_eq!(ports.allocate().unwrap(), (65532, 65533));
        assert_eq!(ports.allocate().unwrap(), (65534, 65535));
        assert_eq!(ports.allocate().unwrap(), (65532, 65533));
    }

    #[test]
    fn allocator_base_out_of_range() {
        let ports = PortAllocator::new(65535);
        assert!(matches!(
            ports.allocate(),
            Err(RtspError::PortRangeExhausted)
        ));
    }
}
