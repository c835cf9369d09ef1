//! Network transport for control signaling and RTP media delivery.
//!
//! The split transport model:
//!
//! - **TCP** ([`tcp`]): carries control requests/responses. One TCP
//!   connection per client, with a thread per connection.
//!
//! - **UDP** ([`udp`]): carries RTP media packets. Each set-up stream
//!   owns one ephemeral socket used by its pacer.

pub mod tcp;
pub mod udp;

pub use udp::UdpTransport;
