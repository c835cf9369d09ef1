//! Control protocol (RTSP-style text signaling).
//!
//! Parses requests and builds responses. The per-session routing of
//! methods lives in [`crate::session::RtspSession`].
//!
//! ## Message format
//!
//! ```text
//! SETUP rtsp://server/clip.bin RTSP/1.0\r\n
//! CSeq: 1\r\n
//! Transport: RTP/UDP;client_port=6000-6001\r\n
//! \r\n
//! ```
//!
//! ## Supported methods
//!
//! | Method | Purpose |
//! |--------|---------|
//! | SETUP | Bind a clip and negotiate UDP ports |
//! | PLAY | Start (or resume) paced delivery |
//! | PAUSE | Suspend delivery |
//! | TEARDOWN | Release the stream |

pub mod request;
pub mod response;

pub use request::{Method, RtspRequest};
pub use response::RtspResponse;
