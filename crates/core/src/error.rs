//! Error types for the clip streaming server.

use std::fmt;

/// Errors that can occur in the clip streaming server.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse) for malformed control messages.
/// - **Media**: [`PacketTooShort`](Self::PacketTooShort) for undecodable
///   datagrams, [`ResourceNotFound`](Self::ResourceNotFound) for SETUP
///   targets outside the media namespace.
/// - **Session**: [`InvalidTransition`](Self::InvalidTransition),
///   [`PortRangeExhausted`](Self::PortRangeExhausted).
/// - **Transport**: [`Io`](Self::Io) for socket and file failures.
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
///
/// Control-path variants never close a connection; the session turns
/// them into a 404 or 500 response.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a control request.
    #[error("control parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A datagram shorter than the fixed 12-byte RTP header.
    #[error("packet too short: {len} bytes, RTP header needs 12")]
    PacketTooShort { len: usize },

    /// SETUP target does not resolve in the media namespace.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Method not allowed from the session's current state.
    #[error("{method} not allowed in state {state}")]
    InvalidTransition { method: String, state: String },

    /// Server-side RTP port allocation ran past the u16 range.
    #[error("port range exhausted (tried to allocate beyond u16 range)")]
    PortRangeExhausted,

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Specific kind of control request parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line had fewer than the three `METHOD target VERSION` tokens.
    InvalidRequestLine,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
