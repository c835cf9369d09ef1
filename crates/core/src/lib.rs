pub mod error;
pub mod media;
pub mod pacer;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use error::{Result, RtspError};
pub use media::{FrameSource, MediaLibrary, RtpPacket, RtpPacketizer, SourceKind};
pub use pacer::{PacerConfig, Pacing};
pub use server::{Server, ServerConfig, Viewer};
