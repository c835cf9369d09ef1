use clap::Parser;
use clipcast::{PacerConfig, Pacing, Server, ServerConfig, SourceKind};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "clipcast-server",
    about = "Serve looping video clips over RTSP-controlled RTP"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Directory SETUP targets are resolved in
    #[arg(long, default_value = "videos")]
    media_dir: PathBuf,

    /// Secondary lookup directory for clips with a listed extension
    #[arg(long, default_value = ".")]
    fallback_dir: PathBuf,

    /// Extensions eligible for the fallback lookup
    #[arg(long, value_delimiter = ',', default_value = "mjpeg,mjpg,bin")]
    fallback_ext: Vec<String>,

    /// Clip format: length-prefixed or jpeg-markers
    #[arg(long, default_value_t = SourceKind::LengthPrefixed)]
    source_kind: SourceKind,

    /// Milliseconds between frames
    #[arg(long, default_value_t = 33)]
    frame_interval_ms: u64,

    /// Pacing strategy: deadline or fixed-sleep
    #[arg(long, default_value_t = Pacing::Deadline)]
    pacing: Pacing,

    /// Frames smaller than this many bytes are skipped
    #[arg(long, default_value_t = 100)]
    min_frame_size: usize,

    /// RTP payload type
    #[arg(long, default_value_t = 26)]
    payload_type: u8,

    /// Client RTP port used when SETUP has no Transport header
    #[arg(long, default_value_t = 25000)]
    default_client_port: u16,

    /// First server port advertised in SETUP responses
    #[arg(long, default_value_t = 25000)]
    server_port_base: u16,

    /// Control socket read timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    read_timeout_ms: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind,
            media_dir: self.media_dir,
            fallback_dir: self.fallback_dir,
            fallback_extensions: self.fallback_ext,
            source_kind: self.source_kind,
            pacer: PacerConfig {
                frame_interval: Duration::from_millis(self.frame_interval_ms),
                pacing: self.pacing,
                min_frame_size: self.min_frame_size,
            },
            payload_type: self.payload_type,
            default_client_port: self.default_client_port,
            server_port_base: self.server_port_base,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut server = Server::with_config(args.into_config());

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return ExitCode::FAILURE;
    }

    match server.local_addr() {
        Ok(addr) => println!("clipcast on {}, press Enter to stop", addr),
        Err(_) => println!("clipcast running, press Enter to stop"),
    }
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        eprintln!("stdin error: {}", e);
    }

    server.stop();
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_server_config() {
        let config = Args::parse_from(["clipcast-server"]).into_config();
        let defaults = ServerConfig::default();
        assert_eq!(config.bind_addr, defaults.bind_addr);
        assert_eq!(config.media_dir, defaults.media_dir);
        assert_eq!(config.fallback_extensions, defaults.fallback_extensions);
        assert_eq!(config.source_kind, defaults.source_kind);
        assert_eq!(config.pacer.frame_interval, defaults.pacer.frame_interval);
        assert_eq!(config.pacer.pacing, defaults.pacer.pacing);
        assert_eq!(config.payload_type, defaults.payload_type);
        assert_eq!(config.read_timeout, defaults.read_timeout);
    }

    #[test]
    fn parses_overrides() {
        let config = Args::parse_from([
            "clipcast-server",
            "--bind",
            "127.0.0.1:9554",
            "--source-kind",
            "jpeg-markers",
            "--pacing",
            "fixed-sleep",
            "--frame-interval-ms",
            "40",
            "--fallback-ext",
            "mjpeg,raw",
        ])
        .into_config();
        assert_eq!(config.bind_addr, "127.0.0.1:9554");
        assert_eq!(config.source_kind, SourceKind::JpegMarkers);
        assert_eq!(config.pacer.pacing, Pacing::FixedSleep);
        assert_eq!(config.pacer.frame_interval, Duration::from_millis(40));
        assert_eq!(config.fallback_extensions, vec!["mjpeg", "raw"]);
    }

    #[test]
    fn rejects_unknown_pacing() {
        assert!(Args::try_parse_from(["clipcast-server", "--pacing", "burst"]).is_err());
    }
}
