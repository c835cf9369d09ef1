use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Result, RtspError};
use crate::media::rtp::PAYLOAD_TYPE_JPEG;
use crate::media::{MediaLibrary, SourceKind};
use crate::pacer::PacerConfig;
use crate::session::SessionRegistry;
use crate::transport::tcp;

/// Client RTP port assumed when SETUP carries no usable `Transport` header.
pub const DEFAULT_CLIENT_PORT: u16 = 25000;

/// Server-level configuration shared by every connection.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Control listener address (host:port).
    pub bind_addr: String,
    /// Primary directory SETUP targets are resolved in.
    pub media_dir: PathBuf,
    /// Secondary top-level lookup, restricted to `fallback_extensions`.
    pub fallback_dir: PathBuf,
    pub fallback_extensions: Vec<String>,
    /// Frame source implementation bound at SETUP.
    pub source_kind: SourceKind,
    pub pacer: PacerConfig,
    /// RTP payload type written into every packet.
    pub payload_type: u8,
    pub default_client_port: u16,
    /// First server RTP port advertised in SETUP responses.
    pub server_port_base: u16,
    /// Control socket read timeout; bounds how long a connection thread
    /// takes to notice [`Server::stop`].
    pub read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8554".to_string(),
            media_dir: PathBuf::from("videos"),
            fallback_dir: PathBuf::from("."),
            fallback_extensions: vec!["mjpeg".to_string(), "mjpg".to_string(), "bin".to_string()],
            source_kind: SourceKind::default(),
            pacer: PacerConfig::default(),
            payload_type: PAYLOAD_TYPE_JPEG,
            default_client_port: DEFAULT_CLIENT_PORT,
            server_port_base: 25000,
            read_timeout: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// The resource namespace described by this configuration.
    pub fn library(&self) -> MediaLibrary {
        MediaLibrary::new(
            self.media_dir.clone(),
            self.fallback_dir.clone(),
            &self.fallback_extensions,
        )
    }
}

/// Control server orchestrator.
///
/// Owns the session registry and the acceptor thread. Delegates
/// per-connection handling to [`transport::tcp`](crate::transport::tcp).
pub struct Server {
    registry: SessionRegistry,
    running: Arc<AtomicBool>,
    config: Arc<ServerConfig>,
    local_addr: Option<SocketAddr>,
    acceptor: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(ServerConfig {
            bind_addr: bind_addr.to_string(),
            ..ServerConfig::default()
        })
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            registry: SessionRegistry::new(config.server_port_base),
            running: Arc::new(AtomicBool::new(false)),
            config: Arc::new(config),
            local_addr: None,
            acceptor: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.config.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        self.running.store(true, Ordering::SeqCst);

        tracing::info!(addr = %local_addr, source = %self.config.source_kind, "control server listening");
        let library = self.config.library();
        let catalog = library.catalog();
        if catalog.is_empty() {
            tracing::warn!(dir = %library.media_dir().display(), "no clips available");
        }
        for name in catalog {
            tracing::info!(url = %format!("rtsp://{}/{}", local_addr, name), "clip available");
        }

        let running = self.running.clone();
        let registry = self.registry.clone();
        let config = self.config.clone();
        self.acceptor = Some(
            thread::Builder::new()
                .name("acceptor".to_string())
                .spawn(move || tcp::accept_loop(listener, registry, config, running))?,
        );

        Ok(())
    }

    /// Stop accepting, then release every registered session.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("server stopping");

        if let Some(acceptor) = self.acceptor.take()
            && acceptor.join().is_err()
        {
            tracing::error!("acceptor thread panicked");
        }
        self.registry.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener actually bound (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.local_addr.ok_or(RtspError::NotStarted)
    }

    /// Sessions currently delivering media.
    pub fn viewers(&self) -> Vec<Viewer> {
        self.registry.viewers()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A client whose session is in PLAYING.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    pub resource: String,
    /// Where RTP packets are sent.
    pub client_addr: SocketAddr,
    pub ssrc: u32,
}
