//! Per-connection session state machine.
//!
//! Every accepted control connection owns exactly one [`RtspSession`].
//! It tracks:
//!
//! - The playback state: INIT, READY or PLAYING.
//! - A session token, assigned on the first successful SETUP and never
//!   changed afterwards (a later SETUP on the same connection keeps it).
//! - The transport negotiated during SETUP.
//! - The bound clip stream and the at-most-one pacer delivering it.
//!
//! ## Transitions
//!
//! ```text
//! SETUP     INIT | READY    -> READY
//! PLAY      READY | PLAYING -> PLAYING   (spawns the pacer if none is alive)
//! PAUSE     READY | PLAYING -> READY
//! TEARDOWN  READY | PLAYING -> INIT      (stream released)
//! ```
//!
//! Anything else answers 500 and leaves the state alone. Every response
//! echoes the request's CSeq and, once assigned, the session token.

pub mod registry;
pub mod transport;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crate::error::{Result, RtspError};
use crate::media::{MediaLibrary, RtpPacketizer};
use crate::pacer::{MediaStream, Pacer, PacerOutcome, PlaybackControl};
use crate::protocol::{Method, RtspRequest, RtspResponse};
use crate::server::{ServerConfig, Viewer};
use crate::transport::UdpTransport;

pub use registry::SessionRegistry;
pub use transport::{PortAllocator, Transport, TransportHeader};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Playback mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No stream bound (fresh connection or after TEARDOWN).
    Init,
    /// Stream bound, not delivering.
    Ready,
    /// Pacer delivering frames.
    Playing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Init => f.write_str("INIT"),
            SessionState::Ready => f.write_str("READY"),
            SessionState::Playing => f.write_str("PLAYING"),
        }
    }
}

/// Where the session's stream currently lives.
enum MediaSlot {
    Empty,
    /// Bound by SETUP, no pacer has taken it yet.
    Idle(MediaStream),
    /// Owned by a pacer thread; returned when it is joined.
    Streaming(JoinHandle<PacerOutcome>),
}

/// State machine for one control connection.
pub struct RtspSession {
    peer_addr: SocketAddr,
    id: Option<String>,
    sequence_echo: u32,
    control: Arc<PlaybackControl>,
    transport: Option<Transport>,
    resource: Option<String>,
    ssrc: Option<u32>,
    media: MediaSlot,
    library: MediaLibrary,
    ports: PortAllocator,
    config: Arc<ServerConfig>,
}

impl RtspSession {
    pub fn new(
        peer_addr: SocketAddr,
        library: MediaLibrary,
        ports: PortAllocator,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            peer_addr,
            id: None,
            sequence_echo: 0,
            control: Arc::new(PlaybackControl::new()),
            transport: None,
            resource: None,
            ssrc: None,
            media: MediaSlot::Empty,
            library,
            ports,
            config,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// Session token, once the first SETUP succeeded.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// CSeq of the last processed request.
    pub fn sequence_echo(&self) -> u32 {
        self.sequence_echo
    }

    pub fn transport(&self) -> Option<&Transport> {
        self.transport.as_ref()
    }

    /// SSRC of the currently bound stream.
    pub fn ssrc(&self) -> Option<u32> {
        self.ssrc
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn is_pacer_running(&self) -> bool {
        self.control.is_pacer_running()
    }

    /// Apply one request and build its response.
    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        self.sequence_echo = request.cseq();

        if let (Some(sent), Some(id)) = (request.session_id(), self.id.as_deref())
            && sent != id
        {
            tracing::debug!(sent, session_id = id, "request carries a different session token");
        }

        let result = match &request.method {
            Method::Setup => self.setup(request),
            Method::Play => self.play(),
            Method::Pause => self.pause(),
            Method::Teardown => self.teardown(),
            Method::Other(_) => Err(RtspError::InvalidTransition {
                method: request.method.to_string(),
                state: self.state().to_string(),
            }),
        };

        match result {
            Ok(response) => response,
            Err(RtspError::ResourceNotFound(target)) => {
                tracing::warn!(peer = %self.peer_addr, target, "SETUP for unknown resource");
                self.reply(RtspResponse::not_found())
            }
            Err(e) => {
                tracing::warn!(
                    peer = %self.peer_addr,
                    method = %request.method,
                    cseq = self.sequence_echo,
                    error = %e,
                    "request rejected"
                );
                self.reply(RtspResponse::server_error())
            }
        }
    }

    /// Response for a message whose request line could not be parsed.
    pub fn reject_malformed(&mut self) -> RtspResponse {
        self.sequence_echo = 0;
        self.reply(RtspResponse::server_error())
    }

    /// Stop the pacer and release the stream, leaving the session in INIT.
    ///
    /// Called on TEARDOWN, on disconnect and at server shutdown. Safe to
    /// call repeatedly.
    pub fn release(&mut self) {
        self.control.set_state(SessionState::Init);
        if let Some(mut stream) = self.reclaim_stream() {
            stream.close();
            tracing::debug!(
                peer = %self.peer_addr,
                session_id = self.id.as_deref().unwrap_or("-"),
                resource = %stream.resource,
                "stream released"
            );
        }
        self.transport = None;
        self.resource = None;
        self.ssrc = None;
    }

    /// Viewer summary while PLAYING.
    pub fn viewer(&self) -> Option<Viewer> {
        if self.state() != SessionState::Playing {
            return None;
        }
        let transport = self.transport.as_ref()?;
        Some(Viewer {
            session_id: self.id.clone()?,
            resource: self.resource.clone().unwrap_or_default(),
            client_addr: transport.client_addr,
            ssrc: self.ssrc.unwrap_or_default(),
        })
    }

    fn setup(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let state = self.state();
        if state == SessionState::Playing {
            return Err(self.invalid("SETUP", state));
        }

        let path = self.library.resolve(&request.uri)?;

        let client = match request.get_header("Transport").and_then(TransportHeader::parse) {
            Some(client) => client,
            None => {
                tracing::warn!(
                    peer = %self.peer_addr,
                    default_port = self.config.default_client_port,
                    "missing or malformed Transport header, using default client port"
                );
                TransportHeader::fallback(self.config.default_client_port)
            }
        };

        let source = self.config.source_kind.open(&path)?;
        let socket = UdpTransport::bind()?;
        let (server_rtp_port, server_rtcp_port) = self.ports.allocate()?;

        // rebinding from READY: the previous pacer is already winding down
        self.release_stream();

        let packetizer = RtpPacketizer::with_random_ssrc(self.config.payload_type);
        let ssrc = packetizer.ssrc();
        let client_addr = SocketAddr::new(self.peer_addr.ip(), client.client_rtp_port);
        let resource = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.uri.clone());

        self.media = MediaSlot::Idle(MediaStream {
            resource: resource.clone(),
            source,
            packetizer,
            transport: socket,
            destination: client_addr,
        });

        let transport = Transport {
            client_rtp_port: client.client_rtp_port,
            client_rtcp_port: client.client_rtcp_port,
            server_rtp_port,
            server_rtcp_port,
            client_addr,
        };
        let transport_value = transport.response_header();
        self.transport = Some(transport);
        self.resource = Some(resource);
        self.ssrc = Some(ssrc);

        let id = self.id.get_or_insert_with(next_session_id).clone();
        self.control.set_state(SessionState::Ready);

        tracing::info!(
            session_id = %id,
            peer = %self.peer_addr,
            path = %path.display(),
            client_rtp = %client_addr,
            server_rtp_port,
            ssrc = format_args!("{:#010X}", ssrc),
            "session set up"
        );

        Ok(self
            .reply(RtspResponse::ok())
            .add_header("Transport", &transport_value))
    }

    fn play(&mut self) -> Result<RtspResponse> {
        let state = self.state();
        if state == SessionState::Init {
            return Err(self.invalid("PLAY", state));
        }

        if self.control.start_playing() {
            if let Err(e) = self.spawn_pacer() {
                self.control.set_state(SessionState::Ready);
                return Err(e);
            }
        } else {
            tracing::debug!(peer = %self.peer_addr, "pacer still alive, resuming it");
        }

        tracing::info!(
            session_id = self.id.as_deref().unwrap_or("-"),
            peer = %self.peer_addr,
            "session playing"
        );
        Ok(self.reply(RtspResponse::ok()))
    }

    fn pause(&mut self) -> Result<RtspResponse> {
        let state = self.state();
        if state == SessionState::Init {
            return Err(self.invalid("PAUSE", state));
        }

        self.control.set_state(SessionState::Ready);
        tracing::info!(
            session_id = self.id.as_deref().unwrap_or("-"),
            peer = %self.peer_addr,
            "session paused"
        );
        Ok(self.reply(RtspResponse::ok()))
    }

    fn teardown(&mut self) -> Result<RtspResponse> {
        let state = self.state();
        if state == SessionState::Init {
            return Err(self.invalid("TEARDOWN", state));
        }

        self.release();
        tracing::info!(
            session_id = self.id.as_deref().unwrap_or("-"),
            peer = %self.peer_addr,
            "session torn down"
        );
        Ok(self.reply(RtspResponse::ok()))
    }

    /// Hand the bound stream to a new pacer. The control block has
    /// already recorded the pacer as running.
    fn spawn_pacer(&mut self) -> Result<()> {
        let Some(stream) = self.reclaim_stream() else {
            self.control_pacer_failed();
            return Err(RtspError::InvalidTransition {
                method: "PLAY".to_string(),
                state: "no bound stream".to_string(),
            });
        };

        let id = self.id.clone().unwrap_or_default();
        let pacer = Pacer::new(&id, stream, self.control.clone(), self.config.pacer);
        match pacer.spawn() {
            Ok(handle) => {
                self.media = MediaSlot::Streaming(handle);
                Ok(())
            }
            Err(e) => {
                self.control_pacer_failed();
                Err(e.into())
            }
        }
    }

    fn control_pacer_failed(&self) {
        self.control.set_state(SessionState::Ready);
        // start_playing() marked a pacer as running; nothing runs now
        self.control.pacer_failed();
    }

    /// Take the stream back, joining a finished or stopping pacer.
    ///
    /// Only called when the state is not PLAYING or when the control
    /// block reports no live pacer, so the join waits at most one frame
    /// interval.
    fn reclaim_stream(&mut self) -> Option<MediaStream> {
        match std::mem::replace(&mut self.media, MediaSlot::Empty) {
            MediaSlot::Empty => None,
            MediaSlot::Idle(stream) => Some(stream),
            MediaSlot::Streaming(handle) => match handle.join() {
                Ok(outcome) => Some(outcome.stream),
                Err(_) => {
                    tracing::error!(peer = %self.peer_addr, "pacer thread panicked");
                    None
                }
            },
        }
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.reclaim_stream() {
            stream.close();
        }
    }

    fn invalid(&self, method: &str, state: SessionState) -> RtspError {
        RtspError::InvalidTransition {
            method: method.to_string(),
            state: state.to_string(),
        }
    }

    fn reply(&self, response: RtspResponse) -> RtspResponse {
        let response = response.add_header("CSeq", &self.sequence_echo.to_string());
        match &self.id {
            Some(id) => response.add_header("Session", id),
            None => response,
        }
    }
}

impl Drop for RtspSession {
    fn drop(&mut self) {
        self.release();
    }
}

fn next_session_id() -> String {
    format!("{:016X}", SESSION_COUNTER.fetch_add(1, Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::pacer::{PacerConfig, Pacing};

    static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn media_dir() -> PathBuf {
        let n = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir =
            std::env::temp_dir().join(format!("clipcast-session-{}-{}", std::process::id(), n));
        std::fs::create_dir_all(&dir).unwrap();
        let mut clip = Vec::new();
        for i in 0..3u8 {
            let frame = vec![i; 200];
            clip.extend_from_slice(format!("{:05}", frame.len()).as_bytes());
            clip.extend_from_slice(&frame);
        }
        std::fs::write(dir.join("clip.bin"), clip).unwrap();
        dir
    }

    fn session() -> RtspSession {
        let dir = media_dir();
        let config = ServerConfig {
            media_dir: dir.clone(),
            fallback_dir: dir.join("none"),
            pacer: PacerConfig {
                frame_interval: Duration::from_millis(5),
                pacing: Pacing::Deadline,
                min_frame_size: 100,
            },
            ..ServerConfig::default()
        };
        RtspSession::new(
            "127.0.0.1:40000".parse().unwrap(),
            config.library(),
            PortAllocator::new(config.server_port_base),
            Arc::new(config),
        )
    }

    fn request(method: &str, cseq: u32, extra: &str) -> RtspRequest {
        RtspRequest::parse(&format!(
            "{method} rtsp://127.0.0.1:8554/clip.bin RTSP/1.0\r\nCSeq: {cseq}\r\n{extra}\r\n"
        ))
        .unwrap()
    }

    fn setup(session: &mut RtspSession, cseq: u32) -> RtspResponse {
        // port 9 (discard) on loopback keeps sends harmless
        session.handle(&request(
            "SETUP",
            cseq,
            "Transport: RTP/UDP;client_port=9-10\r\n",
        ))
    }

    #[test]
    fn init_rejects_play_pause_teardown() {
        for method in ["PLAY", "PAUSE", "TEARDOWN"] {
            let mut s = session();
            let resp = s.handle(&request(method, 1, ""));
            assert_eq!(resp.status_code, 500, "{method}");
            assert_eq!(resp.get_header("CSeq"), Some("1"));
            assert_eq!(resp.get_header("Session"), None);
            assert_eq!(s.state(), SessionState::Init);
            assert!(!s.is_pacer_running());
        }
    }

    #[test]
    fn setup_unknown_resource_is_not_found() {
        let mut s = session();
        let req = RtspRequest::parse("SETUP missing.bin RTSP/1.0\r\nCSeq: 2\r\n\r\n").unwrap();
        let resp = s.handle(&req);
        assert_eq!(resp.status_code, 404);
        assert_eq!(resp.get_header("CSeq"), Some("2"));
        assert_eq!(s.state(), SessionState::Init);
        assert!(s.id().is_none());
    }

    #[test]
    fn setup_negotiates_transport() {
        let mut s = session();
        let resp = setup(&mut s, 1);
        assert_eq!(resp.status_code, 200);
        assert_eq!(s.state(), SessionState::Ready);

        let id = s.id().unwrap().to_string();
        assert_eq!(resp.get_header("Session"), Some(id.as_str()));
        let transport = s.transport().unwrap();
        assert_eq!(transport.client_rtp_port, 9);
        assert_eq!(transport.client_addr, "127.0.0.1:9".parse().unwrap());
        assert_eq!(
            resp.get_header("Transport"),
            Some(transport.response_header().as_str())
        );
        assert_eq!(s.resource(), Some("clip.bin"));
        assert!(s.ssrc().is_some());
    }

    #[test]
    fn setup_without_transport_uses_default_port() {
        let mut s = session();
        let resp = s.handle(&request("SETUP", 1, ""));
        assert_eq!(resp.status_code, 200);
        let transport = s.transport().unwrap();
        assert_eq!(transport.client_rtp_port, 25000);
        assert_eq!(transport.client_rtcp_port, 25001);
    }

    #[test]
    fn cseq_echo_and_token_across_lifecycle() {
        let mut s = session();
        let setup_resp = setup(&mut s, 10);
        let id = s.id().unwrap().to_string();
        assert_eq!(setup_resp.get_header("CSeq"), Some("10"));

        let steps = [
            ("PLAY", 11, SessionState::Playing),
            ("PAUSE", 12, SessionState::Ready),
            ("PLAY", 13, SessionState::Playing),
            ("TEARDOWN", 14, SessionState::Init),
        ];
        for (method, cseq, expected) in steps {
            let extra = format!("Session: {id}\r\n");
            let resp = s.handle(&request(method, cseq, &extra));
            assert_eq!(resp.status_code, 200, "{method}");
            assert_eq!(resp.get_header("CSeq"), Some(cseq.to_string().as_str()));
            assert_eq!(resp.get_header("Session"), Some(id.as_str()));
            assert_eq!(s.state(), expected, "{method}");
        }

        assert!(!s.is_pacer_running());
        assert!(s.transport().is_none());

        let resp = s.handle(&request("PLAY", 15, ""));
        assert_eq!(resp.status_code, 500);
        assert_eq!(resp.get_header("CSeq"), Some("15"));
        assert_eq!(resp.get_header("Session"), Some(id.as_str()));
    }

    #[test]
    fn token_survives_second_setup() {
        let mut s = session();
        assert_eq!(setup(&mut s, 1).status_code, 200);
        let id = s.id().unwrap().to_string();
        let first_ssrc = s.ssrc();
        assert_eq!(s.handle(&request("TEARDOWN", 2, "")).status_code, 200);
        let resp = setup(&mut s, 3);
        assert_eq!(resp.status_code, 200);
        assert_eq!(s.id(), Some(id.as_str()));
        assert!(s.ssrc().is_some());
        assert_ne!(s.ssrc(), first_ssrc);
    }

    #[test]
    fn setup_while_playing_is_rejected() {
        let mut s = session();
        assert_eq!(setup(&mut s, 1).status_code, 200);
        assert_eq!(s.handle(&request("PLAY", 2, "")).status_code, 200);
        let resp = setup(&mut s, 3);
        assert_eq!(resp.status_code, 500);
        assert_eq!(s.state(), SessionState::Playing);
        s.release();
        assert_eq!(s.state(), SessionState::Init);
    }

    #[test]
    fn play_twice_keeps_single_pacer() {
        let mut s = session();
        assert_eq!(setup(&mut s, 1).status_code, 200);
        assert_eq!(s.handle(&request("PLAY", 2, "")).status_code, 200);
        assert!(s.is_pacer_running());
        assert_eq!(s.handle(&request("PLAY", 3, "")).status_code, 200);
        assert!(s.is_pacer_running());
        assert!(matches!(s.media, MediaSlot::Streaming(_)));
        assert!(s.viewer().is_some());
        assert_eq!(s.handle(&request("PAUSE", 4, "")).status_code, 200);
        assert!(s.viewer().is_none());
    }

    #[test]
    fn unknown_method_is_server_error() {
        let mut s = session();
        assert_eq!(setup(&mut s, 1).status_code, 200);
        let resp = s.handle(&request("DESCRIBE", 2, ""));
        assert_eq!(resp.status_code, 500);
        assert_eq!(resp.get_header("CSeq"), Some("2"));
        assert_eq!(s.state(), SessionState::Ready);
    }

    #[test]
    fn malformed_request_answers_with_cseq_zero() {
        let mut s = session();
        assert_eq!(setup(&mut s, 7).status_code, 200);
        let resp = s.reject_malformed();
        assert_eq!(resp.status_code, 500);
        assert_eq!(resp.get_header("CSeq"), Some("0"));
        assert_eq!(s.state(), SessionState::Ready);
    }

    #[test]
    fn independent_sessions_do_not_interfere() {
        let mut a = session();
        let mut b = session();
        assert_eq!(setup(&mut a, 1).status_code, 200);
        assert_eq!(setup(&mut b, 1).status_code, 200);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.ssrc(), b.ssrc());

        assert_eq!(a.handle(&request("PLAY", 2, "")).status_code, 200);
        assert_eq!(a.state(), SessionState::Playing);
        assert_eq!(b.state(), SessionState::Ready);

        assert_eq!(b.handle(&request("TEARDOWN", 2, "")).status_code, 200);
        assert_eq!(a.state(), SessionState::Playing);
        assert_eq!(b.state(), SessionState::Init);
        a.release();
    }
}
