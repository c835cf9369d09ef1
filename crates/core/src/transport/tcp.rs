use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::protocol::RtspRequest;
use crate::server::ServerConfig;
use crate::session::registry::SharedSession;
use crate::session::{RtspSession, SessionRegistry};

/// Largest control message (request line plus headers) a connection
/// buffers. Anything longer is answered with a 500 and the connection is
/// closed.
pub const MAX_MESSAGE_LEN: usize = 8 * 1024;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(
    listener: TcpListener,
    registry: SessionRegistry,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    let library = config.library();
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let session =
                    RtspSession::new(peer_addr, library.clone(), registry.ports(), config.clone());
                let session = registry.insert(peer_addr, session);

                let r = registry.clone();
                let c = config.clone();
                let run = running.clone();
                let spawned = thread::Builder::new()
                    .name(format!("conn-{peer_addr}"))
                    .spawn(move || Connection::handle(stream, peer_addr, session, r, c, run));
                if let Err(e) = spawned {
                    tracing::error!(%peer_addr, error = %e, "failed to spawn connection thread");
                    registry.remove(&peer_addr);
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// Outcome of reading one control message.
enum ReadOutcome {
    Message(String),
    Oversized,
    Closed(&'static str),
}

/// A single client connection with its own lifecycle.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    session: SharedSession,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: run the request loop, then unregister and release.
    fn handle(
        stream: TcpStream,
        peer_addr: SocketAddr,
        session: SharedSession,
        registry: SessionRegistry,
        config: Arc<ServerConfig>,
        running: Arc<AtomicBool>,
    ) {
        tracing::info!(%peer_addr, "client connected");

        let reason = match Self::open(stream, peer_addr, session.clone(), &config) {
            Ok(mut conn) => conn.run(&running),
            Err(_) => "socket setup failed",
        };

        registry.remove(&peer_addr);
        session.lock().release();

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    fn open(
        stream: TcpStream,
        peer_addr: SocketAddr,
        session: SharedSession,
        config: &ServerConfig,
    ) -> io::Result<Self> {
        stream.set_read_timeout(Some(config.read_timeout))?;
        let reader_stream = stream.try_clone()?;
        Ok(Connection {
            reader: BufReader::new(reader_stream),
            writer: stream,
            session,
            peer_addr,
        })
    }

    /// Request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        loop {
            let request_text = match self.read_message(running) {
                ReadOutcome::Message(text) => text,
                ReadOutcome::Oversized => {
                    tracing::warn!(
                        peer = %self.peer_addr,
                        limit = MAX_MESSAGE_LEN,
                        "control message too large"
                    );
                    let response = self.session.lock().reject_malformed();
                    if let Err(e) = self.writer.write_all(response.serialize().as_bytes()) {
                        tracing::debug!(peer = %self.peer_addr, error = %e, "rejection not delivered");
                    }
                    return "message too large";
                }
                ReadOutcome::Closed(reason) => return reason,
            };

            let response = {
                let mut session = self.session.lock();
                match RtspRequest::parse(&request_text) {
                    Ok(request) => {
                        tracing::debug!(
                            peer = %self.peer_addr,
                            method = %request.method,
                            uri = %request.uri,
                            cseq = request.cseq(),
                            "request"
                        );
                        session.handle(&request)
                    }
                    Err(e) => {
                        tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                        session.reject_malformed()
                    }
                }
            };

            tracing::debug!(
                peer = %self.peer_addr,
                status = response.status_code,
                "response"
            );

            if self
                .writer
                .write_all(response.serialize().as_bytes())
                .is_err()
            {
                return "write error";
            }
        }
    }

    /// Read lines up to a blank line, never buffering more than
    /// [`MAX_MESSAGE_LEN`] bytes. Read timeouts only re-check the shutdown
    /// flag; a partially read message is kept across them.
    fn read_message(&mut self, running: &Arc<AtomicBool>) -> ReadOutcome {
        let mut request_text = String::new();
        loop {
            if !running.load(Ordering::SeqCst) {
                return ReadOutcome::Closed("server shutting down");
            }

            // one byte past the budget so an overrun is detectable
            let budget = (MAX_MESSAGE_LEN - request_text.len()) as u64 + 1;
            let mut line = String::new();
            let result = (&mut self.reader).take(budget).read_line(&mut line);
            request_text.push_str(&line);
            if request_text.len() > MAX_MESSAGE_LEN {
                return ReadOutcome::Oversized;
            }

            match result {
                Ok(0) => return ReadOutcome::Closed("connection closed by client"),
                Ok(_) => {
                    if ends_with_blank_line(&request_text) {
                        if request_text.trim().is_empty() {
                            request_text.clear();
                            continue;
                        }
                        return ReadOutcome::Message(request_text);
                    }
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {}
                Err(_) => return ReadOutcome::Closed("read error"),
            }
        }
    }
}

/// True once `text` ends in an empty line, even if that line arrived
/// split across read timeouts.
fn ends_with_blank_line(text: &str) -> bool {
    let Some(body) = text.strip_suffix('\n') else {
        return false;
    };
    let body = body.strip_suffix('\r').unwrap_or(body);
    body.is_empty() || body.ends_with('\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_detection() {
        assert!(ends_with_blank_line("\r\n"));
        assert!(ends_with_blank_line("PLAY x RTSP/1.0\r\nCSeq: 1\r\n\r\n"));
        assert!(ends_with_blank_line("PLAY x RTSP/1.0\nCSeq: 1\n\n"));
        assert!(!ends_with_blank_line("PLAY x RTSP/1.0\r\nCSeq: 1\r\n"));
        assert!(!ends_with_blank_line("PLAY x RTSP/1.0\r\nCSeq: 1\r"));
        assert!(!ends_with_blank_line(""));
    }
}
