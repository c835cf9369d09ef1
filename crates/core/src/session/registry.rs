use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::RtspSession;
use super::transport::PortAllocator;
use crate::server::Viewer;

/// A session shared between its connection thread and the registry.
pub type SharedSession = Arc<Mutex<RtspSession>>;

/// Process-wide table of live sessions, keyed by the client connection.
///
/// The acceptor side inserts and each connection thread removes its own
/// entry, so the map sits behind a `parking_lot::RwLock`. Each session
/// has its own mutex; the connection thread holds it only while handling
/// one request.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SocketAddr, SharedSession>>>,
    ports: PortAllocator,
}

impl SessionRegistry {
    /// `server_port_base` seeds the shared server-side port allocator.
    pub fn new(server_port_base: u16) -> Self {
        SessionRegistry {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ports: PortAllocator::new(server_port_base),
        }
    }

    /// Allocator shared by every session created through this registry.
    pub fn ports(&self) -> PortAllocator {
        self.ports.clone()
    }

    /// Register the session for a newly accepted connection.
    pub fn insert(&self, peer: SocketAddr, session: RtspSession) -> SharedSession {
        let session = Arc::new(Mutex::new(session));
        let total = {
            let mut sessions = self.sessions.write();
            sessions.insert(peer, session.clone());
            sessions.len()
        };
        tracing::debug!(%peer, total_sessions = total, "session registered");
        session
    }

    pub fn get(&self, peer: &SocketAddr) -> Option<SharedSession> {
        self.sessions.read().get(peer).cloned()
    }

    /// Remove a connection's session (used when its loop exits).
    pub fn remove(&self, peer: &SocketAddr) -> Option<SharedSession> {
        let (removed, total) = {
            let mut sessions = self.sessions.write();
            let removed = sessions.remove(peer);
            (removed, sessions.len())
        };
        if removed.is_some() {
            tracing::debug!(%peer, total_sessions = total, "session unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Every session currently in PLAYING.
    pub fn viewers(&self) -> Vec<Viewer> {
        let sessions: Vec<SharedSession> = self.sessions.read().values().cloned().collect();
        sessions
            .iter()
            .filter_map(|session| session.lock().viewer())
            .collect()
    }

    /// Release every session's stream, then clear the table.
    ///
    /// Returns how many sessions were released.
    pub fn shutdown(&self) -> usize {
        let sessions: Vec<SharedSession> = self.sessions.read().values().cloned().collect();
        for session in &sessions {
            session.lock().release();
        }
        self.sessions.write().clear();
        tracing::info!(released = sessions.len(), "session registry cleared");
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerConfig;

    fn session(registry: &SessionRegistry, port: u16) -> (SocketAddr, RtspSession) {
        let peer: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let config = ServerConfig::default();
        let session = RtspSession::new(
            peer,
            config.library(),
            registry.ports(),
            Arc::new(config),
        );
        (peer, session)
    }

    #[test]
    fn insert_get_remove() {
        let registry = SessionRegistry::new(25000);
        let (peer, s) = session(&registry, 40001);
        registry.insert(peer, s);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&peer).is_some());

        assert!(registry.remove(&peer).is_some());
        assert!(registry.remove(&peer).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn sessions_keyed_by_connection() {
        let registry = SessionRegistry::new(25000);
        let (a, sa) = session(&registry, 40002);
        let (b, sb) = session(&registry, 40003);
        registry.insert(a, sa);
        registry.insert(b, sb);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&b).unwrap().lock().peer_addr(), b);
    }

    #[test]
    fn concurrent_insert_and_remove() {
        let registry = SessionRegistry::new(25000);
        let handles: Vec<_> = (0..8u16)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..25u16 {
                        let (peer, s) = session(&registry, 41000 + i * 100 + j);
                        registry.insert(peer, s);
                        if j % 2 == 0 {
                            registry.remove(&peer);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 8 * 12);
    }

    #[test]
    fn shutdown_clears_everything() {
        let registry = SessionRegistry::new(25000);
        let (peer, s) = session(&registry, 40004);
        let shared = registry.insert(peer, s);
        assert_eq!(registry.shutdown(), 1);
        assert!(registry.is_empty());
        assert!(registry.viewers().is_empty());
        assert_eq!(
            shared.lock().state(),
            crate::session::SessionState::Init
        );
    }
}
