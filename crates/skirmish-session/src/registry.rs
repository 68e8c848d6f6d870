//! The session registry: every live player session, keyed by session id.
//!
//! # Locking
//!
//! The map sits behind a `tokio::sync::RwLock`. Lookups take the read lock,
//! creation and the reaper's sweep take the write lock. The reference count
//! is incremented while the lock is held, which is what makes eviction
//! safe: a sweep either runs before the increment (and the session is then
//! gone, so the lookup fails cleanly) or after it (and sees a non-zero
//! count). Guards decrement without the lock.
//!
//! When both are needed, the registry lock is taken before the turn lock.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use skirmish_clock::GameClock;
use skirmish_protocol::{EntityId, SessionId};
use skirmish_transport::{ConnectionId, HandshakeInfo};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::session::close_quietly;
use crate::{PlayerSession, SessionConfig, SessionCookie, SessionError, SessionGuard, SessionLink};

// ---------------------------------------------------------------------------
// Request / lease
// ---------------------------------------------------------------------------

/// What the registry needs from an incoming connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    /// Session id presented by the client, if any.
    pub session_id: Option<SessionId>,
    /// Whether the connection arrived over a secure transport.
    pub secure: bool,
}

impl SessionRequest {
    /// Reads the session cookie named `cookie_name` from a handshake.
    pub fn from_handshake(info: &HandshakeInfo, cookie_name: &str) -> Self {
        Self {
            session_id: info
                .cookie(cookie_name)
                .filter(|v| !v.is_empty())
                .map(SessionId::new),
            secure: info.secure,
        }
    }
}

/// Result of [`SessionRegistry::get_or_create`].
#[derive(Debug)]
pub struct SessionLease {
    pub guard: SessionGuard,
    /// `true` when the presented id matched a live session.
    pub resumed: bool,
    /// Cookie to hand to the client; present only for new sessions.
    pub cookie: Option<SessionCookie>,
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Registry of player sessions.
///
/// Shared as `Arc<SessionRegistry>` by connection handlers, the broadcaster
/// (read-only) and the [`SessionReaper`](crate::SessionReaper), the only
/// component that removes sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<PlayerSession>>>,
    config: SessionConfig,
    clock: GameClock,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig, clock: GameClock) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config: config.validated(),
            clock,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Looks up a session, counts a reference and marks it active.
    pub async fn get(&self, id: &SessionId) -> Result<SessionGuard, SessionError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        let guard = SessionGuard::acquire(Arc::clone(session));
        guard.touch();
        Ok(guard)
    }

    /// Resumes the session named in `request`, or creates a new one.
    ///
    /// `spawn_player` is only called for new sessions, before any lock is
    /// taken, and returns the character the session will control.
    pub async fn get_or_create<F>(&self, request: &SessionRequest, spawn_player: F) -> SessionLease
    where
        F: FnOnce() -> EntityId,
    {
        if let Some(id) = &request.session_id {
            if let Ok(guard) = self.get(id).await {
                debug!(session_id = %id, "session resumed");
                return SessionLease {
                    guard,
                    resumed: true,
                    cookie: None,
                };
            }
            debug!(session_id = %id, "unknown session presented, creating a new one");
        }

        let player = spawn_player();
        let mut sessions = self.sessions.write().await;
        let mut id = generate_session_id();
        while sessions.contains_key(&id) {
            id = generate_session_id();
        }

        let session = Arc::new(PlayerSession::new(id.clone(), player, self.clock));
        sessions.insert(id.clone(), Arc::clone(&session));
        let guard = SessionGuard::acquire(session);
        drop(sessions);

        info!(session_id = %id, player = %guard.player(), "session created");

        let cookie = SessionCookie::new(
            self.config.cookie_name.clone(),
            id,
            self.config.session_timeout,
            request.secure,
        );
        SessionLease {
            guard,
            resumed: false,
            cookie: Some(cookie),
        }
    }

    /// Binds a realtime link to the session. A link from an earlier
    /// connection is closed.
    pub fn attach(&self, session: &PlayerSession, link: SessionLink) {
        let connection = link.connection_id();
        if let Some(previous) = session.set_link(link) {
            if previous.connection_id() != connection {
                debug!(
                    session_id = %session.id(),
                    old = %previous.connection_id(),
                    new = %connection,
                    "replacing session link"
                );
                close_quietly(session.id(), &previous);
            }
        }
        session.touch();
    }

    /// Unbinds the link if it still belongs to `connection`. The session
    /// itself stays registered until the reaper evicts it.
    pub fn detach(&self, session: &PlayerSession, connection: ConnectionId) -> bool {
        let detached = session.clear_link(connection);
        if detached {
            debug!(session_id = %session.id(), %connection, "session link detached");
        }
        detached
    }

    /// Snapshot of sessions with a live link, taken under the read lock.
    ///
    /// The returned handles are not counted; they are for delivery only.
    pub async fn connected(&self) -> Vec<Arc<PlayerSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.is_connected())
            .cloned()
            .collect()
    }

    /// Evicts every session idle longer than the session timeout with no
    /// outstanding references, closing its link. Returns the evicted ids.
    pub async fn sweep(&self) -> Vec<SessionId> {
        let timeout = self.config.session_timeout;
        let mut evicted = Vec::new();

        let mut sessions = self.sessions.write().await;
        sessions.retain(|id, session| {
            if session.ref_count() == 0 && session.idle_for() > timeout {
                session.close_link();
                evicted.push(id.clone());
                false
            } else {
                true
            }
        });
        let remaining = sessions.len();
        drop(sessions);

        for id in &evicted {
            info!(session_id = %id, "session expired");
        }
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), remaining, "session sweep finished");
        }
        evicted
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// 128 random bits as 32 lowercase hex characters.
fn generate_session_id() -> SessionId {
    let bytes: [u8; 16] = rand::rng().random();
    SessionId::new(bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
}
