//! RAII handle that keeps a session alive while work runs for it.

use std::ops::Deref;
use std::sync::Arc;

use crate::PlayerSession;

/// A counted reference to a [`PlayerSession`].
///
/// While any guard for a session exists, the reaper will not evict it.
/// The count is released when the guard drops, on every exit path
/// including early returns and panics, so a handler cannot leak it.
///
/// Guards are handed out by [`SessionRegistry`](crate::SessionRegistry)
/// only; the increment happens under the registry lock so a concurrent
/// sweep sees it.
#[derive(Debug)]
pub struct SessionGuard {
    session: Arc<PlayerSession>,
}

impl SessionGuard {
    /// Takes a new reference. Callers must hold the registry lock.
    pub(crate) fn acquire(session: Arc<PlayerSession>) -> Self {
        session.acquire();
        Self { session }
    }

    /// The shared session, for callers that need to keep an uncounted
    /// handle (e.g. to send after the guard is gone).
    pub fn session(&self) -> &Arc<PlayerSession> {
        &self.session
    }
}

impl Deref for SessionGuard {
    type Target = PlayerSession;

    fn deref(&self) -> &PlayerSession {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.release();
    }
}
