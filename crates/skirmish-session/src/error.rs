//! Error types for the session layer.

use skirmish_protocol::SessionId;

/// Errors returned by [`SessionRegistry`](crate::SessionRegistry) lookups.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session with this id exists (never issued, or already reaped).
    #[error("invalid session: {0} not found")]
    NotFound(SessionId),
}

/// Why an outbound message was not queued for a session.
///
/// Delivery failures are isolated to the one session; callers log them and
/// move on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// No realtime link is attached to the session.
    #[error("no transport attached")]
    NotAttached,

    /// The link's writer has gone away.
    #[error("transport closed")]
    Closed,

    /// The outbound queue stayed full for the whole send timeout.
    #[error("outbound queue full")]
    Full,
}
