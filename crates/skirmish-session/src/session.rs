//! Session types: configuration, the realtime link, and `PlayerSession`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use skirmish_clock::GameClock;
use skirmish_protocol::{EntityId, SessionId};
use skirmish_transport::ConnectionId;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

use crate::SendError;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a session may sit idle before the reaper may evict it.
    /// Also the advertised cookie lifetime.
    ///
    /// Default: 30 minutes.
    pub session_timeout: Duration,

    /// How often the reaper sweeps. Independent of `session_timeout`.
    ///
    /// Default: 60 seconds.
    pub sweep_interval: Duration,

    /// Capacity of each session's outbound queue.
    ///
    /// Default: 64 messages.
    pub outbound_capacity: usize,

    /// How long a sender waits on a full outbound queue before dropping
    /// the message.
    ///
    /// Default: 50 ms.
    pub send_timeout: Duration,

    /// Name of the cookie carrying the session id.
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            outbound_capacity: 64,
            send_timeout: Duration::from_millis(50),
            cookie_name: "skirmish_session".to_string(),
        }
    }
}

impl SessionConfig {
    /// Smallest accepted sweep interval.
    pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

    /// Clamp values that would make the registry or reaper misbehave:
    /// a zero-capacity queue (`mpsc::channel` panics on 0) and a sweep
    /// interval too small for `tokio::time::interval`.
    pub fn validated(mut self) -> Self {
        if self.outbound_capacity == 0 {
            warn!("outbound_capacity of 0, using 1");
            self.outbound_capacity = 1;
        }
        if self.sweep_interval < Self::MIN_SWEEP_INTERVAL {
            warn!(
                interval_ms = self.sweep_interval.as_millis() as u64,
                "sweep_interval too small, clamping"
            );
            self.sweep_interval = Self::MIN_SWEEP_INTERVAL;
        }
        if self.cookie_name.trim().is_empty() {
            warn!("empty cookie_name, using default");
            self.cookie_name = SessionConfig::default().cookie_name;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Outbound / SessionLink
// ---------------------------------------------------------------------------

/// An item on a session's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// An encoded message. Shared so one encoding can go to many sessions.
    Frame(Arc<[u8]>),
    /// Ask the connection's writer to close the transport.
    Close,
}

/// The realtime channel attached to a session: the sending half of the
/// bounded queue drained by the connection's writer task.
#[derive(Debug, Clone)]
pub struct SessionLink {
    connection: ConnectionId,
    outbound: mpsc::Sender<Outbound>,
}

impl SessionLink {
    pub fn new(connection: ConnectionId, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            connection,
            outbound,
        }
    }

    /// Creates a link plus the receiver its writer task drains.
    pub fn channel(
        connection: ConnectionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(connection, tx), rx)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    /// `false` once the writer dropped its receiver.
    pub fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queues `frame` for the writer.
    ///
    /// Never blocks longer than `timeout`: a full queue is retried until
    /// the timeout elapses, then the message is dropped and
    /// [`SendError::Full`] returned. Messages from one sender arrive in
    /// send order.
    pub async fn send(&self, frame: Arc<[u8]>, timeout: Duration) -> Result<(), SendError> {
        match self.outbound.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
            Err(mpsc::error::TrySendError::Full(item)) => {
                match tokio::time::timeout(timeout, self.outbound.send(item)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(SendError::Closed),
                    Err(_) => Err(SendError::Full),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PlayerSession
// ---------------------------------------------------------------------------

/// One connected (or recently connected) player.
///
/// Shared as `Arc<PlayerSession>` between the registry, in-flight handlers
/// (through [`SessionGuard`](crate::SessionGuard)) and the broadcaster.
/// `last_active` and the reference count are atomics; the link slot is a
/// leaf mutex that is never held across an await or while taking another
/// lock.
#[derive(Debug)]
pub struct PlayerSession {
    id: SessionId,
    player: EntityId,
    created_at: Instant,
    clock: GameClock,
    /// Milliseconds since the clock origin at the last touch.
    last_active_ms: AtomicU64,
    ref_count: AtomicUsize,
    link: Mutex<Option<SessionLink>>,
}

impl PlayerSession {
    pub(crate) fn new(id: SessionId, player: EntityId, clock: GameClock) -> Self {
        Self {
            id,
            player,
            created_at: clock.now(),
            last_active_ms: AtomicU64::new(clock.elapsed_millis()),
            clock,
            ref_count: AtomicUsize::new(0),
            link: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The character this session controls.
    pub fn player(&self) -> &EntityId {
        &self.player
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the session was last touched.
    pub fn idle_for(&self) -> Duration {
        let now = self.clock.elapsed_millis();
        let last = self.last_active_ms.load(Ordering::Acquire);
        Duration::from_millis(now.saturating_sub(last))
    }

    /// Number of live [`SessionGuard`](crate::SessionGuard)s.
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// `true` if a link is attached and its writer is still running.
    pub fn is_connected(&self) -> bool {
        self.link_slot()
            .as_ref()
            .is_some_and(SessionLink::is_connected)
    }

    /// The connection currently bound to this session, if any.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.link_slot().as_ref().map(SessionLink::connection_id)
    }

    /// Queues `frame` on the attached link. See [`SessionLink::send`].
    pub async fn send(
        &self,
        frame: Arc<[u8]>,
        timeout: Duration,
    ) -> Result<(), SendError> {
        let link = self.link_slot().clone().ok_or(SendError::NotAttached)?;
        link.send(frame, timeout).await.inspect_err(|e| {
            if *e == SendError::Full {
                warn!(
                    session_id = %self.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "outbound queue full, message dropped"
                );
            }
        })
    }

    /// Marks the session active now. Called for every message its
    /// connection receives; never moves `last_active` backwards.
    pub fn touch(&self) {
        self.last_active_ms
            .fetch_max(self.clock.elapsed_millis(), Ordering::AcqRel);
    }

    // -- crate-internal lifecycle ----------------------------------------

    pub(crate) fn acquire(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Only called from `SessionGuard::drop`, which exists once per
    /// `acquire`, so the count cannot underflow.
    pub(crate) fn release(&self) {
        let previous = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "session released more often than acquired");
    }

    /// Installs `link`, returning the one it replaced.
    pub(crate) fn set_link(&self, link: SessionLink) -> Option<SessionLink> {
        self.link_slot().replace(link)
    }

    /// Removes the link if it belongs to `connection`.
    pub(crate) fn clear_link(&self, connection: ConnectionId) -> bool {
        let mut slot = self.link_slot();
        if slot.as_ref().map(SessionLink::connection_id) == Some(connection) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Removes the link and asks its writer to close the transport.
    /// Best effort: a full or closed queue is logged, not propagated.
    pub(crate) fn close_link(&self) {
        let link = self.link_slot().take();
        if let Some(link) = link {
            close_quietly(&self.id, &link);
        }
    }

    fn link_slot(&self) -> MutexGuard<'_, Option<SessionLink>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sends `Close` on a detached link. Dropping the link afterwards closes
/// the queue, which also stops the writer.
pub(crate) fn close_quietly(session_id: &SessionId, link: &SessionLink) {
    if let Err(e) = link.outbound.try_send(Outbound::Close) {
        warn!(
            %session_id,
            connection = %link.connection,
            error = %e,
            "could not signal transport close"
        );
    }
}
