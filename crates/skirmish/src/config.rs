//! Server configuration.

use std::time::Duration;

use skirmish_clock::ClockConfig;
use skirmish_combat::CombatConfig;
use skirmish_protocol::EventKind;
use skirmish_session::SessionConfig;
use tracing::warn;

/// Configuration for the event broadcaster.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastConfig {
    /// Forward `turn_start`/`turn_end` events as well as the combat events.
    ///
    /// Default: `true`.
    pub include_turn_events: bool,

    /// Per-recipient bound on queueing one event.
    ///
    /// Default: 50 ms.
    pub send_timeout: Duration,

    /// Events buffered between the combat core and the broadcaster.
    /// A broadcaster that falls further behind skips the oldest.
    ///
    /// Default: 256.
    pub channel_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            include_turn_events: true,
            send_timeout: Duration::from_millis(50),
            channel_capacity: 256,
        }
    }
}

impl BroadcastConfig {
    pub fn validated(mut self) -> Self {
        if self.channel_capacity == 0 {
            warn!("broadcast channel_capacity of 0, using 1");
            self.channel_capacity = 1;
        }
        if self.send_timeout.is_zero() {
            warn!("broadcast send_timeout of 0, using default");
            self.send_timeout = Self::default().send_timeout;
        }
        self
    }

    /// Whether events of `kind` reach clients.
    pub fn forwards(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::TurnStart | EventKind::TurnEnd => self.include_turn_events,
            _ => true,
        }
    }
}

/// Everything a [`SkirmishServer`](crate::SkirmishServer) is built from.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    ///
    /// Default: `127.0.0.1:8080`.
    pub bind_addr: String,

    /// Upper bound on handling one request. A request past its deadline
    /// is abandoned and answered with a 408.
    ///
    /// Default: 5 seconds.
    pub request_deadline: Duration,

    /// A connection that sends nothing for this long is closed. The
    /// session survives until the reaper evicts it.
    ///
    /// Default: 60 seconds.
    pub idle_timeout: Duration,

    pub session: SessionConfig,
    pub clock: ClockConfig,
    pub combat: CombatConfig,
    pub broadcast: BroadcastConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            request_deadline: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            session: SessionConfig::default(),
            clock: ClockConfig::default(),
            combat: CombatConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Smallest accepted request deadline.
    pub const MIN_REQUEST_DEADLINE: Duration = Duration::from_millis(10);

    pub fn validated(mut self) -> Self {
        if self.request_deadline < Self::MIN_REQUEST_DEADLINE {
            warn!(
                deadline_ms = self.request_deadline.as_millis() as u64,
                "request_deadline too small, clamping"
            );
            self.request_deadline = Self::MIN_REQUEST_DEADLINE;
        }
        if self.idle_timeout.is_zero() {
            warn!("idle_timeout of 0, using default");
            self.idle_timeout = Self::default().idle_timeout;
        }
        self.session = self.session.validated();
        self.clock = self.clock.validated();
        self.combat = self.combat.validated();
        self.broadcast = self.broadcast.validated();
        self
    }
}
