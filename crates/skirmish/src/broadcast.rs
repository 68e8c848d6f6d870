//! Event fan-out: the combat core emits into an [`EventBus`], the
//! [`Broadcaster`] delivers each event to every connected session.

use std::sync::Arc;

use futures_util::future::join_all;
use skirmish_combat::EventSink;
use skirmish_protocol::{Codec, GameEvent, JsonCodec, ServerMessage};
use skirmish_session::{SendError, SessionRegistry};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{BroadcastConfig, SkirmishError};

/// The [`EventSink`] handed to the combat coordinator.
///
/// Emitting never blocks: events go onto a bounded broadcast channel and
/// a lagging subscriber skips the oldest.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GameEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: GameEvent) {
        if self.tx.send(event).is_err() {
            debug!("event emitted with no subscribers");
        }
    }
}

/// Delivery summary for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers game events to every session with a live link.
///
/// Each event is encoded once. Recipients are served concurrently and each
/// send is bounded by the configured timeout, so one stalled client delays
/// nobody else by more than that. Failures are logged and never touch the
/// registry.
pub struct Broadcaster {
    sessions: Arc<SessionRegistry>,
    codec: JsonCodec,
    config: BroadcastConfig,
}

impl Broadcaster {
    pub fn new(sessions: Arc<SessionRegistry>, config: BroadcastConfig) -> Self {
        Self {
            sessions,
            codec: JsonCodec,
            config: config.validated(),
        }
    }

    /// Sends `event` to every connected session.
    pub async fn deliver(&self, event: &GameEvent) -> Result<Delivery, SkirmishError> {
        let frame: Arc<[u8]> = self
            .codec
            .encode(&ServerMessage::Event(event.clone()))?
            .into();
        let recipients = self.sessions.connected().await;

        let timeout = self.config.send_timeout;
        let results = join_all(recipients.iter().map(|session| {
            let frame = Arc::clone(&frame);
            async move { (session, session.send(frame, timeout).await) }
        }))
        .await;

        let mut delivery = Delivery::default();
        for (session, result) in results {
            match result {
                Ok(()) => delivery.delivered += 1,
                // Already logged by the session.
                Err(SendError::Full) => delivery.failed += 1,
                Err(e) => {
                    debug!(session_id = %session.id(), error = %e, "event not delivered");
                    delivery.failed += 1;
                }
            }
        }
        Ok(delivery)
    }

    /// Forwards events from `events` until the bus closes or `shutdown`
    /// turns `true`.
    pub async fn run(
        self,
        mut events: broadcast::Receiver<GameEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let event = tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "broadcaster lagged, events skipped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            if !self.config.forwards(event.kind) {
                continue;
            }
            match self.deliver(&event).await {
                Ok(delivery) => debug!(
                    kind = ?event.kind,
                    source = %event.source,
                    delivered = delivery.delivered,
                    failed = delivery.failed,
                    "event broadcast"
                ),
                Err(e) => warn!(kind = ?event.kind, error = %e, "event not broadcast"),
            }
        }
        info!("broadcaster stopped");
    }
}
