//! Background task that evicts idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::SessionRegistry;

/// Periodically calls [`SessionRegistry::sweep`] until shut down.
///
/// The sweep interval comes from the registry's config and is independent
/// of the session timeout.
#[derive(Debug)]
pub struct SessionReaper {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionReaper {
    /// Starts a reaper with its own stop signal.
    pub fn spawn(registry: Arc<SessionRegistry>) -> Self {
        let (stop, shutdown) = watch::channel(false);
        let task = Self::spawn_with(registry, shutdown);
        Self { stop, task }
    }

    /// Starts a reaper that stops when `shutdown` turns `true` or its
    /// sender is dropped.
    pub fn spawn_with(
        registry: Arc<SessionRegistry>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let interval = registry.config().sweep_interval;
        tokio::spawn(run(registry, interval, shutdown))
    }

    /// Signals the task and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

async fn run(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(interval_ms = interval.as_millis() as u64, "session reaper started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                registry.sweep().await;
            }
        }
    }

    info!("session reaper stopped");
}
