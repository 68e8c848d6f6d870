//! Monotonic game clock for Skirmish.
//!
//! The [`GameClock`] is the single source of time for the combat core. It
//! reads Tokio's monotonic clock, so tests running with
//! `#[tokio::test(start_paused = true)]` control it with
//! `tokio::time::advance`.
//!
//! Game ticks are derived, not counted: `ticks = elapsed × tick_rate ×
//! time_scale`. Nothing has to drive a loop for the clock to move, which
//! suits a turn-based server that only wakes on player messages and turn
//! timeouts.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the game clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockConfig {
    /// Game ticks per real second at `time_scale == 1.0`.
    pub tick_rate_hz: u32,
    /// Multiplier applied to elapsed wall time. `2.0` runs game time twice
    /// as fast as real time.
    pub time_scale: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 10,
            time_scale: 1.0,
        }
    }
}

impl ClockConfig {
    /// Maximum supported tick rate.
    pub const MAX_TICK_RATE_HZ: u32 = 128;
    /// Bounds for `time_scale`.
    pub const MIN_TIME_SCALE: f64 = 0.01;
    pub const MAX_TIME_SCALE: f64 = 100.0;

    /// Create a config for a specific tick rate with default scale.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// - `tick_rate_hz` is forced into `1..=MAX_TICK_RATE_HZ`.
    /// - `time_scale` is clamped to `MIN_TIME_SCALE..=MAX_TIME_SCALE`;
    ///   a non-finite scale falls back to `1.0`.
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz == 0 || self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            let clamped = self.tick_rate_hz.clamp(1, Self::MAX_TICK_RATE_HZ);
            warn!(
                rate = self.tick_rate_hz,
                clamped, "tick_rate_hz out of range, clamping"
            );
            self.tick_rate_hz = clamped;
        }
        if !self.time_scale.is_finite() {
            warn!(scale = self.time_scale, "time_scale not finite, using 1.0");
            self.time_scale = 1.0;
        } else if !(Self::MIN_TIME_SCALE..=Self::MAX_TIME_SCALE).contains(&self.time_scale) {
            warn!(scale = self.time_scale, "time_scale out of range, clamping");
            self.time_scale = self
                .time_scale
                .clamp(Self::MIN_TIME_SCALE, Self::MAX_TIME_SCALE);
        }
        self
    }

    /// Real-time duration of one game tick, taking the time scale into account.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(
            1.0 / (self.tick_rate_hz.max(1) as f64 * self.time_scale),
        )
    }
}

// ---------------------------------------------------------------------------
// TriggerTime
// ---------------------------------------------------------------------------

/// When a scheduled effect fires, in every representation the core uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerTime {
    /// Wall-clock stamp (ms since the Unix epoch) when the trigger was set.
    pub wall_ms: u64,
    /// Game tick at or after which the effect is due.
    pub tick: u64,
    /// Time scale in effect when the trigger was set.
    pub time_scale: f64,
}

// ---------------------------------------------------------------------------
// GameClock
// ---------------------------------------------------------------------------

/// Monotonic source of wall time and derived game ticks.
///
/// Cheap to copy; every copy shares the same origin.
#[derive(Debug, Clone, Copy)]
pub struct GameClock {
    origin: Instant,
    config: ClockConfig,
}

impl GameClock {
    /// Starts a clock at tick 0, now.
    pub fn new(config: ClockConfig) -> Self {
        let config = config.validated();
        debug!(
            rate_hz = config.tick_rate_hz,
            scale = config.time_scale,
            "game clock started"
        );
        Self {
            origin: Instant::now(),
            config,
        }
    }

    /// The current monotonic instant.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Real time since the clock started.
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Milliseconds since the clock started. Used for activity stamps that
    /// live in atomics.
    pub fn elapsed_millis(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// The current game tick.
    pub fn ticks(&self) -> u64 {
        self.ticks_after(self.elapsed())
    }

    fn ticks_after(&self, elapsed: Duration) -> u64 {
        let scaled = elapsed.as_secs_f64()
            * self.config.tick_rate_hz as f64
            * self.config.time_scale;
        scaled.floor() as u64
    }

    /// Stamps a trigger `delay_ticks` game ticks from now.
    pub fn trigger_in(&self, delay_ticks: u64) -> TriggerTime {
        TriggerTime {
            wall_ms: wall_millis(),
            tick: self.ticks().saturating_add(delay_ticks),
            time_scale: self.config.time_scale,
        }
    }

    /// `true` once the current tick has reached the trigger tick.
    pub fn is_due(&self, trigger: &TriggerTime) -> bool {
        self.ticks() >= trigger.tick
    }

    /// Real time left until `trigger` is due; zero if it already is.
    pub fn until(&self, trigger: &TriggerTime) -> Duration {
        let now = self.ticks();
        if trigger.tick <= now {
            return Duration::ZERO;
        }
        let per_tick = self.config.tick_duration();
        let target = per_tick.mul_f64(trigger.tick as f64);
        target.saturating_sub(self.elapsed())
    }

    /// The configuration this clock runs with (after validation).
    pub fn config(&self) -> &ClockConfig {
        &self.config
    }
}

impl Default for GameClock {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

fn wall_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
