//! Inbound-Driven Heartbeat
//!
//! The client has no heartbeat timer. When an inbound frame arrives more
//! than the quiet interval after the previous one, a heartbeat frame is
//! sent before the new frame is processed.

use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// Default quiet interval.
pub const DEFAULT_QUIET_INTERVAL: Duration = Duration::from_millis(2500);

/// Tracks the time of the last inbound frame.
#[derive(Debug)]
pub struct HeartbeatState {
    quiet_interval: Duration,
    last_inbound: RwLock<Option<Instant>>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_INTERVAL)
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub const fn new(quiet_interval: Duration) -> Self {
        Self {
            quiet_interval,
            last_inbound: RwLock::new(None),
        }
    }

    /// Record an inbound frame at `now`.
    ///
    /// Returns `true` when a heartbeat must be sent before processing it.
    /// The first frame of a connection never triggers one.
    pub fn on_inbound(&self, now: Instant) -> bool {
        let mut last = self.last_inbound.write();
        let due = last.is_some_and(|prev| now.saturating_duration_since(prev) > self.quiet_interval);
        *last = Some(now);
        due
    }

    /// Time since the last inbound frame, if any arrived.
    #[must_use]
    pub fn time_since_inbound(&self) -> Option<Duration> {
        self.last_inbound.read().map(|at| at.elapsed())
    }

    /// Forget the last inbound frame.
    pub fn reset(&self) {
        *self.last_inbound.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_never_triggers() {
        let state = HeartbeatState::default();
        assert!(!state.on_inbound(Instant::now()));
    }

    #[test]
    fn frame_after_quiet_interval_triggers() {
        let state = HeartbeatState::default();
        let start = Instant::now();
        state.on_inbound(start);

        assert!(!state.on_inbound(start + Duration::from_millis(2500)));
        assert!(state.on_inbound(start + Duration::from_millis(5001)));
    }

    #[test]
    fn reset_forgets_last_frame() {
        let state = HeartbeatState::default();
        let start = Instant::now();
        state.on_inbound(start);
        state.reset();

        assert!(state.time_since_inbound().is_none());
        assert!(!state.on_inbound(start + Duration::from_secs(10)));
    }
}
