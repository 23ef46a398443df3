//! Minimum-interval gate shared by both dispatchers

use std::time::{Duration, Instant};

/// Smallest debounce interval a dispatcher accepts
pub const MIN_DEBOUNCE: Duration = Duration::from_millis(10);

/// Suppresses triggers that arrive within `interval` of the last accepted one
///
/// The gate never decides on its own when a trigger "counts": callers ask
/// [`DebounceGate::is_open`] and call [`DebounceGate::mark`] only when they
/// actually act on the event.
#[derive(Debug, Clone)]
pub struct DebounceGate {
    last_trigger: Option<Instant>,
    interval: Duration,
}

impl DebounceGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_trigger: None,
            interval: interval.max(MIN_DEBOUNCE),
        }
    }

    /// True when `now - last_trigger >= interval`, or nothing has fired yet
    pub fn is_open(&self, now: Instant) -> bool {
        match self.last_trigger {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    pub fn mark(&mut self, now: Instant) {
        self.last_trigger = Some(now);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Change the interval, clamped to [`MIN_DEBOUNCE`]
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval.max(MIN_DEBOUNCE);
    }

    pub fn last_trigger(&self) -> Option<Instant> {
        self.last_trigger
    }
}
