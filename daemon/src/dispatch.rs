//! Pieces shared by the hotkey and key-filter dispatchers

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::events::EventPublisher;

/// What a dispatcher decided for one press event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No live session; the event was ignored
    Inactive,
    /// Suppressed by the debounce window
    Debounced,
    /// The key could not be normalized
    Unrecognized,
    /// No hotkey binding matches the key and held modifiers
    NoMatch,
    /// The key is not in the allow-list
    Filtered,
    /// Accepted, but no handler is set
    NoHandler,
    /// Callback queued on a worker
    Dispatched,
    /// Callback dropped: the worker queue is full
    Overloaded,
}

impl DispatchOutcome {
    pub fn is_dispatched(self) -> bool {
        self == Self::Dispatched
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inactive => "inactive",
            Self::Debounced => "debounced",
            Self::Unrecognized => "unrecognized",
            Self::NoMatch => "no-match",
            Self::Filtered => "filtered",
            Self::NoHandler => "no-handler",
            Self::Dispatched => "dispatched",
            Self::Overloaded => "overloaded",
        };
        f.write_str(name)
    }
}

/// Construction options for a dispatcher
#[derive(Clone)]
pub struct DispatchOptions {
    pub debounce: Duration,
    pub clock: Arc<dyn Clock>,
    pub events: EventPublisher,
}

impl DispatchOptions {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            clock: Arc::new(SystemClock),
            events: EventPublisher::disabled(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }
}

impl fmt::Debug for DispatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchOptions")
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}
