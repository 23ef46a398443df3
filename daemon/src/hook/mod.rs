//! OS-level notification channel and its lifecycle
//!
//! An [`InputHook`] delivers raw press/release events to a [`KeyEventSink`]
//! on a thread it owns. [`ListenerLifecycle`] makes sure each dispatcher has
//! at most one live session at a time.
//!
//! Backends:
//! - `MacHook` (macOS): CGEventTap, listen-only
//! - [`ReplayHook`]: in-process feed, used where no native hook exists and
//!   in tests

#[cfg(target_os = "macos")]
mod macos;
mod replay;

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::HookError;
use crate::events::{EventPublisher, ListenerEvent, ListenerKind};
use crate::hotkey::KeyEvent;

#[cfg(target_os = "macos")]
pub use macos::MacHook;
pub use replay::{parse_event_line, ReplayHook, ReplayParseError};

/// Receiver of raw key events
///
/// Called on the hook's delivery thread: implementations must return quickly
/// and must not panic.
pub trait KeyEventSink: Send + Sync {
    fn on_event(&self, event: &KeyEvent);
}

/// A live hook registration
pub trait HookSession: Send {
    /// Stop delivering events. Safe to call more than once.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Something that can deliver system-wide key events
pub trait InputHook: Send + Sync {
    fn start(&self, sink: Arc<dyn KeyEventSink>) -> Result<Box<dyn HookSession>, HookError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Starts and stops one dispatcher's hook session
pub struct ListenerLifecycle {
    kind: ListenerKind,
    hook: Arc<dyn InputHook>,
    session: Option<Box<dyn HookSession>>,
    events: EventPublisher,
}

impl ListenerLifecycle {
    pub fn new(kind: ListenerKind, hook: Arc<dyn InputHook>, events: EventPublisher) -> Self {
        Self {
            kind,
            hook,
            session: None,
            events,
        }
    }

    /// Start a session unless one is already live
    ///
    /// Returns `true` when a new session was started. A session whose hook
    /// thread died is replaced.
    pub fn start(&mut self, sink: Arc<dyn KeyEventSink>) -> Result<bool, HookError> {
        if self.is_active() {
            return Ok(false);
        }

        if let Some(mut stale) = self.session.take() {
            warn!(listener = %self.kind, "previous hook session died, restarting");
            stale.stop();
        }

        let session = self.hook.start(sink)?;
        self.session = Some(session);

        info!(listener = %self.kind, hook = self.hook.name(), "listener started");
        self.events.publish(ListenerEvent::ListenerStarted { listener: self.kind });
        Ok(true)
    }

    /// Stop the session if there is one; returns whether anything was stopped
    pub fn stop(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        session.stop();

        info!(listener = %self.kind, "listener stopped");
        self.events.publish(ListenerEvent::ListenerStopped { listener: self.kind });
        true
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_running())
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }
}

impl fmt::Debug for ListenerLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerLifecycle")
            .field("kind", &self.kind)
            .field("hook", &self.hook.name())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for ListenerLifecycle {
    fn drop(&mut self) {
        self.stop();
    }
}
