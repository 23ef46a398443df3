//! Listener and dispatch notifications
//!
//! Emitted on a broadcast channel so the daemon loop (or anything else that
//! subscribes) can observe listener sessions and dispatch decisions without
//! touching dispatcher state.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Which dispatcher a listener session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerKind {
    Hotkey,
    KeyFilter,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerKind::Hotkey => write!(f, "hotkey"),
            ListenerKind::KeyFilter => write!(f, "key-filter"),
        }
    }
}

/// Events emitted by listeners and dispatchers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListenerEvent {
    /// A hook session started
    ListenerStarted { listener: ListenerKind },

    /// A hook session stopped
    ListenerStopped { listener: ListenerKind },

    /// A hotkey matched and its callback was queued
    HotkeyTriggered { binding: String },

    /// An allow-listed key was queued for the key handler
    KeyAccepted { token: String },

    /// A dispatch was dropped because the worker queue was full
    DispatchDropped { listener: ListenerKind },
}

impl fmt::Display for ListenerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerEvent::ListenerStarted { listener } => {
                write!(f, "LISTENER_STARTED ({})", listener)
            }
            ListenerEvent::ListenerStopped { listener } => {
                write!(f, "LISTENER_STOPPED ({})", listener)
            }
            ListenerEvent::HotkeyTriggered { binding } => {
                write!(f, "HOTKEY_TRIGGERED ({})", binding)
            }
            ListenerEvent::KeyAccepted { token } => write!(f, "KEY_ACCEPTED ({:?})", token),
            ListenerEvent::DispatchDropped { listener } => {
                write!(f, "DISPATCH_DROPPED ({})", listener)
            }
        }
    }
}

/// Optional sender handed to listeners; sending never blocks
#[derive(Debug, Clone, Default)]
pub struct EventPublisher {
    tx: Option<broadcast::Sender<ListenerEvent>>,
}

impl EventPublisher {
    pub fn new(tx: broadcast::Sender<ListenerEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Publisher that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn publish(&self, event: ListenerEvent) {
        if let Some(tx) = &self.tx {
            // No subscribers is fine
            let _ = tx.send(event);
        }
    }
}
