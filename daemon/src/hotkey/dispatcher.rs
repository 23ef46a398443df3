//! Hotkey dispatcher
//!
//! Two states:
//! - Idle: no hook session, no bindings
//! - Armed: hook session live, at least one binding
//!
//! The first registration arms the dispatcher and the last unregistration
//! disarms it. While armed, every press runs debounce, normalization and
//! an exact modifier match on the hook thread, then hands the matched
//! callback to the worker pool and returns.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::keys::{normalize_key, KeyEvent, KeyEventKind, ModifierSet, ModifierTracker, RawKey};
use super::registry::{HotkeyCallback, HotkeyRegistry};
use crate::clock::Clock;
use crate::debounce::DebounceGate;
use crate::dispatch::{DispatchOptions, DispatchOutcome};
use crate::error::RegistrationError;
use crate::events::{EventPublisher, ListenerEvent, ListenerKind};
use crate::hook::{InputHook, KeyEventSink, ListenerLifecycle};
use crate::worker::WorkerPool;

/// Default minimum gap between two hotkey firings
pub const DEFAULT_HOTKEY_DEBOUNCE: Duration = Duration::from_millis(100);

/// Dispatcher state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    /// No session, no bindings
    #[default]
    Idle,
    /// Session live with at least one binding
    Armed,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherState::Idle => write!(f, "Idle"),
            DispatcherState::Armed => write!(f, "Armed"),
        }
    }
}

/// Snapshot of dispatcher state for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct HotkeyStatus {
    pub state: DispatcherState,
    pub bindings: Vec<String>,
    pub held_modifiers: String,
    pub debounce_interval_ms: u64,
}

/// State guarded by the dispatcher lock
struct Shared {
    registry: HotkeyRegistry,
    debounce: DebounceGate,
    listener: ListenerLifecycle,
}

impl Shared {
    fn state(&self) -> DispatcherState {
        if self.listener.is_active() && !self.registry.is_empty() {
            DispatcherState::Armed
        } else {
            DispatcherState::Idle
        }
    }
}

struct Inner {
    shared: Mutex<Shared>,
    modifiers: ModifierTracker,
    pool: Arc<WorkerPool>,
    clock: Arc<dyn Clock>,
    events: EventPublisher,
}

/// Global hotkey registry plus the press handling that drives it
pub struct HotkeyDispatcher {
    inner: Arc<Inner>,
}

impl HotkeyDispatcher {
    pub fn new(hook: Arc<dyn InputHook>, pool: Arc<WorkerPool>, options: DispatchOptions) -> Self {
        let listener = ListenerLifecycle::new(ListenerKind::Hotkey, hook, options.events.clone());
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    registry: HotkeyRegistry::new(),
                    debounce: DebounceGate::new(options.debounce),
                    listener,
                }),
                modifiers: ModifierTracker::new(),
                pool,
                clock: options.clock,
                events: options.events,
            }),
        }
    }

    /// Register a hotkey; starts the hook session for the first binding
    ///
    /// If the session cannot be started the binding is rolled back.
    pub fn register(
        &self,
        key: &str,
        modifiers: ModifierSet,
        callback: HotkeyCallback,
    ) -> Result<(), RegistrationError> {
        let mut shared = self.inner.lock();
        let id = shared.registry.register(key, modifiers, callback)?;

        let sink: Arc<dyn KeyEventSink> = Arc::new(HotkeySink(Arc::downgrade(&self.inner)));
        if let Err(e) = shared.listener.start(sink) {
            shared.registry.remove_id(&id);
            warn!(binding = %id, error = %e, "hotkey registration rolled back");
            return Err(e.into());
        }

        shared.registry.mark_registered(&id);
        info!(binding = %id, total = shared.registry.len(), "hotkey registered");
        Ok(())
    }

    /// Remove a binding; stops the hook session when it was the last one
    pub fn unregister(&self, key: &str, modifiers: ModifierSet) -> bool {
        let mut shared = self.inner.lock();
        if !shared.registry.unregister(key, modifiers) {
            return false;
        }

        info!(key, %modifiers, remaining = shared.registry.len(), "hotkey unregistered");
        if shared.registry.is_empty() {
            self.disarm(&mut shared);
        }
        true
    }

    /// Remove every binding and stop the hook session. Idempotent.
    pub fn unregister_all(&self) {
        let mut shared = self.inner.lock();
        let removed = shared.registry.unregister_all();
        if removed > 0 {
            info!(removed, "all hotkeys unregistered");
        }
        self.disarm(&mut shared);
    }

    fn disarm(&self, shared: &mut Shared) {
        shared.listener.stop();
        self.inner.modifiers.clear();
    }

    pub fn is_registered(&self, key: &str, modifiers: ModifierSet) -> bool {
        self.inner.lock().registry.is_registered(key, modifiers)
    }

    pub fn state(&self) -> DispatcherState {
        self.inner.lock().state()
    }

    pub fn binding_count(&self) -> usize {
        self.inner.lock().registry.len()
    }

    pub fn set_debounce_interval(&self, interval: Duration) {
        let mut shared = self.inner.lock();
        shared.debounce.set_interval(interval);
        debug!(interval_ms = shared.debounce.interval().as_millis() as u64, "hotkey debounce updated");
    }

    pub fn debounce_interval(&self) -> Duration {
        self.inner.lock().debounce.interval()
    }

    pub fn status(&self) -> HotkeyStatus {
        let shared = self.inner.lock();
        HotkeyStatus {
            state: shared.state(),
            bindings: shared.registry.ids().iter().map(ToString::to_string).collect(),
            held_modifiers: self.inner.modifiers.current().to_string(),
            debounce_interval_ms: shared.debounce.interval().as_millis() as u64,
        }
    }

    /// Handle a raw press as if delivered by the hook
    pub fn on_press(&self, key: &RawKey) -> DispatchOutcome {
        self.inner.on_press(key)
    }

    /// Handle a raw release as if delivered by the hook
    pub fn on_release(&self, key: &RawKey) {
        self.inner.modifiers.on_release(key);
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_press(&self, key: &RawKey) -> DispatchOutcome {
        // Modifier state follows every press, debounced or not
        self.modifiers.on_press(key);
        let now = self.clock.now();

        let (label, submitted) = {
            let mut shared = self.lock();
            if shared.state() == DispatcherState::Idle {
                return DispatchOutcome::Inactive;
            }
            if !shared.debounce.is_open(now) {
                trace!(%key, "hotkey press debounced");
                return DispatchOutcome::Debounced;
            }
            let Some(token) = normalize_key(key) else {
                trace!(%key, "key could not be normalized");
                return DispatchOutcome::Unrecognized;
            };
            let observed = self.modifiers.current();
            let Some(binding) = shared.registry.find_match(&token, observed) else {
                return DispatchOutcome::NoMatch;
            };
            let label = binding.id.to_string();
            let callback = Arc::clone(&binding.callback);

            // try_send never blocks; only a queued callback moves the gate
            let submitted = self.pool.submit(label.clone(), move || callback());
            if submitted.is_ok() {
                shared.debounce.mark(now);
            }
            (label, submitted)
        };

        match submitted {
            Ok(()) => {
                debug!(binding = %label, "hotkey dispatched");
                self.events.publish(ListenerEvent::HotkeyTriggered { binding: label });
                DispatchOutcome::Dispatched
            }
            Err(e) => {
                warn!(binding = %label, error = %e, "hotkey callback dropped");
                self.events.publish(ListenerEvent::DispatchDropped {
                    listener: ListenerKind::Hotkey,
                });
                DispatchOutcome::Overloaded
            }
        }
    }
}

/// Hook-facing adapter; weak so a live session does not keep the dispatcher alive
struct HotkeySink(Weak<Inner>);

impl KeyEventSink for HotkeySink {
    fn on_event(&self, event: &KeyEvent) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        match event.kind {
            KeyEventKind::Press => {
                inner.on_press(&event.key);
            }
            KeyEventKind::Release => {
                inner.modifiers.on_release(&event.key);
            }
        }
    }
}
