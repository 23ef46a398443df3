//! Key filter dispatcher
//!
//! Delivers single keystrokes to one active handler, for sequential
//! multi-key input such as grid navigation. There is no match step: a key
//! in the allow-list is accepted, and every accepted key moves the debounce
//! gate.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::clock::Clock;
use crate::debounce::DebounceGate;
use crate::dispatch::{DispatchOptions, DispatchOutcome};
use crate::error::HookError;
use crate::events::{EventPublisher, ListenerEvent, ListenerKind};
use crate::hook::{InputHook, KeyEventSink, ListenerLifecycle};
use crate::hotkey::{canonical_token, normalize_key, KeyEvent, KeyEventKind, RawKey};
use crate::worker::WorkerPool;

/// Default minimum gap between two accepted keys
pub const DEFAULT_KEY_DEBOUNCE: Duration = Duration::from_millis(50);

/// 3x3 grid keys, command suffixes, then control keys
pub const DEFAULT_ALLOWED_KEYS: &[&str] = &[
    "q", "w", "e", "a", "s", "d", "z", "x", "c", "r", "h", "escape", "return", "backspace",
];

/// Handler receiving each accepted, normalized key
pub type KeyHandler = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Set of normalized tokens the filter lets through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedKeySet {
    keys: BTreeSet<String>,
}

impl AllowedKeySet {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = tokens
            .into_iter()
            .filter_map(|t| canonical_token(t.as_ref()))
            .collect();
        Self { keys }
    }

    /// Add a token; returns `false` if it was already present or is empty
    pub fn insert(&mut self, token: &str) -> bool {
        match canonical_token(token) {
            Some(token) => self.keys.insert(token),
            None => false,
        }
    }

    pub fn remove(&mut self, token: &str) -> bool {
        match canonical_token(token) {
            Some(token) => self.keys.remove(&token),
            None => false,
        }
    }

    /// Membership for an already-normalized token
    pub fn contains(&self, token: &str) -> bool {
        self.keys.contains(token)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Tokens in sorted order
    pub fn to_vec(&self) -> Vec<String> {
        self.keys.iter().cloned().collect()
    }
}

impl Default for AllowedKeySet {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_KEYS)
    }
}

/// Snapshot of filter state for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterStatus {
    pub is_listening: bool,
    pub allowed_keys_count: usize,
    pub has_handler: bool,
    pub debounce_interval_ms: u64,
}

struct Shared {
    allowed: AllowedKeySet,
    handler: Option<KeyHandler>,
    debounce: DebounceGate,
    listener: ListenerLifecycle,
}

struct Inner {
    shared: Mutex<Shared>,
    pool: Arc<WorkerPool>,
    clock: Arc<dyn Clock>,
    events: EventPublisher,
}

/// Allow-listed, debounced keystroke delivery to a single handler
pub struct KeyFilterDispatcher {
    inner: Arc<Inner>,
}

impl KeyFilterDispatcher {
    pub fn new(hook: Arc<dyn InputHook>, pool: Arc<WorkerPool>, options: DispatchOptions) -> Self {
        let listener = ListenerLifecycle::new(ListenerKind::KeyFilter, hook, options.events.clone());
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    allowed: AllowedKeySet::default(),
                    handler: None,
                    debounce: DebounceGate::new(options.debounce),
                    listener,
                }),
                pool,
                clock: options.clock,
                events: options.events,
            }),
        }
    }

    /// Replace the active handler
    pub fn set_handler(&self, handler: KeyHandler) {
        let mut shared = self.inner.lock();
        if shared.handler.replace(handler).is_some() {
            debug!("key handler replaced");
        }
    }

    pub fn clear_handler(&self) {
        self.inner.lock().handler = None;
    }

    /// Start delivering keys; `Ok(false)` if already listening
    pub fn start_listening(&self) -> Result<bool, HookError> {
        let mut shared = self.inner.lock();
        let sink: Arc<dyn KeyEventSink> = Arc::new(FilterSink(Arc::downgrade(&self.inner)));
        shared.listener.start(sink)
    }

    /// Stop delivering keys. Idempotent.
    pub fn stop_listening(&self) -> bool {
        self.inner.lock().listener.stop()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.lock().listener.is_active()
    }

    /// Replace the allow-list; empty tokens are skipped
    pub fn set_allow_list<I, S>(&self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = AllowedKeySet::new(tokens);
        info!(count = allowed.len(), "key filter allow-list replaced");
        self.inner.lock().allowed = allowed;
    }

    pub fn add_allowed(&self, token: &str) -> bool {
        self.inner.lock().allowed.insert(token)
    }

    pub fn remove_allowed(&self, token: &str) -> bool {
        self.inner.lock().allowed.remove(token)
    }

    pub fn reset_to_default(&self) {
        self.inner.lock().allowed = AllowedKeySet::default();
        debug!("key filter allow-list reset");
    }

    pub fn allowed_keys(&self) -> Vec<String> {
        self.inner.lock().allowed.to_vec()
    }

    pub fn set_debounce_interval(&self, interval: Duration) {
        let mut shared = self.inner.lock();
        shared.debounce.set_interval(interval);
        debug!(interval_ms = shared.debounce.interval().as_millis() as u64, "key debounce updated");
    }

    pub fn debounce_interval(&self) -> Duration {
        self.inner.lock().debounce.interval()
    }

    pub fn status(&self) -> FilterStatus {
        let shared = self.inner.lock();
        FilterStatus {
            is_listening: shared.listener.is_active(),
            allowed_keys_count: shared.allowed.len(),
            has_handler: shared.handler.is_some(),
            debounce_interval_ms: shared.debounce.interval().as_millis() as u64,
        }
    }

    /// Handle a raw press as if delivered by the hook
    pub fn on_press(&self, key: &RawKey) -> DispatchOutcome {
        self.inner.on_press(key)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_press(&self, key: &RawKey) -> DispatchOutcome {
        let now = self.clock.now();

        let (token, handler) = {
            let mut shared = self.lock();
            if !shared.listener.is_active() {
                return DispatchOutcome::Inactive;
            }
            let Some(token) = normalize_key(key) else {
                trace!(%key, "key could not be normalized");
                return DispatchOutcome::Unrecognized;
            };
            if !shared.allowed.contains(&token) {
                return DispatchOutcome::Filtered;
            }
            if !shared.debounce.is_open(now) {
                trace!(token, "key press debounced");
                return DispatchOutcome::Debounced;
            }
            shared.debounce.mark(now);
            let Some(handler) = shared.handler.clone() else {
                debug!(token, "key accepted with no handler set");
                return DispatchOutcome::NoHandler;
            };
            (token, handler)
        };

        let job_token = token.clone();
        match self.pool.submit(format!("key {token:?}"), move || handler(&job_token)) {
            Ok(()) => {
                trace!(token, "key dispatched");
                self.events.publish(ListenerEvent::KeyAccepted { token });
                DispatchOutcome::Dispatched
            }
            Err(e) => {
                warn!(token, error = %e, "key handler dropped");
                self.events.publish(ListenerEvent::DispatchDropped {
                    listener: ListenerKind::KeyFilter,
                });
                DispatchOutcome::Overloaded
            }
        }
    }
}

struct FilterSink(Weak<Inner>);

impl KeyEventSink for FilterSink {
    fn on_event(&self, event: &KeyEvent) {
        if event.kind != KeyEventKind::Press {
            return;
        }
        if let Some(inner) = self.0.upgrade() {
            inner.on_press(&event.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::{unbounded, Receiver};
    use tokio::sync::broadcast;

    use super::*;
    use crate::clock::ManualClock;
    use crate::hook::ReplayHook;

    struct Fixture {
        hook: Arc<ReplayHook>,
        clock: Arc<ManualClock>,
        filter: KeyFilterDispatcher,
    }

    fn fixture() -> Fixture {
        let hook = Arc::new(ReplayHook::new());
        let clock = Arc::new(ManualClock::new());
        let pool = Arc::new(WorkerPool::new(2, 16).unwrap());
        let filter = KeyFilterDispatcher::new(
            hook.clone(),
            pool,
            DispatchOptions::new(DEFAULT_KEY_DEBOUNCE).with_clock(clock.clone()),
        );
        Fixture {
            hook,
            clock,
            filter,
        }
    }

    fn recording() -> (KeyHandler, Receiver<String>) {
        let (tx, rx) = unbounded();
        let handler: KeyHandler = Arc::new(move |token: &str| {
            tx.send(token.to_string())?;
            Ok(())
        });
        (handler, rx)
    }

    fn next(rx: &Receiver<String>) -> String {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_default_allow_list() {
        let f = fixture();
        let keys = f.filter.allowed_keys();
        assert_eq!(keys.len(), 14);
        assert!(keys.contains(&"return".to_string()));
        assert!(keys.contains(&"escape".to_string()));
        assert!(!keys.contains(&"enter".to_string()));

        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_add_remove_round_trip() {
        let f = fixture();
        let before = f.filter.allowed_keys();

        assert!(f.filter.add_allowed("F1"));
        assert!(f.filter.allowed_keys().contains(&"f1".to_string()));
        assert!(f.filter.remove_allowed("F1"));

        assert_eq!(f.filter.allowed_keys(), before);
    }

    #[test]
    fn test_set_allow_list_and_reset() {
        let f = fixture();
        f.filter.set_allow_list(["1", "2", "Enter", ""]);
        assert_eq!(f.filter.allowed_keys(), vec!["1", "2", "return"]);

        f.filter.reset_to_default();
        assert_eq!(f.filter.allowed_keys(), AllowedKeySet::default().to_vec());
    }

    #[test]
    fn test_inactive_until_started() {
        let f = fixture();
        let (handler, _rx) = recording();
        f.filter.set_handler(handler);
        assert_eq!(f.filter.on_press(&RawKey::Char('q')), DispatchOutcome::Inactive);

        assert!(f.filter.start_listening().unwrap());
        assert!(!f.filter.start_listening().unwrap());
        assert!(f.filter.is_listening());
        assert_eq!(f.hook.session_count(), 1);
    }

    #[test]
    fn test_only_allowed_keys_reach_handler() {
        let f = fixture();
        let (handler, rx) = recording();
        f.filter.set_handler(handler);
        f.filter.start_listening().unwrap();

        f.hook.emit(&KeyEvent::press(RawKey::Char('p')));
        f.clock.advance_ms(100);
        f.hook.emit(&KeyEvent::press(RawKey::Char('Q')));
        f.clock.advance_ms(100);
        f.hook.emit(&KeyEvent::press(RawKey::named("enter")));

        assert_eq!(next(&rx), "q");
        assert_eq!(next(&rx), "return");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_filtered_key_does_not_move_debounce() {
        let f = fixture();
        let (handler, rx) = recording();
        f.filter.set_handler(handler);
        f.filter.start_listening().unwrap();

        assert_eq!(f.filter.on_press(&RawKey::Char('p')), DispatchOutcome::Filtered);
        assert_eq!(f.filter.on_press(&RawKey::Char('w')), DispatchOutcome::Dispatched);
        assert_eq!(next(&rx), "w");
    }

    #[test]
    fn test_debounce_applies_across_keys() {
        let f = fixture();
        let (handler, rx) = recording();
        f.filter.set_handler(handler);
        f.filter.start_listening().unwrap();

        assert!(f.filter.on_press(&RawKey::Char('q')).is_dispatched());
        f.clock.advance_ms(20);
        assert_eq!(f.filter.on_press(&RawKey::Char('w')), DispatchOutcome::Debounced);
        f.clock.advance_ms(40);
        assert!(f.filter.on_press(&RawKey::Char('e')).is_dispatched());

        assert_eq!(next(&rx), "q");
        assert_eq!(next(&rx), "e");
    }

    #[test]
    fn test_accepted_without_handler_still_marks_debounce() {
        let f = fixture();
        f.filter.start_listening().unwrap();

        assert_eq!(f.filter.on_press(&RawKey::Char('q')), DispatchOutcome::NoHandler);

        let (handler, rx) = recording();
        f.filter.set_handler(handler);
        f.clock.advance_ms(10);
        assert_eq!(f.filter.on_press(&RawKey::Char('q')), DispatchOutcome::Debounced);
        f.clock.advance_ms(50);
        assert!(f.filter.on_press(&RawKey::Char('q')).is_dispatched());
        assert_eq!(next(&rx), "q");
    }

    #[test]
    fn test_set_handler_replaces() {
        let f = fixture();
        let (first, first_rx) = recording();
        let (second, second_rx) = recording();
        f.filter.set_handler(first);
        f.filter.set_handler(second);
        f.filter.start_listening().unwrap();

        f.filter.on_press(&RawKey::Char('a'));
        assert_eq!(next(&second_rx), "a");
        assert!(first_rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_handler_failure_is_contained() {
        let f = fixture();
        f.filter.set_handler(Arc::new(|_token: &str| anyhow::bail!("bad key")));
        f.filter.start_listening().unwrap();
        assert!(f.filter.on_press(&RawKey::Char('a')).is_dispatched());

        let (handler, rx) = recording();
        f.filter.set_handler(handler);
        f.clock.advance_ms(60);
        assert!(f.filter.on_press(&RawKey::Char('s')).is_dispatched());
        assert_eq!(next(&rx), "s");
    }

    #[test]
    fn test_stop_listening() {
        let f = fixture();
        let (handler, rx) = recording();
        f.filter.set_handler(handler);
        f.filter.start_listening().unwrap();

        assert!(f.filter.stop_listening());
        assert!(!f.filter.stop_listening());
        assert_eq!(f.hook.emit(&KeyEvent::press(RawKey::Char('q'))), 0);
        assert_eq!(f.filter.on_press(&RawKey::Char('q')), DispatchOutcome::Inactive);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_debounce_interval_clamped() {
        let f = fixture();
        f.filter.set_debounce_interval(Duration::from_millis(1));
        assert_eq!(f.filter.debounce_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_status() {
        let f = fixture();
        f.filter.start_listening().unwrap();
        assert_eq!(
            f.filter.status(),
            FilterStatus {
                is_listening: true,
                allowed_keys_count: 14,
                has_handler: false,
                debounce_interval_ms: 50,
            }
        );
    }

    #[test]
    fn test_accepted_key_event_published() {
        let (tx, mut rx) = broadcast::channel(8);
        let pool = Arc::new(WorkerPool::new(1, 4).unwrap());
        let filter = KeyFilterDispatcher::new(
            Arc::new(ReplayHook::new()),
            pool,
            DispatchOptions::new(DEFAULT_KEY_DEBOUNCE).with_events(EventPublisher::new(tx)),
        );
        filter.set_handler(Arc::new(|_token: &str| Ok(())));
        filter.start_listening().unwrap();
        filter.on_press(&RawKey::named("esc"));

        let events: Vec<ListenerEvent> = tokio_test::block_on(async {
            vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()]
        });
        assert_eq!(
            events[1],
            ListenerEvent::KeyAccepted {
                token: "escape".into()
            }
        );
    }
}
