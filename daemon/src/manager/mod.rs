//! Platform manager
//!
//! Owns both dispatchers, the resilient executor and the mouse, screen and
//! system collaborators. Every hotkey registration, listener start and
//! pointer action goes through the executor.

mod geometry;
mod headless;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

pub use geometry::{Point, ScreenRect};
pub use headless::{HeadlessMouse, HeadlessScreen, HeadlessSystem, MouseAction};

use crate::config::Config;
use crate::dispatch::DispatchOptions;
use crate::error::{ErrorKind, ExecuteError, PlatformError, WorkerError};
use crate::events::EventPublisher;
use crate::executor::ResilientExecutor;
use crate::filter::{FilterStatus, KeyFilterDispatcher, KeyHandler};
use crate::hook::InputHook;
use crate::hotkey::{HotkeyCallback, HotkeyDispatcher, HotkeyStatus, ModifierKind, ModifierSet};
use crate::worker::WorkerPool;

/// Glide duration for smooth pointer moves
pub const SMOOTH_MOVE_DURATION: Duration = Duration::from_millis(100);

/// Pointer control
pub trait MouseController: Send + Sync {
    fn move_to(&self, point: Point) -> Result<(), PlatformError>;
    fn smooth_move_to(&self, point: Point, duration: Duration) -> Result<(), PlatformError>;
    fn left_click(&self, point: Point) -> Result<(), PlatformError>;
    fn right_click(&self, point: Point) -> Result<(), PlatformError>;
    fn cursor_position(&self) -> Point;
}

/// Screen layout
pub trait ScreenGeometry: Send + Sync {
    fn primary_rect(&self) -> ScreenRect;
}

/// System checks and tuning
pub trait SystemMonitor: Send + Sync {
    fn check_compatibility(&self) -> Result<(), PlatformError>;
    fn optimize_for_performance(&self) -> Result<(), PlatformError>;
    fn stop_monitoring(&self);
    fn restore_defaults(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MouseButton::Left => write!(f, "left"),
            MouseButton::Right => write!(f, "right"),
        }
    }
}

impl FromStr for MouseButton {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            other => Err(PlatformError::MouseOperation(format!(
                "unsupported mouse button: {other}"
            ))),
        }
    }
}

/// The collaborators a manager drives
#[derive(Clone)]
pub struct Backends {
    pub mouse: Arc<dyn MouseController>,
    pub screen: Arc<dyn ScreenGeometry>,
    pub system: Arc<dyn SystemMonitor>,
}

impl Backends {
    pub fn headless() -> Self {
        Self {
            mouse: Arc::new(HeadlessMouse::new()),
            screen: Arc::new(HeadlessScreen::default()),
            system: Arc::new(HeadlessSystem::new()),
        }
    }
}

/// Snapshot of the whole platform layer
#[derive(Debug, Clone, Serialize)]
pub struct PlatformStatus {
    pub initialized: bool,
    pub error_recovery_enabled: bool,
    pub keyboard_listening: bool,
    pub hotkey_count: usize,
    pub hotkeys: HotkeyStatus,
    pub key_filter: FilterStatus,
    pub operation_timeout_ms: u64,
    pub abandoned_operations: usize,
    pub screen: ScreenRect,
    pub cursor_position: Point,
}

/// Single entry point for hotkeys, key filtering and pointer actions
pub struct PlatformManager {
    hotkeys: Arc<HotkeyDispatcher>,
    filter: Arc<KeyFilterDispatcher>,
    executor: ResilientExecutor,
    mouse: Arc<dyn MouseController>,
    screen: Arc<dyn ScreenGeometry>,
    system: Arc<dyn SystemMonitor>,
    initialized: Mutex<bool>,
}

impl PlatformManager {
    pub fn new(
        config: &Config,
        hook: Arc<dyn InputHook>,
        backends: Backends,
        events: EventPublisher,
    ) -> Result<Self, WorkerError> {
        let pool = Arc::new(WorkerPool::new(config.workers, config.queue_depth)?);

        let hotkeys = HotkeyDispatcher::new(
            Arc::clone(&hook),
            Arc::clone(&pool),
            DispatchOptions::new(config.hotkey_debounce).with_events(events.clone()),
        );
        let filter = KeyFilterDispatcher::new(
            hook,
            pool,
            DispatchOptions::new(config.key_debounce).with_events(events),
        );

        Ok(Self {
            hotkeys: Arc::new(hotkeys),
            filter: Arc::new(filter),
            executor: ResilientExecutor::new(config.execute_options(), config.max_abandoned),
            mouse: backends.mouse,
            screen: backends.screen,
            system: backends.system,
            initialized: Mutex::new(false),
        })
    }

    /// Check compatibility, tune the system and install recovery hooks.
    /// Idempotent.
    pub fn initialize(&self) -> Result<(), PlatformError> {
        let mut initialized = self.initialized.lock().unwrap_or_else(PoisonError::into_inner);
        if *initialized {
            return Ok(());
        }

        self.system.check_compatibility()?;
        self.system.optimize_for_performance()?;
        self.install_recovery_hooks();

        *initialized = true;
        info!("platform manager initialized");
        Ok(())
    }

    fn install_recovery_hooks(&self) {
        let hotkeys = Arc::clone(&self.hotkeys);
        self.executor.set_recovery(
            ErrorKind::HotkeyRegistration,
            Arc::new(move || {
                hotkeys.unregister_all();
                thread::sleep(Duration::from_millis(100));
                Ok(())
            }),
        );

        self.executor.set_recovery(
            ErrorKind::MouseOperation,
            Arc::new(|| {
                thread::sleep(Duration::from_millis(50));
                Ok(())
            }),
        );

        let system = Arc::clone(&self.system);
        self.executor.set_recovery(
            ErrorKind::SystemResource,
            Arc::new(move || {
                system.stop_monitoring();
                thread::sleep(Duration::from_millis(100));
                Ok(())
            }),
        );
    }

    /// Stop everything and restore system settings. Never fails.
    pub fn cleanup(&self) {
        let mut initialized = self.initialized.lock().unwrap_or_else(PoisonError::into_inner);
        if !*initialized {
            return;
        }

        self.hotkeys.unregister_all();
        self.filter.stop_listening();
        self.system.stop_monitoring();
        self.system.restore_defaults();

        *initialized = false;
        info!("platform manager cleaned up");
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Alt+G
    pub fn register_activation_hotkey(&self, callback: HotkeyCallback) -> Result<(), ExecuteError> {
        self.register_hotkey("g", ModifierSet::from([ModifierKind::Alt]), callback)
    }

    /// Escape, no modifiers
    pub fn register_exit_hotkey(&self, callback: HotkeyCallback) -> Result<(), ExecuteError> {
        self.register_hotkey("escape", ModifierSet::empty(), callback)
    }

    pub fn register_hotkey(
        &self,
        key: &str,
        modifiers: ModifierSet,
        callback: HotkeyCallback,
    ) -> Result<(), ExecuteError> {
        let hotkeys = Arc::clone(&self.hotkeys);
        let owned_key = key.to_string();
        self.executor
            .execute(&format!("register hotkey {}", chord_label(key, modifiers)), move |_| {
                hotkeys
                    .register(&owned_key, modifiers, Arc::clone(&callback))
                    .map_err(PlatformError::from)
            })
    }

    pub fn unregister_hotkey(&self, key: &str, modifiers: ModifierSet) -> Result<bool, ExecuteError> {
        let hotkeys = Arc::clone(&self.hotkeys);
        let owned_key = key.to_string();
        self.executor
            .execute(&format!("unregister hotkey {}", chord_label(key, modifiers)), move |_| {
                Ok(hotkeys.unregister(&owned_key, modifiers))
            })
    }

    pub fn unregister_all_hotkeys(&self) {
        self.hotkeys.unregister_all();
    }

    pub fn is_hotkey_registered(&self, key: &str, modifiers: ModifierSet) -> bool {
        self.hotkeys.is_registered(key, modifiers)
    }

    /// Install `handler` and start the key filter
    pub fn start_keyboard_listening(&self, handler: KeyHandler) -> Result<bool, ExecuteError> {
        self.filter.set_handler(handler);
        let filter = Arc::clone(&self.filter);
        self.executor.execute("start keyboard listening", move |_| {
            filter
                .start_listening()
                .map_err(|e| PlatformError::KeyboardInput(e.to_string()))
        })
    }

    pub fn stop_keyboard_listening(&self) -> bool {
        self.filter.stop_listening()
    }

    pub fn is_keyboard_listening(&self) -> bool {
        self.filter.is_listening()
    }

    pub fn set_key_filter<I, S>(&self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.filter.set_allow_list(tokens);
    }

    /// Click at a point; off-screen coordinates are clamped first
    pub fn click_at(&self, x: i32, y: i32, button: MouseButton) -> Result<(), ExecuteError> {
        let point = self.clamp_to_screen(Point::new(x, y));
        let mouse = Arc::clone(&self.mouse);
        self.executor
            .execute(&format!("{button} click {point}"), move |_| match button {
                MouseButton::Left => mouse.left_click(point),
                MouseButton::Right => mouse.right_click(point),
            })
    }

    /// Move the pointer; off-screen coordinates are clamped first
    pub fn hover_at(&self, x: i32, y: i32, smooth: bool) -> Result<(), ExecuteError> {
        let point = self.clamp_to_screen(Point::new(x, y));
        let mouse = Arc::clone(&self.mouse);
        let label = if smooth {
            format!("smooth move to {point}")
        } else {
            format!("move to {point}")
        };
        self.executor.execute(&label, move |_| {
            if smooth {
                mouse.smooth_move_to(point, SMOOTH_MOVE_DURATION)
            } else {
                mouse.move_to(point)
            }
        })
    }

    fn clamp_to_screen(&self, point: Point) -> Point {
        let rect = self.screen.primary_rect();
        if rect.contains(point) {
            return point;
        }
        let clamped = rect.clamp(point);
        debug!(requested = %point, %clamped, "coordinates clamped to screen");
        clamped
    }

    pub fn cursor_position(&self) -> Point {
        self.mouse.cursor_position()
    }

    pub fn screen_rect(&self) -> ScreenRect {
        self.screen.primary_rect()
    }

    /// Set the per-attempt operation timeout (clamped to 1..=30 s)
    pub fn set_operation_timeout(&self, timeout: Duration) -> Duration {
        let applied = self.executor.set_default_timeout(timeout);
        if applied != timeout {
            warn!(
                requested_ms = timeout.as_millis() as u64,
                applied_ms = applied.as_millis() as u64,
                "operation timeout clamped"
            );
        }
        applied
    }

    pub fn set_error_recovery_enabled(&self, enabled: bool) {
        self.executor.set_recovery_enabled(enabled);
    }

    pub fn hotkeys(&self) -> &HotkeyDispatcher {
        &self.hotkeys
    }

    pub fn key_filter(&self) -> &KeyFilterDispatcher {
        &self.filter
    }

    pub fn executor(&self) -> &ResilientExecutor {
        &self.executor
    }

    pub fn status(&self) -> PlatformStatus {
        let hotkeys = self.hotkeys.status();
        let key_filter = self.filter.status();
        PlatformStatus {
            initialized: self.is_initialized(),
            error_recovery_enabled: self.executor.recovery_enabled(),
            keyboard_listening: key_filter.is_listening,
            hotkey_count: hotkeys.bindings.len(),
            hotkeys,
            key_filter,
            operation_timeout_ms: self.executor.defaults().timeout().as_millis() as u64,
            abandoned_operations: self.executor.abandoned_count(),
            screen: self.screen.primary_rect(),
            cursor_position: self.mouse.cursor_position(),
        }
    }
}

impl Drop for PlatformManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn chord_label(key: &str, modifiers: ModifierSet) -> String {
    if modifiers.is_empty() {
        key.to_string()
    } else {
        format!("{modifiers}+{key}")
    }
}
