//! Global hotkeys
//!
//! Key normalization and modifier tracking, the binding registry, and the
//! dispatcher that matches live presses against it.

mod dispatcher;
mod keys;
mod registry;

pub use dispatcher::{DispatcherState, HotkeyDispatcher, HotkeyStatus, DEFAULT_HOTKEY_DEBOUNCE};
pub use keys::{
    canonical_token, normalize_key, KeyEvent, KeyEventKind, ModifierKind, ModifierSet,
    ModifierTracker, RawKey,
};
pub use registry::{BindingId, HotkeyBinding, HotkeyCallback, HotkeyRegistry};
