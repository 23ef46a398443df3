//! keygrid-daemon: global input detection and resilient dispatch
//!
//! - Global hotkeys matched on exact modifier sets, with debounce
//! - A key filter feeding allow-listed keystrokes to a single handler
//! - A bounded worker pool isolating every user callback from the hook
//! - A timeout/retry/recovery executor around every platform action
//!
//! The hook thread only tracks modifiers and makes the match decision;
//! everything else happens off it.

pub mod clock;
pub mod config;
pub mod debounce;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod executor;
pub mod filter;
pub mod hook;
pub mod hotkey;
pub mod lifecycle;
pub mod manager;
pub mod worker;
