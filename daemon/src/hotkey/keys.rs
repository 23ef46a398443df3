//! Key descriptors, token normalization and modifier state tracking
//!
//! Raw key events arrive from the hook as [`RawKey`] values. Everything
//! downstream (hotkey matching, allow-list filtering) works on normalized
//! lowercase tokens produced by [`normalize_key`].

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Prefix hook libraries put in front of the textual form of special keys
const KEY_PREFIX: &str = "Key.";

/// A modifier key, with left/right variants folded together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifierKind {
    Alt,
    Ctrl,
    Shift,
    Win,
}

impl ModifierKind {
    pub const ALL: [ModifierKind; 4] = [Self::Alt, Self::Ctrl, Self::Shift, Self::Win];

    fn bit(self) -> u8 {
        match self {
            Self::Alt => 1,
            Self::Ctrl => 1 << 1,
            Self::Shift => 1 << 2,
            Self::Win => 1 << 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alt => "alt",
            Self::Ctrl => "ctrl",
            Self::Shift => "shift",
            Self::Win => "win",
        }
    }

    /// Map a named key to the modifier it represents, if any
    pub fn from_key_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "alt" | "alt_l" | "alt_r" | "alt_gr" => Some(Self::Alt),
            "ctrl" | "ctrl_l" | "ctrl_r" => Some(Self::Ctrl),
            "shift" | "shift_l" | "shift_r" => Some(Self::Shift),
            "cmd" | "cmd_l" | "cmd_r" | "super" | "win" | "meta" => Some(Self::Win),
            _ => None,
        }
    }
}

impl fmt::Display for ModifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unordered set of modifiers
///
/// Two sets built from the same modifiers in any order compare equal and
/// render identically (`alt+ctrl+shift+win` order).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModifierSet(u8);

impl ModifierSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, kind: ModifierKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: ModifierKind) {
        self.0 &= !kind.bit();
    }

    pub fn contains(&self, kind: ModifierKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = ModifierKind> + '_ {
        ModifierKind::ALL.into_iter().filter(|kind| self.contains(*kind))
    }
}

impl FromIterator<ModifierKind> for ModifierSet {
    fn from_iter<I: IntoIterator<Item = ModifierKind>>(iter: I) -> Self {
        let mut set = Self::empty();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl<const N: usize> From<[ModifierKind; N]> for ModifierSet {
    fn from(kinds: [ModifierKind; N]) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<&[ModifierKind]> for ModifierSet {
    fn from(kinds: &[ModifierKind]) -> Self {
        kinds.iter().copied().collect()
    }
}

impl fmt::Display for ModifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for kind in self.iter() {
            if !first {
                f.write_str("+")?;
            }
            f.write_str(kind.as_str())?;
            first = false;
        }
        Ok(())
    }
}

/// A key as delivered by the hook, before normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawKey {
    /// Key that produced a character
    Char(char),
    /// Special key known by name (`esc`, `f1`, `shift_l`, ...)
    Named(String),
    /// Anything else, in the hook's default textual form (e.g. `Key.media_play`)
    Other(String),
}

impl RawKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// The modifier this key represents, if it is one
    pub fn modifier(&self) -> Option<ModifierKind> {
        match self {
            Self::Named(name) => ModifierKind::from_key_name(name),
            _ => None,
        }
    }
}

impl fmt::Display for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Char(c) => write!(f, "{c:?}"),
            Self::Named(name) => f.write_str(name),
            Self::Other(repr) => write!(f, "raw:{repr}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Press,
    Release,
}

/// One raw event from the notification channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub kind: KeyEventKind,
    pub key: RawKey,
}

impl KeyEvent {
    pub fn press(key: RawKey) -> Self {
        Self {
            kind: KeyEventKind::Press,
            key,
        }
    }

    pub fn release(key: RawKey) -> Self {
        Self {
            kind: KeyEventKind::Release,
            key,
        }
    }
}

fn alias(name: &str) -> &str {
    match name {
        "esc" => "escape",
        "enter" => "return",
        "space" => " ",
        other => other,
    }
}

/// Normalize a raw key into the token used for matching and filtering
///
/// Returns `None` when the key cannot be turned into a token; the event
/// is then discarded.
pub fn normalize_key(key: &RawKey) -> Option<String> {
    match key {
        RawKey::Char(c) if c.is_control() => None,
        RawKey::Char(c) => Some(c.to_lowercase().collect()),
        RawKey::Named(name) => {
            let lower = name.trim().to_lowercase();
            if lower.is_empty() {
                return None;
            }
            Some(alias(&lower).to_string())
        }
        RawKey::Other(repr) => {
            let repr = repr.trim();
            let lower = repr.strip_prefix(KEY_PREFIX).unwrap_or(repr).to_lowercase();
            (!lower.is_empty()).then_some(lower)
        }
    }
}

/// Canonical form of a user-supplied key name (`"Esc"` -> `"escape"`)
pub fn canonical_token(name: &str) -> Option<String> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return normalize_key(&RawKey::Char(c));
    }
    normalize_key(&RawKey::Named(name.to_string()))
}

/// Tracks which modifiers are currently held
///
/// Runs on the input-delivery path, so nothing in here can fail.
#[derive(Debug, Default)]
pub struct ModifierTracker {
    held: Mutex<ModifierSet>,
}

impl ModifierTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key press; returns the modifier if the key is one
    pub fn on_press(&self, key: &RawKey) -> Option<ModifierKind> {
        let kind = key.modifier()?;
        self.held.lock().unwrap_or_else(PoisonError::into_inner).insert(kind);
        Some(kind)
    }

    /// Record a key release; returns the modifier if the key is one
    pub fn on_release(&self, key: &RawKey) -> Option<ModifierKind> {
        let kind = key.modifier()?;
        self.held.lock().unwrap_or_else(PoisonError::into_inner).remove(kind);
        Some(kind)
    }

    pub fn current(&self) -> ModifierSet {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clear(&self) {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_set_is_unordered() {
        let a = ModifierSet::from([ModifierKind::Shift, ModifierKind::Alt]);
        let b = ModifierSet::from([ModifierKind::Alt, ModifierKind::Shift]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "alt+shift");
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_empty_modifier_set() {
        let set = ModifierSet::empty();
        assert!(set.is_empty());
        assert_eq!(set.to_string(), "");
    }

    #[test]
    fn test_left_right_variants_fold() {
        for name in ["alt_l", "alt_r", "alt"] {
            assert_eq!(ModifierKind::from_key_name(name), Some(ModifierKind::Alt));
        }
        for name in ["ctrl_l", "ctrl_r"] {
            assert_eq!(ModifierKind::from_key_name(name), Some(ModifierKind::Ctrl));
        }
        for name in ["shift_l", "shift_r"] {
            assert_eq!(ModifierKind::from_key_name(name), Some(ModifierKind::Shift));
        }
        for name in ["cmd", "cmd_r", "super", "win"] {
            assert_eq!(ModifierKind::from_key_name(name), Some(ModifierKind::Win));
        }
        assert_eq!(ModifierKind::from_key_name("f1"), None);
    }

    #[test]
    fn test_normalize_character() {
        assert_eq!(normalize_key(&RawKey::Char('q')).as_deref(), Some("q"));
        assert_eq!(normalize_key(&RawKey::Char('Q')).as_deref(), Some("q"));
        assert_eq!(normalize_key(&RawKey::Char(' ')).as_deref(), Some(" "));
    }

    #[test]
    fn test_normalize_special_keys() {
        let cases = [
            ("esc", "escape"),
            ("enter", "return"),
            ("space", " "),
            ("backspace", "backspace"),
            ("F1", "f1"),
        ];
        for (name, expected) in cases {
            assert_eq!(normalize_key(&RawKey::named(name)).as_deref(), Some(expected));
        }
    }

    #[test]
    fn test_normalize_fallback_strips_prefix() {
        let key = RawKey::Other("Key.Tab".into());
        assert_eq!(normalize_key(&key).as_deref(), Some("tab"));

        let key = RawKey::Other("<65437>".into());
        assert_eq!(normalize_key(&key).as_deref(), Some("<65437>"));
    }

    #[test]
    fn test_normalize_failure_discards() {
        assert_eq!(normalize_key(&RawKey::Other("Key.".into())), None);
        assert_eq!(normalize_key(&RawKey::Other(String::new())), None);
        assert_eq!(normalize_key(&RawKey::named("")), None);
        assert_eq!(normalize_key(&RawKey::Char('\u{7}')), None);
    }

    #[test]
    fn test_canonical_token() {
        assert_eq!(canonical_token("G").as_deref(), Some("g"));
        assert_eq!(canonical_token("Esc").as_deref(), Some("escape"));
        assert_eq!(canonical_token("enter").as_deref(), Some("return"));
        assert_eq!(canonical_token(" ").as_deref(), Some(" "));
        assert_eq!(canonical_token(""), None);
    }

    #[test]
    fn test_tracker_press_release() {
        let tracker = ModifierTracker::new();
        tracker.on_press(&RawKey::named("alt_l"));
        tracker.on_press(&RawKey::named("ctrl_r"));
        assert_eq!(
            tracker.current(),
            ModifierSet::from([ModifierKind::Alt, ModifierKind::Ctrl])
        );

        tracker.on_release(&RawKey::named("alt_l"));
        assert_eq!(tracker.current(), ModifierSet::from([ModifierKind::Ctrl]));
    }

    #[test]
    fn test_tracker_left_press_right_release() {
        let tracker = ModifierTracker::new();
        tracker.on_press(&RawKey::named("shift_l"));
        tracker.on_release(&RawKey::named("shift_r"));
        assert!(tracker.current().is_empty());
    }

    #[test]
    fn test_tracker_ignores_unknown_keys() {
        let tracker = ModifierTracker::new();
        assert_eq!(tracker.on_press(&RawKey::Char('g')), None);
        assert_eq!(tracker.on_release(&RawKey::Other("Key.media".into())), None);
        assert!(tracker.current().is_empty());
    }
}
