//! Hotkey bindings keyed by (modifier set, key)

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::keys::{canonical_token, ModifierSet};
use crate::error::RegistrationError;

/// Zero-argument hotkey action
///
/// Errors (and panics) are contained on the worker that runs it.
pub type HotkeyCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Unique identity of a binding: canonical key plus unordered modifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingId {
    modifiers: ModifierSet,
    key: String,
}

impl BindingId {
    /// Build an id from a user-supplied key name; `None` if the key is empty
    pub fn new(key: &str, modifiers: ModifierSet) -> Option<Self> {
        let key = canonical_token(key)?;
        Some(Self { modifiers, key })
    }

    /// Build an id from an already-normalized token
    pub(crate) fn from_token(token: &str, modifiers: ModifierSet) -> Self {
        Self {
            modifiers,
            key: token.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn modifiers(&self) -> ModifierSet {
        self.modifiers
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.is_empty() {
            f.write_str(&self.key)
        } else {
            write!(f, "{}+{}", self.modifiers, self.key)
        }
    }
}

/// A registered hotkey
#[derive(Clone)]
pub struct HotkeyBinding {
    pub id: BindingId,
    pub callback: HotkeyCallback,
    /// Set once the listener backing this binding is running
    pub registered: bool,
}

impl fmt::Debug for HotkeyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotkeyBinding")
            .field("id", &self.id)
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

/// Owns all hotkey bindings and answers match queries
#[derive(Debug, Default)]
pub struct HotkeyRegistry {
    bindings: HashMap<BindingId, HotkeyBinding>,
}

impl HotkeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        key: &str,
        modifiers: ModifierSet,
        callback: HotkeyCallback,
    ) -> Result<BindingId, RegistrationError> {
        let id = BindingId::new(key, modifiers)
            .ok_or_else(|| RegistrationError::InvalidKey(key.to_string()))?;

        if self.bindings.contains_key(&id) {
            return Err(RegistrationError::DuplicateBinding(id));
        }

        self.bindings.insert(
            id.clone(),
            HotkeyBinding {
                id: id.clone(),
                callback,
                registered: false,
            },
        );
        Ok(id)
    }

    /// Remove a binding; `false` if it was never registered
    pub fn unregister(&mut self, key: &str, modifiers: ModifierSet) -> bool {
        BindingId::new(key, modifiers)
            .map(|id| self.bindings.remove(&id).is_some())
            .unwrap_or(false)
    }

    /// Remove every binding, returning how many there were
    pub fn unregister_all(&mut self) -> usize {
        let count = self.bindings.len();
        self.bindings.clear();
        count
    }

    pub fn is_registered(&self, key: &str, modifiers: ModifierSet) -> bool {
        BindingId::new(key, modifiers)
            .map(|id| self.bindings.contains_key(&id))
            .unwrap_or(false)
    }

    /// Find the binding for a normalized key and the modifiers held at press time
    ///
    /// The modifier sets must be equal: a binding for `alt+g` does not fire
    /// for `alt+ctrl+g`, and a binding with no modifiers only fires when
    /// nothing is held.
    pub fn find_match(&self, token: &str, observed: ModifierSet) -> Option<&HotkeyBinding> {
        self.bindings.get(&BindingId::from_token(token, observed))
    }

    pub(crate) fn mark_registered(&mut self, id: &BindingId) {
        if let Some(binding) = self.bindings.get_mut(id) {
            binding.registered = true;
        }
    }

    pub(crate) fn remove_id(&mut self, id: &BindingId) -> bool {
        self.bindings.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Ids of all bindings, sorted by their rendered form
    pub fn ids(&self) -> Vec<BindingId> {
        let mut ids: Vec<BindingId> = self.bindings.keys().cloned().collect();
        ids.sort_by_key(|id| id.to_string());
        ids
    }
}
