// Keyfire Shortcuts
// Key combinations bound to commands and the edge-triggered matcher

use std::fmt;

use smallvec::SmallVec;

use crate::state::{KeySet, KeyState, UsedKeys};
use crate::Key;

/// Errors for shortcuts that can never fire
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShortcutError {
    #[error("shortcut has no keys")]
    NoKeys,

    #[error("shortcut for {0} has an empty command")]
    EmptyCommand(String),
}

/// A set of keys that must be held together to run a command.
///
/// Key order is irrelevant and duplicates collapse. The `active` flag is
/// edge state owned by [`ShortcutMatcher`]: it is set when the shortcut
/// fires and cleared as soon as any required key is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcut {
    keys: SmallVec<[Key; 4]>,
    command: String,
    active: bool,
}

impl Shortcut {
    /// Create a shortcut from a key list and a command.
    ///
    /// Keys are sorted and deduplicated. An empty key list or a blank
    /// command is rejected.
    pub fn new(
        keys: impl IntoIterator<Item = Key>,
        command: impl Into<String>,
    ) -> Result<Self, ShortcutError> {
        let mut keys: SmallVec<[Key; 4]> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();

        if keys.is_empty() {
            return Err(ShortcutError::NoKeys);
        }

        let command = command.into();
        if command.trim().is_empty() {
            return Err(ShortcutError::EmptyCommand(format_keys(&keys)));
        }

        Ok(Self {
            keys,
            command,
            active: false,
        })
    }

    /// Required keys in ascending code order
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether the shortcut fired and its keys are still all held
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether every required key is pressed in `state`
    pub fn is_satisfied(&self, state: &KeyState) -> bool {
        self.keys.iter().all(|key| state.is_pressed(*key))
    }
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", format_keys(&self.keys), self.command)
    }
}

fn format_keys(keys: &[Key]) -> String {
    keys.iter()
        .map(|k| k.name())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Edge-triggered AND-of-keys matcher over a fixed shortcut list.
///
/// A shortcut emits its command once when all its keys become pressed and
/// stays silent while they are held. Releasing any one key re-arms it.
#[derive(Debug, Clone, Default)]
pub struct ShortcutMatcher {
    shortcuts: Vec<Shortcut>,
    used_keys: UsedKeys,
}

impl ShortcutMatcher {
    pub fn new(shortcuts: Vec<Shortcut>) -> Self {
        let used_keys: KeySet = shortcuts
            .iter()
            .flat_map(|s| s.keys().iter().copied())
            .collect();
        Self {
            shortcuts,
            used_keys,
        }
    }

    pub fn shortcuts(&self) -> &[Shortcut] {
        &self.shortcuts
    }

    pub fn len(&self) -> usize {
        self.shortcuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shortcuts.is_empty()
    }

    /// Keys referenced by any shortcut
    pub fn used_keys(&self) -> &UsedKeys {
        &self.used_keys
    }

    /// Whether a scan could change anything.
    ///
    /// With no shortcut active and no used key pressed, every shortcut is
    /// unsatisfied and already inactive, so [`evaluate`](Self::evaluate)
    /// would be a no-op.
    pub fn needs_scan(&self, state: &KeyState) -> bool {
        self.shortcuts.iter().any(Shortcut::is_active) || state.any_pressed_in(&self.used_keys)
    }

    /// Update every shortcut against `state` and return the commands of the
    /// shortcuts that just became satisfied, in registration order.
    pub fn evaluate(&mut self, state: &KeyState) -> Vec<&str> {
        let mut fired = Vec::new();
        for shortcut in &mut self.shortcuts {
            if !shortcut.is_satisfied(state) {
                shortcut.active = false;
                continue;
            }
            if shortcut.active {
                continue;
            }
            shortcut.active = true;
            log::debug!("Activated {}", shortcut);
            fired.push(shortcut.command.as_str());
        }
        fired
    }

    /// Deactivate every shortcut without firing anything
    pub fn reset(&mut self) {
        for shortcut in &mut self.shortcuts {
            shortcut.active = false;
        }
    }
}
