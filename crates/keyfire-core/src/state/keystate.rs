// Keyfire Key State
// Fixed-size pressed/released table shared by every watched device

use std::fmt;

use crate::key::{Key, MAX_KEY};

const WORD_BITS: usize = u64::BITS as usize;
const WORDS: usize = (MAX_KEY as usize).div_ceil(WORD_BITS);

/// A set of key codes backed by a fixed bitmap over `[0, MAX_KEY)`.
///
/// Codes outside the range are never members; inserting one is ignored.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    bits: [u64; WORDS],
}

impl KeySet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn slot(key: Key) -> Option<(usize, u64)> {
        if !key.is_valid() {
            return None;
        }
        let index = key.code() as usize;
        Some((index / WORD_BITS, 1u64 << (index % WORD_BITS)))
    }

    /// Check membership
    pub fn contains(&self, key: Key) -> bool {
        match Self::slot(key) {
            Some((word, mask)) => self.bits[word] & mask != 0,
            None => false,
        }
    }

    /// Insert or remove a key, returning whether the set changed
    pub fn set(&mut self, key: Key, member: bool) -> bool {
        let Some((word, mask)) = Self::slot(key) else {
            return false;
        };
        let before = self.bits[word];
        if member {
            self.bits[word] |= mask;
        } else {
            self.bits[word] &= !mask;
        }
        before != self.bits[word]
    }

    pub fn insert(&mut self, key: Key) -> bool {
        self.set(key, true)
    }

    pub fn remove(&mut self, key: Key) -> bool {
        self.set(key, false)
    }

    /// Remove every key
    pub fn clear(&mut self) {
        self.bits = [0; WORDS];
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    /// Number of keys in the set
    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether the two sets share at least one key
    pub fn intersects(&self, other: &KeySet) -> bool {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Iterate members in ascending code order
    pub fn iter(&self) -> impl Iterator<Item = Key> + '_ {
        self.bits.iter().enumerate().flat_map(|(word, bits)| {
            let bits = *bits;
            (0..WORD_BITS)
                .filter(move |bit| bits & (1u64 << bit) != 0)
                .map(move |bit| Key::from((word * WORD_BITS + bit) as u16))
        })
    }
}

impl FromIterator<Key> for KeySet {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        let mut set = KeySet::new();
        for key in iter {
            set.insert(key);
        }
        set
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|k| k.name())).finish()
    }
}

/// Keys referenced by at least one registered shortcut.
///
/// Built once when shortcuts are registered. Only used to skip shortcut
/// scans that could not change anything.
pub type UsedKeys = KeySet;

/// Global pressed/released state of every key across all devices.
///
/// There is one `KeyState` per event loop. Devices write into it as their
/// events are drained and the loop clears it wholesale whenever the view may
/// be stale (dropped events, topology changes, long silence).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct KeyState {
    pressed: KeySet,
}

impl KeyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key event value.
    ///
    /// The kernel reports release as 0 and press or autorepeat as nonzero,
    /// so a repeat on an already pressed key leaves the state unchanged.
    /// Returns whether the stored value changed.
    pub fn apply(&mut self, key: Key, value: i32) -> bool {
        self.pressed.set(key, value != 0)
    }

    pub fn is_pressed(&self, key: Key) -> bool {
        self.pressed.contains(key)
    }

    /// Forget every pressed key
    pub fn reset(&mut self) {
        self.pressed.clear();
    }

    /// Whether any key is currently pressed
    pub fn any_pressed(&self) -> bool {
        !self.pressed.is_empty()
    }

    /// Whether any key of `keys` is currently pressed
    pub fn any_pressed_in(&self, keys: &KeySet) -> bool {
        self.pressed.intersects(keys)
    }

    /// Iterate pressed keys in ascending code order
    pub fn pressed_keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.pressed.iter()
    }

    pub fn pressed_count(&self) -> usize {
        self.pressed.len()
    }
}

impl fmt::Debug for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyState")
            .field("pressed", &self.pressed)
            .finish()
    }
}
