// Keyfire Input Layer - Device Capabilities
// Capability analysis deciding whether an opened device is worth watching

use std::io;
use std::path::PathBuf;

use crate::state::KeySet;
use crate::Key;

/// Errors that can occur when opening a device
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} does not report key events")]
    NotKeyCapable { path: PathBuf },
}

/// Device capabilities extracted from the evdev capability bits
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Whether the device supports EV_KEY events
    pub has_ev_key: bool,
    /// Supported key codes (EV_KEY capability codes)
    pub supported_keys: KeySet,
}

impl DeviceCapabilities {
    /// Create a new DeviceCapabilities struct
    pub fn new(has_ev_key: bool, supported_keys: impl IntoIterator<Item = Key>) -> Self {
        Self {
            has_ev_key,
            supported_keys: supported_keys.into_iter().collect(),
        }
    }

    /// Check if a specific key is supported
    pub fn supports_key(&self, key: Key) -> bool {
        self.supported_keys.contains(key)
    }
}

/// Determine if a device reports keyboard-like key events.
///
/// The device must advertise EV_KEY and have an ESC key. Mice, lid
/// switches and power buttons advertise EV_KEY too, but not ESC.
pub fn is_key_capable(capabilities: &DeviceCapabilities) -> bool {
    capabilities.has_ev_key && capabilities.supports_key(Key::ESC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keyboard_caps() -> DeviceCapabilities {
        let mut keys: Vec<Key> = (1..=88).map(Key::from).collect();
        keys.extend([Key::LEFTMETA, Key::from(97), Key::from(100)]);
        DeviceCapabilities::new(true, keys)
    }

    fn make_mouse_caps() -> DeviceCapabilities {
        // BTN_LEFT, BTN_RIGHT, BTN_MIDDLE
        DeviceCapabilities::new(true, [272, 273, 274].map(Key::from))
    }

    #[test]
    fn test_keyboard_is_key_capable() {
        assert!(is_key_capable(&make_keyboard_caps()));
    }

    #[test]
    fn test_mouse_is_not_key_capable() {
        assert!(!is_key_capable(&make_mouse_caps()));
    }

    #[test]
    fn test_no_ev_key_is_not_key_capable() {
        let caps = DeviceCapabilities::new(false, [Key::ESC]);
        assert!(!is_key_capable(&caps));
    }

    #[test]
    fn test_power_button_is_not_key_capable() {
        let caps = DeviceCapabilities::new(true, [Key::from(116)]); // POWER
        assert!(!is_key_capable(&caps));
    }

    #[test]
    fn test_device_capabilities_supports_key() {
        let caps = DeviceCapabilities::new(true, [16, 17, 18, 30, 57].map(Key::from));
        assert!(caps.supports_key(Key::from(16))); // Q
        assert!(caps.supports_key(Key::from(30))); // A
        assert!(!caps.supports_key(Key::from(100)));
    }
}
