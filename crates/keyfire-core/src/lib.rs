// Keyfire Core Library
// Global shortcut matching over raw evdev input with device hotplug

pub mod config;
pub mod event;
pub mod hotplug;
pub mod input;
pub mod key;
pub mod output;
pub mod shortcut;
pub mod state;

pub use config::{default_config_path, resolve_config_path, Config, ConfigError};
pub use event::{
    list_devices, CycleReport, DeviceInfo, EventLoop, EventLoopError, EventLoopResult, LoopConfig,
    LoopState, Readiness,
};
pub use hotplug::{HotplugError, HotplugEvent, HotplugSource, HotplugTracker};
#[cfg(feature = "hotplug")]
pub use hotplug::UdevMonitor;
pub use input::{
    drain_events, is_key_capable, is_key_event, DeviceCapabilities, DeviceError, DeviceHandle,
    DeviceId, DeviceOpener, DeviceRegistry, EvdevOpener, EventSource, IngestError, RawEvent,
};
pub use key::{key_from_name, key_name, Key, MAX_KEY};
pub use output::{CommandSink, LaunchError, ProcessLauncher, RecordingSink};
pub use shortcut::{Shortcut, ShortcutError, ShortcutMatcher};
pub use state::{KeySet, KeyState, UsedKeys};
