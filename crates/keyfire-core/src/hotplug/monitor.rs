// Keyfire Hotplug Layer - Monitor
// Input subsystem enumeration and netlink notifications via libudev

use std::ffi::OsStr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use super::{
    channel_broken, DeviceNotice, HotplugError, HotplugEvent, HotplugSource, HotplugTracker,
    NoticeAction,
};
use crate::input::{set_nonblocking, DeviceId};

const SUBSYSTEM: &str = "input";

/// Watches the input subsystem through a udev monitor socket.
///
/// The socket is bound before the initial enumeration so that no device
/// plugged in between the two is missed.
pub struct UdevMonitor {
    socket: udev::MonitorSocket,
    tracker: HotplugTracker,
}

impl UdevMonitor {
    pub fn new() -> Result<Self, HotplugError> {
        let socket = udev::MonitorBuilder::new()
            .and_then(|builder| builder.match_subsystem(SUBSYSTEM))
            .and_then(|builder| builder.listen())
            .map_err(HotplugError::Unavailable)?;

        set_nonblocking(socket.as_raw_fd()).map_err(HotplugError::Unavailable)?;

        Ok(Self {
            socket,
            tracker: HotplugTracker::new(),
        })
    }

    pub fn tracker(&self) -> &HotplugTracker {
        &self.tracker
    }
}

impl HotplugSource for UdevMonitor {
    fn enumerate(&mut self) -> Result<Vec<(DeviceId, PathBuf)>, HotplugError> {
        let mut enumerator = udev::Enumerator::new().map_err(HotplugError::Unavailable)?;
        enumerator
            .match_subsystem(SUBSYSTEM)
            .map_err(HotplugError::Unavailable)?;
        let devices = enumerator
            .scan_devices()
            .map_err(HotplugError::Unavailable)?;

        let notices = devices.map(|device| notice_for(&device, NoticeAction::Present));
        Ok(self.tracker.seed(notices))
    }

    fn poll(&mut self) -> HotplugEvent {
        let Some(event) = self.socket.iter().next() else {
            // An empty receive is normal after a filtered or truncated
            // message; only a socket error or hangup means the channel is gone.
            if channel_broken(self.socket.as_raw_fd()) {
                log::warn!("udev monitor socket reported an error");
                return HotplugEvent::Unavailable;
            }
            return HotplugEvent::NoOp;
        };

        let action = event
            .action()
            .and_then(OsStr::to_str)
            .map(NoticeAction::from_action)
            .unwrap_or(NoticeAction::Other);
        log::trace!("udev {} {}", action, event.devpath().to_string_lossy());

        self.tracker.observe(notice_for(&event, action))
    }

    fn forget(&mut self, id: &DeviceId) {
        self.tracker.forget(id);
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.socket.as_raw_fd())
    }
}

fn notice_for(device: &udev::Device, action: NoticeAction) -> DeviceNotice {
    DeviceNotice {
        action,
        id: DeviceId::new(device.devpath().to_string_lossy()),
        path: event_node(device),
        key_input: has_flag(device, "ID_INPUT_KEYBOARD") || has_flag(device, "ID_INPUT_KEY"),
        initialized: device.is_initialized(),
    }
}

fn has_flag(device: &udev::Device, property: &str) -> bool {
    device.property_value(property) == Some(OsStr::new("1"))
}

/// Path to open for an evdev node: the first existing symlink, else the node.
fn event_node(device: &udev::Device) -> Option<PathBuf> {
    let devnode = device.devnode()?;
    let is_event = devnode
        .file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| name.starts_with("event"));
    if !is_event {
        return None;
    }

    let link = device
        .property_value("DEVLINKS")
        .and_then(OsStr::to_str)
        .and_then(|links| {
            links
                .split_whitespace()
                .map(Path::new)
                .find(|path| path.exists())
        });

    link.or_else(|| devnode.exists().then_some(devnode))
        .map(Path::to_path_buf)
}
