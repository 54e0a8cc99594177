// Keyfire Hotplug Layer
// Device arrival/departure notifications as a pull-based event surface

mod tracker;
#[cfg(feature = "hotplug")]
mod monitor;

use std::io;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use crate::input::DeviceId;

pub use tracker::{DeviceNotice, HotplugTracker, NoticeAction};
#[cfg(feature = "hotplug")]
pub use monitor::UdevMonitor;

/// Outcome of consuming one hotplug notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    /// A new key-capable device is ready to be opened
    Added(DeviceId, PathBuf),
    /// A tracked device went away
    Removed(DeviceId),
    /// The notification did not change the tracked set
    NoOp,
    /// The notification channel is broken
    Unavailable,
}

/// Errors from the hotplug channel
#[derive(Debug, thiserror::Error)]
pub enum HotplugError {
    #[error("device monitor unavailable: {0}")]
    Unavailable(#[source] io::Error),
}

/// A source of device snapshots and hotplug notifications.
pub trait HotplugSource {
    /// Snapshot of the devices present now, filtered to key-capable ones.
    /// The returned identities become tracked.
    fn enumerate(&mut self) -> Result<Vec<(DeviceId, PathBuf)>, HotplugError>;

    /// Consume exactly one pending notification. Never blocks.
    ///
    /// Returns [`HotplugEvent::Unavailable`] once the channel reports an
    /// error or hangup; the caller stops waiting on it.
    fn poll(&mut self) -> HotplugEvent;

    /// Stop tracking `id` without a notification, so a later notification
    /// for it is treated as new.
    fn forget(&mut self, id: &DeviceId);

    /// Descriptor that becomes readable when a notification is pending
    fn raw_fd(&self) -> Option<RawFd>;
}

/// Whether `fd` reports an error or hangup right now
#[cfg_attr(not(feature = "hotplug"), allow(dead_code))]
pub(crate) fn channel_broken(fd: RawFd) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: a single pollfd on the stack and a zero timeout.
    let ready = unsafe { libc::poll(&mut pfd, 1, 0) };
    if ready < 0 {
        return io::Error::last_os_error().kind() != io::ErrorKind::Interrupted;
    }
    pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0
}
