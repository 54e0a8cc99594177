// Keyfire Input Layer - Device Handles
// Open evdev nodes, validated and switched to non-blocking reads

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use evdev::raw_stream::RawDevice;
use evdev::EventType;

use super::device::{is_key_capable, DeviceCapabilities, DeviceError};
use super::event::{EventSource, RawEvent};
use crate::Key;

/// Opens device nodes for the registry.
///
/// The registry only needs something it can drain and poll, which keeps it
/// testable without real hardware.
pub trait DeviceOpener {
    type Device: EventSource + AsRawFd;

    /// Open and validate the node at `path`
    fn open(&mut self, path: &Path) -> Result<Self::Device, DeviceError>;
}

/// Opens real evdev nodes as [`DeviceHandle`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct EvdevOpener;

impl DeviceOpener for EvdevOpener {
    type Device = DeviceHandle;

    fn open(&mut self, path: &Path) -> Result<DeviceHandle, DeviceError> {
        DeviceHandle::open(path)
    }
}

/// One open evdev node.
///
/// The descriptor is opened close-on-exec and switched to non-blocking mode,
/// and it is closed when the handle is dropped.
pub struct DeviceHandle {
    device: RawDevice,
    path: PathBuf,
    pending: VecDeque<RawEvent>,
}

impl DeviceHandle {
    /// Open `path` and make sure it reports key events
    pub fn open(path: &Path) -> Result<Self, DeviceError> {
        let open_error = |source| DeviceError::Open {
            path: path.to_path_buf(),
            source,
        };

        let device = RawDevice::open(path).map_err(open_error)?;

        let capabilities = capabilities_of(&device);
        if !is_key_capable(&capabilities) {
            return Err(DeviceError::NotKeyCapable {
                path: path.to_path_buf(),
            });
        }

        set_nonblocking(device.as_raw_fd()).map_err(open_error)?;

        Ok(Self {
            device,
            path: path.to_path_buf(),
            pending: VecDeque::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.device.name().unwrap_or("Unknown")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSource for DeviceHandle {
    fn read_event(&mut self) -> io::Result<Option<RawEvent>> {
        if self.pending.is_empty() {
            match self.device.fetch_events() {
                Ok(events) => self.pending.extend(
                    events.map(|e| RawEvent::new(e.event_type().0, e.code(), e.value())),
                ),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        Ok(self.pending.pop_front())
    }

    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl AsRawFd for DeviceHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.device.as_raw_fd()
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.name())
            .field("path", &self.path)
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}

fn capabilities_of(device: &RawDevice) -> DeviceCapabilities {
    let has_ev_key = device.supported_events().contains(EventType::KEY);
    let keys: Vec<Key> = device
        .supported_keys()
        .map(|keys| keys.iter().map(|k| Key::from(k.code())).collect())
        .unwrap_or_default();
    DeviceCapabilities::new(has_ev_key, keys)
}

/// Switch a descriptor to non-blocking mode
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own, no pointers involved.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_node_fails() {
        let err = DeviceHandle::open(Path::new("/dev/input/does-not-exist")).unwrap_err();
        assert!(matches!(err, DeviceError::Open { .. }));
    }

    #[test]
    fn test_open_non_device_fails() {
        // A regular file is not an evdev node; the capability ioctls fail.
        let err = DeviceHandle::open(Path::new("/proc/self/status")).unwrap_err();
        assert!(matches!(err, DeviceError::Open { .. }));
    }

    #[test]
    fn test_set_nonblocking_on_pipe() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        set_nonblocking(fds[0]).unwrap();
        let flags = unsafe { libc::fcntl(fds[0], libc::F_GETFL) };
        assert_ne!(flags & libc::O_NONBLOCK, 0);
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
