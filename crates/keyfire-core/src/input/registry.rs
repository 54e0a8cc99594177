// Keyfire Input Layer - Device Registry
// The live set of open devices keyed by stable identity

use std::fmt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use super::device::DeviceError;
use super::event::EventSource;
use super::handle::DeviceOpener;

/// Stable identity of an input device.
///
/// Derived from the device's topological path, so it survives the node
/// being renamed when the device is replugged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

struct Entry<D> {
    path: PathBuf,
    device: D,
}

/// Owns every open device.
///
/// Devices are kept in insertion order so the readiness set and the order
/// devices are drained in are deterministic. Dropping the registry closes
/// every device.
pub struct DeviceRegistry<O: DeviceOpener> {
    opener: O,
    devices: IndexMap<DeviceId, Entry<O::Device>>,
}

impl<O: DeviceOpener> DeviceRegistry<O> {
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            devices: IndexMap::new(),
        }
    }

    /// Open every candidate and keep the ones that validate.
    ///
    /// Candidates that fail to open or do not report key events are
    /// logged and skipped. Returns the identities that were opened.
    pub fn open_all<I>(&mut self, candidates: I) -> Vec<DeviceId>
    where
        I: IntoIterator<Item = (DeviceId, PathBuf)>,
    {
        let mut opened = Vec::new();
        for (id, path) in candidates {
            if matches!(self.add(id.clone(), &path), Ok(true)) {
                opened.push(id);
            }
        }
        opened
    }

    /// Open and register a single device.
    ///
    /// Returns `Ok(false)` without touching anything when `id` is already
    /// registered. On error the registry is unchanged.
    pub fn add(&mut self, id: DeviceId, path: &Path) -> Result<bool, DeviceError> {
        if self.devices.contains_key(&id) {
            log::debug!("Device {} is already open", id);
            return Ok(false);
        }

        match self.opener.open(path) {
            Ok(device) => {
                log::info!("Opened {} ({})", path.display(), id);
                self.devices.insert(
                    id,
                    Entry {
                        path: path.to_path_buf(),
                        device,
                    },
                );
                Ok(true)
            }
            Err(e @ DeviceError::NotKeyCapable { .. }) => {
                log::info!("Skipping {}: {}", id, e);
                Err(e)
            }
            Err(e) => {
                log::warn!("Skipping {}: {}", id, e);
                Err(e)
            }
        }
    }

    /// Close and forget a device. Unknown identities are ignored.
    pub fn remove(&mut self, id: &DeviceId) -> bool {
        match self.devices.shift_remove(id) {
            Some(entry) => {
                log::info!("Closed {} ({})", entry.path.display(), id);
                true
            }
            None => false,
        }
    }

    /// Close every device
    pub fn close_all(&mut self) {
        if !self.devices.is_empty() {
            log::debug!("Closing {} device(s)", self.devices.len());
        }
        self.devices.clear();
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Node path the device was opened from
    pub fn path(&self, id: &DeviceId) -> Option<&Path> {
        self.devices.get(id).map(|e| e.path.as_path())
    }

    pub fn get_mut(&mut self, id: &DeviceId) -> Option<&mut O::Device> {
        self.devices.get_mut(id).map(|e| &mut e.device)
    }

    /// Identities in registration order
    pub fn ids(&self) -> impl Iterator<Item = &DeviceId> {
        self.devices.keys()
    }

    /// Devices still holding records read ahead of an aborted drain
    pub fn buffered(&self) -> impl Iterator<Item = &DeviceId> {
        self.devices
            .iter()
            .filter(|(_, entry)| entry.device.has_pending())
            .map(|(id, _)| id)
    }

    /// Descriptors to wait on, in registration order
    pub fn raw_fds(&self) -> impl Iterator<Item = (&DeviceId, RawFd)> {
        self.devices
            .iter()
            .map(|(id, entry)| (id, entry.device.as_raw_fd()))
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    pub fn opener_mut(&mut self) -> &mut O {
        &mut self.opener
    }
}

impl<O: DeviceOpener> Drop for DeviceRegistry<O> {
    fn drop(&mut self) {
        self.close_all();
    }
}
