// Keyfire Hotplug Layer - Tracked Devices
// Filter policy and idempotent bookkeeping for hotplug notifications

use std::path::PathBuf;

use indexmap::IndexMap;

use super::HotplugEvent;
use crate::input::DeviceId;

/// What a notification says happened to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum NoticeAction {
    /// Present at enumeration time
    Present,
    Add,
    Change,
    Remove,
    /// Any other action (bind, unbind, online, ...)
    Other,
}

impl NoticeAction {
    /// Map a udev action string
    pub fn from_action(action: &str) -> Self {
        match action {
            "add" => NoticeAction::Add,
            "change" => NoticeAction::Change,
            "remove" | "offline" => NoticeAction::Remove,
            _ => NoticeAction::Other,
        }
    }

    pub fn is_removal(self) -> bool {
        self == NoticeAction::Remove
    }
}

/// Platform-neutral view of one device notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNotice {
    pub action: NoticeAction,
    pub id: DeviceId,
    /// Existing event node for the device, if it has one
    pub path: Option<PathBuf>,
    /// Advertises keyboard or generic key input
    pub key_input: bool,
    /// The platform finished setting the device up
    pub initialized: bool,
}

/// Identities of the devices that passed the filter policy.
///
/// Additions are filtered: the device must report key input, be
/// initialized and have an existing node. Removals are unconditional for
/// tracked identities. Re-adding a tracked identity is a no-op.
#[derive(Debug, Default, Clone)]
pub struct HotplugTracker {
    known: IndexMap<DeviceId, PathBuf>,
}

impl HotplugTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track every acceptable device from an enumeration and return them.
    pub fn seed<I>(&mut self, notices: I) -> Vec<(DeviceId, PathBuf)>
    where
        I: IntoIterator<Item = DeviceNotice>,
    {
        notices
            .into_iter()
            .filter_map(|notice| match self.observe(notice) {
                HotplugEvent::Added(id, path) => Some((id, path)),
                _ => None,
            })
            .collect()
    }

    /// Apply one notification
    pub fn observe(&mut self, notice: DeviceNotice) -> HotplugEvent {
        if notice.action.is_removal() {
            return match self.known.shift_remove(&notice.id) {
                Some(_) => HotplugEvent::Removed(notice.id),
                None => HotplugEvent::NoOp,
            };
        }

        if !notice.key_input {
            log::trace!("Skipping non-keyboard {}", notice.id);
            return HotplugEvent::NoOp;
        }

        // Not initialized yet. Dropped rather than queued; udev sends
        // another notification once the device is set up.
        if !notice.initialized {
            log::debug!("Skipping uninitialized {} ({})", notice.id, notice.action);
            return HotplugEvent::NoOp;
        }

        if self.known.contains_key(&notice.id) {
            return HotplugEvent::NoOp;
        }

        let Some(path) = notice.path else {
            log::debug!("Skipping {}: no device node", notice.id);
            return HotplugEvent::NoOp;
        };

        log::debug!("Found keyboard {} at {}", notice.id, path.display());
        self.known.insert(notice.id.clone(), path.clone());
        HotplugEvent::Added(notice.id, path)
    }

    pub fn forget(&mut self, id: &DeviceId) -> bool {
        self.known.shift_remove(id).is_some()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.known.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
