// Keyfire Input Layer - Event Ingestion
// Drains raw evdev records from one device into the global key state

use std::io;

use crate::state::KeyState;
use crate::Key;

/// EV_SYN event type code
pub const EV_SYN: u16 = 0x00;

/// EV_KEY event type code
pub const EV_KEY: u16 = 0x01;

/// SYN_DROPPED code: the kernel buffer overran and events were lost
pub const SYN_DROPPED: u16 = 0x03;

/// One fixed-layout input record: (type, code, value).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub fn new(kind: u16, code: u16, value: i32) -> Self {
        Self { kind, code, value }
    }

    pub fn key(code: u16, value: i32) -> Self {
        Self::new(EV_KEY, code, value)
    }

    pub fn press(key: Key) -> Self {
        Self::key(key.code(), 1)
    }

    pub fn release(key: Key) -> Self {
        Self::key(key.code(), 0)
    }

    pub fn repeat(key: Key) -> Self {
        Self::key(key.code(), 2)
    }

    pub fn dropped() -> Self {
        Self::new(EV_SYN, SYN_DROPPED, 0)
    }

    pub fn is_key(&self) -> bool {
        is_key_event(self.kind)
    }

    pub fn is_dropped(&self) -> bool {
        self.kind == EV_SYN && self.code == SYN_DROPPED
    }
}

/// Check if an event type is a key event.
pub fn is_key_event(event_type: u16) -> bool {
    event_type == EV_KEY
}

/// A non-blocking stream of input records.
pub trait EventSource {
    /// Read the next record.
    ///
    /// Returns `Ok(None)` when nothing is immediately available. That is the
    /// normal end of a drain, not an error.
    fn read_event(&mut self) -> io::Result<Option<RawEvent>>;

    /// Whether records already pulled from the kernel are still waiting.
    ///
    /// Such records do not make the descriptor readable again, so the loop
    /// has to come back for them on its own.
    fn has_pending(&self) -> bool {
        false
    }
}

/// Why draining a device stopped early
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("events were dropped by the kernel, key state is stale")]
    ResyncRequired,

    #[error("key code {0} is outside the supported range")]
    InvalidKeyCode(u16),

    #[error("device is gone: {0}")]
    DeviceDeparted(#[source] io::Error),

    #[error("read failed: {0}")]
    ReadFailed(#[source] io::Error),
}

impl IngestError {
    /// Whether the device can no longer be used and must be dropped
    pub fn is_departure(&self) -> bool {
        matches!(self, IngestError::DeviceDeparted(_))
    }

    fn from_io(err: io::Error) -> Self {
        if err.raw_os_error() == Some(libc::ENODEV) {
            IngestError::DeviceDeparted(err)
        } else {
            IngestError::ReadFailed(err)
        }
    }
}

/// Read every pending record from `source` into `state`.
///
/// Returns the number of records consumed. Any error means the global key
/// state can no longer be trusted; the caller resets it. Records after a
/// resync marker or an invalid code stay in the source for the next drain,
/// where they are applied to the freshly cleared state.
pub fn drain_events<S>(source: &mut S, state: &mut KeyState) -> Result<usize, IngestError>
where
    S: EventSource + ?Sized,
{
    let mut count = 0;
    loop {
        let event = match source.read_event() {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(count),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(IngestError::from_io(e)),
        };
        count += 1;

        if event.is_dropped() {
            return Err(IngestError::ResyncRequired);
        }

        if !event.is_key() {
            continue;
        }

        let key = Key::from(event.code);
        if !key.is_valid() {
            return Err(IngestError::InvalidKeyCode(event.code));
        }

        state.apply(key, event.value);
        log::trace!("Read {}: {}", key, event.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::MAX_KEY;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Script {
        events: VecDeque<io::Result<Option<RawEvent>>>,
    }

    impl Script {
        fn new(events: impl IntoIterator<Item = RawEvent>) -> Self {
            Self {
                events: events.into_iter().map(|e| Ok(Some(e))).collect(),
            }
        }

        fn then_error(mut self, errno: i32) -> Self {
            self.events
                .push_back(Err(io::Error::from_raw_os_error(errno)));
            self
        }
    }

    impl EventSource for Script {
        fn read_event(&mut self) -> io::Result<Option<RawEvent>> {
            self.events.pop_front().unwrap_or(Ok(None))
        }

        fn has_pending(&self) -> bool {
            !self.events.is_empty()
        }
    }

    #[test]
    fn test_is_key_event() {
        assert!(is_key_event(EV_KEY));
        assert!(!is_key_event(0x02)); // EV_REL
        assert!(!is_key_event(EV_SYN));
        assert!(!is_key_event(0x04)); // EV_MSC
    }

    #[test]
    fn test_drain_applies_presses_and_releases() {
        let mut source = Script::new([
            RawEvent::press(Key::LEFTCTRL),
            RawEvent::new(0x04, 4, 0x1d), // MSC_SCAN
            RawEvent::new(EV_SYN, 0, 0),  // SYN_REPORT
            RawEvent::press(Key::T),
            RawEvent::release(Key::T),
        ]);
        let mut state = KeyState::new();
        assert_eq!(drain_events(&mut source, &mut state).unwrap(), 5);
        assert!(state.is_pressed(Key::LEFTCTRL));
        assert!(!state.is_pressed(Key::T));
    }

    #[test]
    fn test_drain_treats_repeat_as_pressed() {
        let mut source = Script::new([RawEvent::press(Key::T), RawEvent::repeat(Key::T)]);
        let mut state = KeyState::new();
        drain_events(&mut source, &mut state).unwrap();
        assert!(state.is_pressed(Key::T));
    }

    #[test]
    fn test_drain_empty_source() {
        let mut source = Script::default();
        let mut state = KeyState::new();
        assert_eq!(drain_events(&mut source, &mut state).unwrap(), 0);
    }

    #[test]
    fn test_drain_stops_on_dropped_marker() {
        let mut source = Script::new([
            RawEvent::press(Key::LEFTCTRL),
            RawEvent::dropped(),
            RawEvent::press(Key::T),
        ]);
        let mut state = KeyState::new();
        let err = drain_events(&mut source, &mut state).unwrap_err();
        assert!(matches!(err, IngestError::ResyncRequired));
        assert!(!state.is_pressed(Key::T));
        assert!(source.has_pending());

        // The records after the marker are kept and read from scratch.
        state.reset();
        assert_eq!(drain_events(&mut source, &mut state).unwrap(), 1);
        assert!(state.is_pressed(Key::T));
        assert!(!state.is_pressed(Key::LEFTCTRL));
    }

    #[test]
    fn test_drain_rejects_out_of_range_code() {
        let mut source = Script::new([RawEvent::key(MAX_KEY, 1), RawEvent::press(Key::T)]);
        let mut state = KeyState::new();
        let err = drain_events(&mut source, &mut state).unwrap_err();
        assert!(matches!(err, IngestError::InvalidKeyCode(c) if c == MAX_KEY));
        assert!(!state.any_pressed());
        assert!(source.has_pending());
    }

    #[test]
    fn test_drain_reports_departure() {
        let mut source = Script::new([RawEvent::press(Key::T)]).then_error(libc::ENODEV);
        let mut state = KeyState::new();
        let err = drain_events(&mut source, &mut state).unwrap_err();
        assert!(err.is_departure());
    }

    #[test]
    fn test_drain_reports_other_read_errors() {
        let mut source = Script::default().then_error(libc::EIO);
        let mut state = KeyState::new();
        let err = drain_events(&mut source, &mut state).unwrap_err();
        assert!(matches!(err, IngestError::ReadFailed(_)));
        assert!(!err.is_departure());
    }

    #[test]
    fn test_drain_retries_after_interrupt() {
        let mut source = Script::default().then_error(libc::EINTR);
        source.events.push_back(Ok(Some(RawEvent::press(Key::T))));
        let mut state = KeyState::new();
        assert_eq!(drain_events(&mut source, &mut state).unwrap(), 1);
        assert!(state.is_pressed(Key::T));
    }
}
