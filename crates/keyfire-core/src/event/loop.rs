// Keyfire Event Loop
// Readiness-driven loop tying devices, hotplug, shortcuts and the launcher

use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::hotplug::{HotplugError, HotplugEvent, HotplugSource};
use crate::input::{drain_events, DeviceHandle, DeviceId, DeviceOpener, DeviceRegistry, IngestError};
use crate::output::CommandSink;
use crate::shortcut::{Shortcut, ShortcutMatcher};
use crate::state::KeyState;
use crate::Key;

/// Default bound on a single wait
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result type for event loop operations
pub type EventLoopResult<T> = Result<T, EventLoopError>;

/// Errors that end the event loop
#[derive(Debug, thiserror::Error)]
pub enum EventLoopError {
    #[error("no keyboard devices available")]
    NoDevicesAvailable,

    #[error("no shortcuts loaded")]
    NoShortcutsLoaded,

    #[error(transparent)]
    HotplugUnavailable(#[from] HotplugError),

    #[error("waiting for input failed: {0}")]
    Wait(#[source] io::Error),
}

/// Immutable loop settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Longest single wait; when it elapses the key state is cleared
    pub wait_timeout: Duration,
    /// Print the pressed keys after every batch of input
    pub print_keys: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            print_keys: false,
        }
    }
}

/// Lifecycle of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum LoopState {
    Starting,
    Running,
    Stopping,
    Terminated,
}

/// What one wait observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Nothing happened within the wait timeout
    Timeout,
    /// A signal arrived during the wait, or the wakeup stream fired
    Interrupted,
    /// Some sources have data
    Ready {
        /// Ready devices, in registration order
        devices: Vec<DeviceId>,
        /// The hotplug channel has a pending notification
        hotplug: bool,
    },
}

/// What one dispatched cycle did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Input records consumed
    pub events: usize,
    /// The key state was cleared
    pub reset: bool,
    /// Shortcuts were evaluated (not skipped)
    pub evaluated: bool,
    /// Commands handed to the sink
    pub launched: Vec<String>,
    /// Devices opened from hotplug notifications
    pub added: Vec<DeviceId>,
    /// Devices closed, by notification or departure
    pub removed: Vec<DeviceId>,
}

/// Device summary for `--list-devices`
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub path: PathBuf,
    /// Device name, when the node could be opened
    pub name: Option<String>,
    /// Whether the device passed the key capability check
    pub key_capable: bool,
}

/// Enumerate keyboards and describe each one.
pub fn list_devices<H: HotplugSource>(hotplug: &mut H) -> EventLoopResult<Vec<DeviceInfo>> {
    let candidates = hotplug.enumerate()?;
    Ok(candidates
        .into_iter()
        .map(|(id, path)| {
            let (name, key_capable) = match DeviceHandle::open(&path) {
                Ok(handle) => (Some(handle.name().to_string()), true),
                Err(e) => {
                    log::debug!("{}", e);
                    (None, false)
                }
            };
            DeviceInfo {
                id,
                path,
                name,
                key_capable,
            }
        })
        .collect())
}

/// The daemon's main loop.
///
/// Owns the open devices, the hotplug source, the global key state and the
/// shortcut table. Each cycle waits on every device plus the hotplug
/// channel, ingests ready devices, evaluates shortcuts and then consumes at
/// most one hotplug notification.
pub struct EventLoop<O, H, S>
where
    O: DeviceOpener,
    H: HotplugSource,
    S: CommandSink,
{
    config: LoopConfig,
    state: LoopState,
    registry: DeviceRegistry<O>,
    hotplug: H,
    hotplug_live: bool,
    sink: S,
    matcher: ShortcutMatcher,
    keys: KeyState,
    wake: Option<UnixStream>,
    poll_fds: Vec<libc::pollfd>,
    poll_ids: Vec<DeviceId>,
    hotplug_slot: Option<usize>,
    wake_slot: Option<usize>,
}

impl<O, H, S> EventLoop<O, H, S>
where
    O: DeviceOpener,
    H: HotplugSource,
    S: CommandSink,
{
    /// Enumerate and open devices.
    ///
    /// Fails when there is nothing to do: no shortcuts, or no device that
    /// opened and validated.
    pub fn start(
        config: LoopConfig,
        opener: O,
        mut hotplug: H,
        sink: S,
        shortcuts: Vec<Shortcut>,
    ) -> EventLoopResult<Self> {
        log::debug!("Event loop {}", LoopState::Starting);
        if shortcuts.is_empty() {
            return Err(EventLoopError::NoShortcutsLoaded);
        }
        let matcher = ShortcutMatcher::new(shortcuts);

        let candidates = hotplug.enumerate()?;
        let mut registry = DeviceRegistry::new(opener);
        let opened = registry.open_all(candidates.iter().cloned());
        for (id, _) in &candidates {
            if !opened.contains(id) {
                hotplug.forget(id);
            }
        }
        if registry.is_empty() {
            return Err(EventLoopError::NoDevicesAvailable);
        }

        let hotplug_live = hotplug.raw_fd().is_some();
        log::info!(
            "Watching {} device(s) for {} shortcut(s)",
            registry.len(),
            matcher.len()
        );

        Ok(Self {
            config,
            state: LoopState::Running,
            registry,
            hotplug,
            hotplug_live,
            sink,
            matcher,
            keys: KeyState::new(),
            wake: None,
            poll_fds: Vec::new(),
            poll_ids: Vec::new(),
            hotplug_slot: None,
            wake_slot: None,
        })
    }

    /// End the wait early whenever `wake` becomes readable.
    ///
    /// Its peer is meant to be written from a signal handler. A signal that
    /// lands between the shutdown check and the wait still leaves a byte
    /// behind, so the wait returns at once instead of running to its timeout.
    pub fn watch_wakeups(&mut self, wake: UnixStream) -> io::Result<()> {
        wake.set_nonblocking(true)?;
        self.wake = Some(wake);
        Ok(())
    }

    /// Run until `shutdown` is set or the wait fails, then stop.
    pub fn run(&mut self, shutdown: &AtomicBool) -> EventLoopResult<()> {
        let result = self.run_until(shutdown);
        self.stop();
        result
    }

    fn run_until(&mut self, shutdown: &AtomicBool) -> EventLoopResult<()> {
        while !shutdown.load(Ordering::SeqCst) && self.state == LoopState::Running {
            let readiness = self.wait()?;
            self.dispatch(readiness);
        }
        Ok(())
    }

    /// Block until a source is ready, the timeout elapses or a signal lands.
    ///
    /// The wait set is rebuilt from the registry every call, so a device
    /// removed in the previous cycle is never waited on. Devices still
    /// holding records from an aborted drain count as ready without waiting.
    pub fn wait(&mut self) -> EventLoopResult<Readiness> {
        self.rebuild_poll_set();
        let buffered: Vec<DeviceId> = self.registry.buffered().cloned().collect();

        let timeout_ms = if buffered.is_empty() {
            i32::try_from(self.config.wait_timeout.as_millis()).unwrap_or(i32::MAX)
        } else {
            0
        };
        // SAFETY: poll_fds is a live, correctly sized pollfd array.
        let ready = unsafe {
            libc::poll(
                self.poll_fds.as_mut_ptr(),
                self.poll_fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Readiness::Interrupted);
            }
            return Err(EventLoopError::Wait(err));
        }
        if ready == 0 && buffered.is_empty() {
            return Ok(Readiness::Timeout);
        }

        if let Some(pfd) = self.slot(self.wake_slot) {
            if pfd.revents != 0 {
                self.drain_wakeups();
                return Ok(Readiness::Interrupted);
            }
        }

        let devices = self
            .poll_ids
            .iter()
            .zip(&self.poll_fds)
            .filter(|(id, pfd)| {
                pfd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0
                    || buffered.contains(*id)
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut hotplug = false;
        if let Some(pfd) = self.slot(self.hotplug_slot) {
            if pfd.revents & libc::POLLIN != 0 {
                hotplug = true;
            } else if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                log::warn!("Hotplug channel broke, no longer watching for new devices");
                self.hotplug_live = false;
            }
        }

        Ok(Readiness::Ready { devices, hotplug })
    }

    fn rebuild_poll_set(&mut self) {
        self.poll_fds.clear();
        self.poll_ids.clear();
        self.hotplug_slot = None;
        self.wake_slot = None;
        for (id, fd) in self.registry.raw_fds() {
            self.poll_ids.push(id.clone());
            self.poll_fds.push(libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }
        if let Some(fd) = self.hotplug.raw_fd().filter(|_| self.hotplug_live) {
            self.hotplug_slot = Some(self.poll_fds.len());
            self.poll_fds.push(libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }
        if let Some(wake) = &self.wake {
            self.wake_slot = Some(self.poll_fds.len());
            self.poll_fds.push(libc::pollfd {
                fd: wake.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
        }
    }

    fn slot(&self, slot: Option<usize>) -> Option<libc::pollfd> {
        slot.and_then(|i| self.poll_fds.get(i)).copied()
    }

    /// Empty the wakeup stream; a closed peer stops it being watched
    fn drain_wakeups(&mut self) {
        let Some(wake) = self.wake.as_mut() else {
            return;
        };
        let mut buf = [0u8; 32];
        let closed = loop {
            match wake.read(&mut buf) {
                Ok(0) => break true,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break false,
                Err(e) => {
                    log::warn!("Wakeup stream failed: {}", e);
                    break true;
                }
            }
        };
        if closed {
            self.wake = None;
        }
    }

    /// Act on one wait result
    pub fn dispatch(&mut self, readiness: Readiness) -> CycleReport {
        let mut report = CycleReport::default();
        match readiness {
            Readiness::Interrupted => {}
            Readiness::Timeout => {
                if self.keys.any_pressed() {
                    log::debug!("Idle for {:?}, clearing key state", self.config.wait_timeout);
                }
                self.reset_keys(&mut report);
            }
            Readiness::Ready { devices, hotplug } => {
                if !devices.is_empty() {
                    self.ingest(&devices, &mut report);
                    self.evaluate(&mut report);
                }
                if hotplug {
                    self.service_hotplug(&mut report);
                }
            }
        }
        report
    }

    fn ingest(&mut self, devices: &[DeviceId], report: &mut CycleReport) {
        for id in devices {
            let Some(device) = self.registry.get_mut(id) else {
                continue;
            };
            match drain_events(device, &mut self.keys) {
                Ok(count) => report.events += count,
                Err(e) => {
                    match &e {
                        IngestError::ResyncRequired => log::debug!("{}: {}", id, e),
                        IngestError::InvalidKeyCode(_) => log::warn!("{}: {}", id, e),
                        IngestError::DeviceDeparted(_) | IngestError::ReadFailed(_) => {
                            log::warn!("{}: {}", id, e)
                        }
                    }
                    if e.is_departure() {
                        self.registry.remove(id);
                        self.hotplug.forget(id);
                        report.removed.push(id.clone());
                    }
                    self.reset_keys(report);
                }
            }
        }

        if self.config.print_keys {
            let names: Vec<&str> = self.keys.pressed_keys().map(Key::name).collect();
            println!("{}", names.join(" "));
        }
    }

    fn evaluate(&mut self, report: &mut CycleReport) {
        if !self.matcher.needs_scan(&self.keys) {
            return;
        }
        report.evaluated = true;
        for command in self.matcher.evaluate(&self.keys) {
            match self.sink.launch(command) {
                Ok(()) => report.launched.push(command.to_string()),
                Err(e) => log::error!("{}", e),
            }
        }
    }

    fn service_hotplug(&mut self, report: &mut CycleReport) {
        let changed = match self.hotplug.poll() {
            HotplugEvent::Added(id, path) => match self.registry.add(id.clone(), &path) {
                Ok(added) => {
                    if added {
                        report.added.push(id);
                    }
                    added
                }
                Err(_) => {
                    self.hotplug.forget(&id);
                    false
                }
            },
            HotplugEvent::Removed(id) => {
                let removed = self.registry.remove(&id);
                if removed {
                    report.removed.push(id);
                }
                removed
            }
            HotplugEvent::NoOp => false,
            HotplugEvent::Unavailable => {
                log::warn!("Hotplug channel unavailable, no longer watching for new devices");
                self.hotplug_live = false;
                false
            }
        };

        if changed {
            if self.registry.is_empty() {
                log::warn!("No keyboards left, waiting for one to be plugged in");
            }
            self.reset_keys(report);
        }
    }

    /// Clear every pressed key and every active shortcut
    fn reset_keys(&mut self, report: &mut CycleReport) {
        self.keys.reset();
        self.matcher.reset();
        report.reset = true;
    }

    /// Close every device and finish.
    pub fn stop(&mut self) {
        if self.state == LoopState::Terminated {
            return;
        }
        self.state = LoopState::Stopping;
        log::debug!("Event loop {}", self.state);
        self.registry.close_all();
        self.state = LoopState::Terminated;
        log::info!("Stopped");
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn key_state(&self) -> &KeyState {
        &self.keys
    }

    pub fn matcher(&self) -> &ShortcutMatcher {
        &self.matcher
    }

    pub fn registry(&self) -> &DeviceRegistry<O> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry<O> {
        &mut self.registry
    }

    pub fn hotplug(&self) -> &H {
        &self.hotplug
    }

    pub fn hotplug_mut(&mut self) -> &mut H {
        &mut self.hotplug
    }

    /// Whether hotplug notifications are still being waited on
    pub fn watching_hotplug(&self) -> bool {
        self.hotplug_live
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{DeviceError, EventSource, RawEvent};
    use crate::output::RecordingSink;
    use std::collections::VecDeque;
    use std::os::unix::io::{AsRawFd, RawFd};
    use std::path::Path;

    /// Device backed by a pipe so the real wait can see it.
    struct PipeDevice {
        read: RawFd,
        write: RawFd,
        script: VecDeque<RawEvent>,
    }

    impl PipeDevice {
        fn new() -> Self {
            let mut fds = [0; 2];
            assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
            Self {
                read: fds[0],
                write: fds[1],
                script: VecDeque::new(),
            }
        }
    }

    impl EventSource for PipeDevice {
        fn read_event(&mut self) -> io::Result<Option<RawEvent>> {
            Ok(self.script.pop_front())
        }

        fn has_pending(&self) -> bool {
            !self.script.is_empty()
        }
    }

    impl AsRawFd for PipeDevice {
        fn as_raw_fd(&self) -> RawFd {
            self.read
        }
    }

    impl Drop for PipeDevice {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.read);
                libc::close(self.write);
            }
        }
    }

    struct PipeOpener;

    impl DeviceOpener for PipeOpener {
        type Device = PipeDevice;

        fn open(&mut self, _path: &Path) -> Result<PipeDevice, DeviceError> {
            Ok(PipeDevice::new())
        }
    }

    /// Fixed enumeration, no notifications
    struct StaticHotplug(Vec<(DeviceId, PathBuf)>);

    impl HotplugSource for StaticHotplug {
        fn enumerate(&mut self) -> Result<Vec<(DeviceId, PathBuf)>, HotplugError> {
            Ok(self.0.clone())
        }

        fn poll(&mut self) -> HotplugEvent {
            HotplugEvent::NoOp
        }

        fn forget(&mut self, _id: &DeviceId) {}

        fn raw_fd(&self) -> Option<RawFd> {
            None
        }
    }

    fn keyboard() -> StaticHotplug {
        StaticHotplug(vec![(DeviceId::from("/kbd"), PathBuf::from("/dev/input/event0"))])
    }

    fn terminal_shortcut() -> Vec<Shortcut> {
        vec![Shortcut::new([Key::LEFTCTRL, Key::LEFTALT, Key::T], "launch-terminal").unwrap()]
    }

    fn start(timeout: Duration) -> EventLoop<PipeOpener, StaticHotplug, RecordingSink> {
        let config = LoopConfig {
            wait_timeout: timeout,
            print_keys: false,
        };
        EventLoop::start(config, PipeOpener, keyboard(), RecordingSink::new(), terminal_shortcut())
            .unwrap()
    }

    #[test]
    fn test_start_requires_shortcuts() {
        let err = EventLoop::start(
            LoopConfig::default(),
            PipeOpener,
            keyboard(),
            RecordingSink::new(),
            Vec::new(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EventLoopError::NoShortcutsLoaded));
    }

    #[test]
    fn test_start_requires_devices() {
        let err = EventLoop::start(
            LoopConfig::default(),
            PipeOpener,
            StaticHotplug(Vec::new()),
            RecordingSink::new(),
            terminal_shortcut(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EventLoopError::NoDevicesAvailable));
    }

    #[test]
    fn test_wait_times_out() {
        let mut event_loop = start(Duration::from_millis(10));
        assert_eq!(event_loop.state(), LoopState::Running);
        assert_eq!(event_loop.wait().unwrap(), Readiness::Timeout);
    }

    #[test]
    fn test_wait_reports_ready_device() {
        let mut event_loop = start(Duration::from_secs(5));
        let id = DeviceId::from("/kbd");
        let write = event_loop.registry_mut().get_mut(&id).unwrap().write;
        assert_eq!(unsafe { libc::write(write, b"x".as_ptr().cast(), 1) }, 1);

        assert_eq!(
            event_loop.wait().unwrap(),
            Readiness::Ready {
                devices: vec![id],
                hotplug: false,
            }
        );
    }

    #[test]
    fn test_wait_returns_buffered_device_at_once() {
        let mut event_loop = start(Duration::from_secs(30));
        let id = DeviceId::from("/kbd");
        event_loop
            .registry_mut()
            .get_mut(&id)
            .unwrap()
            .script
            .extend([RawEvent::press(Key::LEFTCTRL), RawEvent::press(Key::LEFTALT)]);

        let started = std::time::Instant::now();
        assert_eq!(
            event_loop.wait().unwrap(),
            Readiness::Ready {
                devices: vec![id],
                hotplug: false,
            }
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wakeup_ends_the_wait() {
        let mut event_loop = start(Duration::from_millis(50));
        let (wake, mut signal) = UnixStream::pair().unwrap();
        event_loop.watch_wakeups(wake).unwrap();

        std::io::Write::write_all(&mut signal, &[1, 1]).unwrap();
        assert_eq!(event_loop.wait().unwrap(), Readiness::Interrupted);
        // Drained, so the next wait runs to its timeout.
        assert_eq!(event_loop.wait().unwrap(), Readiness::Timeout);

        drop(signal);
        assert_eq!(event_loop.wait().unwrap(), Readiness::Interrupted);
        assert_eq!(event_loop.wait().unwrap(), Readiness::Timeout);
    }

    #[test]
    fn test_timeout_clears_keys() {
        let mut event_loop = start(Duration::from_millis(10));
        let id = DeviceId::from("/kbd");
        event_loop
            .registry_mut()
            .get_mut(&id)
            .unwrap()
            .script
            .extend([RawEvent::press(Key::LEFTCTRL), RawEvent::press(Key::LEFTALT)]);
        event_loop.dispatch(Readiness::Ready {
            devices: vec![id.clone()],
            hotplug: false,
        });
        assert_eq!(event_loop.key_state().pressed_count(), 2);

        let report = event_loop.dispatch(Readiness::Timeout);
        assert!(report.reset);
        assert!(report.launched.is_empty());
        assert!(!event_loop.key_state().any_pressed());
    }

    #[test]
    fn test_interrupted_changes_nothing() {
        let mut event_loop = start(Duration::from_millis(10));
        let id = DeviceId::from("/kbd");
        event_loop
            .registry_mut()
            .get_mut(&id)
            .unwrap()
            .script
            .push_back(RawEvent::press(Key::LEFTCTRL));
        event_loop.dispatch(Readiness::Ready {
            devices: vec![id],
            hotplug: false,
        });

        let report = event_loop.dispatch(Readiness::Interrupted);
        assert_eq!(report, CycleReport::default());
        assert!(event_loop.key_state().is_pressed(Key::LEFTCTRL));
    }

    #[test]
    fn test_run_stops_when_flag_cleared() {
        let mut event_loop = start(Duration::from_millis(10));
        let shutdown = AtomicBool::new(true);
        event_loop.run(&shutdown).unwrap();
        assert_eq!(event_loop.state(), LoopState::Terminated);
        assert!(event_loop.registry().is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LoopState::Running.to_string(), "Running");
        assert_eq!(LoopState::Terminated.to_string(), "Terminated");
    }
}
