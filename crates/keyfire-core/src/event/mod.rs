// Keyfire Event Handling
// The daemon's readiness loop

pub mod r#loop;

pub use r#loop::{
    list_devices, CycleReport, DeviceInfo, EventLoop, EventLoopError, EventLoopResult, LoopConfig,
    LoopState, Readiness, DEFAULT_WAIT_TIMEOUT,
};
