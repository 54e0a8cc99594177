// Keyfire Input Layer
// Device capability checks, handles, the registry and event ingestion

mod device;
pub mod event;
mod handle;
mod registry;

pub use device::{is_key_capable, DeviceCapabilities, DeviceError};
pub use event::{drain_events, is_key_event, EventSource, IngestError, RawEvent};
pub use handle::{DeviceHandle, DeviceOpener, EvdevOpener};
pub(crate) use handle::set_nonblocking;
pub use registry::{DeviceId, DeviceRegistry};
