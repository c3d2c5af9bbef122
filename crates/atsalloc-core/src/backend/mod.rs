//! Memory backends the router dispatches to.

mod device;
mod host;
mod simulated;

pub use device::{DeviceBackend, DeviceOrdinal, ScopedActivation};
pub(crate) use host::is_valid_host_alignment;
pub use host::{HostBackend, PageAlignedHost, page_size};
pub use simulated::{DEVICE_ALLOC_ALIGNMENT, SimulatedDevice, SimulatedDeviceCounters};
