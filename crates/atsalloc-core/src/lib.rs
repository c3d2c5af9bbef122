//! atsalloc core crate.
//!
//! A dual-backend raw allocator for shared-virtual-memory (ATS) systems, where
//! host and accelerator dereference the same addresses. Each request is routed
//! by size: small requests land in device memory, large ones in page-aligned
//! host memory. Statistics are kept in one lock-protected block.
//!
//! The device driver and the host allocator sit behind the [`DeviceBackend`]
//! and [`HostBackend`] traits. [`SimulatedDevice`] provides a heap-backed
//! device for hosts without an accelerator.

pub mod allocator;
pub mod backend;
pub mod config;
pub mod error;
pub mod ledger;
pub mod router;
pub mod stats;

pub use allocator::{Allocator, SystemAllocator};
pub use backend::{
    DeviceBackend, DeviceOrdinal, HostBackend, PageAlignedHost, ScopedActivation, SimulatedDevice,
    SimulatedDeviceCounters, page_size,
};
pub use config::{DEFAULT_THRESHOLD, FreeRouting, RouterConfig};
pub use error::{ConfigError, DeviceError, HostError};
pub use ledger::{AllocationLedger, LedgerEntry, Placement};
pub use router::{ALLOCATOR_NAME, AtsAllocator};
pub use stats::{AllocatorStats, StatsTracker};
