//! Threshold-routed allocator over a device backend and a host backend.
//!
//! Small requests (strictly below the threshold) are served from device
//! memory, everything else from page-aligned host memory. With ATS both are
//! dereferenceable from either side, so callers never see the difference.
//!
//! Backend calls run without any router-level serialization; only the stats
//! block and the ledger map are locked, each for the shortest possible scope.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::allocator::Allocator;
use crate::backend::{DeviceBackend, DeviceOrdinal, HostBackend, PageAlignedHost, ScopedActivation};
use crate::config::{FreeRouting, RouterConfig};
use crate::error::{ConfigError, DeviceError};
use crate::ledger::{AllocationLedger, LedgerEntry, Placement};
use crate::stats::{AllocatorStats, StatsTracker};

/// Name reported through [`Allocator::name`].
pub const ALLOCATOR_NAME: &str = "ats_allocator";

/// Device/host routing allocator.
pub struct AtsAllocator {
    /// Owned for the router's lifetime; never called on the routing paths.
    delegate: Box<dyn Allocator>,
    device: Arc<dyn DeviceBackend>,
    host: Arc<dyn HostBackend>,
    config: RouterConfig,
    stats: StatsTracker,
    ledger: AllocationLedger,
}

impl AtsAllocator {
    /// Router over `device` and the libc host backend with default settings
    /// apart from `threshold`.
    #[must_use]
    pub fn new(
        delegate: Box<dyn Allocator>,
        device: Arc<dyn DeviceBackend>,
        threshold: usize,
    ) -> Self {
        Self::assemble(
            delegate,
            device,
            Arc::new(PageAlignedHost),
            RouterConfig::with_threshold(threshold),
        )
    }

    /// Router with explicit backends and configuration.
    pub fn with_config(
        delegate: Box<dyn Allocator>,
        device: Arc<dyn DeviceBackend>,
        host: Arc<dyn HostBackend>,
        config: RouterConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(delegate, device, host, config))
    }

    fn assemble(
        delegate: Box<dyn Allocator>,
        device: Arc<dyn DeviceBackend>,
        host: Arc<dyn HostBackend>,
        config: RouterConfig,
    ) -> Self {
        tracing::debug!(
            device = %device.ordinal(),
            threshold = config.threshold,
            host_alignment = config.host_alignment,
            free_routing = ?config.free_routing,
            delegate = delegate.name(),
            "ats allocator created"
        );
        Self {
            delegate,
            device,
            host,
            stats: StatsTracker::new(config.bytes_limit),
            ledger: AllocationLedger::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.config.threshold
    }

    #[must_use]
    pub fn device_ordinal(&self) -> DeviceOrdinal {
        self.device.ordinal()
    }

    /// The owned delegate allocator.
    #[must_use]
    pub fn delegate(&self) -> &dyn Allocator {
        self.delegate.as_ref()
    }

    /// Number of blocks handed out and not yet freed.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.ledger.len()
    }

    /// Placement recorded for a live block, if any.
    #[must_use]
    pub fn placement_of(&self, ptr: *const u8) -> Option<Placement> {
        self.ledger.lookup(ptr as usize).map(|entry| entry.placement)
    }

    /// Backend a request of `num_bytes` is sent to.
    #[must_use]
    pub fn route(&self, num_bytes: usize) -> Placement {
        if self.config.device_path_enabled() && num_bytes < self.config.threshold {
            Placement::Device
        } else {
            Placement::Host
        }
    }

    fn allocate_device(&self, num_bytes: usize) -> Option<NonNull<u8>> {
        let _activation = ScopedActivation::new(self.device.as_ref());
        match self.device.allocate(num_bytes) {
            Ok(ptr) => Some(ptr),
            Err(error) => {
                tracing::error!(
                    device = %self.device.ordinal(),
                    num_bytes,
                    %error,
                    "device allocation failed"
                );
                None
            }
        }
    }

    fn allocate_host(&self, num_bytes: usize) -> Option<NonNull<u8>> {
        match self.host.allocate(self.config.host_alignment, num_bytes) {
            Ok(ptr) => Some(ptr),
            Err(error) => {
                tracing::warn!(num_bytes, %error, "host allocation failed");
                None
            }
        }
    }

    /// Device free under a scoped context.
    unsafe fn free_on_device(&self, ptr: NonNull<u8>) -> Result<(), DeviceError> {
        let _activation = ScopedActivation::new(self.device.as_ref());
        // SAFETY: forwarded caller contract.
        unsafe { self.device.free(ptr) }
    }

    /// Infer the owner by offering the pointer to the device first.
    unsafe fn probe_free(&self, ptr: NonNull<u8>) -> Placement {
        // SAFETY: forwarded caller contract; the device rejects foreign pointers
        // without touching them.
        match unsafe { self.free_on_device(ptr) } {
            Ok(()) => Placement::Device,
            Err(DeviceError::InvalidValue) => {
                // SAFETY: the device disowned it, so it came from the host backend.
                unsafe { self.host.free(ptr) };
                Placement::Host
            }
            Err(error) => {
                tracing::error!(
                    device = %self.device.ordinal(),
                    ptr = ?ptr.as_ptr(),
                    %error,
                    "device free failed; pointer left to the device"
                );
                Placement::Device
            }
        }
    }

    /// Release `ptr` on the owning backend and report which one took it.
    unsafe fn release(&self, ptr: NonNull<u8>, entry: Option<LedgerEntry>) -> Placement {
        match (self.config.free_routing, entry) {
            (FreeRouting::Tagged, Some(LedgerEntry { placement: Placement::Device, .. })) => {
                // SAFETY: forwarded caller contract.
                if let Err(error) = unsafe { self.free_on_device(ptr) } {
                    tracing::error!(
                        device = %self.device.ordinal(),
                        ptr = ?ptr.as_ptr(),
                        %error,
                        "device free failed for tagged device block"
                    );
                }
                Placement::Device
            }
            (FreeRouting::Tagged, Some(LedgerEntry { placement: Placement::Host, .. })) => {
                // SAFETY: the ledger says the host backend produced it.
                unsafe { self.host.free(ptr) };
                Placement::Host
            }
            // SAFETY: forwarded caller contract.
            _ => unsafe { self.probe_free(ptr) },
        }
    }
}

impl Allocator for AtsAllocator {
    fn name(&self) -> &str {
        ALLOCATOR_NAME
    }

    /// `alignment` is ignored: device blocks carry the driver's native
    /// alignment and host blocks the configured host alignment.
    fn allocate_raw(&self, alignment: usize, num_bytes: usize) -> Option<NonNull<u8>> {
        let placement = self.route(num_bytes);
        let ptr = match placement {
            Placement::Device => self.allocate_device(num_bytes),
            Placement::Host => self.allocate_host(num_bytes),
        };
        if let Some(ptr) = ptr {
            self.ledger
                .record(ptr.as_ptr() as usize, placement, num_bytes);
        }
        self.stats.record_allocation(num_bytes, ptr.is_some());
        tracing::trace!(
            alignment,
            num_bytes,
            %placement,
            ptr = ?ptr.map(NonNull::as_ptr),
            "allocate_raw"
        );
        ptr
    }

    unsafe fn deallocate_raw(&self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        // Claim the ledger entry before the backend free so a concurrent
        // allocation reusing the address cannot have its entry stolen.
        let entry = self.ledger.take(ptr.as_ptr() as usize);
        // SAFETY: forwarded caller contract.
        let freed_by = unsafe { self.release(ptr, entry) };

        match entry {
            Some(entry) => {
                if entry.placement != freed_by {
                    tracing::warn!(
                        ptr = ?ptr.as_ptr(),
                        recorded = %entry.placement,
                        %freed_by,
                        "backend inferred on free disagrees with recorded placement"
                    );
                }
                self.stats.record_deallocation(entry.size);
            }
            None => {
                tracing::warn!(
                    ptr = ?ptr.as_ptr(),
                    %freed_by,
                    "freed pointer unknown to ledger; bytes_in_use unchanged"
                );
            }
        }
        tracing::trace!(ptr = ?ptr.as_ptr(), %freed_by, "deallocate_raw");
    }

    fn get_stats(&self) -> Option<AllocatorStats> {
        Some(self.stats.snapshot())
    }

    fn clear_stats(&self) {
        self.stats.clear();
    }
}

impl Drop for AtsAllocator {
    fn drop(&mut self) {
        if !self.ledger.is_empty() {
            tracing::warn!(
                outstanding = self.ledger.len(),
                device_bytes = self.ledger.outstanding_bytes(Placement::Device),
                host_bytes = self.ledger.outstanding_bytes(Placement::Host),
                "ats allocator dropped with live allocations"
            );
        }
        tracing::debug!(delegate = self.delegate.name(), "ats allocator destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SystemAllocator;
    use crate::backend::SimulatedDevice;
    use tracing_test::traced_test;

    fn router(device: Arc<SimulatedDevice>, threshold: usize) -> AtsAllocator {
        AtsAllocator::new(Box::new(SystemAllocator), device, threshold)
    }

    #[test]
    fn route_is_strictly_below_threshold() {
        let alloc = router(Arc::new(SimulatedDevice::new(DeviceOrdinal(0))), 1024);
        assert_eq!(alloc.route(0), Placement::Device);
        assert_eq!(alloc.route(1023), Placement::Device);
        assert_eq!(alloc.route(1024), Placement::Host);
        assert_eq!(alloc.route(usize::MAX), Placement::Host);
    }

    #[test]
    fn zero_threshold_routes_everything_to_host() {
        let alloc = router(Arc::new(SimulatedDevice::new(DeviceOrdinal(0))), 0);
        assert_eq!(alloc.route(0), Placement::Host);
        assert_eq!(alloc.route(1), Placement::Host);
    }

    #[test]
    fn with_config_rejects_invalid_host_alignment() {
        let config = RouterConfig {
            host_alignment: 24,
            ..RouterConfig::default()
        };
        let result = AtsAllocator::with_config(
            Box::new(SystemAllocator),
            Arc::new(SimulatedDevice::new(DeviceOrdinal(0))),
            Arc::new(PageAlignedHost),
            config,
        );
        assert!(matches!(result, Err(ConfigError::InvalidHostAlignment(24))));
    }

    #[traced_test]
    #[test]
    fn device_failure_is_logged_and_not_retried_on_host() {
        let device = Arc::new(SimulatedDevice::with_capacity(DeviceOrdinal(3), 256));
        let alloc = router(device.clone(), 1 << 20);

        assert!(alloc.allocate_raw(64, 4096).is_none());
        assert!(logs_contain("device allocation failed"));
        assert_eq!(alloc.outstanding(), 0);

        let stats = alloc.get_stats().expect("stats");
        assert_eq!(stats.num_allocs, 1);
        assert_eq!(stats.bytes_in_use, 0);
        assert_eq!(stats.largest_alloc_size, 4096);
        assert_eq!(device.counters().failed_allocations, 1);
        assert!(!device.is_active_on_current_thread());
    }

    #[traced_test]
    #[test]
    fn unknown_pointer_free_is_logged() {
        let device = Arc::new(SimulatedDevice::new(DeviceOrdinal(0)));
        let alloc = router(device, 1024);
        let foreign = PageAlignedHost.allocate(64, 64).expect("host alloc");

        // SAFETY: the block came from the same libc host backend the router uses.
        unsafe { alloc.deallocate_raw(foreign.as_ptr()) };
        assert!(logs_contain("freed pointer unknown to ledger"));
        assert_eq!(alloc.get_stats().expect("stats").bytes_in_use, 0);
    }
}
