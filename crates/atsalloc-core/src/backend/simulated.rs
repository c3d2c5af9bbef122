//! In-process stand-in for an accelerator driver.
//!
//! "Device memory" is carved from the process heap, but every block is
//! registered so the device can reject pointers it never handed out, exactly
//! like a driver returning an invalid-value status. Context activation is
//! tracked per thread and enforced on every call.

use std::alloc::Layout;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use super::device::{DeviceBackend, DeviceOrdinal};
use crate::error::DeviceError;

/// Alignment of simulated device blocks (the usual driver allocation granularity).
pub const DEVICE_ALLOC_ALIGNMENT: usize = 256;

/// Source of per-instance context keys. Ordinals can repeat across instances.
static NEXT_CONTEXT_KEY: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Stack of device context keys current on this thread.
    static ACTIVE_CONTEXTS: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

struct Residency {
    blocks: HashMap<usize, Layout>,
    bytes: usize,
}

/// Counter snapshot for a [`SimulatedDevice`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SimulatedDeviceCounters {
    pub allocations: u64,
    pub failed_allocations: u64,
    pub frees: u64,
    pub rejected_frees: u64,
    pub activations: u64,
    pub resident_blocks: usize,
    pub resident_bytes: usize,
}

/// Heap-backed device with optional capacity limit.
pub struct SimulatedDevice {
    ordinal: DeviceOrdinal,
    context_key: u64,
    capacity: Option<usize>,
    residency: Mutex<Residency>,
    allocations: AtomicU64,
    failed_allocations: AtomicU64,
    frees: AtomicU64,
    rejected_frees: AtomicU64,
    activations: AtomicU64,
}

impl SimulatedDevice {
    /// Unlimited device.
    #[must_use]
    pub fn new(ordinal: DeviceOrdinal) -> Self {
        Self::build(ordinal, None)
    }

    /// Device that refuses to hold more than `capacity` bytes at once.
    #[must_use]
    pub fn with_capacity(ordinal: DeviceOrdinal, capacity: usize) -> Self {
        Self::build(ordinal, Some(capacity))
    }

    fn build(ordinal: DeviceOrdinal, capacity: Option<usize>) -> Self {
        Self {
            ordinal,
            context_key: NEXT_CONTEXT_KEY.fetch_add(1, Ordering::Relaxed),
            capacity,
            residency: Mutex::new(Residency {
                blocks: HashMap::new(),
                bytes: 0,
            }),
            allocations: AtomicU64::new(0),
            failed_allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            rejected_frees: AtomicU64::new(0),
            activations: AtomicU64::new(0),
        }
    }

    /// True if `ptr` is a live block on this device.
    #[must_use]
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.residency.lock().blocks.contains_key(&(ptr as usize))
    }

    /// True if this device's context is current on the calling thread.
    #[must_use]
    pub fn is_active_on_current_thread(&self) -> bool {
        let key = self.context_key;
        ACTIVE_CONTEXTS.with(|stack| stack.borrow().last() == Some(&key))
    }

    #[must_use]
    pub fn counters(&self) -> SimulatedDeviceCounters {
        let (resident_blocks, resident_bytes) = {
            let residency = self.residency.lock();
            (residency.blocks.len(), residency.bytes)
        };
        SimulatedDeviceCounters {
            allocations: self.allocations.load(Ordering::Relaxed),
            failed_allocations: self.failed_allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            rejected_frees: self.rejected_frees.load(Ordering::Relaxed),
            activations: self.activations.load(Ordering::Relaxed),
            resident_blocks,
            resident_bytes,
        }
    }

    fn require_context(&self) -> Result<(), DeviceError> {
        if self.is_active_on_current_thread() {
            Ok(())
        } else {
            Err(DeviceError::ContextNotActive {
                ordinal: self.ordinal.0,
            })
        }
    }

    fn fail(&self, err: DeviceError) -> Result<NonNull<u8>, DeviceError> {
        self.failed_allocations.fetch_add(1, Ordering::Relaxed);
        Err(err)
    }
}

impl DeviceBackend for SimulatedDevice {
    fn ordinal(&self) -> DeviceOrdinal {
        self.ordinal
    }

    fn enter_context(&self) {
        self.activations.fetch_add(1, Ordering::Relaxed);
        ACTIVE_CONTEXTS.with(|stack| stack.borrow_mut().push(self.context_key));
    }

    fn exit_context(&self) {
        let key = self.context_key;
        ACTIVE_CONTEXTS.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|&k| k == key) {
                stack.remove(pos);
            }
        });
    }

    fn allocate(&self, num_bytes: usize) -> Result<NonNull<u8>, DeviceError> {
        if let Err(err) = self.require_context() {
            return self.fail(err);
        }
        if num_bytes == 0 {
            return self.fail(DeviceError::InvalidValue);
        }
        let Ok(layout) = Layout::from_size_align(num_bytes, DEVICE_ALLOC_ALIGNMENT) else {
            return self.fail(DeviceError::InvalidValue);
        };

        let mut residency = self.residency.lock();
        if let Some(capacity) = self.capacity {
            let available = capacity.saturating_sub(residency.bytes);
            if num_bytes > available {
                drop(residency);
                return self.fail(DeviceError::OutOfMemory {
                    requested: num_bytes,
                    available,
                });
            }
        }

        // SAFETY: layout has non-zero size.
        let raw = unsafe { std::alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            drop(residency);
            return self.fail(DeviceError::OutOfMemory {
                requested: num_bytes,
                available: 0,
            });
        };
        residency.blocks.insert(ptr.as_ptr() as usize, layout);
        residency.bytes += num_bytes;
        drop(residency);

        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), DeviceError> {
        self.require_context()?;
        let layout = {
            let mut residency = self.residency.lock();
            let Some(layout) = residency.blocks.remove(&(ptr.as_ptr() as usize)) else {
                drop(residency);
                self.rejected_frees.fetch_add(1, Ordering::Relaxed);
                return Err(DeviceError::InvalidValue);
            };
            residency.bytes -= layout.size();
            layout
        };
        // SAFETY: the block was allocated above with this exact layout and has
        // just been removed from the registry, so it is freed once.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        self.frees.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        let residency = self.residency.get_mut();
        for (addr, layout) in residency.blocks.drain() {
            // SAFETY: every registered block came from std::alloc with `layout`.
            unsafe { std::alloc::dealloc(addr as *mut u8, layout) };
        }
        residency.bytes = 0;
    }
}
