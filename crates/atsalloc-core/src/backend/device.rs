//! Device-memory backend contract.

use std::fmt;
use std::ptr::NonNull;

use crate::error::DeviceError;

/// Identifies which accelerator's memory a backend serves.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceOrdinal(pub u32);

impl fmt::Display for DeviceOrdinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{}", self.0)
    }
}

/// Raw device-memory primitives bound to one device.
///
/// Implementations must be thread-safe on their own: the router issues
/// concurrent calls without any additional serialization.
pub trait DeviceBackend: Send + Sync {
    fn ordinal(&self) -> DeviceOrdinal;

    /// Make this device's execution context current on the calling thread.
    fn enter_context(&self);

    /// Undo one matching [`enter_context`](Self::enter_context).
    fn exit_context(&self);

    /// Allocate `num_bytes` of device memory. Requires an active context.
    fn allocate(&self, num_bytes: usize) -> Result<NonNull<u8>, DeviceError>;

    /// Free a block previously returned by [`allocate`](Self::allocate).
    ///
    /// Must return [`DeviceError::InvalidValue`] for any pointer this device
    /// did not hand out, without touching it.
    ///
    /// # Safety
    ///
    /// `ptr` must not be used after a successful free.
    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), DeviceError>;
}

/// Keeps a device context active on the current thread until dropped.
///
/// Dropping releases the context on every exit path, including unwinding out
/// of a failed backend call.
#[must_use = "the context is released as soon as the guard is dropped"]
pub struct ScopedActivation<'a> {
    device: &'a dyn DeviceBackend,
}

impl<'a> ScopedActivation<'a> {
    pub fn new(device: &'a dyn DeviceBackend) -> Self {
        device.enter_context();
        Self { device }
    }
}

impl Drop for ScopedActivation<'_> {
    fn drop(&mut self) {
        self.device.exit_context();
    }
}
