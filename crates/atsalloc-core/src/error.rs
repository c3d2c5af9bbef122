//! Backend and configuration error types.
//!
//! None of these cross the [`Allocator`](crate::Allocator) boundary: the router
//! turns allocation errors into a null result and swallows free errors after
//! logging them.

use thiserror::Error;

/// Failure reported by a device-memory backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The pointer (or size) is not something this device handed out.
    ///
    /// On free this is a routing signal rather than a failure: the pointer
    /// belongs to the host backend.
    #[error("invalid value passed to device backend")]
    InvalidValue,
    /// The device could not satisfy the request.
    #[error("device out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
    /// No execution context for this device is active on the calling thread.
    #[error("device {ordinal} context is not active on the calling thread")]
    ContextNotActive { ordinal: u32 },
    /// Opaque driver status code.
    #[error("device driver returned status {0}")]
    Driver(i32),
}

/// Failure reported by the host page-aligned backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("alignment {0} is not a power-of-two multiple of the pointer size")]
    InvalidAlignment(usize),
    #[error("posix_memalign({alignment}, {num_bytes}) failed with errno {errno}")]
    AllocationFailed {
        alignment: usize,
        num_bytes: usize,
        errno: i32,
    },
}

/// Invalid router configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse byte size from {raw:?}")]
    InvalidByteSize { var: &'static str, raw: String },
    #[error("host alignment {0} must be a power of two and a multiple of the pointer size")]
    InvalidHostAlignment(usize),
}
