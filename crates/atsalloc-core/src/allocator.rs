//! Generic raw-allocator contract.

use std::ptr::NonNull;

use crate::backend::{HostBackend, PageAlignedHost};
use crate::stats::AllocatorStats;

/// Raw allocator interface shared by every allocator in the workspace.
///
/// Failures never escape as errors: allocation yields `None`, free yields nothing.
pub trait Allocator: Send + Sync {
    /// Stable identifying name.
    fn name(&self) -> &str;

    /// Allocate `num_bytes`. `alignment` is advisory; implementations document
    /// what they honour.
    fn allocate_raw(&self, alignment: usize, num_bytes: usize) -> Option<NonNull<u8>>;

    /// Release a block. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a value returned by `allocate_raw` on this same
    /// instance that has not been freed yet.
    unsafe fn deallocate_raw(&self, ptr: *mut u8);

    fn get_stats(&self) -> Option<AllocatorStats> {
        None
    }

    fn clear_stats(&self) {}
}

/// Plain libc allocator honouring the caller's alignment (raised to the
/// `posix_memalign` minimum). Keeps no statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn name(&self) -> &str {
        "system"
    }

    fn allocate_raw(&self, alignment: usize, num_bytes: usize) -> Option<NonNull<u8>> {
        let alignment = alignment
            .max(std::mem::size_of::<*const u8>())
            .checked_next_power_of_two()?;
        PageAlignedHost.allocate(alignment, num_bytes).ok()
    }

    unsafe fn deallocate_raw(&self, ptr: *mut u8) {
        if let Some(ptr) = NonNull::new(ptr) {
            // SAFETY: forwarded caller contract.
            unsafe { PageAlignedHost.free(ptr) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_allocator_rounds_alignment_up() {
        let alloc = SystemAllocator;
        let ptr = alloc.allocate_raw(48, 100).expect("alloc");
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
        // SAFETY: ptr came from this allocator.
        unsafe { alloc.deallocate_raw(ptr.as_ptr()) };
    }

    #[test]
    fn null_free_is_noop_and_no_stats() {
        let alloc = SystemAllocator;
        // SAFETY: null is always accepted.
        unsafe { alloc.deallocate_raw(std::ptr::null_mut()) };
        assert!(alloc.get_stats().is_none());
        assert_eq!(alloc.name(), "system");
    }
}
