//! Page-aligned host memory via `posix_memalign`.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::OnceLock;

use crate::error::HostError;

const FALLBACK_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// System page size, queried once.
#[must_use]
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf has no memory-safety preconditions.
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if raw > 0 {
            raw as usize
        } else {
            FALLBACK_PAGE_SIZE
        }
    })
}

/// `posix_memalign` requires a power of two that is a multiple of `sizeof(void*)`.
pub(crate) fn is_valid_host_alignment(alignment: usize) -> bool {
    alignment.is_power_of_two() && alignment % std::mem::size_of::<*const c_void>() == 0
}

/// Host-side allocation primitives.
pub trait HostBackend: Send + Sync {
    fn allocate(&self, alignment: usize, num_bytes: usize) -> Result<NonNull<u8>, HostError>;

    /// # Safety
    ///
    /// `ptr` must come from [`allocate`](Self::allocate) on this backend and
    /// must not have been freed already.
    unsafe fn free(&self, ptr: NonNull<u8>);
}

/// libc-backed host allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageAlignedHost;

impl HostBackend for PageAlignedHost {
    fn allocate(&self, alignment: usize, num_bytes: usize) -> Result<NonNull<u8>, HostError> {
        if !is_valid_host_alignment(alignment) {
            return Err(HostError::InvalidAlignment(alignment));
        }
        let mut out: *mut c_void = std::ptr::null_mut();
        // SAFETY: `out` is a valid out-pointer and alignment satisfies the
        // posix_memalign contract.
        let errno = unsafe { libc::posix_memalign(&mut out, alignment, num_bytes) };
        if errno != 0 {
            return Err(HostError::AllocationFailed {
                alignment,
                num_bytes,
                errno,
            });
        }
        // posix_memalign(0) may legally return null.
        NonNull::new(out.cast::<u8>()).ok_or(HostError::AllocationFailed {
            alignment,
            num_bytes,
            errno: 0,
        })
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        // SAFETY: caller guarantees `ptr` came from posix_memalign above.
        unsafe { libc::free(ptr.as_ptr().cast::<c_void>()) };
    }
}
