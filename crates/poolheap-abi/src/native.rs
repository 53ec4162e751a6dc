//! The platform's default heap.
//!
//! Serves C callers before the pool heap exists, takes back pointers that the
//! pool heap does not own, and is the baseline the benchmark driver compares
//! against.

use std::ffi::c_void;
use std::ptr;

/// libc `malloc`/`posix_memalign`/`free`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeHeap;

impl NativeHeap {
    pub fn allocate(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc has no preconditions.
        unsafe { libc::malloc(size.max(1)) }.cast()
    }

    /// Null for a non power-of-two alignment, like the pool heap.
    pub fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
        if !align.is_power_of_two() {
            return ptr::null_mut();
        }
        let align = align.max(size_of::<*mut c_void>());
        let mut out: *mut c_void = ptr::null_mut();
        // SAFETY: `out` is a valid out-parameter and `align` is a power of two
        // multiple of the pointer size.
        let rc = unsafe { libc::posix_memalign(&mut out, align, size.max(1)) };
        if rc != 0 { ptr::null_mut() } else { out.cast() }
    }

    /// Release `ptr`. Null is a no-op.
    ///
    /// `ptr` must come from [`NativeHeap`] (or libc directly) and must not
    /// have been freed, as with C `free`.
    pub fn free(&self, ptr: *mut u8) {
        // SAFETY: caller contract above.
        unsafe { libc::free(ptr.cast()) }
    }
}
