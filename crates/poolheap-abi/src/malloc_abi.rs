//! C entry points into the process heap.
//!
//! `poolheap_init` builds the process heap from the environment. Until it has
//! succeeded every entry point falls through to the native libc heap, and
//! `poolheap_free` hands pointers the pool does not own back to libc, so
//! memory obtained before initialisation can be freed through it as well.

use std::ffi::{c_int, c_void};

use poolheap_arena::{FreeOutcome, HeapConfig};

use crate::bootstrap::{InstallError, init_process_heap, process_heap};
use crate::native::NativeHeap;

#[inline]
fn set_errno(code: c_int) {
    // SAFETY: `__errno_location` returns the calling thread's errno slot.
    unsafe { *libc::__errno_location() = code };
}

/// Reserve the backing pool and build the process heap.
///
/// Returns 0 on success, `EEXIST` if the heap already exists and `ENOMEM` if
/// the backing pool could not be reserved.
#[unsafe(no_mangle)]
pub extern "C" fn poolheap_init() -> c_int {
    match init_process_heap(&HeapConfig::from_env()) {
        Ok(_) => 0,
        Err(InstallError::AlreadyInstalled) => libc::EEXIST,
        Err(InstallError::Pool(_)) => libc::ENOMEM,
    }
}

/// Allocate `size` bytes aligned to 16. Null (with `ENOMEM`) on exhaustion.
#[unsafe(no_mangle)]
pub extern "C" fn poolheap_malloc(size: usize) -> *mut c_void {
    let Some(heap) = process_heap() else {
        return NativeHeap.allocate(size).cast();
    };
    let out = heap.allocate(size);
    if out.is_null() {
        set_errno(libc::ENOMEM);
    }
    out.cast()
}

/// Allocate `size` bytes aligned to `alignment`, which must be a power of two
/// (`EINVAL` otherwise). Null (with `ENOMEM`) on exhaustion.
#[unsafe(no_mangle)]
pub extern "C" fn poolheap_memalign(alignment: usize, size: usize) -> *mut c_void {
    if !alignment.is_power_of_two() {
        set_errno(libc::EINVAL);
        return std::ptr::null_mut();
    }
    let out = match process_heap() {
        Some(heap) => heap.allocate_aligned(size, alignment),
        None => NativeHeap.allocate_aligned(size, alignment),
    };
    if out.is_null() {
        set_errno(libc::ENOMEM);
    }
    out.cast()
}

/// Release `ptr`. Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from `poolheap_malloc`,
/// `poolheap_memalign` or the native heap.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn poolheap_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    let ptr = ptr.cast::<u8>();
    let outcome = match process_heap() {
        Some(heap) => heap.free(ptr),
        None => FreeOutcome::ForeignPointer,
    };
    if outcome == FreeOutcome::ForeignPointer {
        NativeHeap.free(ptr);
    }
}
