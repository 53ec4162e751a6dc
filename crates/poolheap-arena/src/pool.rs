//! Backing pool acquisition.
//!
//! The pool is a single contiguous block carved once out of the platform's
//! secondary memory manager. It is never resized and, for the process heap,
//! never returned. A [`PoolSource`] models that manager: a capacity query
//! at a fixed alignment and a one-shot whole-block allocation.

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;

use thiserror::Error;

/// Alignment requested for the whole pool block (one cache line).
pub const POOL_ALIGN: usize = 64;

/// Releases a block previously handed out by a [`PoolSource`].
pub type ReleaseFn = unsafe fn(base: NonNull<u8>, size: usize, align: usize);

/// Failure to reserve the backing pool. Fatal for a process heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("pool alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    #[error("platform reports no allocatable memory for the backing pool")]
    NoCapacity,
    #[error("platform refused a {size}-byte pool block at alignment {align}")]
    AllocationFailed { size: usize, align: usize },
}

/// Platform secondary memory manager.
pub trait PoolSource {
    /// Largest block the source can hand out at `align`.
    fn allocatable_size(&self, align: usize) -> usize;

    /// Allocate one block of exactly `size` bytes aligned to `align`.
    fn allocate_block(&mut self, size: usize, align: usize) -> Option<NonNull<u8>>;

    /// How to give a block back, if the source supports it.
    fn release_fn(&self) -> Option<ReleaseFn> {
        None
    }
}

/// The reserved arena: `{ base, capacity }`, immutable after creation.
#[derive(Debug)]
pub struct BackingPool {
    base: NonNull<u8>,
    capacity: usize,
    align: usize,
    release: Option<ReleaseFn>,
}

// SAFETY: the pool is a plain address range. All mutation of the memory it
// covers is serialized by the owner of the grower.
unsafe impl Send for BackingPool {}
// SAFETY: `BackingPool` exposes no interior mutability.
unsafe impl Sync for BackingPool {}

impl BackingPool {
    /// Wrap an externally reserved block.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `capacity` bytes for the
    /// lifetime of the returned pool and must not be used by anyone else.
    /// If `release` is provided it must accept `(base, capacity, align)` exactly once.
    #[must_use]
    pub unsafe fn from_raw_parts(
        base: NonNull<u8>,
        capacity: usize,
        align: usize,
        release: Option<ReleaseFn>,
    ) -> Self {
        Self {
            base,
            capacity,
            align,
            release,
        }
    }

    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if `addr` lies inside `[base, base + capacity)`.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        let start = self.base.as_ptr() as usize;
        addr >= start && addr - start < self.capacity
    }
}

impl Drop for BackingPool {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            // SAFETY: `release` came from the source that produced `base`,
            // and the pool is being dropped so nothing references the block.
            unsafe { release(self.base, self.capacity, self.align) };
        }
    }
}

/// Reserve the backing pool: query the largest block at `align`, then take
/// all of it in a single allocation.
pub fn acquire_pool<S: PoolSource + ?Sized>(
    source: &mut S,
    align: usize,
) -> Result<BackingPool, PoolError> {
    if !align.is_power_of_two() {
        return Err(PoolError::InvalidAlignment(align));
    }
    let size = source.allocatable_size(align);
    if size == 0 {
        return Err(PoolError::NoCapacity);
    }
    let base = source
        .allocate_block(size, align)
        .ok_or(PoolError::AllocationFailed { size, align })?;
    debug_assert_eq!(base.as_ptr() as usize % align, 0);
    Ok(BackingPool {
        base,
        capacity: size,
        align,
        release: source.release_fn(),
    })
}

/// Exact-size blocks from the system allocator.
///
/// Unlike [`MmapPoolSource`] the capacity is not rounded to pages, which makes
/// it the source of choice for small, precisely sized pools.
#[derive(Debug, Clone, Copy)]
pub struct SystemPoolSource {
    capacity: usize,
}

impl SystemPoolSource {
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl PoolSource for SystemPoolSource {
    fn allocatable_size(&self, _align: usize) -> usize {
        self.capacity
    }

    fn allocate_block(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(size, align).ok()?;
        // SAFETY: `size` is non-zero (checked by `acquire_pool`).
        NonNull::new(unsafe { System.alloc(layout) })
    }

    fn release_fn(&self) -> Option<ReleaseFn> {
        Some(dealloc_block)
    }
}

unsafe fn dealloc_block(base: NonNull<u8>, size: usize, align: usize) {
    // SAFETY: caller passes a block created by `SystemPoolSource` with the
    // same size and alignment, which already formed a valid layout.
    unsafe {
        System.dealloc(
            base.as_ptr(),
            Layout::from_size_align_unchecked(size, align),
        );
    }
}

/// Host secondary memory: anonymous private mappings.
///
/// The capacity query reports `min(limit, available physical memory)`,
/// rounded down to whole pages. Pages are committed lazily by the kernel.
#[derive(Debug, Clone, Copy)]
pub struct MmapPoolSource {
    limit: usize,
}

impl MmapPoolSource {
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self { limit }
    }

    fn page_size() -> usize {
        // SAFETY: sysconf has no memory-safety preconditions.
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page <= 0 { 4096 } else { page as usize }
    }

    fn available_physical() -> usize {
        // SAFETY: sysconf has no memory-safety preconditions.
        let pages = unsafe { libc::sysconf(libc::_SC_AVPHYS_PAGES) };
        if pages <= 0 {
            return usize::MAX;
        }
        (pages as usize).saturating_mul(Self::page_size())
    }
}

impl PoolSource for MmapPoolSource {
    fn allocatable_size(&self, align: usize) -> usize {
        let page = Self::page_size();
        if align > page {
            return 0;
        }
        let size = self.limit.min(Self::available_physical());
        size & !(page - 1)
    }

    fn allocate_block(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if size == 0 || align > Self::page_size() {
            return None;
        }
        // SAFETY: anonymous private mapping with no fixed address.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return None;
        }
        NonNull::new(raw.cast::<u8>())
    }

    fn release_fn(&self) -> Option<ReleaseFn> {
        Some(unmap_block)
    }
}

unsafe fn unmap_block(base: NonNull<u8>, size: usize, _align: usize) {
    // SAFETY: caller passes a mapping created by `MmapPoolSource`.
    unsafe {
        libc::munmap(base.as_ptr().cast(), size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptySource;

    impl PoolSource for EmptySource {
        fn allocatable_size(&self, _align: usize) -> usize {
            0
        }

        fn allocate_block(&mut self, _size: usize, _align: usize) -> Option<NonNull<u8>> {
            unreachable!("allocation must not be attempted without capacity")
        }
    }

    struct RefusingSource;

    impl PoolSource for RefusingSource {
        fn allocatable_size(&self, _align: usize) -> usize {
            1 << 20
        }

        fn allocate_block(&mut self, _size: usize, _align: usize) -> Option<NonNull<u8>> {
            None
        }
    }

    #[test]
    fn zero_capacity_is_reported() {
        let err = acquire_pool(&mut EmptySource, POOL_ALIGN).unwrap_err();
        assert_eq!(err, PoolError::NoCapacity);
    }

    #[test]
    fn refused_block_is_reported_with_request() {
        let err = acquire_pool(&mut RefusingSource, POOL_ALIGN).unwrap_err();
        assert_eq!(
            err,
            PoolError::AllocationFailed {
                size: 1 << 20,
                align: POOL_ALIGN
            }
        );
    }

    #[test]
    fn non_power_of_two_alignment_is_rejected() {
        let err = acquire_pool(&mut MmapPoolSource::new(1 << 20), 48).unwrap_err();
        assert_eq!(err, PoolError::InvalidAlignment(48));
    }

    #[test]
    fn mmap_pool_is_aligned_and_writable() {
        let pool = acquire_pool(&mut MmapPoolSource::new(1 << 20), POOL_ALIGN).unwrap();
        assert_eq!(pool.capacity(), 1 << 20);
        assert_eq!(pool.base().as_ptr() as usize % POOL_ALIGN, 0);

        let base = pool.base().as_ptr();
        // SAFETY: the pool owns `capacity` writable bytes.
        unsafe {
            base.write(0xA5);
            base.add(pool.capacity() - 1).write(0x5A);
            assert_eq!(base.read(), 0xA5);
        }
        assert!(pool.contains(base as usize));
        assert!(pool.contains(base as usize + pool.capacity() - 1));
        assert!(!pool.contains(base as usize + pool.capacity()));
    }

    #[test]
    fn system_pool_keeps_exact_capacity() {
        let pool = acquire_pool(&mut SystemPoolSource::new(1000), POOL_ALIGN).unwrap();
        assert_eq!(pool.capacity(), 1000);
        assert_eq!(pool.base().as_ptr() as usize % POOL_ALIGN, 0);
    }

    #[test]
    fn mmap_capacity_rounds_down_to_pages() {
        let source = MmapPoolSource::new((1 << 20) + 123);
        assert_eq!(source.allocatable_size(POOL_ALIGN) % 4096, 0);
        assert!(source.allocatable_size(POOL_ALIGN) <= (1 << 20) + 123);
    }
}
