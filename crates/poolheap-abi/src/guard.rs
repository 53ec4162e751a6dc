//! Process-wide heap lock.
//!
//! Every entry into the free-list heap goes through one `parking_lot::Mutex`.
//! The lock is taken by spinning on `try_lock`: a parked waiter may need
//! thread bookkeeping from the heap it is waiting on, so waiters never park.
//! Release is scoped to the guard, which covers the exhaustion and
//! contract-violation exits as well.

use std::hint;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use poolheap_arena::{FreeListHeap, FreeOutcome, HeapEvent, HeapStats, MoreCore};

/// Thread-safe wrapper that serializes all heap calls.
pub struct GuardedHeap<M: MoreCore> {
    heap: Mutex<FreeListHeap<M>>,
    /// Failed `try_lock` attempts across all callers.
    contended_spins: AtomicU64,
}

impl<M: MoreCore> GuardedHeap<M> {
    #[must_use]
    pub fn new(heap: FreeListHeap<M>) -> Self {
        Self {
            heap: Mutex::new(heap),
            contended_spins: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FreeListHeap<M>> {
        loop {
            if let Some(guard) = self.heap.try_lock() {
                return guard;
            }
            self.contended_spins.fetch_add(1, Ordering::Relaxed);
            hint::spin_loop();
        }
    }

    /// Guarded [`FreeListHeap::allocate`].
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.lock().allocate(size)
    }

    /// Guarded [`FreeListHeap::allocate_aligned`].
    pub fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
        self.lock().allocate_aligned(size, align)
    }

    /// Guarded [`FreeListHeap::free`].
    pub fn free(&self, ptr: *mut u8) -> FreeOutcome {
        self.lock().free(ptr)
    }

    #[must_use]
    pub fn usable_size(&self, ptr: *const u8) -> Option<usize> {
        self.lock().usable_size(ptr)
    }

    #[must_use]
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.lock().owns(ptr)
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.lock().stats()
    }

    /// Copy buffered lifecycle events out of the heap. The lock is held only
    /// for the copy.
    pub fn drain_events(&self, out: &mut [HeapEvent]) -> usize {
        self.lock().drain_events(out)
    }

    /// Run `f` with exclusive access to the heap.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut FreeListHeap<M>) -> R) -> R {
        let mut guard = self.lock();
        f(&mut *guard)
    }

    /// Number of times a caller found the lock held and had to spin.
    #[must_use]
    pub fn contended_spins(&self) -> u64 {
        self.contended_spins.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolheap_arena::{BumpGrower, HeapConfig, POOL_ALIGN, SystemPoolSource, acquire_pool};
    use std::sync::Arc;
    use std::thread;

    fn guarded(capacity: usize) -> GuardedHeap<BumpGrower> {
        let pool = acquire_pool(&mut SystemPoolSource::new(capacity), POOL_ALIGN).unwrap();
        GuardedHeap::new(FreeListHeap::new(
            BumpGrower::new(pool),
            &HeapConfig::default(),
        ))
    }

    #[test]
    fn lock_is_released_after_exhaustion() {
        let heap = guarded(4096);
        assert!(heap.allocate(1 << 20).is_null());
        // A second call would spin forever if the failed path leaked the guard.
        let p = heap.allocate(64);
        assert!(!p.is_null());
        assert_eq!(heap.free(p), FreeOutcome::Freed);
    }

    #[test]
    fn lock_is_released_after_invalid_alignment() {
        let heap = guarded(4096);
        assert!(heap.allocate_aligned(64, 3).is_null());
        assert!(!heap.allocate_aligned(64, 64).is_null());
    }

    #[test]
    fn with_heap_gives_exclusive_access() {
        let heap = guarded(1 << 16);
        let p = heap.allocate(10);
        let live = heap.with_heap(|h| {
            h.verify_free_list().unwrap();
            h.stats().active_count
        });
        assert_eq!(live, 1);
        assert!(heap.owns(p));
        assert_eq!(heap.usable_size(p), Some(16));
    }

    #[test]
    fn threads_share_one_heap() {
        let heap = Arc::new(guarded(1 << 22));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let heap = Arc::clone(&heap);
                thread::spawn(move || {
                    for i in 0..500 {
                        let size = 16 + (t * 31 + i * 7) % 900;
                        let p = heap.allocate(size);
                        assert!(!p.is_null());
                        assert_eq!(heap.free(p), FreeOutcome::Freed);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = heap.stats();
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.bytes_in_use, 0);
    }
}
