//! Heap hook redirection.
//!
//! [`HookTable`] holds the three heap entry points. [`HeapFacade`] is the
//! process allocation facade: a `GlobalAlloc` that serves everything from the
//! system heap until a table is installed, then forwards every call through
//! the table. The table is installed at most once and never removed.
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: HeapFacade = HeapFacade::new();
//!
//! fn main() {
//!     install_process_heap_or_abort(&GLOBAL, &HeapConfig::from_env());
//!     // every Box/Vec/String from here on lives in the backing pool
//! }
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use poolheap_arena::{DEFAULT_ALIGN, FreeOutcome};
use thiserror::Error;

pub type AllocateFn = fn(usize) -> *mut u8;
pub type AllocateAlignedFn = fn(usize, usize) -> *mut u8;
pub type FreeFn = fn(*mut u8) -> FreeOutcome;

/// The three redirected heap entry points.
#[derive(Debug, Clone, Copy)]
pub struct HookTable {
    pub allocate: AllocateFn,
    /// `(size, align)`.
    pub allocate_aligned: AllocateAlignedFn,
    /// Must report [`FreeOutcome::ForeignPointer`] for memory it did not hand out.
    pub free: FreeFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("heap hooks are already installed")]
    AlreadyInstalled,
}

/// Allocation facade with a one-shot hook slot.
#[derive(Debug)]
pub struct HeapFacade {
    table: AtomicPtr<HookTable>,
}

impl HeapFacade {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            table: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Route all later calls through `table`. Fails if a table is already set.
    pub fn install(&self, table: &'static HookTable) -> Result<(), HookError> {
        let raw = ptr::from_ref(table).cast_mut();
        self.table
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| HookError::AlreadyInstalled)
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        !self.table.load(Ordering::Acquire).is_null()
    }

    fn hooks(&self) -> Option<&'static HookTable> {
        let raw = self.table.load(Ordering::Acquire);
        // SAFETY: the only non-null value ever stored is a `&'static HookTable`.
        unsafe { raw.as_ref() }
    }
}

impl Default for HeapFacade {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: before install every call goes to `System`. After install blocks
// come from the hook table, which hands out non-overlapping blocks of at least
// `layout.size()` bytes at `layout.align()`, or null. `dealloc` returns each
// block to whichever side produced it: blocks the table disowns predate the
// install and go back to `System`.
unsafe impl GlobalAlloc for HeapFacade {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match self.hooks() {
            None => {
                // SAFETY: forwarded caller contract.
                unsafe { System.alloc(layout) }
            }
            Some(hooks) if layout.align() <= DEFAULT_ALIGN => (hooks.allocate)(layout.size()),
            Some(hooks) => (hooks.allocate_aligned)(layout.size(), layout.align()),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some(hooks) = self.hooks() else {
            // SAFETY: forwarded caller contract.
            unsafe { System.dealloc(ptr, layout) };
            return;
        };
        if (hooks.free)(ptr) == FreeOutcome::ForeignPointer {
            // SAFETY: the hooks disowned `ptr`, so it came from `System`
            // before the table was installed.
            unsafe { System.dealloc(ptr, layout) };
        }
    }
}
