//! Process heap bootstrap.
//!
//! Startup order is fixed: reserve the backing pool, build the guarded heap
//! over it, then publish the forwarders. The forwarders are installed last so
//! the first forwarded call always finds a heap with a pool behind it.

use std::io::Write;
use std::ptr;
use std::sync::OnceLock;

use poolheap_arena::{
    BumpGrower, FreeListHeap, FreeOutcome, HeapConfig, MmapPoolSource, POOL_ALIGN, PoolError,
    acquire_pool,
};
use thiserror::Error;

use crate::guard::GuardedHeap;
use crate::hooks::{HeapFacade, HookError, HookTable};

/// The heap type that backs the process.
pub type ProcessHeap = GuardedHeap<BumpGrower>;

static PROCESS_HEAP: OnceLock<ProcessHeap> = OnceLock::new();

static PROCESS_HOOKS: HookTable = HookTable {
    allocate: forward_allocate,
    allocate_aligned: forward_allocate_aligned,
    free: forward_free,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InstallError {
    #[error("the process heap is already installed")]
    AlreadyInstalled,
    #[error("backing pool acquisition failed: {0}")]
    Pool(#[from] PoolError),
}

impl From<HookError> for InstallError {
    fn from(err: HookError) -> Self {
        match err {
            HookError::AlreadyInstalled => Self::AlreadyInstalled,
        }
    }
}

fn forward_allocate(size: usize) -> *mut u8 {
    match PROCESS_HEAP.get() {
        Some(heap) => heap.allocate(size),
        None => ptr::null_mut(),
    }
}

fn forward_allocate_aligned(size: usize, align: usize) -> *mut u8 {
    match PROCESS_HEAP.get() {
        Some(heap) => heap.allocate_aligned(size, align),
        None => ptr::null_mut(),
    }
}

fn forward_free(ptr: *mut u8) -> FreeOutcome {
    match PROCESS_HEAP.get() {
        Some(heap) => heap.free(ptr),
        None if ptr.is_null() => FreeOutcome::Null,
        None => FreeOutcome::ForeignPointer,
    }
}

/// The process heap, once [`init_process_heap`] has succeeded.
#[must_use]
pub fn process_heap() -> Option<&'static ProcessHeap> {
    PROCESS_HEAP.get()
}

/// Forwarders into the process heap.
#[must_use]
pub fn process_hooks() -> &'static HookTable {
    &PROCESS_HOOKS
}

/// Reserve the backing pool and build the process heap, without touching any
/// facade. Used directly by the C entry points.
pub fn init_process_heap(config: &HeapConfig) -> Result<&'static ProcessHeap, InstallError> {
    if PROCESS_HEAP.get().is_some() {
        return Err(InstallError::AlreadyInstalled);
    }
    let pool = acquire_pool(&mut MmapPoolSource::new(config.pool_limit), POOL_ALIGN)?;
    let heap = GuardedHeap::new(FreeListHeap::new(BumpGrower::new(pool), config));
    // A racing initializer may have won; our pool is released on drop.
    PROCESS_HEAP
        .set(heap)
        .map_err(|_| InstallError::AlreadyInstalled)?;
    PROCESS_HEAP.get().ok_or(InstallError::AlreadyInstalled)
}

/// Build the process heap if needed and redirect `facade` into it.
///
/// Must run once per facade, before anything relies on memory from the pool.
/// Calls made through `facade` before this point are served by the system
/// heap, and those blocks are still freed correctly afterwards. If the C
/// entry points already built the process heap, that heap is reused and
/// `config` is ignored.
pub fn install_process_heap(
    facade: &'static HeapFacade,
    config: &HeapConfig,
) -> Result<&'static ProcessHeap, InstallError> {
    if facade.is_installed() {
        return Err(InstallError::AlreadyInstalled);
    }
    let heap = match init_process_heap(config) {
        Ok(heap) => heap,
        Err(InstallError::AlreadyInstalled) => {
            process_heap().ok_or(InstallError::AlreadyInstalled)?
        }
        Err(err) => return Err(err),
    };
    facade.install(&PROCESS_HOOKS)?;
    Ok(heap)
}

/// [`install_process_heap`], treating every failure as fatal.
pub fn install_process_heap_or_abort(
    facade: &'static HeapFacade,
    config: &HeapConfig,
) -> &'static ProcessHeap {
    match install_process_heap(facade, config) {
        Ok(heap) => heap,
        Err(err) => {
            let _ = writeln!(std::io::stderr(), "poolheap: fatal: {err}");
            std::process::abort()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_convert_into_install_errors() {
        let err: InstallError = PoolError::NoCapacity.into();
        assert_eq!(err, InstallError::Pool(PoolError::NoCapacity));
        assert!(err.to_string().contains("no allocatable memory"));
        let err: InstallError = HookError::AlreadyInstalled.into();
        assert_eq!(err, InstallError::AlreadyInstalled);
    }

    #[test]
    fn forwarders_degrade_before_init() {
        // No test in this binary initialises the process heap.
        assert!(process_heap().is_none());
        assert!(forward_allocate(16).is_null());
        assert!(forward_allocate_aligned(16, 64).is_null());
        assert_eq!(forward_free(ptr::null_mut()), FreeOutcome::Null);
        let mut local = 0u64;
        assert_eq!(
            forward_free(ptr::from_mut(&mut local).cast()),
            FreeOutcome::ForeignPointer
        );
    }
}
