//! # poolheap-abi
//!
//! Redirects a process's heap onto the pool-backed free-list heap.
//!
//! ```text
//! Box/Vec/String ──► HeapFacade (GlobalAlloc) ─┐
//!                                               ├─► HookTable ─► GuardedHeap ─► FreeListHeap ─► BumpGrower
//! C caller ──► poolheap_malloc/memalign/free ──┘       (one process-wide lock)
//! ```
//!
//! Before installation everything is served by the platform heap, and memory
//! obtained that way is still released to the right place afterwards.

// The C entry points take raw pointers from C callers and document their
// contract on the function itself.
#![allow(clippy::missing_safety_doc)]

pub mod bootstrap;
pub mod guard;
pub mod hooks;
pub mod malloc_abi;
pub mod native;

pub use bootstrap::{
    InstallError, ProcessHeap, init_process_heap, install_process_heap,
    install_process_heap_or_abort, process_heap, process_hooks,
};
pub use guard::GuardedHeap;
pub use hooks::{HeapFacade, HookError, HookTable};
pub use native::NativeHeap;
