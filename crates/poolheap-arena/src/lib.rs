//! Memory substrate for poolheap.
//!
//! Everything the process heap needs below the lock:
//!
//! ```text
//! FreeListHeap ──more_core──► BumpGrower ──bump──► BackingPool ◄── PoolSource
//!   (heap)                     (grower)             (pool)          (platform)
//! ```
//!
//! - **Backing pool** (`pool`): one contiguous block reserved once from the
//!   platform's secondary memory manager. Never resized.
//! - **Bump grower** (`grower`): advances a `used` boundary inside the pool and
//!   reports exhaustion with [`GrowError::Exhausted`]. Never shrinks.
//! - **Free-list heap** (`heap`): first-fit allocator with splitting and
//!   coalescing that calls the grower when its free list runs dry.
//! - **Lifecycle ring** (`lifecycle`): allocation-free structured event log.
//! - **Configuration** (`config`): heap mode and sizing from the environment.
//!
//! None of these types are thread-safe on their own. The guard in
//! `poolheap-abi` serializes every entry into the heap.

pub mod config;
pub mod grower;
pub mod heap;
pub mod lifecycle;
pub mod pool;

pub use config::{HeapConfig, HeapMode};
pub use grower::{BumpGrower, GrowError, MoreCore};
pub use heap::{DEFAULT_ALIGN, FreeListHeap, FreeOutcome, HeapStats};
pub use lifecycle::{EventRing, HeapEvent, HeapLogLevel};
pub use pool::{
    BackingPool, MmapPoolSource, POOL_ALIGN, PoolError, PoolSource, SystemPoolSource,
    acquire_pool,
};
