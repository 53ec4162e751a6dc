//! Benchmark driver and tooling for poolheap.
//!
//! This crate provides:
//! - Driver: the seeded malloc/memalign sequence, timed per phase
//! - Transparency: the same sequence on the pool heap and the native heap,
//!   compared by success counts and operation trace digests
//! - Grow scenarios: replay raw grow requests against a fresh grower
//! - Structured logging: JSONL entries, including bridged heap lifecycle records

#![forbid(unsafe_code)]

pub mod driver;
pub mod error;
pub mod structured_log;

pub use driver::{
    AllocKind, DriverConfig, GrowStep, HeapTarget, Lcg, RunReport, SuiteReport,
    TransparencyReport, compare_transparency, ensure_transparent, pool_heap,
    replay_grow_scenario, run_malloc_test, run_memalign_test, run_suite,
};
pub use error::HarnessError;
pub use structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
