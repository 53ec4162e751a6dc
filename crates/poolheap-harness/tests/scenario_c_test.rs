//! Integration test: full-size randomized alloc/free sequence.
//!
//! 8192 allocations of 1..=32768 bytes with about half freed along the way,
//! then everything freed. Every successful allocation is checked for
//! alignment and overlap against the live set; every free must succeed.

use poolheap_arena::{HeapConfig, HeapMode};
use poolheap_harness::driver::{DEFAULT_SEED, TEST_ALIGNMENT, TEST_COUNT};
use poolheap_harness::{DriverConfig, LogEmitter, pool_heap, run_suite};

#[test]
fn full_sequence_is_verified_on_the_pool_heap() {
    let config = DriverConfig {
        verify: true,
        ..DriverConfig::default()
    };
    assert_eq!(config.count, TEST_COUNT);
    assert_eq!(config.seed, DEFAULT_SEED);

    let heap = pool_heap(
        &HeapConfig::default()
            .with_mode(HeapMode::Hardened)
            .with_pool_limit(256 * 1024 * 1024),
    )
    .expect("pool heap");
    let mut log = LogEmitter::sink("scenario-c", "full");
    let report = run_suite(&heap, &config, &mut log).expect("verified suite");

    for run in [&report.malloc, &report.memalign] {
        assert_eq!(run.successes + run.failures, TEST_COUNT);
        assert_eq!(run.rejected_frees, 0);
        assert_eq!(run.interleaved_frees + run.final_frees, run.successes);
        assert!(run.interleaved_frees > 0);
    }

    let stats = heap.stats();
    assert_eq!(stats.active_count, 0);
    assert_eq!(stats.bytes_in_use, 0);
    assert_eq!(stats.double_frees, 0);
    assert_eq!(stats.invalid_frees, 0);
    assert!(heap.with_heap(|h| h.verify_free_list()).is_ok());
    assert!(TEST_ALIGNMENT.is_power_of_two());
}

#[test]
fn reruns_with_the_same_seed_are_identical() {
    let config = DriverConfig {
        count: 2048,
        ..DriverConfig::default()
    };
    let heap_config = HeapConfig::default().with_pool_limit(128 * 1024 * 1024);
    let mut log = LogEmitter::sink("scenario-c", "rerun");

    let first = run_suite(&pool_heap(&heap_config).expect("pool"), &config, &mut log).unwrap();
    let second = run_suite(&pool_heap(&heap_config).expect("pool"), &config, &mut log).unwrap();
    assert_eq!(first.malloc.trace_digest, second.malloc.trace_digest);
    assert_eq!(first.memalign.trace_digest, second.memalign.trace_digest);
    assert_eq!(first.malloc.successes, second.malloc.successes);

    let other = DriverConfig {
        seed: DEFAULT_SEED ^ 1,
        ..config
    };
    let third = run_suite(&pool_heap(&heap_config).expect("pool"), &other, &mut log).unwrap();
    assert_ne!(first.malloc.trace_digest, third.malloc.trace_digest);
}
