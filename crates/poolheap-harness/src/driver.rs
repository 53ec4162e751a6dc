//! Deterministic heap benchmark driver.
//!
//! Replays a seeded allocate/free sequence against any [`HeapTarget`]:
//!
//! 1. For each of `count` slots, allocate `rand() % max_size + 1` bytes
//!    (plain or aligned), logging a failure as "Out of memory".
//! 2. With probability 1/2, free a random slot and clear it.
//! 3. Free every remaining slot.
//!
//! The allocation phase (steps 1–2) and the free phase (step 3) are timed
//! separately. The random sequence never depends on allocation results, so
//! two heaps fed the same seed see identical requests and differ only in
//! which of them succeed. That is what [`compare_transparency`] checks.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use poolheap_abi::{GuardedHeap, NativeHeap};
use poolheap_arena::{
    BumpGrower, DEFAULT_ALIGN, FreeListHeap, FreeOutcome, GrowError, HeapConfig, HeapEvent,
    HeapLogLevel, HeapStats, MmapPoolSource, MoreCore, POOL_ALIGN, SystemPoolSource,
    acquire_pool,
};

use crate::error::HarnessError;
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};

pub const TEST_COUNT: usize = 8192;
pub const TEST_SIZE: usize = 32768;
pub const TEST_ALIGNMENT: usize = 128;
pub const DEFAULT_SEED: u32 = 0xab12_cd34;

/// Lifecycle records drained from a pool heap per phase.
const EVENT_BATCH: usize = 256;

const BLANK_EVENT: HeapEvent = HeapEvent {
    decision_id: 0,
    level: HeapLogLevel::Trace,
    symbol: "",
    event: "",
    ptr: None,
    size: None,
    outcome: "",
    active_count: 0,
    bytes_in_use: 0,
    heap_size: 0,
};

// ---------------------------------------------------------------------------
// PRNG
// ---------------------------------------------------------------------------

/// 64-bit LCG with 31-bit outputs, the shape of a C `rand()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    #[must_use]
    pub fn new(seed: u32) -> Self {
        Self {
            state: u64::from(seed),
        }
    }

    /// Next value in `[0, 2^31)`.
    pub fn next_u31(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.state >> 33) as u32
    }

    /// Next value in `[0, bound)`. `bound` must be non-zero.
    pub fn below(&mut self, bound: usize) -> usize {
        self.next_u31() as usize % bound
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// A heap the driver can exercise.
pub trait HeapTarget {
    /// Short name used in logs and reports (`pool` or `native`).
    fn name(&self) -> &'static str;

    /// Banner description.
    fn description(&self) -> &'static str;

    fn allocate(&self, size: usize) -> *mut u8;

    fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8;

    /// Release `ptr`. Returns false if the heap refused it.
    fn free(&self, ptr: *mut u8) -> bool;

    /// Heap accounting, when the target keeps any.
    fn stats(&self) -> Option<HeapStats> {
        None
    }

    /// Buffered lifecycle records, oldest first.
    fn drain_events(&self) -> Vec<HeapEvent> {
        Vec::new()
    }
}

impl HeapTarget for NativeHeap {
    fn name(&self) -> &'static str {
        "native"
    }

    fn description(&self) -> &'static str {
        "default heap"
    }

    fn allocate(&self, size: usize) -> *mut u8 {
        NativeHeap::allocate(self, size)
    }

    fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
        NativeHeap::allocate_aligned(self, size, align)
    }

    fn free(&self, ptr: *mut u8) -> bool {
        NativeHeap::free(self, ptr);
        true
    }
}

impl<M: MoreCore> HeapTarget for GuardedHeap<M> {
    fn name(&self) -> &'static str {
        "pool"
    }

    fn description(&self) -> &'static str {
        "custom heap"
    }

    fn allocate(&self, size: usize) -> *mut u8 {
        GuardedHeap::allocate(self, size)
    }

    fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
        GuardedHeap::allocate_aligned(self, size, align)
    }

    fn free(&self, ptr: *mut u8) -> bool {
        matches!(
            GuardedHeap::free(self, ptr),
            FreeOutcome::Freed | FreeOutcome::Null
        )
    }

    fn stats(&self) -> Option<HeapStats> {
        Some(GuardedHeap::stats(self))
    }

    fn drain_events(&self) -> Vec<HeapEvent> {
        let mut buf = vec![BLANK_EVENT; EVENT_BATCH];
        let n = GuardedHeap::drain_events(self, &mut buf);
        buf.truncate(n);
        buf
    }
}

/// Build a guarded pool heap over an anonymous mapping of at most
/// `config.pool_limit` bytes. The event ring keeps Debug and above so a full
/// run does not flood it with per-call records.
pub fn pool_heap(config: &HeapConfig) -> Result<GuardedHeap<BumpGrower>, HarnessError> {
    let pool = acquire_pool(&mut MmapPoolSource::new(config.pool_limit), POOL_ALIGN)?;
    let mut heap = FreeListHeap::new(BumpGrower::new(pool), config);
    heap.set_event_level(HeapLogLevel::Debug);
    Ok(GuardedHeap::new(heap))
}

// ---------------------------------------------------------------------------
// Configuration and reports
// ---------------------------------------------------------------------------

/// Which entry point the sequence uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AllocKind {
    Malloc,
    Memalign,
}

impl AllocKind {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Malloc => "malloc",
            Self::Memalign => "memalign",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub count: usize,
    pub max_size: usize,
    pub alignment: usize,
    pub seed: u32,
    /// Check every result for alignment and overlap, and fail on refused frees.
    pub verify: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            count: TEST_COUNT,
            max_size: TEST_SIZE,
            alignment: TEST_ALIGNMENT,
            seed: DEFAULT_SEED,
            verify: false,
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.count == 0 {
            return Err(HarnessError::InvalidArgument("count must be non-zero".into()));
        }
        if self.max_size == 0 {
            return Err(HarnessError::InvalidArgument(
                "max size must be non-zero".into(),
            ));
        }
        if !self.alignment.is_power_of_two() {
            return Err(HarnessError::InvalidArgument(format!(
                "alignment {} is not a power of two",
                self.alignment
            )));
        }
        Ok(())
    }
}

/// Result of one alloc/free sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub heap: String,
    pub kind: AllocKind,
    pub count: usize,
    pub successes: usize,
    pub failures: usize,
    /// Frees of live slots during the allocation phase.
    pub interleaved_frees: usize,
    /// Frees of live slots during the free phase.
    pub final_frees: usize,
    /// Frees the heap refused.
    pub rejected_frees: usize,
    pub alloc_us: u64,
    pub free_us: u64,
    /// SHA-256 over request sizes, success flags and freed slots.
    pub trace_digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grow_failures: Option<u64>,
}

/// The malloc run followed by the memalign run, on one random stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub heap: String,
    pub seed: u32,
    pub malloc: RunReport,
    pub memalign: RunReport,
}

impl SuiteReport {
    #[must_use]
    pub fn failures(&self) -> usize {
        self.malloc.failures + self.memalign.failures
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Live ranges of one run: start -> end.
#[derive(Debug, Default)]
struct LiveRanges(BTreeMap<usize, usize>);

impl LiveRanges {
    fn insert(
        &mut self,
        op: usize,
        ptr: usize,
        len: usize,
        align: usize,
    ) -> Result<(), HarnessError> {
        if ptr % align != 0 {
            return Err(HarnessError::Verification {
                op,
                message: format!("{ptr:#x} is not aligned to {align}"),
            });
        }
        let end = ptr.checked_add(len).ok_or_else(|| HarnessError::Verification {
            op,
            message: format!("{ptr:#x} + {len} wraps the address space"),
        })?;
        if let Some((&s, &e)) = self.0.range(..end).next_back()
            && e > ptr
        {
            return Err(HarnessError::Verification {
                op,
                message: format!("[{ptr:#x}, {end:#x}) overlaps live [{s:#x}, {e:#x})"),
            });
        }
        self.0.insert(ptr, end);
        Ok(())
    }

    fn remove(&mut self, op: usize, ptr: usize) -> Result<(), HarnessError> {
        self.0
            .remove(&ptr)
            .map(|_| ())
            .ok_or_else(|| HarnessError::Verification {
                op,
                message: format!("{ptr:#x} is not a live allocation"),
            })
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

struct Run<'a, T: HeapTarget + ?Sized> {
    target: &'a T,
    config: &'a DriverConfig,
    kind: AllocKind,
    buffers: Vec<*mut u8>,
    live: Option<LiveRanges>,
    trace: Sha256,
    successes: usize,
    failures: usize,
    interleaved_frees: usize,
    final_frees: usize,
    rejected_frees: usize,
}

impl<'a, T: HeapTarget + ?Sized> Run<'a, T> {
    fn new(target: &'a T, config: &'a DriverConfig, kind: AllocKind) -> Self {
        Self {
            target,
            config,
            kind,
            buffers: vec![std::ptr::null_mut(); config.count],
            live: config.verify.then(LiveRanges::default),
            trace: Sha256::new(),
            successes: 0,
            failures: 0,
            interleaved_frees: 0,
            final_frees: 0,
            rejected_frees: 0,
        }
    }

    fn alloc(&mut self, op: usize, size: usize) -> Result<*mut u8, HarnessError> {
        let (p, align) = match self.kind {
            AllocKind::Malloc => (self.target.allocate(size), DEFAULT_ALIGN),
            AllocKind::Memalign => (
                self.target.allocate_aligned(size, self.config.alignment),
                self.config.alignment,
            ),
        };
        self.trace.update(b"a");
        self.trace.update((size as u64).to_le_bytes());
        self.trace.update([u8::from(!p.is_null())]);
        if p.is_null() {
            self.failures += 1;
        } else {
            self.successes += 1;
            if let Some(live) = self.live.as_mut() {
                live.insert(op, p as usize, size, align)?;
            }
        }
        Ok(p)
    }

    /// Free slot `idx` and clear it. Returns whether the slot was live.
    fn release(&mut self, op: usize, idx: usize) -> Result<bool, HarnessError> {
        let p = std::mem::replace(&mut self.buffers[idx], std::ptr::null_mut());
        self.trace.update(b"f");
        self.trace.update((idx as u64).to_le_bytes());
        self.trace.update([u8::from(!p.is_null())]);
        if let Some(live) = self.live.as_mut()
            && !p.is_null()
        {
            live.remove(op, p as usize)?;
        }
        if !self.target.free(p) {
            self.rejected_frees += 1;
            if self.config.verify {
                return Err(HarnessError::Verification {
                    op,
                    message: format!("heap refused to free {p:p}"),
                });
            }
        }
        Ok(!p.is_null())
    }

    fn emit_heap_events(&self, log: &mut LogEmitter) -> Result<(), HarnessError> {
        let events = self.target.drain_events();
        log.emit_heap_events(self.target.name(), &events)?;
        Ok(())
    }

    fn execute(mut self, rng: &mut Lcg, log: &mut LogEmitter) -> Result<RunReport, HarnessError> {
        let heap = self.target.name();
        let symbol = self.kind.symbol();
        let count = self.config.count;

        let start = Instant::now();
        for i in 0..count {
            let size = rng.below(self.config.max_size) + 1;
            let p = self.alloc(i, size)?;
            if p.is_null() {
                log.emit_entry(
                    LogEntry::new("", LogLevel::Warn, "out_of_memory")
                        .with_heap(heap)
                        .with_symbol(symbol)
                        .with_size(size)
                        .with_details(serde_json::json!({ "message": "Out of memory", "slot": i })),
                )?;
            }
            self.buffers[i] = p;

            if rng.below(2) == 0 {
                let idx = rng.below(count);
                if self.release(i, idx)? {
                    self.interleaved_frees += 1;
                }
            }
        }
        let alloc_us = elapsed_us(start);
        log.emit_entry(phase_entry(heap, symbol, "alloc_phase_complete", "Alloc", alloc_us))?;
        self.emit_heap_events(log)?;

        log.emit_entry(
            LogEntry::new("", LogLevel::Info, "freeing_buffers")
                .with_heap(heap)
                .with_symbol(symbol)
                .with_details(serde_json::json!({ "message": "Freeing buffers..." })),
        )?;
        let start = Instant::now();
        for idx in 0..count {
            if self.release(count + idx, idx)? {
                self.final_frees += 1;
            }
        }
        let free_us = elapsed_us(start);
        log.emit_entry(phase_entry(heap, symbol, "free_phase_complete", "Free", free_us))?;
        self.emit_heap_events(log)?;

        let stats = self.target.stats();
        let report = RunReport {
            heap: heap.to_string(),
            kind: self.kind,
            count,
            successes: self.successes,
            failures: self.failures,
            interleaved_frees: self.interleaved_frees,
            final_frees: self.final_frees,
            rejected_frees: self.rejected_frees,
            alloc_us,
            free_us,
            trace_digest: hex_lower(&self.trace.finalize()),
            heap_size: stats.map(|s| s.heap_size),
            grow_failures: stats.map(|s| s.grow_failures),
        };
        let outcome = if report.rejected_frees == 0 {
            Outcome::Pass
        } else {
            Outcome::Fail
        };
        log.emit_entry(
            LogEntry::new("", LogLevel::Info, "run_complete")
                .with_heap(heap)
                .with_symbol(symbol)
                .with_outcome(outcome)
                .with_details(serde_json::to_value(&report)?),
        )?;
        Ok(report)
    }
}

fn phase_entry(heap: &str, symbol: &str, event: &str, label: &str, micros: u64) -> LogEntry {
    LogEntry::new("", LogLevel::Info, event)
        .with_heap(heap)
        .with_symbol(symbol)
        .with_latency_ns(micros.saturating_mul(1_000))
        .with_details(serde_json::json!({
            "message": format!("{label} took: {micros} microseconds"),
        }))
}

fn elapsed_us(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Plain-allocation sequence, continuing `rng`.
pub fn run_malloc_test<T: HeapTarget + ?Sized>(
    target: &T,
    config: &DriverConfig,
    rng: &mut Lcg,
    log: &mut LogEmitter,
) -> Result<RunReport, HarnessError> {
    config.validate()?;
    Run::new(target, config, AllocKind::Malloc).execute(rng, log)
}

/// Aligned-allocation sequence, continuing `rng`.
pub fn run_memalign_test<T: HeapTarget + ?Sized>(
    target: &T,
    config: &DriverConfig,
    rng: &mut Lcg,
    log: &mut LogEmitter,
) -> Result<RunReport, HarnessError> {
    config.validate()?;
    Run::new(target, config, AllocKind::Memalign).execute(rng, log)
}

/// Banner, then the malloc run and the memalign run on one seeded stream.
pub fn run_suite<T: HeapTarget + ?Sized>(
    target: &T,
    config: &DriverConfig,
    log: &mut LogEmitter,
) -> Result<SuiteReport, HarnessError> {
    config.validate()?;
    for message in [
        "==========".to_string(),
        format!("Heap tester using {}", target.description()),
        "==========".to_string(),
    ] {
        log.emit_entry(
            LogEntry::new("", LogLevel::Info, "banner")
                .with_heap(target.name())
                .with_details(serde_json::json!({ "message": message })),
        )?;
    }
    let mut rng = Lcg::new(config.seed);
    let malloc = run_malloc_test(target, config, &mut rng, log)?;
    let memalign = run_memalign_test(target, config, &mut rng, log)?;
    Ok(SuiteReport {
        heap: target.name().to_string(),
        seed: config.seed,
        malloc,
        memalign,
    })
}

// ---------------------------------------------------------------------------
// Transparency
// ---------------------------------------------------------------------------

/// Side-by-side suite results for two heaps on the same seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparencyReport {
    pub seed: u32,
    pub candidate: SuiteReport,
    pub baseline: SuiteReport,
    pub mismatches: Vec<String>,
}

impl TransparencyReport {
    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Run the same suite on `candidate` and `baseline` and list every
/// observable difference in success counts or operation traces.
pub fn compare_transparency<C, B>(
    candidate: &C,
    baseline: &B,
    config: &DriverConfig,
    log: &mut LogEmitter,
) -> Result<TransparencyReport, HarnessError>
where
    C: HeapTarget + ?Sized,
    B: HeapTarget + ?Sized,
{
    let candidate = run_suite(candidate, config, log)?;
    let baseline = run_suite(baseline, config, log)?;

    let mut mismatches = Vec::new();
    for (a, b) in [
        (&candidate.malloc, &baseline.malloc),
        (&candidate.memalign, &baseline.memalign),
    ] {
        let symbol = a.kind.symbol();
        if a.successes != b.successes || a.failures != b.failures {
            mismatches.push(format!(
                "{symbol}: {}/{} succeeded/failed on {}, {}/{} on {}",
                a.successes, a.failures, a.heap, b.successes, b.failures, b.heap
            ));
        }
        if a.trace_digest != b.trace_digest {
            mismatches.push(format!("{symbol}: operation traces differ"));
        }
    }

    let report = TransparencyReport {
        seed: config.seed,
        candidate,
        baseline,
        mismatches,
    };
    let outcome = if report.is_transparent() {
        Outcome::Pass
    } else {
        Outcome::Fail
    };
    log.emit_entry(
        LogEntry::new("", LogLevel::Info, "transparency_check")
            .with_outcome(outcome)
            .with_details(serde_json::json!({ "mismatches": report.mismatches })),
    )?;
    Ok(report)
}

/// Turn a non-transparent report into an error.
pub fn ensure_transparent(report: &TransparencyReport) -> Result<(), HarnessError> {
    if report.is_transparent() {
        Ok(())
    } else {
        Err(HarnessError::Transparency(report.mismatches.join("; ")))
    }
}

// ---------------------------------------------------------------------------
// Grow scenarios
// ---------------------------------------------------------------------------

/// One replayed grow request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowStep {
    pub requested: isize,
    /// Offset of the granted range from the pool base.
    pub offset: Option<usize>,
    pub used: usize,
    pub error: Option<String>,
}

/// Replay `requests` against a fresh grower over an exactly sized pool.
pub fn replay_grow_scenario(
    capacity: usize,
    requests: &[isize],
) -> Result<Vec<GrowStep>, HarnessError> {
    let pool = acquire_pool(&mut SystemPoolSource::new(capacity), POOL_ALIGN)?;
    let mut grower = BumpGrower::new(pool);
    let base = grower.base().as_ptr() as usize;
    Ok(requests
        .iter()
        .map(|&requested| {
            let result = grower.grow(requested);
            GrowStep {
                requested,
                offset: result.as_ref().ok().map(|p| p.as_ptr() as usize - base),
                used: grower.used(),
                error: result.as_ref().err().map(GrowError::to_string),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolheap_arena::HeapMode;

    fn small_config() -> DriverConfig {
        DriverConfig {
            count: 512,
            max_size: 2048,
            verify: true,
            ..DriverConfig::default()
        }
    }

    #[test]
    fn lcg_is_deterministic_and_31_bit() {
        let mut a = Lcg::new(DEFAULT_SEED);
        let mut b = Lcg::new(DEFAULT_SEED);
        for _ in 0..1_000 {
            let x = a.next_u31();
            assert_eq!(x, b.next_u31());
            assert!(x < 1 << 31);
        }
        assert_ne!(Lcg::new(1).next_u31(), Lcg::new(2).next_u31());
    }

    #[test]
    fn config_validation() {
        assert!(DriverConfig::default().validate().is_ok());
        let bad = DriverConfig {
            alignment: 96,
            ..DriverConfig::default()
        };
        assert!(matches!(bad.validate(), Err(HarnessError::InvalidArgument(_))));
        let empty = DriverConfig {
            count: 0,
            ..DriverConfig::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn live_ranges_reject_overlap_and_misalignment() {
        let mut live = LiveRanges::default();
        live.insert(0, 0x1000, 64, 16).unwrap();
        live.insert(1, 0x1040, 64, 16).unwrap();
        assert!(live.insert(2, 0x1030, 32, 16).is_err());
        assert!(live.insert(3, 0x2008, 8, 16).is_err());
        live.remove(4, 0x1000).unwrap();
        assert!(live.remove(5, 0x1000).is_err());
    }

    #[test]
    fn native_suite_verifies_and_frees_everything() {
        let mut log = LogEmitter::sink("driver", "native");
        let report = run_suite(&NativeHeap, &small_config(), &mut log).unwrap();
        assert_eq!(report.failures(), 0);
        for run in [&report.malloc, &report.memalign] {
            assert_eq!(run.successes, 512);
            assert_eq!(run.rejected_frees, 0);
            assert_eq!(run.interleaved_frees + run.final_frees, run.successes);
        }
    }

    #[test]
    fn pool_suite_returns_heap_to_empty() {
        let heap = pool_heap(&HeapConfig::default().with_mode(HeapMode::Hardened)).unwrap();
        let mut log = LogEmitter::sink("driver", "pool");
        let report = run_suite(&heap, &small_config(), &mut log).unwrap();
        assert_eq!(report.failures(), 0);
        let stats = heap.stats();
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.double_frees + stats.invalid_frees + stats.foreign_frees, 0);
        assert!(heap.with_heap(|h| h.verify_free_list()).is_ok());
    }

    #[test]
    fn trace_digest_ignores_addresses() {
        let config = small_config();
        let mut log = LogEmitter::sink("driver", "digest");
        let a = pool_heap(&HeapConfig::default()).unwrap();
        let b = pool_heap(&HeapConfig::default()).unwrap();
        let ra = run_suite(&a, &config, &mut log).unwrap();
        let rb = run_suite(&b, &config, &mut log).unwrap();
        assert_eq!(ra.malloc.trace_digest, rb.malloc.trace_digest);
        assert_eq!(ra.memalign.trace_digest, rb.memalign.trace_digest);
        assert_ne!(ra.malloc.trace_digest, ra.memalign.trace_digest);
    }

    #[test]
    fn grow_replay_reports_offsets_and_used() {
        let steps = replay_grow_scenario(1_000, &[400, 400, 300, 200, -8]).unwrap();
        let used: Vec<usize> = steps.iter().map(|s| s.used).collect();
        assert_eq!(used, vec![400, 800, 800, 1_000, 1_000]);
        assert_eq!(steps[1].offset, Some(400));
        assert!(steps[2].error.is_some());
        assert_eq!(steps[3].offset, Some(800));
        assert!(steps[4].offset.is_none());
    }
}
