//! General-purpose free-list heap.
//!
//! A conventional first-fit allocator over memory obtained from a
//! [`MoreCore`] source. Chunks carry an in-band 16-byte header:
//!
//! ```text
//!   chunk ─► ┌──────────────────────┬──────────────────────┐
//!            │ size | IN_USE        │ link                 │
//!            ├──────────────────────┴──────────────────────┤
//!   user  ─► │ payload (size - 16 bytes)                   │
//!            └─────────────────────────────────────────────┘
//! ```
//!
//! For free chunks `link` is the address of the next free chunk (0 ends the
//! list); the list is kept in address order so neighbours coalesce on free.
//! For live chunks `link` holds an owner tag derived from a per-instance key.
//!
//! The heap is not thread-safe. Callers serialize access (see the guard in
//! `poolheap-abi`).

use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{HeapConfig, HeapMode};
use crate::grower::{GrowError, MoreCore};
use crate::lifecycle::{EventRing, HeapEvent, HeapLogLevel};

/// Alignment of every pointer returned by [`FreeListHeap::allocate`].
pub const DEFAULT_ALIGN: usize = 16;

#[repr(C, align(16))]
struct ChunkHeader {
    size: usize,
    link: usize,
}

const HEADER_SIZE: usize = size_of::<ChunkHeader>();

/// Smallest chunk the heap ever creates (header plus one aligned payload unit).
pub const MIN_CHUNK: usize = HEADER_SIZE + DEFAULT_ALIGN;

const IN_USE: usize = 1;

/// Requests above this are refused before any arithmetic can overflow.
const MAX_REQUEST: usize = isize::MAX as usize / 4;

const MAX_GROW_GRANULE: usize = 1 << 30;

static INSTANCE_NONCE: AtomicU64 = AtomicU64::new(1);

/// Result of handing a pointer to [`FreeListHeap::free`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// The chunk went back onto the free list.
    Freed,
    /// Null pointer: no-op.
    Null,
    /// Hardened mode saw a chunk that is not in use.
    DoubleFree,
    /// Inside the pool but not the start of a live chunk. Nothing was written.
    InvalidPointer,
    /// Outside memory granted to this heap. Nothing was written.
    ForeignPointer,
}

impl FreeOutcome {
    /// Returns true for outcomes that indicate a caller contract violation.
    #[must_use]
    pub const fn is_adverse(self) -> bool {
        matches!(
            self,
            Self::DoubleFree | Self::InvalidPointer | Self::ForeignPointer
        )
    }
}

/// Point-in-time heap accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Live allocations.
    pub active_count: usize,
    /// Payload bytes of live chunks.
    pub bytes_in_use: usize,
    /// Bytes obtained from the region grower.
    pub heap_size: usize,
    /// Chunks on the free list.
    pub free_chunks: usize,
    /// Bytes on the free list (headers included).
    pub free_bytes: usize,
    /// Growth requests sent to the region grower.
    pub grow_calls: u64,
    /// Growth requests the region grower refused.
    pub grow_failures: u64,
    /// Double frees caught in hardened mode.
    pub double_frees: u64,
    /// In-pool pointers rejected in hardened mode (or misaligned in any mode).
    pub invalid_frees: u64,
    /// Frees of pointers outside this heap.
    pub foreign_frees: u64,
}

#[inline]
const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[inline]
fn header(addr: usize) -> *mut ChunkHeader {
    addr as *mut ChunkHeader
}

/// Chunk size (header included) needed to hold `size` payload bytes.
fn chunk_size_for(size: usize) -> Option<usize> {
    let request = size.max(1);
    if request > MAX_REQUEST {
        return None;
    }
    Some(align_up(request + HEADER_SIZE, DEFAULT_ALIGN).max(MIN_CHUNK))
}

/// Offset from a free chunk's start to the start of an aligned live chunk
/// that fits `need` bytes, if one exists inside `size`.
fn lead_for(chunk: usize, size: usize, need: usize, align: usize) -> Option<usize> {
    let user = chunk + HEADER_SIZE;
    let mut lead = align_up(user, align) - user;
    if lead != 0 && lead < MIN_CHUNK {
        // The leading gap must be able to stand alone as a free chunk.
        lead += align;
    }
    (lead.checked_add(need)? <= size).then_some(lead)
}

/// First-fit, address-ordered free-list heap over a [`MoreCore`] source.
pub struct FreeListHeap<M: MoreCore> {
    core: M,
    mode: HeapMode,
    grow_granule: usize,
    owner_key: u64,
    /// First free chunk (0 when the list is empty).
    free_head: usize,
    heap_start: usize,
    heap_end: usize,
    heap_size: usize,
    active_count: usize,
    bytes_in_use: usize,
    grow_calls: u64,
    grow_failures: u64,
    double_frees: u64,
    invalid_frees: u64,
    foreign_frees: u64,
    events: EventRing,
}

impl<M: MoreCore> FreeListHeap<M> {
    /// Build an empty heap. No memory is requested until the first allocation.
    pub fn new(mut core: M, config: &HeapConfig) -> Self {
        let brk = core.more_core(0).map_or(0, |p| p.as_ptr() as usize);
        let nonce = INSTANCE_NONCE.fetch_add(1, Ordering::Relaxed);
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"poolheap-owner-tag");
        hasher.update(&(brk as u64).to_le_bytes());
        hasher.update(&nonce.to_le_bytes());
        let digest = hasher.finalize();
        let mut key = [0u8; 8];
        key.copy_from_slice(&digest.as_bytes()[..8]);

        let granule = config.grow_granule.clamp(MIN_CHUNK, MAX_GROW_GRANULE);
        Self {
            core,
            mode: config.mode,
            grow_granule: align_up(granule, DEFAULT_ALIGN),
            owner_key: u64::from_le_bytes(key),
            free_head: 0,
            heap_start: 0,
            heap_end: 0,
            heap_size: 0,
            active_count: 0,
            bytes_in_use: 0,
            grow_calls: 0,
            grow_failures: 0,
            double_frees: 0,
            invalid_frees: 0,
            foreign_frees: 0,
            events: EventRing::default(),
        }
    }

    /// Allocate `size` bytes aligned to [`DEFAULT_ALIGN`]. Null on exhaustion.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        self.allocate_inner("malloc", size, DEFAULT_ALIGN)
    }

    /// Allocate `size` bytes aligned to `align`, which must be a power of two.
    /// Null on exhaustion or invalid alignment.
    pub fn allocate_aligned(&mut self, size: usize, align: usize) -> *mut u8 {
        if !align.is_power_of_two() || align > MAX_REQUEST {
            self.record(
                HeapLogLevel::Warn,
                "memalign",
                "invalid_alignment",
                None,
                Some(align),
                "denied",
            );
            return ptr::null_mut();
        }
        self.allocate_inner("memalign", size, align.max(DEFAULT_ALIGN))
    }

    fn allocate_inner(&mut self, symbol: &'static str, size: usize, align: usize) -> *mut u8 {
        let Some(need) = chunk_size_for(size) else {
            self.record(
                HeapLogLevel::Warn,
                symbol,
                "size_overflow",
                None,
                Some(size),
                "oom",
            );
            return ptr::null_mut();
        };

        let chunk = match self.take_fit(need, align) {
            Some(chunk) => chunk,
            None => {
                if !self.extend(need, align) {
                    self.record(HeapLogLevel::Warn, symbol, "alloc", None, Some(size), "oom");
                    return ptr::null_mut();
                }
                match self.take_fit(need, align) {
                    Some(chunk) => chunk,
                    None => {
                        self.record(
                            HeapLogLevel::Error,
                            symbol,
                            "fit_after_grow_failed",
                            None,
                            Some(size),
                            "oom",
                        );
                        return ptr::null_mut();
                    }
                }
            }
        };

        let tag = self.tag_for(chunk);
        // SAFETY: `take_fit` returned a chunk inside a granted region and
        // already wrote its header.
        let chunk_size = unsafe {
            let h = header(chunk);
            (*h).link = tag;
            (*h).size & !IN_USE
        };
        self.active_count += 1;
        self.bytes_in_use += chunk_size - HEADER_SIZE;
        let user = chunk + HEADER_SIZE;
        self.record(
            HeapLogLevel::Trace,
            symbol,
            "alloc",
            Some(user),
            Some(size),
            "success",
        );
        user as *mut u8
    }

    /// Return `ptr` to the heap. Null is a no-op.
    ///
    /// Pointers outside the granted range are always refused untouched, as
    /// are misaligned ones. In [`HeapMode::Hardened`] the chunk header is
    /// validated as well; in [`HeapMode::Strict`] freeing an in-range pointer
    /// that is not live is undefined behaviour, as with any C heap.
    pub fn free(&mut self, ptr: *mut u8) -> FreeOutcome {
        if ptr.is_null() {
            self.record(HeapLogLevel::Trace, "free", "free_null", None, None, "noop");
            return FreeOutcome::Null;
        }
        let addr = ptr as usize;
        if !self.core.owns(addr) {
            self.foreign_frees += 1;
            self.record(
                HeapLogLevel::Warn,
                "free",
                "foreign_pointer",
                Some(addr),
                None,
                "ignored",
            );
            return FreeOutcome::ForeignPointer;
        }
        let chunk = addr.wrapping_sub(HEADER_SIZE);
        if addr % DEFAULT_ALIGN != 0 || chunk < self.heap_start || !self.core.owns(chunk) {
            return self.refuse_invalid(addr, "not_a_chunk_start");
        }

        // SAFETY: `chunk` is aligned and inside memory granted to this heap.
        let (size_field, link) = unsafe {
            let h = header(chunk);
            ((*h).size, (*h).link)
        };
        let size = size_field & !IN_USE;

        if self.mode.validates_frees() {
            if size_field & IN_USE == 0 {
                self.double_frees += 1;
                self.record(
                    HeapLogLevel::Warn,
                    "free",
                    "double_free_detected",
                    Some(addr),
                    None,
                    "ignored",
                );
                return FreeOutcome::DoubleFree;
            }
            if link != self.tag_for(chunk) {
                return self.refuse_invalid(addr, "owner_tag_mismatch");
            }
            if size < MIN_CHUNK
                || size % DEFAULT_ALIGN != 0
                || chunk.checked_add(size).is_none_or(|end| end > self.heap_end)
            {
                return self.refuse_invalid(addr, "corrupt_chunk_header");
            }
        }

        let payload = size.saturating_sub(HEADER_SIZE);
        self.active_count = self.active_count.saturating_sub(1);
        self.bytes_in_use = self.bytes_in_use.saturating_sub(payload);
        self.insert_free(chunk, size);
        self.record(
            HeapLogLevel::Trace,
            "free",
            "free",
            Some(addr),
            Some(payload),
            "success",
        );
        FreeOutcome::Freed
    }

    fn refuse_invalid(&mut self, addr: usize, outcome: &'static str) -> FreeOutcome {
        self.invalid_frees += 1;
        self.record(
            HeapLogLevel::Warn,
            "free",
            "invalid_pointer",
            Some(addr),
            None,
            outcome,
        );
        FreeOutcome::InvalidPointer
    }

    /// Payload capacity of a live allocation, or `None` for pointers outside
    /// the heap. The header is trusted.
    #[must_use]
    pub fn usable_size(&self, ptr: *const u8) -> Option<usize> {
        let addr = ptr as usize;
        let chunk = addr.checked_sub(HEADER_SIZE)?;
        if addr % DEFAULT_ALIGN != 0 || chunk < self.heap_start || !self.core.owns(chunk) {
            return None;
        }
        // SAFETY: `chunk` is aligned and inside memory granted to this heap.
        let size = unsafe { (*header(chunk)).size } & !IN_USE;
        Some(size - HEADER_SIZE)
    }

    /// Returns true if `ptr` lies inside memory granted to this heap.
    #[must_use]
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.core.owns(ptr as usize)
    }

    fn tag_for(&self, chunk: usize) -> usize {
        ((self.owner_key ^ chunk as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1) as usize
    }

    fn set_next(&mut self, prev: usize, next: usize) {
        if prev == 0 {
            self.free_head = next;
        } else {
            // SAFETY: `prev` is a free chunk on this heap's list.
            unsafe { (*header(prev)).link = next };
        }
    }

    /// Unlink the first free chunk that can host `need` bytes at `align`,
    /// returning leading and trailing slack to the list.
    fn take_fit(&mut self, need: usize, align: usize) -> Option<usize> {
        let mut prev = 0;
        let mut cur = self.free_head;
        while cur != 0 {
            // SAFETY: free-list links only ever hold chunk addresses inside
            // granted regions.
            let (size, next) = unsafe {
                let h = header(cur);
                ((*h).size, (*h).link)
            };
            if let Some(lead) = lead_for(cur, size, need, align) {
                let chunk = cur + lead;
                let trail = size - lead - need;
                let mut taken = need;
                let mut after = next;
                // SAFETY (all writes below): every address lies within the
                // free chunk `[cur, cur + size)`.
                if trail >= MIN_CHUNK {
                    let rest = chunk + need;
                    unsafe { header(rest).write(ChunkHeader { size: trail, link: next }) };
                    after = rest;
                } else {
                    taken += trail;
                }
                let first = if lead > 0 {
                    unsafe { header(cur).write(ChunkHeader { size: lead, link: after }) };
                    cur
                } else {
                    after
                };
                self.set_next(prev, first);
                unsafe {
                    header(chunk).write(ChunkHeader {
                        size: taken | IN_USE,
                        link: 0,
                    });
                }
                return Some(chunk);
            }
            prev = cur;
            cur = next;
        }
        None
    }

    /// Put `[addr, addr + size)` on the free list, merging with adjacent
    /// free neighbours.
    fn insert_free(&mut self, addr: usize, size: usize) {
        let mut prev = 0;
        let mut cur = self.free_head;
        while cur != 0 && cur < addr {
            prev = cur;
            // SAFETY: `cur` is on the free list.
            cur = unsafe { (*header(cur)).link };
        }

        let mut size = size;
        let mut next = cur;
        if next != 0 && addr + size == next {
            // SAFETY: `next` is on the free list.
            let (next_size, next_link) = unsafe {
                let h = header(next);
                ((*h).size, (*h).link)
            };
            size += next_size;
            next = next_link;
        }

        if prev != 0 {
            // SAFETY: `prev` is on the free list.
            let prev_size = unsafe { (*header(prev)).size };
            if prev + prev_size == addr {
                unsafe { header(prev).write(ChunkHeader { size: prev_size + size, link: next }) };
                return;
            }
        }
        // SAFETY: `addr` starts a chunk of `size` bytes owned by this heap.
        unsafe { header(addr).write(ChunkHeader { size, link: next }) };
        self.set_next(prev, addr);
    }

    /// Size of the free chunk touching the current heap end, if any.
    fn tail_free_size(&self) -> usize {
        let mut cur = self.free_head;
        let mut last = (0, 0);
        while cur != 0 {
            // SAFETY: `cur` is on the free list.
            let (size, next) = unsafe {
                let h = header(cur);
                ((*h).size, (*h).link)
            };
            last = (cur, size);
            cur = next;
        }
        if last.0 != 0 && last.0 + last.1 == self.heap_end {
            last.1
        } else {
            0
        }
    }

    /// Bytes to request so a `need`-byte chunk at `align` fits at the heap tail.
    ///
    /// Measured from the current break: a free chunk ending there is merged
    /// with the new range, so its start decides the lead space.
    fn growth_shortfall(&mut self, need: usize, align: usize) -> Option<usize> {
        let raw = self.core.more_core(0).ok()?.as_ptr() as usize;
        let brk = align_up(raw, DEFAULT_ALIGN);
        let tail = if raw == self.heap_end {
            self.tail_free_size()
        } else {
            0
        };
        let user = brk - tail + HEADER_SIZE;
        let mut lead = align_up(user, align) - user;
        if lead != 0 && lead < MIN_CHUNK {
            lead += align;
        }
        let total = (brk - raw).checked_add(lead)?.checked_add(need)?;
        Some(align_up(
            total.saturating_sub(tail).max(MIN_CHUNK),
            DEFAULT_ALIGN,
        ))
    }

    /// Obtain enough backing memory for a `need`-byte chunk at `align`.
    ///
    /// Asks for at least the grow granule; if that is refused, retries with
    /// the exact shortfall so the last bytes of the pool stay usable.
    fn extend(&mut self, need: usize, align: usize) -> bool {
        let Some(shortfall) = self.growth_shortfall(need, align) else {
            self.record(
                HeapLogLevel::Warn,
                "morecore",
                "break_unavailable",
                None,
                Some(need),
                "oom",
            );
            return false;
        };
        let preferred = shortfall.max(self.grow_granule);

        let mut granted = self.request_core(preferred);
        if granted.is_none() && preferred > shortfall {
            granted = self.request_core(shortfall);
        }
        match granted {
            Some((start, len)) => {
                self.insert_free(start, len);
                true
            }
            None => false,
        }
    }

    fn request_core(&mut self, bytes: usize) -> Option<(usize, usize)> {
        let increment = isize::try_from(bytes).ok()?;
        self.grow_calls += 1;
        match self.core.more_core(increment) {
            Ok(region) => {
                let raw = region.as_ptr() as usize;
                let start = align_up(raw, DEFAULT_ALIGN);
                let len = bytes.saturating_sub(start - raw) & !(DEFAULT_ALIGN - 1);
                if len < MIN_CHUNK {
                    self.grow_failures += 1;
                    self.record(
                        HeapLogLevel::Info,
                        "morecore",
                        "grow_sliver",
                        Some(raw),
                        Some(bytes),
                        "discarded",
                    );
                    return None;
                }
                if self.heap_start == 0 || start < self.heap_start {
                    self.heap_start = start;
                }
                self.heap_end = self.heap_end.max(start + len);
                self.heap_size += len;
                self.record(
                    HeapLogLevel::Debug,
                    "morecore",
                    "grow",
                    Some(start),
                    Some(len),
                    "success",
                );
                Some((start, len))
            }
            Err(err) => {
                self.grow_failures += 1;
                let outcome = match err {
                    GrowError::Exhausted { .. } => "exhausted",
                    GrowError::ShrinkUnsupported { .. } => "rejected",
                };
                self.record(
                    HeapLogLevel::Info,
                    "morecore",
                    "grow_refused",
                    None,
                    Some(bytes),
                    outcome,
                );
                None
            }
        }
    }

    fn record(
        &mut self,
        level: HeapLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
    ) {
        self.events.push(HeapEvent {
            decision_id: 0,
            level,
            symbol,
            event,
            ptr,
            size,
            outcome,
            active_count: self.active_count,
            bytes_in_use: self.bytes_in_use,
            heap_size: self.heap_size,
        });
    }

    /// Current accounting. Walks the free list.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut free_chunks = 0;
        let mut free_bytes = 0;
        let mut cur = self.free_head;
        while cur != 0 {
            // SAFETY: `cur` is on the free list.
            let (size, next) = unsafe {
                let h = header(cur);
                ((*h).size, (*h).link)
            };
            free_chunks += 1;
            free_bytes += size;
            cur = next;
        }
        HeapStats {
            active_count: self.active_count,
            bytes_in_use: self.bytes_in_use,
            heap_size: self.heap_size,
            free_chunks,
            free_bytes,
            grow_calls: self.grow_calls,
            grow_failures: self.grow_failures,
            double_frees: self.double_frees,
            invalid_frees: self.invalid_frees,
            foreign_frees: self.foreign_frees,
        }
    }

    /// Check free-list structure: ordering, alignment, bounds and full
    /// coalescing of neighbours.
    pub fn verify_free_list(&self) -> Result<(), &'static str> {
        let mut prev_end = 0usize;
        let mut cur = self.free_head;
        while cur != 0 {
            if cur % DEFAULT_ALIGN != 0 {
                return Err("misaligned free chunk");
            }
            if cur < self.heap_start || cur >= self.heap_end {
                return Err("free chunk outside heap");
            }
            // SAFETY: bounds were checked above.
            let (size, next) = unsafe {
                let h = header(cur);
                ((*h).size, (*h).link)
            };
            if size & IN_USE != 0 {
                return Err("free chunk marked in use");
            }
            if size < MIN_CHUNK || size % DEFAULT_ALIGN != 0 {
                return Err("bad free chunk size");
            }
            if cur + size > self.heap_end {
                return Err("free chunk overruns heap end");
            }
            if prev_end != 0 && cur <= prev_end {
                return Err(if cur == prev_end {
                    "adjacent free chunks not coalesced"
                } else {
                    "free list out of address order"
                });
            }
            prev_end = cur + size;
            cur = next;
        }
        Ok(())
    }

    #[must_use]
    pub fn mode(&self) -> HeapMode {
        self.mode
    }

    #[must_use]
    pub fn grow_granule(&self) -> usize {
        self.grow_granule
    }

    /// The region source backing this heap.
    #[must_use]
    pub fn core(&self) -> &M {
        &self.core
    }

    /// Oldest-first view of buffered lifecycle events.
    pub fn events(&self) -> impl Iterator<Item = &HeapEvent> {
        self.events.iter()
    }

    /// Move buffered lifecycle events into `out`. See [`EventRing::drain_into`].
    pub fn drain_events(&mut self, out: &mut [HeapEvent]) -> usize {
        self.events.drain_into(out)
    }

    /// Events overwritten before they were drained.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    pub fn set_event_level(&mut self, level: HeapLogLevel) {
        self.events.set_min_level(level);
    }
}
