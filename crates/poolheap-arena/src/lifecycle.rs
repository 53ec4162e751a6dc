//! Heap lifecycle records.
//!
//! The heap runs underneath the process allocator, so its log cannot allocate.
//! Records are `Copy`, carry only `&'static str` labels, and live in a
//! fixed-capacity ring that overwrites the oldest entry when full.

/// Severity of a lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeapLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl HeapLogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// One structured heap event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapEvent {
    /// Monotonic decision/event id (starts at 1).
    pub decision_id: u64,
    pub level: HeapLogLevel,
    /// Entry point (`malloc`, `memalign`, `free`, `morecore`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `grow`, `double_free_detected`, ...).
    pub event: &'static str,
    /// Address involved, if any.
    pub ptr: Option<usize>,
    /// Size involved, if any.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Snapshot: live allocation count.
    pub active_count: usize,
    /// Snapshot: bytes handed to callers and not yet freed.
    pub bytes_in_use: usize,
    /// Snapshot: bytes obtained from the region grower so far.
    pub heap_size: usize,
}

/// Default ring capacity.
pub const EVENT_RING_CAPACITY: usize = 256;

const EMPTY_EVENT: HeapEvent = HeapEvent {
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

/// Fixed-capacity event ring.
#[derive(Debug, Clone)]
pub struct EventRing<const N: usize = EVENT_RING_CAPACITY> {
    slots: [HeapEvent; N],
    /// Index of the oldest record.
    head: usize,
    len: usize,
    next_decision_id: u64,
    dropped: u64,
    min_level: HeapLogLevel,
}

impl<const N: usize> EventRing<N> {
    #[must_use]
    pub const fn new(min_level: HeapLogLevel) -> Self {
        Self {
            slots: [EMPTY_EVENT; N],
            head: 0,
            len: 0,
            next_decision_id: 1,
            dropped: 0,
            min_level,
        }
    }

    /// Records below this level are counted in `decision_id` but not stored.
    pub fn set_min_level(&mut self, level: HeapLogLevel) {
        self.min_level = level;
    }

    #[must_use]
    pub fn min_level(&self) -> HeapLogLevel {
        self.min_level
    }

    /// Assign a decision id and store the event if it passes the level filter.
    /// Returns the assigned id.
    pub fn push(&mut self, mut event: HeapEvent) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        event.decision_id = id;
        if event.level < self.min_level || N == 0 {
            return id;
        }
        if self.len == N {
            self.slots[self.head] = event;
            self.head = (self.head + 1) % N;
            self.dropped += 1;
        } else {
            self.slots[(self.head + self.len) % N] = event;
            self.len += 1;
        }
        id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records overwritten before they were drained.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Oldest-first view of the stored records.
    pub fn iter(&self) -> impl Iterator<Item = &HeapEvent> {
        (0..self.len).map(move |i| &self.slots[(self.head + i) % N])
    }

    /// Copy stored records oldest-first into `out` and clear the ring.
    /// Returns how many were copied; records that do not fit are discarded.
    pub fn drain_into(&mut self, out: &mut [HeapEvent]) -> usize {
        let n = self.len.min(out.len());
        for (i, slot) in out.iter_mut().take(n).enumerate() {
            *slot = self.slots[(self.head + i) % N];
        }
        self.head = 0;
        self.len = 0;
        n
    }
}

impl<const N: usize> Default for EventRing<N> {
    fn default() -> Self {
        Self::new(HeapLogLevel::Trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(level: HeapLogLevel, name: &'static str) -> HeapEvent {
        HeapEvent {
            level,
            event: name,
            ..EMPTY_EVENT
        }
    }

    #[test]
    fn ids_are_monotonic_and_start_at_one() {
        let mut ring: EventRing<4> = EventRing::default();
        assert_eq!(ring.push(event(HeapLogLevel::Trace, "a")), 1);
        assert_eq!(ring.push(event(HeapLogLevel::Trace, "b")), 2);
        let ids: Vec<u64> = ring.iter().map(|e| e.decision_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn full_ring_overwrites_oldest_and_counts_drops() {
        let mut ring: EventRing<3> = EventRing::default();
        for name in ["a", "b", "c", "d", "e"] {
            ring.push(event(HeapLogLevel::Info, name));
        }
        let names: Vec<&str> = ring.iter().map(|e| e.event).collect();
        assert_eq!(names, vec!["c", "d", "e"]);
        assert_eq!(ring.dropped(), 2);
    }

    #[test]
    fn level_filter_skips_storage_but_consumes_ids() {
        let mut ring: EventRing<4> = EventRing::new(HeapLogLevel::Info);
        ring.push(event(HeapLogLevel::Trace, "quiet"));
        let id = ring.push(event(HeapLogLevel::Warn, "loud"));
        assert_eq!(id, 2);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.iter().next().map(|e| e.event), Some("loud"));
    }

    #[test]
    fn drain_copies_oldest_first_and_clears() {
        let mut ring: EventRing<3> = EventRing::default();
        for name in ["a", "b", "c", "d"] {
            ring.push(event(HeapLogLevel::Debug, name));
        }
        let mut out = [EMPTY_EVENT; 8];
        let n = ring.drain_into(&mut out);
        assert_eq!(n, 3);
        assert_eq!(
            out[..n].iter().map(|e| e.event).collect::<Vec<_>>(),
            vec!["b", "c", "d"]
        );
        assert!(ring.is_empty());
    }
}
