//! Runtime configuration.
//!
//! The heap reads three environment variables:
//! - `POOLHEAP_MODE`: `strict` (default) trusts callers exactly like a C heap;
//!   `hardened` validates allocation tags on free and reports double frees and
//!   foreign pointers instead of corrupting the free list.
//! - `POOLHEAP_POOL_BYTES`: upper bound on the backing pool size. Accepts a
//!   plain byte count or a `K`/`M`/`G` suffix.
//! - `POOLHEAP_GROW_GRANULE`: smallest growth request the heap sends to the
//!   region grower.
//!
//! The mode is resolved once and cached in an atomic. Resolution happens while
//! the process may already be routing heap calls through us, so a reentrant
//! read during resolution observes the default instead of blocking.

use std::sync::atomic::{AtomicU8, Ordering};

/// Default upper bound for the backing pool.
pub const DEFAULT_POOL_BYTES: usize = 64 * 1024 * 1024;

/// Default minimum growth request.
pub const DEFAULT_GROW_GRANULE: usize = 64 * 1024;

const MODE_ENV: &str = "POOLHEAP_MODE";
const POOL_BYTES_ENV: &str = "POOLHEAP_POOL_BYTES";
const GROW_GRANULE_ENV: &str = "POOLHEAP_GROW_GRANULE";

/// How much the heap trusts the pointers handed to `free`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapMode {
    /// Reference behaviour: only the pool-range check runs on free.
    /// Double frees of in-pool pointers are undefined behaviour.
    #[default]
    Strict,
    /// Allocation tags and in-use flags are validated on every free.
    Hardened,
}

impl HeapMode {
    /// Parse from string (case-insensitive). Unknown values map to `Strict`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "hardened" | "checked" | "tagged" => Self::Hardened,
            _ => Self::Strict,
        }
    }

    /// Returns true if frees are validated against the owner tag.
    #[must_use]
    pub const fn validates_frees(self) -> bool {
        matches!(self, Self::Hardened)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Hardened => "hardened",
        }
    }
}

// Atomic cache: 0=unresolved, 1=Strict, 2=Hardened, 255=resolving.
static CACHED_MODE: AtomicU8 = AtomicU8::new(0);

const MODE_UNRESOLVED: u8 = 0;
const MODE_STRICT: u8 = 1;
const MODE_HARDENED: u8 = 2;
const MODE_RESOLVING: u8 = 255;

fn mode_to_u8(mode: HeapMode) -> u8 {
    match mode {
        HeapMode::Strict => MODE_STRICT,
        HeapMode::Hardened => MODE_HARDENED,
    }
}

fn u8_to_mode(v: u8) -> HeapMode {
    match v {
        MODE_HARDENED => HeapMode::Hardened,
        _ => HeapMode::Strict,
    }
}

/// Get the configured heap mode (reads env var on first call, caches thereafter).
#[must_use]
pub fn heap_mode() -> HeapMode {
    let cached = CACHED_MODE.load(Ordering::Relaxed);
    if cached != MODE_UNRESOLVED && cached != MODE_RESOLVING {
        return u8_to_mode(cached);
    }
    if cached == MODE_RESOLVING {
        return HeapMode::Strict;
    }

    if CACHED_MODE
        .compare_exchange(
            MODE_UNRESOLVED,
            MODE_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        let v = CACHED_MODE.load(Ordering::Relaxed);
        return if v != MODE_UNRESOLVED && v != MODE_RESOLVING {
            u8_to_mode(v)
        } else {
            HeapMode::Strict
        };
    }

    let mode = std::env::var(MODE_ENV)
        .map(|v| HeapMode::from_str_loose(&v))
        .unwrap_or_default();
    CACHED_MODE.store(mode_to_u8(mode), Ordering::Release);
    mode
}

/// Parse a byte count such as `4096`, `512K`, `64M` or `1G`.
///
/// Returns `None` for empty input, unknown suffixes and overflow.
#[must_use]
pub fn parse_byte_size(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    let (digits, shift) = match raw.as_bytes().last()? {
        b'k' | b'K' => (&raw[..raw.len() - 1], 10),
        b'm' | b'M' => (&raw[..raw.len() - 1], 20),
        b'g' | b'G' => (&raw[..raw.len() - 1], 30),
        _ => (raw, 0),
    };
    let value: usize = digits.trim().replace('_', "").parse().ok()?;
    value.checked_mul(1usize.checked_shl(shift)?)
}

/// Full heap configuration used when bootstrapping a pool-backed heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    pub mode: HeapMode,
    /// Upper bound on the backing pool. The platform may grant less.
    pub pool_limit: usize,
    /// Smallest growth request sent to the region grower.
    pub grow_granule: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            mode: HeapMode::Strict,
            pool_limit: DEFAULT_POOL_BYTES,
            grow_granule: DEFAULT_GROW_GRANULE,
        }
    }
}

impl HeapConfig {
    /// Assemble configuration from the environment, falling back to defaults
    /// for missing or malformed values.
    #[must_use]
    pub fn from_env() -> Self {
        let byte_env = |name: &str, default: usize| {
            std::env::var(name)
                .ok()
                .and_then(|v| parse_byte_size(&v))
                .filter(|&v| v > 0)
                .unwrap_or(default)
        };
        Self {
            mode: heap_mode(),
            pool_limit: byte_env(POOL_BYTES_ENV, DEFAULT_POOL_BYTES),
            grow_granule: byte_env(GROW_GRANULE_ENV, DEFAULT_GROW_GRANULE),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: HeapMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_pool_limit(mut self, pool_limit: usize) -> Self {
        self.pool_limit = pool_limit;
        self
    }

    #[must_use]
    pub fn with_grow_granule(mut self, grow_granule: usize) -> Self {
        self.grow_granule = grow_granule;
        self
    }
}
