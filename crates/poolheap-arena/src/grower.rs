//! Demand-driven bump region grower ("more-core").
//!
//! The allocator core asks for more backing memory through [`MoreCore`]. The
//! bump grower answers by advancing a `used` boundary inside the backing pool
//! and handing back the start of the freshly granted range. Granted ranges
//! never overlap and never move; nothing is ever given back.

use std::ptr::NonNull;

use thiserror::Error;

use crate::pool::BackingPool;

/// A refused growth request. `Exhausted` is the out-of-memory sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GrowError {
    #[error("pool exhausted: requested {requested} bytes, {remaining} remaining")]
    Exhausted { requested: usize, remaining: usize },
    #[error("shrinking the arena is not supported (requested {requested})")]
    ShrinkUnsupported { requested: isize },
}

/// Region-supply interface consumed by the allocator core.
pub trait MoreCore {
    /// Extend the region by `increment` bytes and return the start of the new
    /// range. `0` returns the current break without change.
    fn more_core(&mut self, increment: isize) -> Result<NonNull<u8>, GrowError>;

    /// Returns true if `addr` lies inside memory this source has granted.
    fn owns(&self, addr: usize) -> bool;
}

/// Grower state: `{ used, capacity }` over one backing pool.
#[derive(Debug)]
pub struct BumpGrower {
    pool: BackingPool,
    used: usize,
}

impl BumpGrower {
    #[must_use]
    pub fn new(pool: BackingPool) -> Self {
        Self { pool, used: 0 }
    }

    /// Extend `used` by `requested` bytes.
    ///
    /// On success returns `base + old_used`. On failure `used` is unchanged,
    /// and a later request that fits still succeeds.
    pub fn grow(&mut self, requested: isize) -> Result<NonNull<u8>, GrowError> {
        if requested < 0 {
            return Err(GrowError::ShrinkUnsupported { requested });
        }
        let requested = requested as usize;
        let remaining = self.remaining();
        if requested > remaining {
            return Err(GrowError::Exhausted {
                requested,
                remaining,
            });
        }
        let old_used = self.used;
        self.used = old_used + requested;
        // SAFETY: `old_used <= capacity`, so the offset stays within (or one
        // past the end of) the pool block.
        Ok(unsafe { self.pool.base().add(old_used) })
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used
    }

    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.pool.base()
    }

    #[must_use]
    pub fn pool(&self) -> &BackingPool {
        &self.pool
    }
}

impl MoreCore for BumpGrower {
    fn more_core(&mut self, increment: isize) -> Result<NonNull<u8>, GrowError> {
        self.grow(increment)
    }

    fn owns(&self, addr: usize) -> bool {
        let start = self.base().as_ptr() as usize;
        addr >= start && addr - start < self.used
    }
}
