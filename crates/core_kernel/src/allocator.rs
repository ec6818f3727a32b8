//! Identifier allocation
//!
//! Identifiers are handed out in contiguous blocks. A block is reserved with a
//! single atomic step, so concurrent ingestion runs never see the same value
//! and each run owns a gap-free span of keys without holding a lock while it
//! inserts rows.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::CoreError;

/// A contiguous, inclusive span of reserved identifier values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdBlock {
    first: i64,
    last: i64,
}

impl IdBlock {
    /// Creates a block covering `first..=last`
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if the span is empty or starts below 1
    pub fn new(first: i64, last: i64) -> Result<Self, CoreError> {
        if first < 1 {
            return Err(CoreError::validation(format!(
                "Identifier block must start at 1 or above, got {}",
                first
            )));
        }
        if last < first {
            return Err(CoreError::validation(format!(
                "Identifier block is empty: {}..={}",
                first, last
            )));
        }
        Ok(Self { first, last })
    }

    pub fn first(&self) -> i64 {
        self.first
    }

    pub fn last(&self) -> i64 {
        self.last
    }

    /// Number of identifiers in the block
    pub fn len(&self) -> u64 {
        (self.last - self.first + 1) as u64
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.first && value <= self.last
    }

    /// Returns true if the two blocks share at least one identifier
    pub fn overlaps(&self, other: &IdBlock) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

/// Source of monotonically increasing identifier blocks
pub trait IdAllocator: Send + Sync {
    /// Reserves `count` consecutive identifiers
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if `count` is zero
    fn reserve(&self, count: u64) -> Result<IdBlock, CoreError>;

    /// Returns the highest identifier reserved so far (0 when none)
    fn high_water(&self) -> i64;
}

/// Lock-free in-process allocator backed by an atomic counter
#[derive(Debug, Default)]
pub struct AtomicIdAllocator {
    last_reserved: AtomicI64,
}

impl AtomicIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an allocator that resumes after an already-used identifier
    pub fn starting_after(last_reserved: i64) -> Self {
        Self {
            last_reserved: AtomicI64::new(last_reserved.max(0)),
        }
    }
}

impl IdAllocator for AtomicIdAllocator {
    fn reserve(&self, count: u64) -> Result<IdBlock, CoreError> {
        if count == 0 {
            return Err(CoreError::validation("Cannot reserve an empty identifier block"));
        }
        let count = i64::try_from(count)
            .map_err(|_| CoreError::validation("Identifier block size overflows i64"))?;
        let previous = self.last_reserved.fetch_add(count, Ordering::SeqCst);
        IdBlock::new(previous + 1, previous + count)
    }

    fn high_water(&self) -> i64 {
        self.last_reserved.load(Ordering::SeqCst)
    }
}
