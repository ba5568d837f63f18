//! Unified error handling for memforge
//!
//! This module provides a centralized error type for the allocation
//! subsystem. The only failure a well-behaved caller ever sees is
//! `OutOfMemory`; the remaining variants are fail-fast contract violations
//! (freeing through the wrong allocator, tearing down an allocator that
//! still has live allocations) that indicate a bug in the caller rather
//! than a recoverable condition.

use crate::alloc::Place;

/// Unified error type for the memforge allocation subsystem
#[derive(Debug, thiserror::Error)]
pub enum MemforgeError {
    /// No allocator in the chain could produce a block of the requested size
    #[error("out of memory: requested {requested} bytes, {available} free on {place}")]
    OutOfMemory {
        requested: usize,
        available: usize,
        place: Place,
    },

    /// An allocation was handed back to an allocator that did not produce it
    #[error("allocation owned by allocator #{owner} was freed through allocator #{receiver}")]
    ForeignAllocation { owner: u64, receiver: u64 },

    /// Allocator teardown was requested while allocations are still live
    #[error("cannot release chunk: {0} allocation(s) still outstanding")]
    AllocationsOutstanding(usize),

    /// Invalid chunk or allocator configuration
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    /// Internal lock poisoned - this indicates a bug
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for MemforgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        MemforgeError::LockPoisoned(format!("lock poisoned: {}", err))
    }
}

impl MemforgeError {
    /// True for the one recoverable failure kind; everything else is a
    /// caller contract violation.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, MemforgeError::OutOfMemory { .. })
    }
}

pub type MemforgeResult<T> = Result<T, MemforgeError>;
