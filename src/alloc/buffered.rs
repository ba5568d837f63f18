//! Caching decorator over any allocator
//!
//! Wraps an owned [`Allocator`] and shields it from churn: `free` never
//! reaches the wrapped allocator, it parks the block in a size-keyed cache
//! instead, and `allocate` serves from that cache best-fit whenever it can.
//! Cached blocks are handed back whole, so a caller may receive a block
//! larger than it asked for.
//!
//! The wrapped allocator's `free` runs only on [`clear_cache`] or on the
//! out-of-memory fallback: when the wrapped allocator refuses a request,
//! the whole cache is flushed back to it and the request is retried exactly
//! once. Backing allocators whose acquire/release cost is dominated by
//! fixed overhead or synchronization amortize that overhead across an
//! allocate/free cycle of similar sizes.
//!
//! [`clear_cache`]: BufferedAllocator::clear_cache

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::{trace, warn};

use crate::alloc::{Allocation, Allocator, AllocatorId, Place};
use crate::error::{MemforgeError, MemforgeResult};

#[derive(Debug, Default)]
struct CacheState {
    /// Cached allocations keyed by (size, insertion seq); an ordered
    /// multiset so best-fit lookup is a range query with FIFO tie-break
    cache: BTreeMap<(usize, u64), Allocation>,
    next_seq: u64,
    cached_bytes: usize,
}

impl CacheState {
    /// Drain every cached entry back to the wrapped allocator.
    fn flush(&mut self, wrapped: &dyn Allocator) -> MemforgeResult<()> {
        let owner = wrapped.id();
        while let Some(((size, _), mut entry)) = self.cache.pop_first() {
            entry.set_owner(owner);
            wrapped.free(entry)?;
            self.cached_bytes -= size;
        }
        Ok(())
    }
}

/// Lazy-free caching allocator wrapping any [`Allocator`]
///
/// Holds the wrapped allocator by `Box<dyn Allocator>`, so chains of
/// arbitrary depth compose (a buffered allocator over a best-fit allocator
/// over a leaf, or buffered over buffered).
pub struct BufferedAllocator {
    id: AllocatorId,
    wrapped: Box<dyn Allocator>,
    state: Mutex<CacheState>,
}

impl BufferedAllocator {
    pub fn new(wrapped: Box<dyn Allocator>) -> Self {
        BufferedAllocator {
            id: AllocatorId::next(),
            wrapped,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Bytes parked in the cache
    pub fn cached_bytes(&self) -> MemforgeResult<usize> {
        Ok(self.state.lock()?.cached_bytes)
    }

    /// Number of cached blocks
    pub fn cached_blocks(&self) -> MemforgeResult<usize> {
        Ok(self.state.lock()?.cache.len())
    }

    /// Eagerly release every cached allocation to the wrapped allocator.
    ///
    /// The only path that performs real release. A no-op on an empty
    /// cache: zero wrapped-allocator calls.
    pub fn clear_cache(&self) -> MemforgeResult<()> {
        let mut state = self.state.lock()?;
        let drained = state.cache.len();
        state.flush(&*self.wrapped)?;
        if drained > 0 {
            trace!(drained, "cache cleared");
        }
        Ok(())
    }
}

impl Allocator for BufferedAllocator {
    fn allocate(&self, size: usize) -> MemforgeResult<Allocation> {
        let mut state = self.state.lock()?;

        // Smallest cached block with size >= requested; reused whole,
        // never split.
        let hit = state.cache.range((size, 0)..).next().map(|(&key, _)| key);
        if let Some(key) = hit {
            let mut entry = state
                .cache
                .remove(&key)
                .ok_or_else(|| MemforgeError::LockPoisoned("cache index out of sync".into()))?;
            state.cached_bytes -= key.0;
            entry.set_owner(self.id);
            trace!(requested = size, reused = key.0, "cache hit");
            return Ok(entry);
        }

        match self.wrapped.allocate(size) {
            Ok(mut fresh) => {
                fresh.set_owner(self.id);
                Ok(fresh)
            }
            Err(err) if err.is_out_of_memory() => {
                // One bounded recovery step: give everything back and ask
                // again.
                warn!(requested = size, "wrapped allocator exhausted, flushing cache and retrying");
                state.flush(&*self.wrapped)?;
                let mut fresh = self.wrapped.allocate(size)?;
                fresh.set_owner(self.id);
                Ok(fresh)
            }
            Err(err) => Err(err),
        }
    }

    fn free(&self, allocation: Allocation) -> MemforgeResult<()> {
        if allocation.owner() != self.id {
            return Err(MemforgeError::ForeignAllocation {
                owner: allocation.owner().raw(),
                receiver: self.id.raw(),
            });
        }

        // Lazy free: park the block for reuse, never release it here.
        let mut state = self.state.lock()?;
        let size = allocation.size();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.cache.insert((size, seq), allocation);
        state.cached_bytes += size;
        trace!(size, "cached freed block");
        Ok(())
    }

    fn place(&self) -> Place {
        self.wrapped.place()
    }

    fn id(&self) -> AllocatorId {
        self.id
    }
}
