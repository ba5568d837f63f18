//! Best-fit free-list allocator over one fixed chunk
//!
//! Owns exactly one contiguous extent obtained from a leaf allocator and
//! partitions it into used/free blocks. Allocation splits the smallest
//! sufficient free block; free eagerly merges with free address-neighbors,
//! so no two adjacent blocks are ever both free. The chunk is never grown:
//! when no free block can satisfy a request the allocator fails immediately
//! and leaves recovery to the layer above
//! (see [`BufferedAllocator`](super::BufferedAllocator)).
//!
//! # Block bookkeeping
//!
//! Blocks exactly tile the chunk and live in an address-ordered map keyed by
//! offset, which makes the left/right neighbor lookup for coalescing a range
//! query instead of pointer chasing. Free blocks are additionally indexed in
//! a `(size, offset)` ordered set so the best-fit lookup is logarithmic with
//! a deterministic lowest-offset tie-break.

use std::collections::{BTreeMap, BTreeSet};
use std::ptr::NonNull;
use std::sync::Mutex;

use tracing::{debug, trace};

use crate::alloc::{Allocation, Allocator, AllocatorId, Place};
use crate::error::{MemforgeError, MemforgeResult};

#[derive(Debug, Clone, Copy)]
struct Block {
    size: usize,
    used: bool,
}

#[derive(Debug)]
struct FreeListState {
    /// The one chunk this allocator partitions; held until `into_chunk`
    chunk: Allocation,
    /// Every block, used and free, keyed by offset; exactly tiles the chunk
    blocks: BTreeMap<usize, Block>,
    /// Free blocks keyed by (size, offset) for best-fit lookup
    free_index: BTreeSet<(usize, usize)>,
    allocated_bytes: usize,
    outstanding: usize,
}

/// Best-fit allocator over a single pre-acquired chunk
///
/// All mutation happens under one internal lock, so a shared
/// `Arc<BestFitAllocator>` is safe to hammer from multiple threads.
#[derive(Debug)]
pub struct BestFitAllocator {
    id: AllocatorId,
    place: Place,
    base: NonNull<u8>,
    capacity: usize,
    state: Mutex<FreeListState>,
}

// The chunk extent is exclusively owned by this allocator and only touched
// under the state lock.
unsafe impl Send for BestFitAllocator {}
unsafe impl Sync for BestFitAllocator {}

impl BestFitAllocator {
    /// Take exclusive ownership of `chunk` and serve allocations from it.
    ///
    /// The chunk must be non-empty; it is never resized or released until
    /// [`into_chunk`](Self::into_chunk).
    pub fn new(chunk: Allocation) -> MemforgeResult<Self> {
        if chunk.is_empty() {
            return Err(MemforgeError::InvalidChunk(
                "chunk capacity cannot be zero".to_string(),
            ));
        }

        let base = chunk.handle();
        let capacity = chunk.size();
        let place = chunk.place();

        let mut blocks = BTreeMap::new();
        blocks.insert(
            0,
            Block {
                size: capacity,
                used: false,
            },
        );
        let mut free_index = BTreeSet::new();
        free_index.insert((capacity, 0));

        debug!(capacity, %place, "best-fit allocator over new chunk");

        Ok(BestFitAllocator {
            id: AllocatorId::next(),
            place,
            base,
            capacity,
            state: Mutex::new(FreeListState {
                chunk,
                blocks,
                free_index,
                allocated_bytes: 0,
                outstanding: 0,
            }),
        })
    }

    /// Release the chunk back to whoever acquired it.
    ///
    /// Fails with [`MemforgeError::AllocationsOutstanding`] while any
    /// allocation served from the chunk is still live.
    pub fn into_chunk(self) -> MemforgeResult<Allocation> {
        let state = self.state.into_inner()?;
        if state.outstanding > 0 {
            return Err(MemforgeError::AllocationsOutstanding(state.outstanding));
        }
        Ok(state.chunk)
    }

    /// Total chunk capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently handed out
    pub fn allocated_bytes(&self) -> MemforgeResult<usize> {
        Ok(self.state.lock()?.allocated_bytes)
    }

    /// Bytes currently free across all free blocks
    pub fn free_bytes(&self) -> MemforgeResult<usize> {
        Ok(self.capacity - self.state.lock()?.allocated_bytes)
    }

    /// Number of allocations handed out and not yet freed
    pub fn outstanding(&self) -> MemforgeResult<usize> {
        Ok(self.state.lock()?.outstanding)
    }

    /// Size of the largest free block, or 0 when the chunk is exhausted
    pub fn largest_free_block(&self) -> MemforgeResult<usize> {
        let state = self.state.lock()?;
        Ok(state
            .free_index
            .iter()
            .next_back()
            .map(|&(size, _)| size)
            .unwrap_or(0))
    }

    /// Number of free fragments
    pub fn fragment_count(&self) -> MemforgeResult<usize> {
        Ok(self.state.lock()?.free_index.len())
    }

    /// Fragmentation ratio: 0.0 when free space is one contiguous block,
    /// approaching 1.0 as free space scatters
    pub fn fragmentation(&self) -> MemforgeResult<f32> {
        let state = self.state.lock()?;
        let free: usize = self.capacity - state.allocated_bytes;
        if free == 0 {
            return Ok(0.0);
        }
        let largest = state
            .free_index
            .iter()
            .next_back()
            .map(|&(size, _)| size)
            .unwrap_or(0);
        Ok(1.0 - (largest as f32 / free as f32))
    }

    fn offset_of(&self, allocation: &Allocation) -> usize {
        allocation.as_ptr() as usize - self.base.as_ptr() as usize
    }

    fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        // Offsets come from the block map, which tiles the chunk, so the
        // result stays inside the owned extent.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }
}

impl Allocator for BestFitAllocator {
    fn allocate(&self, size: usize) -> MemforgeResult<Allocation> {
        let mut state = self.state.lock()?;

        if size == 0 {
            state.outstanding += 1;
            return Ok(Allocation::empty(self.place, self.id));
        }

        // Smallest free block with size >= requested; ties break to the
        // lowest offset.
        let found = state
            .free_index
            .range((size, 0)..)
            .next()
            .copied();
        let Some((block_size, offset)) = found else {
            return Err(MemforgeError::OutOfMemory {
                requested: size,
                available: self.capacity - state.allocated_bytes,
                place: self.place,
            });
        };

        state.free_index.remove(&(block_size, offset));

        if block_size == size {
            let block = state
                .blocks
                .get_mut(&offset)
                .ok_or_else(|| MemforgeError::InvalidChunk("free index out of sync".into()))?;
            block.used = true;
            trace!(offset, size, "exact-fit block");
        } else {
            // Split: front half is handed out, remainder stays free.
            let remainder = block_size - size;
            state.blocks.insert(offset, Block { size, used: true });
            state.blocks.insert(
                offset + size,
                Block {
                    size: remainder,
                    used: false,
                },
            );
            state.free_index.insert((remainder, offset + size));
            trace!(offset, size, remainder, "split block");
        }

        state.allocated_bytes += size;
        state.outstanding += 1;

        Ok(Allocation::new(
            self.ptr_at(offset),
            size,
            self.place,
            self.id,
        ))
    }

    fn free(&self, allocation: Allocation) -> MemforgeResult<()> {
        if allocation.owner() != self.id {
            return Err(MemforgeError::ForeignAllocation {
                owner: allocation.owner().raw(),
                receiver: self.id.raw(),
            });
        }

        let mut state = self.state.lock()?;

        if allocation.is_empty() {
            state.outstanding -= 1;
            return Ok(());
        }

        let mut offset = self.offset_of(&allocation);
        let mut size = allocation.size();

        match state.blocks.get_mut(&offset) {
            Some(block) if block.used && block.size == size => block.used = false,
            _ => {
                return Err(MemforgeError::InvalidChunk(format!(
                    "no used block at offset {}",
                    offset
                )))
            }
        }

        // Merge with a free right neighbor.
        let right = state
            .blocks
            .range(offset + size..)
            .next()
            .map(|(&o, &b)| (o, b));
        if let Some((right_offset, right)) = right {
            if !right.used && right_offset == offset + size {
                state.blocks.remove(&right_offset);
                state.free_index.remove(&(right.size, right_offset));
                size += right.size;
                trace!(offset, merged = right_offset, "coalesced right");
            }
        }

        // Merge with a free left neighbor.
        let left = state
            .blocks
            .range(..offset)
            .next_back()
            .map(|(&o, &b)| (o, b));
        if let Some((left_offset, left)) = left {
            if !left.used && left_offset + left.size == offset {
                state.blocks.remove(&offset);
                state.free_index.remove(&(left.size, left_offset));
                size += left.size;
                offset = left_offset;
                trace!(offset, "coalesced left");
            }
        }

        state.blocks.insert(offset, Block { size, used: false });
        state.free_index.insert((size, offset));
        state.allocated_bytes -= allocation.size();
        state.outstanding -= 1;
        Ok(())
    }

    fn place(&self) -> Place {
        self.place
    }

    fn id(&self) -> AllocatorId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SystemAllocator;

    fn chunk_of(bytes: usize) -> (SystemAllocator, Allocation) {
        let raw = SystemAllocator::new();
        let chunk = raw.allocate(bytes).unwrap();
        (raw, chunk)
    }

    /// Walk the block map and check that blocks exactly tile the chunk,
    /// that no two adjacent blocks are both free, and that both indexes
    /// agree.
    fn assert_invariants(alloc: &BestFitAllocator) {
        let state = alloc.state.lock().unwrap();
        let mut cursor = 0;
        let mut prev_free = false;
        let mut free_total = 0;
        for (&offset, block) in &state.blocks {
            assert_eq!(offset, cursor, "gap or overlap at offset {}", offset);
            assert!(block.size > 0);
            if !block.used {
                assert!(!prev_free, "adjacent free blocks at offset {}", offset);
                assert!(state.free_index.contains(&(block.size, offset)));
                free_total += block.size;
            }
            prev_free = !block.used;
            cursor += block.size;
        }
        assert_eq!(cursor, alloc.capacity, "blocks do not tile the chunk");
        assert_eq!(free_total, alloc.capacity - state.allocated_bytes);
        assert_eq!(
            state.free_index.len(),
            state.blocks.values().filter(|b| !b.used).count()
        );
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let raw = SystemAllocator::new();
        let chunk = raw.allocate(0).unwrap();
        let err = BestFitAllocator::new(chunk).unwrap_err();
        assert!(matches!(err, MemforgeError::InvalidChunk(_)));
    }

    #[test]
    fn test_split_and_exact_fit() {
        let (raw, chunk) = chunk_of(2048);
        let alloc = BestFitAllocator::new(chunk).unwrap();

        let a = alloc.allocate(800).unwrap();
        assert_eq!(a.size(), 800);
        assert_invariants(&alloc);

        // Remainder is 1248; an exact-fit request consumes it whole.
        let b = alloc.allocate(1248).unwrap();
        assert_eq!(alloc.free_bytes().unwrap(), 0);
        assert_invariants(&alloc);

        alloc.free(a).unwrap();
        alloc.free(b).unwrap();
        assert_invariants(&alloc);
        assert_eq!(alloc.fragment_count().unwrap(), 1);
        assert_eq!(alloc.largest_free_block().unwrap(), 2048);

        raw.free(alloc.into_chunk().unwrap()).unwrap();
        assert_eq!(raw.outstanding(), 0);
    }

    #[test]
    fn test_best_fit_prefers_smallest_sufficient_block() {
        let (_raw, chunk) = chunk_of(4096);
        let alloc = BestFitAllocator::new(chunk).unwrap();

        // Carve holes of 512 and 256 separated by live blocks.
        let a = alloc.allocate(512).unwrap();
        let keep1 = alloc.allocate(128).unwrap();
        let b = alloc.allocate(256).unwrap();
        let keep2 = alloc.allocate(128).unwrap();
        alloc.free(a).unwrap();
        alloc.free(b).unwrap();
        assert_invariants(&alloc);

        // 200 fits both holes; best-fit must take the 256 hole.
        let c = alloc.allocate(200).unwrap();
        assert_eq!(alloc.state.lock().unwrap().blocks[&(512 + 128)].size, 200);
        assert_invariants(&alloc);

        alloc.free(keep1).unwrap();
        alloc.free(keep2).unwrap();
        alloc.free(c).unwrap();
        assert_invariants(&alloc);
    }

    #[test]
    fn test_coalescing_both_sides() {
        let (_raw, chunk) = chunk_of(3072);
        let alloc = BestFitAllocator::new(chunk).unwrap();

        let a = alloc.allocate(1024).unwrap();
        let b = alloc.allocate(1024).unwrap();
        let c = alloc.allocate(1024).unwrap();

        alloc.free(a).unwrap();
        alloc.free(c).unwrap();
        assert_eq!(alloc.fragment_count().unwrap(), 2);

        // Freeing the middle block merges left and right into one.
        alloc.free(b).unwrap();
        assert_eq!(alloc.fragment_count().unwrap(), 1);
        assert_eq!(alloc.largest_free_block().unwrap(), 3072);
        assert_invariants(&alloc);
    }

    #[test]
    fn test_oom_without_growth() {
        let (_raw, chunk) = chunk_of(1024);
        let alloc = BestFitAllocator::new(chunk).unwrap();
        let err = alloc.allocate(1025).unwrap_err();
        assert!(matches!(
            err,
            MemforgeError::OutOfMemory {
                requested: 1025,
                available: 1024,
                ..
            }
        ));
    }

    #[test]
    fn test_oom_from_fragmentation() {
        let (_raw, chunk) = chunk_of(1024);
        let alloc = BestFitAllocator::new(chunk).unwrap();

        let a = alloc.allocate(256).unwrap();
        let b = alloc.allocate(256).unwrap();
        let c = alloc.allocate(256).unwrap();
        let d = alloc.allocate(256).unwrap();
        alloc.free(a).unwrap();
        alloc.free(c).unwrap();

        // 512 bytes free in total, but the largest hole is 256.
        assert_eq!(alloc.free_bytes().unwrap(), 512);
        let err = alloc.allocate(512).unwrap_err();
        assert!(err.is_out_of_memory());
        assert!(alloc.fragmentation().unwrap() > 0.0);

        alloc.free(b).unwrap();
        alloc.free(d).unwrap();
        assert_invariants(&alloc);
    }

    #[test]
    fn test_zero_size_allocation_leaves_blocks_untouched() {
        let (_raw, chunk) = chunk_of(512);
        let alloc = BestFitAllocator::new(chunk).unwrap();
        let a = alloc.allocate(0).unwrap();
        assert!(a.is_empty());
        assert_eq!(alloc.fragment_count().unwrap(), 1);
        assert_eq!(alloc.free_bytes().unwrap(), 512);
        alloc.free(a).unwrap();
        assert_eq!(alloc.outstanding().unwrap(), 0);
    }

    #[test]
    fn test_into_chunk_refuses_while_outstanding() {
        let (_raw, chunk) = chunk_of(512);
        let alloc = BestFitAllocator::new(chunk).unwrap();
        let _a = alloc.allocate(100).unwrap();
        let err = alloc.into_chunk().unwrap_err();
        assert!(matches!(err, MemforgeError::AllocationsOutstanding(1)));
    }

    #[test]
    fn test_churn_keeps_invariants() {
        let (_raw, chunk) = chunk_of(8192);
        let alloc = BestFitAllocator::new(chunk).unwrap();

        let mut live: Vec<Allocation> = Vec::new();
        let sizes = [64, 512, 128, 1024, 256, 96, 2048, 32];
        for round in 0..6 {
            for &size in &sizes {
                if let Ok(a) = alloc.allocate(size) {
                    live.push(a);
                }
            }
            // Free every other live allocation, oldest first.
            let mut kept = Vec::new();
            for (i, a) in live.drain(..).enumerate() {
                if i % 2 == round % 2 {
                    kept.push(a);
                } else {
                    alloc.free(a).unwrap();
                }
            }
            live = kept;
            assert_invariants(&alloc);
        }
        for a in live {
            alloc.free(a).unwrap();
        }
        assert_invariants(&alloc);
        assert_eq!(alloc.fragment_count().unwrap(), 1);
    }
}
