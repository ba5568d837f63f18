//! Leaf allocator over the host heap
//!
//! Performs genuine acquisition and release through `std::alloc` on every
//! call. No caching, no splitting: this is the raw backing-store collaborator
//! the layered allocators above it are built to shield callers from. Also
//! the allocator that hands a [`BestFitAllocator`](super::BestFitAllocator)
//! its one chunk.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use crate::alloc::{Allocation, Allocator, AllocatorId, Place};
use crate::error::{MemforgeError, MemforgeResult};

/// Fixed alignment for every extent served from the host heap
pub const HOST_ALIGNMENT: usize = 64;

/// Raw host-heap allocator
///
/// Every `allocate` is a real heap acquisition and every `free` a real
/// release. Outstanding-allocation counters exist so tests and callers can
/// surface leaks (an [`Allocation`] dropped without being freed).
#[derive(Debug)]
pub struct SystemAllocator {
    id: AllocatorId,
    outstanding: AtomicUsize,
    outstanding_bytes: AtomicUsize,
}

impl SystemAllocator {
    pub fn new() -> Self {
        SystemAllocator {
            id: AllocatorId::next(),
            outstanding: AtomicUsize::new(0),
            outstanding_bytes: AtomicUsize::new(0),
        }
    }

    /// Number of allocations handed out and not yet freed
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Bytes handed out and not yet freed
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes.load(Ordering::Relaxed)
    }

    fn layout_for(size: usize) -> MemforgeResult<Layout> {
        Layout::from_size_align(size, HOST_ALIGNMENT)
            .map_err(|e| MemforgeError::InvalidChunk(format!("unrepresentable layout: {}", e)))
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for SystemAllocator {
    fn allocate(&self, size: usize) -> MemforgeResult<Allocation> {
        if size == 0 {
            self.outstanding.fetch_add(1, Ordering::Relaxed);
            return Ok(Allocation::empty(Place::Host, self.id));
        }

        let layout = Self::layout_for(size)?;
        let ptr = unsafe { alloc(layout) };
        let ptr = NonNull::new(ptr).ok_or(MemforgeError::OutOfMemory {
            requested: size,
            available: 0,
            place: Place::Host,
        })?;

        self.outstanding.fetch_add(1, Ordering::Relaxed);
        self.outstanding_bytes.fetch_add(size, Ordering::Relaxed);
        trace!(size, ptr = ?ptr, "host allocation");

        Ok(Allocation::new(ptr, size, Place::Host, self.id))
    }

    fn free(&self, allocation: Allocation) -> MemforgeResult<()> {
        if allocation.owner() != self.id {
            return Err(MemforgeError::ForeignAllocation {
                owner: allocation.owner().raw(),
                receiver: self.id.raw(),
            });
        }

        let size = allocation.size();
        if size > 0 {
            let layout = Self::layout_for(size)?;
            unsafe { dealloc(allocation.as_ptr(), layout) };
            self.outstanding_bytes.fetch_sub(size, Ordering::Relaxed);
        }
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        trace!(size, "host free");
        Ok(())
    }

    fn place(&self) -> Place {
        Place::Host
    }

    fn id(&self) -> AllocatorId {
        self.id
    }
}
