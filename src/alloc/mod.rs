//! Allocation primitives and the allocator capability contract
//!
//! Every allocator in this crate implements the [`Allocator`] trait and can
//! be chained behind a [`BufferedAllocator`] to arbitrary depth: the leaf
//! performs genuine acquisition against a backing store, [`BestFitAllocator`]
//! partitions one chunk obtained from a leaf, and [`BufferedAllocator`]
//! decorates any of them with a lazy-free reuse cache.
//!
//! An [`Allocation`] is a move-only value. `free` consumes it by value, so a
//! double free does not compile; routing it to an allocator instance other
//! than the one that produced it is detected at runtime via the stamped
//! [`AllocatorId`] and fails fast instead of corrupting allocator state.

pub mod best_fit;
pub mod buffered;
pub mod system;

pub use best_fit::BestFitAllocator;
pub use buffered::BufferedAllocator;
pub use system::SystemAllocator;

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::MemforgeResult;

/// Backing store a block of memory resides on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Place {
    /// Host (process heap) memory
    Host,
    /// Device memory, identified by device ordinal
    Device(u32),
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Host => write!(f, "host"),
            Place::Device(id) => write!(f, "device:{}", id),
        }
    }
}

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one allocator instance
///
/// Stamped on every allocation an instance produces, so frees routed to the
/// wrong instance can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocatorId(u64);

impl AllocatorId {
    pub(crate) fn next() -> Self {
        AllocatorId(NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>)  -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One contiguous memory extent handed to a caller
///
/// Move-only by construction: no `Clone`, no `Copy`. The holder has
/// exclusive ownership of the extent until it is handed back via
/// [`Allocator::free`]. Dropping an `Allocation` without freeing it leaks
/// the extent; leak accounting lives in the producing allocator
/// (`outstanding()` / `allocated_bytes()` accessors) so tests can surface
/// that.
///
/// A zero-sized allocation is a valid sentinel: it carries a dangling,
/// well-aligned handle and touches no allocator state.
#[derive(Debug)]
pub struct Allocation {
    ptr: NonNull<u8>,
    size: usize,
    place: Place,
    owner: AllocatorId,
}

// The extent behind `ptr` is exclusively owned by whoever holds the
// Allocation, so moving it across threads is sound.
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

impl Allocation {
    pub(crate) fn new(ptr: NonNull<u8>, size: usize, place: Place, owner: AllocatorId) -> Self {
        Allocation {
            ptr,
            size,
            place,
            owner,
        }
    }

    /// Zero-sized sentinel allocation stamped with `owner`
    pub(crate) fn empty(place: Place, owner: AllocatorId) -> Self {
        Allocation {
            ptr: NonNull::dangling(),
            size: 0,
            place,
            owner,
        }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn handle(&self) -> NonNull<u8> {
        self.ptr
    }

    /// True size of the extent in bytes
    ///
    /// A block reused from a [`BufferedAllocator`] cache reports the cached
    /// block's full size, which may exceed what the caller requested.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn place(&self) -> Place {
        self.place
    }

    /// Identity of the allocator instance that must reclaim this allocation
    pub fn owner(&self) -> AllocatorId {
        self.owner
    }

    /// Re-stamp ownership on hand-off between chained allocators.
    pub(crate) fn set_owner(&mut self, owner: AllocatorId) {
        self.owner = owner;
    }
}

/// Capability contract implemented by every allocator in the chain
///
/// All operations on a single instance are synchronized under one exclusive
/// critical section internally; instances are shared across threads as
/// `Arc<dyn Allocator>`.
pub trait Allocator: Send + Sync {
    /// Produce an allocation of at least `size` bytes, or fail with
    /// [`crate::MemforgeError::OutOfMemory`].
    fn allocate(&self, size: usize) -> MemforgeResult<Allocation>;

    /// Reclaim an allocation previously produced by this instance.
    ///
    /// Consumes the allocation; fails fast with
    /// [`crate::MemforgeError::ForeignAllocation`] if it was produced by a
    /// different instance.
    fn free(&self, allocation: Allocation) -> MemforgeResult<()>;

    /// Backing store this allocator serves from
    fn place(&self) -> Place;

    /// Identity of this allocator instance
    fn id(&self) -> AllocatorId;
}
