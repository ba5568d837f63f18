//! Common test doubles for allocator call accounting
//!
//! The allocator chain's contracts are about *which* calls reach the
//! wrapped allocator and how many times, so the doubles here wrap a real
//! allocator and count calls through shared atomic counters the test keeps
//! a handle to after the double is boxed into a chain.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use memforge::{Allocation, Allocator, AllocatorId, MemforgeError, MemforgeResult, Place};

/// Shared allocate/free call counters
#[derive(Debug, Default)]
pub struct Counters {
    allocs: AtomicUsize,
    frees: AtomicUsize,
}

impl Counters {
    pub fn allocs(&self) -> usize {
        self.allocs.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.allocs.store(0, Ordering::SeqCst);
        self.frees.store(0, Ordering::SeqCst);
    }
}

/// Pass-through allocator that counts every call reaching `inner`
pub struct CountingAllocator<A: Allocator> {
    inner: A,
    counters: Arc<Counters>,
}

impl<A: Allocator> CountingAllocator<A> {
    pub fn new(inner: A) -> (Self, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (
            CountingAllocator {
                inner,
                counters: Arc::clone(&counters),
            },
            counters,
        )
    }
}

impl<A: Allocator> Allocator for CountingAllocator<A> {
    fn allocate(&self, size: usize) -> MemforgeResult<Allocation> {
        self.counters.allocs.fetch_add(1, Ordering::SeqCst);
        self.inner.allocate(size)
    }

    fn free(&self, allocation: Allocation) -> MemforgeResult<()> {
        self.counters.frees.fetch_add(1, Ordering::SeqCst);
        self.inner.free(allocation)
    }

    fn place(&self) -> Place {
        self.inner.place()
    }

    fn id(&self) -> AllocatorId {
        self.inner.id()
    }
}

/// Shared control/observation handle for a [`FlakyAllocator`]
///
/// The test keeps this after the allocator itself is boxed into a chain.
#[derive(Debug, Default)]
pub struct FlakyState {
    counters: Counters,
    fail_budget: AtomicUsize,
}

impl FlakyState {
    pub fn allocs(&self) -> usize {
        self.counters.allocs()
    }

    pub fn frees(&self) -> usize {
        self.counters.frees()
    }

    pub fn reset(&self) {
        self.counters.reset();
    }

    /// Make the next `n` allocate calls fail with OutOfMemory.
    pub fn fail_next(&self, n: usize) {
        self.fail_budget.store(n, Ordering::SeqCst);
    }
}

/// Counting allocator that refuses allocate calls with out-of-memory while
/// its fail budget lasts, then delegates again
pub struct FlakyAllocator<A: Allocator> {
    inner: A,
    state: Arc<FlakyState>,
}

impl<A: Allocator> FlakyAllocator<A> {
    pub fn new(inner: A) -> (Self, Arc<FlakyState>) {
        let state = Arc::new(FlakyState::default());
        (
            FlakyAllocator {
                inner,
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl<A: Allocator> Allocator for FlakyAllocator<A> {
    fn allocate(&self, size: usize) -> MemforgeResult<Allocation> {
        self.state.counters.allocs.fetch_add(1, Ordering::SeqCst);
        if self
            .state
            .fail_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MemforgeError::OutOfMemory {
                requested: size,
                available: 0,
                place: self.inner.place(),
            });
        }
        self.inner.allocate(size)
    }

    fn free(&self, allocation: Allocation) -> MemforgeResult<()> {
        self.state.counters.frees.fetch_add(1, Ordering::SeqCst);
        self.inner.free(allocation)
    }

    fn place(&self) -> Place {
        self.inner.place()
    }

    fn id(&self) -> AllocatorId {
        self.inner.id()
    }
}
