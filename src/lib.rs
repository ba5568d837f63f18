//! memforge - buffered best-fit memory allocation subsystem
//!
//! Two layered allocators behind one capability trait:
//!
//! - [`BestFitAllocator`] partitions a single pre-acquired chunk with a
//!   best-fit free list and eager coalescing.
//! - [`BufferedAllocator`] decorates any [`Allocator`] with a lazy-free
//!   reuse cache, amortizing expensive acquire/release calls into the
//!   backing store.
//! - [`SystemAllocator`] is the host-heap leaf that performs genuine
//!   acquisition and release.
//!
//! Allocators chain to arbitrary depth and every instance is safe to share
//! across threads:
//!
//! ```
//! use memforge::{Allocator, BestFitAllocator, BufferedAllocator, SystemAllocator};
//!
//! let raw = SystemAllocator::new();
//! let chunk = raw.allocate(1 << 20)?;
//! let best_fit = BestFitAllocator::new(chunk)?;
//! let pool = BufferedAllocator::new(Box::new(best_fit));
//!
//! let a = pool.allocate(4096)?;
//! pool.free(a)?;            // parked in the cache, chunk untouched
//! let b = pool.allocate(4000)?; // reused from the cache
//! assert!(b.size() >= 4000);
//! pool.free(b)?;
//! pool.clear_cache()?;      // real release back to the best-fit chunk
//! # Ok::<(), memforge::MemforgeError>(())
//! ```

pub mod alloc;
pub mod error;
pub mod logging;

pub use alloc::{
    Allocation, Allocator, AllocatorId, BestFitAllocator, BufferedAllocator, Place,
    SystemAllocator,
};
pub use error::{MemforgeError, MemforgeResult};
pub use logging::{init_logging, init_logging_from_env, LogFormat, LogLevel};
