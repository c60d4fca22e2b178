#![no_std]

//! A manager for remotely visible memory regions.
//!
//! This crate hands out non-overlapping ranges of a flat, offset-addressed
//! region, such as a shared address range visible to a co-processor. It never
//! reads or writes the memory itself; it only keeps track of which offsets are
//! free and which are in use.
//!
//! ## Basic Types
//!
//! ### [`Heaps`](struct.Heaps.html)
//!
//! The context every operation goes through. It owns the registry of
//! allocators, the pool their chunk records come from, the handle validation
//! policy and a [`TraceSink`](trace/trait.TraceSink.html).
//!
//! ### [`RemoteAllocator`](allocator/struct.RemoteAllocator.html)
//!
//! A single-threaded manager for one range of offsets: size-binned free lists,
//! aligned best-fit allocation within a segment, in-place reallocation and
//! merging of free neighbours.
//!
//! ### [`LockedHeaps`](struct.LockedHeaps.html)
//!
//! A `Heaps` behind a spin lock, for sharing one context between threads.
//!
//! ```
//! use remote_heap::{Heaps, Segment};
//!
//! let mut heaps = Heaps::new();
//! let dsp = heaps.create_allocator(0x1_0000, 0x8000_0000, "dsp").unwrap();
//!
//! let buffer = heaps
//!     .alloc(dsp, 0x400, 0x100, Segment::new(0x8000_0000, 0x1_0000), 1)
//!     .unwrap();
//! assert_eq!(heaps.offset(buffer), Ok(0x8000_0000));
//!
//! heaps.free(dsp, buffer).unwrap();
//! heaps.destroy_allocator(dsp).unwrap();
//! ```

extern crate alloc;

pub mod allocator;
pub mod bins;
pub mod chunklist;
pub mod error;
pub mod heaps;
pub mod status;
pub mod trace;

use spin::{Mutex, MutexGuard};

pub use crate::allocator::{AllocatorId, RemoteAllocator, Segment};
pub use crate::chunklist::{ChunkHandle, ChunkStatus, Validity};
pub use crate::error::{Error, Result};
pub use crate::heaps::{Config, Heaps, ValidationPolicy};
pub use crate::status::{AllocatorStatus, ChunkInfo, SegmentStats};
pub use crate::trace::{LogTrace, TraceSink};

/// A thread-safe context, using a spin lock around a `Heaps`.
///
/// Operations on a `Heaps` are short and never block, so a spin lock is
/// enough to serialize them.
pub struct LockedHeaps<T = LogTrace> {
    inner: Mutex<Heaps<T>>,
}

impl LockedHeaps<LogTrace> {
    pub const fn new() -> Self {
        LockedHeaps::from_heaps(Heaps::new())
    }
}

impl Default for LockedHeaps<LogTrace> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockedHeaps<T> {
    pub const fn from_heaps(heaps: Heaps<T>) -> Self {
        LockedHeaps {
            inner: Mutex::new(heaps),
        }
    }

    /// Get exclusive access to the context. Every other caller spins until
    /// the guard is dropped.
    pub fn lock(&self) -> MutexGuard<'_, Heaps<T>> {
        self.inner.lock()
    }

    pub fn into_inner(self) -> Heaps<T> {
        self.inner.into_inner()
    }
}
