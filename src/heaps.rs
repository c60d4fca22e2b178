//! The context that owns every allocator and chunk record.
//!
//! There is no global state: a [`Heaps`] value is the registry of live
//! allocators, the pool their chunk records come from, and the policy for
//! validating handles. Every operation goes through it.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use log::debug;
use snafu::ensure;

use crate::allocator::{AllocatorId, RemoteAllocator, Segment};
use crate::chunklist::{Chunk, ChunkHandle, ChunkPool, Validity};
use crate::error::{
    Error, MemoryHandleFreedSnafu, Result, UnknownAllocatorSnafu, UnknownMemoryHandleSnafu,
};
use crate::status::{AllocatorStatus, ChunkInfo};
use crate::trace::{AllocatorEvent, LogTrace, MemEvent, TraceSink};

/// How much [`Heaps::validate_handle`] checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationPolicy {
    /// Handles are returned as they are. For callers that validate handles
    /// in their own layer.
    Trusted,
    /// Handles are checked against the live chunks of registered allocators.
    #[default]
    Scanning,
}

/// Settings for a [`Heaps`] context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub policy: ValidationPolicy,
    /// Upper bound on the number of chunk records alive at once, across all
    /// allocators. `None` means unbounded.
    pub max_chunks: Option<usize>,
}

impl Config {
    pub const fn new() -> Self {
        Config {
            policy: ValidationPolicy::Scanning,
            max_chunks: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

/// A registry of allocators sharing one chunk pool.
pub struct Heaps<T = LogTrace> {
    policy: ValidationPolicy,
    pool: ChunkPool,
    allocators: BTreeMap<AllocatorId, RemoteAllocator>,
    next_id: u32,
    trace: T,
}

impl Heaps<LogTrace> {
    pub const fn new() -> Self {
        Heaps::with_config(Config::new())
    }

    pub const fn with_config(config: Config) -> Self {
        Heaps::with_trace(config, LogTrace)
    }
}

impl Default for Heaps<LogTrace> {
    fn default() -> Self {
        Heaps::new()
    }
}

impl<T: TraceSink> Heaps<T> {
    pub const fn with_trace(config: Config, trace: T) -> Self {
        Heaps {
            policy: config.policy,
            pool: ChunkPool::new(config.max_chunks),
            allocators: BTreeMap::new(),
            next_id: 0,
            trace,
        }
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ValidationPolicy) {
        self.policy = policy;
    }

    pub fn trace(&self) -> &T {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut T {
        &mut self.trace
    }

    pub fn pool(&self) -> &ChunkPool {
        &self.pool
    }

    /// Ids of all registered allocators, in creation order.
    pub fn allocator_ids(&self) -> impl Iterator<Item = AllocatorId> + '_ {
        self.allocators.keys().copied()
    }

    pub fn allocator(&self, id: AllocatorId) -> Result<&RemoteAllocator> {
        self.allocators.get(&id).ok_or(Error::UnknownAllocator)
    }

    fn chunk(&self, handle: ChunkHandle) -> Result<&Chunk> {
        let index = self.pool.lookup(handle)?;
        Ok(&self.pool[index])
    }

    // Resolve a handle that must belong to allocator `id`.
    fn owned(&self, id: AllocatorId, handle: ChunkHandle) -> Result<usize> {
        let index = self.pool.lookup(handle)?;
        ensure!(self.pool[index].owner == id, UnknownAllocatorSnafu);
        Ok(index)
    }

    ////////////////////////////////////////////////////////////
    // Allocator lifecycle

    /// Register a new allocator managing `[base, base + size)`.
    pub fn create_allocator(&mut self, size: u32, base: u32, name: &str) -> Result<AllocatorId> {
        let id = AllocatorId(self.next_id);
        let allocator = RemoteAllocator::new(&mut self.pool, id, size, base, name)?;
        self.next_id += 1;

        debug!("Created {} '{}' at {:#x}+{:#x}", id, name, base, size);
        self.trace
            .allocator_event(AllocatorEvent::Create, allocator.name(), size);
        self.allocators.insert(id, allocator);
        Ok(id)
    }

    /// Unregister an allocator, reclaiming all of its chunks, used or not.
    ///
    /// Handles into the allocator stop resolving; they validate as unknown.
    pub fn destroy_allocator(&mut self, id: AllocatorId) -> Result<()> {
        let allocator = self.allocators.remove(&id).ok_or(Error::UnknownAllocator)?;
        self.trace
            .allocator_event(AllocatorEvent::Destroy, allocator.name(), allocator.size());
        let released = allocator.destroy(&mut self.pool);
        debug!("Destroyed {}, released {} chunks", id, released);
        Ok(())
    }

    pub fn resize_allocator(&mut self, id: AllocatorId, new_size: u32) -> Result<()> {
        let allocator = self
            .allocators
            .get_mut(&id)
            .ok_or(Error::UnknownAllocator)?;
        allocator.resize(&mut self.pool, new_size)?;
        self.trace
            .allocator_event(AllocatorEvent::Resize, allocator.name(), new_size);
        Ok(())
    }

    ////////////////////////////////////////////////////////////
    // Allocation

    /// Allocate `size` bytes inside `segment`, starting at a multiple of
    /// `align` (0 or 1 for no alignment), tagged with `domain`.
    pub fn alloc(
        &mut self,
        id: AllocatorId,
        size: u32,
        align: u32,
        segment: Segment,
        domain: u32,
    ) -> Result<ChunkHandle> {
        let allocator = self
            .allocators
            .get_mut(&id)
            .ok_or(Error::UnknownAllocator)?;
        let handle = allocator.alloc(&mut self.pool, size, align, segment, domain)?;

        let chunk = self.chunk(handle)?;
        let (offset, size) = (chunk.offset, chunk.size);
        self.trace.mem_event(MemEvent::Alloc, offset, size);
        Ok(handle)
    }

    /// Move the edges of a used chunk so it covers
    /// `[target, target + new_size)`, growing into free neighbours or giving
    /// space back to them. The handle stays the same.
    pub fn realloc(
        &mut self,
        id: AllocatorId,
        handle: ChunkHandle,
        new_size: u32,
        target: u32,
        align: u32,
    ) -> Result<ChunkHandle> {
        ensure!(self.allocators.contains_key(&id), UnknownAllocatorSnafu);
        let index = self.owned(id, handle)?;
        let allocator = self
            .allocators
            .get_mut(&id)
            .ok_or(Error::UnknownAllocator)?;
        allocator.realloc(&mut self.pool, index, new_size, target, align)?;

        let chunk = &self.pool[index];
        let (offset, size) = (chunk.offset, chunk.size);
        self.trace.mem_event(MemEvent::Realloc, offset, size);
        Ok(handle)
    }

    /// Release a used chunk. Freeing it twice fails with `MemoryHandleFreed`.
    pub fn free(&mut self, id: AllocatorId, handle: ChunkHandle) -> Result<()> {
        ensure!(self.allocators.contains_key(&id), UnknownAllocatorSnafu);
        let index = self.owned(id, handle)?;
        let chunk = &self.pool[index];
        ensure!(!chunk.is_free(), MemoryHandleFreedSnafu);
        let (offset, size) = (chunk.offset, chunk.size);

        let allocator = self
            .allocators
            .get_mut(&id)
            .ok_or(Error::UnknownAllocator)?;
        allocator.free(&mut self.pool, index)?;
        self.trace.mem_event(MemEvent::Free, offset, size);
        Ok(())
    }

    ////////////////////////////////////////////////////////////
    // Introspection

    /// Block and byte counts for an allocator.
    pub fn status(&self, id: AllocatorId, segment: Segment) -> Result<AllocatorStatus> {
        Ok(self.allocator(id)?.status(&self.pool, segment))
    }

    pub fn offset(&self, handle: ChunkHandle) -> Result<u32> {
        Ok(self.chunk(handle)?.offset)
    }

    pub fn size(&self, handle: ChunkHandle) -> Result<u32> {
        Ok(self.chunk(handle)?.size)
    }

    pub fn allocator_size(&self, id: AllocatorId) -> Result<u32> {
        Ok(self.allocator(id)?.size())
    }

    /// Attach a caller-defined tag to a chunk.
    pub fn set_user_data(&mut self, handle: ChunkHandle, value: u16) -> Result<()> {
        let index = self.pool.lookup(handle)?;
        self.pool[index].user_data = value;
        Ok(())
    }

    /// The caller-defined tag of a chunk, and the allocator owning it.
    pub fn user_data(&self, handle: ChunkHandle) -> Result<(u16, AllocatorId)> {
        let chunk = self.chunk(handle)?;
        Ok((chunk.user_data, chunk.owner))
    }

    /// Check that a handle denotes a live, used chunk, as far as the
    /// configured [`ValidationPolicy`] asks for.
    pub fn validate_handle(&self, handle: ChunkHandle) -> Result<ChunkHandle> {
        if self.policy == ValidationPolicy::Trusted {
            return Ok(handle);
        }

        let chunk = self.chunk(handle)?;
        ensure!(
            self.allocators.contains_key(&chunk.owner),
            UnknownMemoryHandleSnafu
        );
        ensure!(!chunk.is_free(), MemoryHandleFreedSnafu);
        Ok(handle)
    }

    /// All chunks of an allocator, in address order.
    pub fn chunks(&self, id: AllocatorId) -> Result<impl Iterator<Item = ChunkInfo> + '_> {
        Ok(self.allocator(id)?.infos(&self.pool))
    }

    /// Log every chunk overlapping `[start, end)` at debug level, and return
    /// them.
    pub fn dump(&self, id: AllocatorId, start: u32, end: u32) -> Result<Vec<ChunkInfo>> {
        let allocator = self.allocator(id)?;
        let lines: Vec<ChunkInfo> = allocator
            .infos(&self.pool)
            .filter(|info| start < end && info.offset < end && info.end() > u64::from(start))
            .collect();

        debug!(
            "{} '{}' [{:#x}, {:#x}): {} chunks",
            id,
            allocator.name(),
            start,
            end,
            lines.len()
        );
        for line in &lines {
            debug!("  {}", line);
        }
        Ok(lines)
    }

    /// Run the integrity check on an allocator's chunk list.
    pub fn validity(&self, id: AllocatorId) -> Result<Validity> {
        Ok(self.allocator(id)?.validity(&self.pool))
    }
}
