//! Chunk records, the pool they live in, and the lists that link them.
//!
//! Every chunk of every allocator lives in a single [`ChunkPool`] arena and
//! is addressed by its slot index. An allocator's [`ChunkList`] threads its
//! chunks together twice:
//!
//! - once in address order, covering the allocator's whole range with no gaps
//!   and no overlaps, and
//! - once more, for free chunks only, in one of [`BIN_COUNT`] size bins, each
//!   sorted by ascending size.
//!
//! The list primitives here (split, merge, unlink, bin insert/remove) keep
//! both orders consistent; the policy of when to call them lives in
//! [`crate::allocator`].

use alloc::vec::Vec;
use core::fmt;

use snafu::ensure;

use crate::allocator::AllocatorId;
use crate::bins::{bin_index, BIN_COUNT};
use crate::error::{Error, OutOfMemorySnafu, Result};

/// Whether a chunk is handed out to a caller or available for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkStatus {
    Free,
    Used,
}

/// The caller-visible name for a chunk.
///
/// A handle stays valid until the chunk is freed. The generation tag makes
/// sure a stale handle can never alias a chunk that later reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for ChunkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// A contiguous range of offsets within one allocator.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub(crate) offset: u32,
    pub(crate) size: u32,
    pub(crate) status: ChunkStatus,
    pub(crate) domain: u32,
    pub(crate) user_data: u16,
    pub(crate) owner: AllocatorId,

    // Address order
    prev: Option<usize>,
    next: Option<usize>,

    // Bin membership, only for free chunks
    bin: Option<usize>,
    bin_prev: Option<usize>,
    bin_next: Option<usize>,
}

impl Chunk {
    pub(crate) fn free(owner: AllocatorId, offset: u32, size: u32) -> Chunk {
        debug_assert!(size > 0, "chunks are never empty");
        Chunk {
            offset,
            size,
            status: ChunkStatus::Free,
            domain: 0,
            user_data: 0,
            owner,
            prev: None,
            next: None,
            bin: None,
            bin_prev: None,
            bin_next: None,
        }
    }

    /// One past the last offset covered by this chunk.
    ///
    /// This can be `2^32` for a chunk at the very top of the offset space, so
    /// it is widened.
    pub(crate) fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.size)
    }

    pub(crate) fn is_free(&self) -> bool {
        self.status == ChunkStatus::Free
    }

    pub(crate) fn prev(&self) -> Option<usize> {
        self.prev
    }

    pub(crate) fn next(&self) -> Option<usize> {
        self.next
    }
}

/// Why a slot's chunk went away. Used to classify stale handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retirement {
    /// The chunk was free and got merged into a neighbour, or trimmed off the
    /// end of its allocator.
    Absorbed,
    /// The chunk was reclaimed when its allocator was destroyed.
    Reclaimed,
}

struct Slot {
    generation: u32,
    chunk: Option<Chunk>,
    // Handles with an older generation were reclaimed along with their
    // allocator.
    reclaimed_below: u32,
}

/// The arena every chunk record is allocated from.
///
/// Optionally bounded: once `limit` records are live, [`ensure_capacity`]
/// fails with [`Error::OutOfMemory`], and every operation that may need new
/// records calls it before changing anything.
///
/// [`ensure_capacity`]: ChunkPool::ensure_capacity
pub struct ChunkPool {
    slots: Vec<Slot>,
    vacant: Vec<usize>,
    live: usize,
    limit: Option<usize>,
}

impl Default for ChunkPool {
    fn default() -> Self {
        ChunkPool::new(None)
    }
}

impl ChunkPool {
    pub const fn new(limit: Option<usize>) -> Self {
        ChunkPool {
            slots: Vec::new(),
            vacant: Vec::new(),
            live: 0,
            limit,
        }
    }

    /// Number of chunk records currently in use, across all allocators.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Check that `nodes` more records can be acquired.
    pub fn ensure_capacity(&self, nodes: usize) -> Result<()> {
        if let Some(limit) = self.limit {
            ensure!(self.live + nodes <= limit, OutOfMemorySnafu);
        }
        Ok(())
    }

    /// Store a new chunk record, and return its index.
    ///
    /// Callers are expected to have checked [`ensure_capacity`] first; this
    /// never fails, it only enforces the limit in debug builds.
    ///
    /// [`ensure_capacity`]: ChunkPool::ensure_capacity
    pub(crate) fn acquire(&mut self, chunk: Chunk) -> usize {
        debug_assert!(self.ensure_capacity(1).is_ok(), "chunk pool exhausted");
        self.live += 1;
        if let Some(index) = self.vacant.pop() {
            let slot = &mut self.slots[index];
            debug_assert!(slot.chunk.is_none());
            slot.chunk = Some(chunk);
            return index;
        }

        self.slots.push(Slot {
            generation: 0,
            chunk: Some(chunk),
            reclaimed_below: 0,
        });
        self.slots.len() - 1
    }

    /// Drop a chunk record. The caller must already have unlinked it from
    /// every list.
    pub(crate) fn release(&mut self, index: usize, retired: Retirement) -> Chunk {
        let slot = &mut self.slots[index];
        let chunk = slot
            .chunk
            .take()
            .expect("released a chunk slot that was already vacant");
        debug_assert!(chunk.bin.is_none(), "released a chunk still in a bin");
        slot.generation = slot.generation.wrapping_add(1);
        if retired == Retirement::Reclaimed {
            slot.reclaimed_below = slot.generation;
        }
        self.live -= 1;
        self.vacant.push(index);
        chunk
    }

    /// Start a new generation for a live record, so that handles issued for
    /// an earlier allocation of the same record stop resolving.
    pub(crate) fn reissue(&mut self, index: usize) -> ChunkHandle {
        let slot = &mut self.slots[index];
        debug_assert!(slot.chunk.is_some(), "reissued a vacant chunk slot");
        slot.generation = slot.generation.wrapping_add(1);
        self.handle(index)
    }

    pub(crate) fn handle(&self, index: usize) -> ChunkHandle {
        ChunkHandle {
            index: index as u32,
            generation: self.slots[index].generation,
        }
    }

    /// Resolve a handle to the index of its live chunk record.
    ///
    /// Fails with [`Error::MemoryHandleFreed`] if the chunk was freed and has
    /// since been merged away, and with [`Error::UnknownMemoryHandle`] if the
    /// handle was never issued or its allocator was destroyed. A handle to a
    /// chunk that is free but still has its own record resolves fine; callers
    /// check the status themselves.
    pub(crate) fn lookup(&self, handle: ChunkHandle) -> Result<usize> {
        let index = handle.index as usize;
        let slot = self.slots.get(index).ok_or(Error::UnknownMemoryHandle)?;

        if handle.generation == slot.generation {
            return match slot.chunk {
                Some(_) => Ok(index),
                None => Err(Error::UnknownMemoryHandle),
            };
        }

        if handle.generation > slot.generation {
            // Not issued yet
            return Err(Error::UnknownMemoryHandle);
        }

        if handle.generation < slot.reclaimed_below {
            return Err(Error::UnknownMemoryHandle);
        }

        Err(Error::MemoryHandleFreed)
    }
}

impl core::ops::Index<usize> for ChunkPool {
    type Output = Chunk;

    fn index(&self, index: usize) -> &Chunk {
        self.slots[index]
            .chunk
            .as_ref()
            .expect("chunk links must point at live slots")
    }
}

impl core::ops::IndexMut<usize> for ChunkPool {
    fn index_mut(&mut self, index: usize) -> &mut Chunk {
        self.slots[index]
            .chunk
            .as_mut()
            .expect("chunk links must point at live slots")
    }
}

/// Which side of a split the new, free piece ends up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Low,
    High,
}

/// The address-ordered chunk list and the free bins of one allocator.
///
/// It maintains a few internal invariants:
///
/// - The address-ordered list starts at the allocator's base, and each chunk
///   ends exactly where the next one starts.
/// - No two neighbouring chunks are both free (those are merged).
/// - Each free chunk sits in bin `bin_index(size)`, each used chunk in no bin.
/// - Each bin is sorted by size, then by offset.
pub struct ChunkList {
    head: usize,
    tail: usize,
    bins: [Option<usize>; BIN_COUNT],
}

pub struct ChunkIter<'pool> {
    pool: &'pool ChunkPool,
    next: Option<usize>,
}

impl<'pool> Iterator for ChunkIter<'pool> {
    type Item = (usize, &'pool Chunk);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next.take()?;
        let pool = self.pool;
        let chunk = &pool[index];
        self.next = chunk.next;
        Some((index, chunk))
    }
}

pub struct BinIter<'pool> {
    pool: &'pool ChunkPool,
    next: Option<usize>,
}

impl<'pool> Iterator for BinIter<'pool> {
    type Item = (usize, &'pool Chunk);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next.take()?;
        let pool = self.pool;
        let chunk = &pool[index];
        self.next = chunk.bin_next;
        Some((index, chunk))
    }
}

/// Validity contains a representation of all invalid states found in a
/// `ChunkList`.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Validity {
    /// Number of chunks that do not start exactly where their predecessor
    /// ends (or, for the first chunk, at the allocator base).
    ///
    /// This covers gaps, overlaps, and out of order chunks alike.
    pub gaps: usize,

    /// Number of free chunks directly following another free chunk. These
    /// should have been merged.
    pub adjacent_free: usize,

    /// Number of chunks whose bin membership is wrong: free chunks in the
    /// wrong bin or in none, used chunks in a bin, and bin entries that are
    /// not in the address-ordered list.
    pub misbinned: usize,

    /// Number of bin entries smaller than their predecessor in the bin.
    pub unsorted: usize,

    /// Whether the chunk sizes fail to add up to the allocator size.
    pub size_mismatch: bool,
}

impl Validity {
    /// Returns a boolean - a simple check if all cases are 0
    pub fn is_valid(&self) -> bool {
        self.gaps == 0
            && self.adjacent_free == 0
            && self.misbinned == 0
            && self.unsorted == 0
            && !self.size_mismatch
    }
}

impl From<Validity> for bool {
    fn from(v: Validity) -> bool {
        v.is_valid()
    }
}

impl ChunkList {
    /// Create a list holding a single free chunk spanning `[base, base + size)`.
    pub fn new(pool: &mut ChunkPool, owner: AllocatorId, base: u32, size: u32) -> Result<Self> {
        pool.ensure_capacity(1)?;
        let index = pool.acquire(Chunk::free(owner, base, size));
        let mut list = ChunkList {
            head: index,
            tail: index,
            bins: [None; BIN_COUNT],
        };
        list.bin_insert(pool, index);
        Ok(list)
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    pub fn iter<'pool>(&self, pool: &'pool ChunkPool) -> ChunkIter<'pool> {
        ChunkIter {
            pool,
            next: Some(self.head),
        }
    }

    pub fn bin<'pool>(&self, pool: &'pool ChunkPool, bin: usize) -> BinIter<'pool> {
        BinIter {
            pool,
            next: self.bins[bin],
        }
    }

    /// Insert a free chunk into its size bin, keeping the bin sorted.
    pub fn bin_insert(&mut self, pool: &mut ChunkPool, index: usize) {
        let (size, offset) = {
            let chunk = &pool[index];
            debug_assert!(chunk.is_free(), "only free chunks are binned");
            debug_assert!(chunk.bin.is_none(), "chunk is already binned");
            (chunk.size, chunk.offset)
        };
        let bin = bin_index(size);

        // Find the last entry that sorts before this chunk
        let mut prev = None;
        let mut cursor = self.bins[bin];
        while let Some(current) = cursor {
            let other = &pool[current];
            if (other.size, other.offset) > (size, offset) {
                break;
            }
            prev = Some(current);
            cursor = other.bin_next;
        }

        {
            let chunk = &mut pool[index];
            chunk.bin = Some(bin);
            chunk.bin_prev = prev;
            chunk.bin_next = cursor;
        }
        match prev {
            Some(p) => pool[p].bin_next = Some(index),
            None => self.bins[bin] = Some(index),
        }
        if let Some(n) = cursor {
            pool[n].bin_prev = Some(index);
        }
    }

    /// Remove a chunk from its size bin. Does nothing for unbinned chunks.
    pub fn bin_remove(&mut self, pool: &mut ChunkPool, index: usize) {
        let (bin, prev, next) = {
            let chunk = &mut pool[index];
            let bin = match chunk.bin.take() {
                None => return,
                Some(bin) => bin,
            };
            (bin, chunk.bin_prev.take(), chunk.bin_next.take())
        };

        match prev {
            Some(p) => pool[p].bin_next = next,
            None => self.bins[bin] = next,
        }
        if let Some(n) = next {
            pool[n].bin_prev = prev;
        }
    }

    /// Split `[offset, at)` / `[at, end)` out of a chunk, returning the index
    /// of the new piece. The new piece is free and goes on `side`; the
    /// original chunk keeps the other side along with its status and tags.
    ///
    /// The original chunk must not be in a bin, and `at` must be strictly
    /// inside it. The caller must have reserved one pool record. The new
    /// piece is binned.
    pub fn split(&mut self, pool: &mut ChunkPool, index: usize, at: u32, side: Side) -> usize {
        let (offset, end, owner, prev, next) = {
            let chunk = &pool[index];
            debug_assert!(chunk.bin.is_none(), "split a binned chunk");
            (chunk.offset, chunk.end(), chunk.owner, chunk.prev, chunk.next)
        };
        assert!(
            offset < at && u64::from(at) < end,
            "split point {} outside of chunk [{}, {})",
            at,
            offset,
            end
        );
        let low_size = at - offset;
        let high_size = (end - u64::from(at)) as u32;

        let new_index = match side {
            Side::Low => {
                let mut piece = Chunk::free(owner, offset, low_size);
                piece.prev = prev;
                piece.next = Some(index);
                let new_index = pool.acquire(piece);
                match prev {
                    Some(p) => pool[p].next = Some(new_index),
                    None => self.head = new_index,
                }
                let chunk = &mut pool[index];
                chunk.prev = Some(new_index);
                chunk.offset = at;
                chunk.size = high_size;
                new_index
            }
            Side::High => {
                let mut piece = Chunk::free(owner, at, high_size);
                piece.prev = Some(index);
                piece.next = next;
                let new_index = pool.acquire(piece);
                match next {
                    Some(n) => pool[n].prev = Some(new_index),
                    None => self.tail = new_index,
                }
                let chunk = &mut pool[index];
                chunk.next = Some(new_index);
                chunk.size = low_size;
                new_index
            }
        };

        log::debug!(
            "Split [{}, {}) at {}, new free piece on the {:?} side",
            offset,
            end,
            at,
            side
        );

        self.bin_insert(pool, new_index);
        new_index
    }

    /// Merge `absorb` into its neighbour `keep`, releasing `absorb`'s record.
    ///
    /// `keep` keeps its identity, status and tags, and grows to cover both
    /// ranges. Neither chunk may be in a bin.
    pub fn merge(&mut self, pool: &mut ChunkPool, keep: usize, absorb: usize) {
        let (absorb_offset, absorb_size) = {
            let chunk = &pool[absorb];
            debug_assert!(chunk.bin.is_none(), "merged away a binned chunk");
            (chunk.offset, chunk.size)
        };
        let keep_chunk = &pool[keep];
        debug_assert!(keep_chunk.bin.is_none(), "merged into a binned chunk");
        let absorb_below = keep_chunk.prev == Some(absorb);
        assert!(
            absorb_below || keep_chunk.next == Some(absorb),
            "merged chunks that are not neighbours"
        );

        self.unlink(pool, absorb, Retirement::Absorbed);

        let chunk = &mut pool[keep];
        if absorb_below {
            chunk.offset = absorb_offset;
        }
        chunk.size += absorb_size;
    }

    /// Remove a chunk from the address-ordered list and release its record.
    ///
    /// Leaves a gap in the list unless the caller accounts for the chunk's
    /// range elsewhere (by growing a neighbour, or shrinking the allocator).
    pub(crate) fn unlink(&mut self, pool: &mut ChunkPool, index: usize, retired: Retirement) {
        self.bin_remove(pool, index);
        let (prev, next) = {
            let chunk = &pool[index];
            (chunk.prev, chunk.next)
        };
        assert!(
            prev.is_some() || next.is_some(),
            "cannot unlink the only chunk of a list"
        );

        match prev {
            Some(p) => pool[p].next = next,
            None => self.head = next.unwrap_or(self.head),
        }
        match next {
            Some(n) => pool[n].prev = prev,
            None => self.tail = prev.unwrap_or(self.tail),
        }

        pool.release(index, retired);
    }

    /// Add a new free chunk at the end of the list, and bin it. The caller
    /// must have reserved one pool record.
    pub fn append(&mut self, pool: &mut ChunkPool, owner: AllocatorId, size: u32) -> usize {
        let tail = self.tail;
        let start = pool[tail].end();
        debug_assert!(start + u64::from(size) <= 1 << 32);

        let mut chunk = Chunk::free(owner, start as u32, size);
        chunk.prev = Some(tail);
        let index = pool.acquire(chunk);
        pool[tail].next = Some(index);
        self.tail = index;
        self.bin_insert(pool, index);
        index
    }

    /// Release every chunk record back to the pool.
    pub fn release_all(self, pool: &mut ChunkPool) -> usize {
        let mut released = 0;
        let mut next = Some(self.head);
        while let Some(index) = next {
            let chunk = &mut pool[index];
            next = chunk.next;
            chunk.bin = None;
            chunk.bin_prev = None;
            chunk.bin_next = None;
            pool.release(index, Retirement::Reclaimed);
            released += 1;
        }
        released
    }

    /// Walk both orders and count every broken invariant.
    pub fn check(&self, pool: &ChunkPool, base: u32, size: u32) -> Validity {
        let mut validity = Validity::default();

        let mut expected_start = u64::from(base);
        let mut previous_free = false;
        let mut free_chunks = 0;
        let mut total: u64 = 0;
        let mut last = self.head;

        for (index, chunk) in self.iter(pool) {
            if u64::from(chunk.offset) != expected_start {
                validity.gaps += 1;
            }
            if chunk.is_free() {
                if previous_free {
                    validity.adjacent_free += 1;
                }
                free_chunks += 1;
                if chunk.bin != Some(bin_index(chunk.size)) {
                    validity.misbinned += 1;
                }
            } else if chunk.bin.is_some() {
                validity.misbinned += 1;
            }

            expected_start = chunk.end();
            previous_free = chunk.is_free();
            total += u64::from(chunk.size);
            last = index;
        }

        if last != self.tail || total != u64::from(size) {
            validity.size_mismatch = true;
        }

        let mut binned = 0;
        for bin in 0..BIN_COUNT {
            let mut previous: Option<&Chunk> = None;
            for (_, chunk) in self.bin(pool, bin) {
                if let Some(p) = previous {
                    if p.size > chunk.size {
                        validity.unsorted += 1;
                    }
                }
                binned += 1;
                previous = Some(chunk);
            }
        }
        validity.misbinned += binned.max(free_chunks) - binned.min(free_chunks);

        validity
    }

    /// A displayable view of the list, for logging.
    pub fn display<'a>(&'a self, pool: &'a ChunkPool) -> ListDisplay<'a> {
        ListDisplay { list: self, pool }
    }
}

pub struct ListDisplay<'a> {
    list: &'a ChunkList,
    pool: &'a ChunkPool,
}

impl fmt::Display for ListDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkList(")?;
        let mut start = true;
        for (_, chunk) in self.list.iter(self.pool) {
            if !start {
                write!(f, ", ")?;
            } else {
                start = false;
            }
            let tag = match chunk.status {
                ChunkStatus::Free => 'F',
                ChunkStatus::Used => 'U',
            };
            write!(f, "{}[{}, {})", tag, chunk.offset, chunk.end())?;
        }

        write!(f, ")")
    }
}
