//! The allocation engine for a single offset range.
//!
//! A [`RemoteAllocator`] manages `[base, base + size)` as a list of chunks
//! (see [`crate::chunklist`]). It never touches the memory behind the offsets;
//! it only decides which ranges are handed out.
//!
//! Allocation is a near best fit: starting at the bin for the requested size,
//! the first free chunk that still fits once aligned and clipped to the
//! requested segment is taken, and any slack on either side is split off and
//! returned to the bins. Freed chunks are merged with free neighbours right
//! away, so the list never holds two free chunks side by side.
//!
//! Every operation checks everything it needs (parameters, neighbours, pool
//! capacity) before it changes anything.

use alloc::string::String;
use core::cmp::Ordering;
use core::fmt;

use log::{debug, warn};
use snafu::ensure;

use crate::bins::{bin_index, BIN_COUNT};
use crate::chunklist::{ChunkHandle, ChunkList, ChunkPool, ChunkStatus, Retirement, Side, Validity};
use crate::error::{
    InvalidParameterSnafu, MemoryHandleFreedSnafu, OutOfMemorySnafu, Result,
};
use crate::status::{AllocatorStatus, ChunkInfo, SegmentStats};

/// Size of the whole offset space. Allocator ranges must fit below it.
const OFFSET_SPACE: u64 = 1 << 32;

// Round up value to the nearest multiple of align. Alignments of 0 and 1 both
// mean "no alignment".
fn round_up(value: u64, align: u32) -> u64 {
    if value == 0 || align <= 1 {
        return value;
    }
    let align = u64::from(align);
    align * ((value - 1) / align + 1)
}

/// Identifies an allocator within its [`Heaps`](crate::Heaps) context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllocatorId(pub(crate) u32);

impl fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allocator#{}", self.0)
    }
}

/// A window of the offset space that an allocation must fall inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub offset: u32,
    pub size: u32,
}

impl Segment {
    pub const fn new(offset: u32, size: u32) -> Self {
        Segment { offset, size }
    }

    /// Every offset below `u32::MAX`, i.e. effectively no restriction.
    pub const fn unrestricted() -> Self {
        Segment {
            offset: 0,
            size: u32::MAX,
        }
    }

    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.size)
    }
}

/// A single-threaded manager for one range of offsets.
///
/// Chunk records come from a [`ChunkPool`] that is passed to every call, so
/// that several allocators can share one pool.
pub struct RemoteAllocator {
    id: AllocatorId,
    name: String,
    base: u32,
    size: u32,
    chunks: ChunkList,
}

impl RemoteAllocator {
    /// Create an allocator over `[base, base + size)`, starting out as a
    /// single free chunk.
    pub fn new(
        pool: &mut ChunkPool,
        id: AllocatorId,
        size: u32,
        base: u32,
        name: &str,
    ) -> Result<Self> {
        ensure!(
            size > 0 && u64::from(base) + u64::from(size) <= OFFSET_SPACE,
            InvalidParameterSnafu
        );
        let chunks = ChunkList::new(pool, id, base, size)?;
        Ok(RemoteAllocator {
            id,
            name: String::from(name),
            base,
            size,
            chunks,
        })
    }

    pub fn id(&self) -> AllocatorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Total number of bytes managed, free and used.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn chunks(&self) -> &ChunkList {
        &self.chunks
    }

    /// Release every chunk, used or not, and return how many there were.
    pub fn destroy(self, pool: &mut ChunkPool) -> usize {
        self.chunks.release_all(pool)
    }

    /// Check current structure of the chunk list.
    pub fn validity(&self, pool: &ChunkPool) -> Validity {
        self.chunks.check(pool, self.base, self.size)
    }

    // Integrity checks are too slow for release builds, unless asked for.
    fn assert_valid(&self, pool: &ChunkPool) {
        if cfg!(any(debug_assertions, feature = "integrity-checks")) {
            let validity = self.validity(pool);
            assert!(
                validity.is_valid(),
                "{} ({}) is corrupt: {:?}\n{}",
                self.name,
                self.id,
                validity,
                self.chunks.display(pool)
            );
        }
    }

    /// Grow or shrink the allocator at its high end.
    ///
    /// Growing extends a trailing free chunk, or appends a new one. Shrinking
    /// only ever gives up free space: it fails with `OutOfMemory` unless the
    /// last chunk is free and at least as large as the reduction.
    pub fn resize(&mut self, pool: &mut ChunkPool, new_size: u32) -> Result<()> {
        ensure!(
            new_size > 0 && u64::from(self.base) + u64::from(new_size) <= OFFSET_SPACE,
            InvalidParameterSnafu
        );

        let tail = self.chunks.tail();
        match new_size.cmp(&self.size) {
            Ordering::Equal => return Ok(()),
            Ordering::Greater => {
                let delta = new_size - self.size;
                if pool[tail].is_free() {
                    self.chunks.bin_remove(pool, tail);
                    pool[tail].size += delta;
                    self.chunks.bin_insert(pool, tail);
                } else {
                    pool.ensure_capacity(1)?;
                    self.chunks.append(pool, self.id, delta);
                }
            }
            Ordering::Less => {
                let delta = self.size - new_size;
                let last = &pool[tail];
                if !last.is_free() || last.size < delta {
                    warn!(
                        "{}: cannot shrink by {} bytes, only {} trailing bytes are free",
                        self.name,
                        delta,
                        if last.is_free() { last.size } else { 0 }
                    );
                    return OutOfMemorySnafu.fail();
                }

                if last.size == delta {
                    self.chunks.unlink(pool, tail, Retirement::Absorbed);
                } else {
                    self.chunks.bin_remove(pool, tail);
                    pool[tail].size -= delta;
                    self.chunks.bin_insert(pool, tail);
                }
            }
        }

        debug!("{}: resized from {} to {} bytes", self.name, self.size, new_size);
        self.size = new_size;
        self.assert_valid(pool);
        Ok(())
    }

    /// Find the first free chunk that can hold `size` bytes aligned to
    /// `align` inside `segment`, returning its index and the aligned start.
    fn find_fit(
        &self,
        pool: &ChunkPool,
        size: u32,
        align: u32,
        segment: Segment,
    ) -> Option<(usize, u64)> {
        let segment_end = segment.end();

        // A chunk in a higher bin is always large enough before alignment is
        // taken into account, but alignment and the segment can still rule it
        // out, so every candidate is checked.
        for bin in bin_index(size)..BIN_COUNT {
            for (index, chunk) in self.chunks.bin(pool, bin) {
                let floor = chunk.offset.max(segment.offset);
                let start = round_up(u64::from(floor), align);
                let end = start + u64::from(size);
                if end <= segment_end && end <= chunk.end() {
                    return Some((index, start));
                }
            }
        }

        None
    }

    /// Allocate `size` bytes aligned to `align`, inside `segment`, tagged
    /// with `domain`. Returns a fresh handle for the new, used chunk.
    pub fn alloc(
        &mut self,
        pool: &mut ChunkPool,
        size: u32,
        align: u32,
        segment: Segment,
        domain: u32,
    ) -> Result<ChunkHandle> {
        ensure!(size > 0 && size <= segment.size, InvalidParameterSnafu);

        let (index, start) = match self.find_fit(pool, size, align, segment) {
            Some(fit) => fit,
            None => {
                debug!(
                    "{}: no room for {} bytes aligned to {} in {:#x}+{:#x}",
                    self.name, size, align, segment.offset, segment.size
                );
                return OutOfMemorySnafu.fail();
            }
        };
        let end = start + u64::from(size);

        let chunk = &pool[index];
        let needs_low = u64::from(chunk.offset) < start;
        let needs_high = chunk.end() > end;
        pool.ensure_capacity(usize::from(needs_low) + usize::from(needs_high))?;

        debug!(
            "{}: found [{}, {}) for {} bytes at {}",
            self.name,
            chunk.offset,
            chunk.end(),
            size,
            start
        );

        // Both split points lie strictly inside the chunk, so below 2^32.
        self.chunks.bin_remove(pool, index);
        if needs_low {
            self.chunks.split(pool, index, start as u32, Side::Low);
        }
        if needs_high {
            self.chunks.split(pool, index, end as u32, Side::High);
        }

        let chunk = &mut pool[index];
        chunk.status = ChunkStatus::Used;
        chunk.domain = domain;
        let handle = pool.reissue(index);

        self.assert_valid(pool);
        Ok(handle)
    }

    /// Move the edges of a used chunk in place, so that it covers
    /// `[target, target + new_size)`.
    ///
    /// The new range must overlap or touch the old one. Growing takes bytes
    /// from free neighbours, and fails with `OutOfMemory` if they are missing,
    /// used, or too small. Shrinking hands bytes to free neighbours, or splits
    /// them off as new free chunks.
    pub fn realloc(
        &mut self,
        pool: &mut ChunkPool,
        index: usize,
        new_size: u32,
        target: u32,
        align: u32,
    ) -> Result<()> {
        let chunk = &pool[index];
        ensure!(!chunk.is_free(), MemoryHandleFreedSnafu);

        let offset = u64::from(chunk.offset);
        let end = chunk.end();
        let new_start = u64::from(target);
        let new_end = new_start + u64::from(new_size);
        ensure!(
            new_size > 0
                && round_up(new_start, align) == new_start
                && new_start <= end
                && new_end >= offset,
            InvalidParameterSnafu
        );

        let prev = chunk.prev().filter(|&p| pool[p].is_free());
        let next = chunk.next().filter(|&n| pool[n].is_free());

        if new_start < offset {
            let fits = prev.map_or(false, |p| u64::from(pool[p].offset) <= new_start);
            if !fits {
                debug!("{}: no free space below {} to grow into", self.name, offset);
                return OutOfMemorySnafu.fail();
            }
        }
        if new_end > end {
            let fits = next.map_or(false, |n| pool[n].end() >= new_end);
            if !fits {
                debug!("{}: no free space above {} to grow into", self.name, end);
                return OutOfMemorySnafu.fail();
            }
        }
        let needs_high = new_end < end && next.is_none();
        let needs_low = new_start > offset && prev.is_none();
        pool.ensure_capacity(usize::from(needs_low) + usize::from(needs_high))?;

        // Extend low
        if let Some(p) = prev.filter(|_| new_start < offset) {
            self.chunks.bin_remove(pool, p);
            if u64::from(pool[p].offset) == new_start {
                self.chunks.merge(pool, index, p);
            } else {
                let delta = (offset - new_start) as u32;
                pool[p].size -= delta;
                self.chunks.bin_insert(pool, p);
                let chunk = &mut pool[index];
                chunk.offset = target;
                chunk.size += delta;
            }
        }

        // Extend high
        if let Some(n) = next.filter(|_| new_end > end) {
            self.chunks.bin_remove(pool, n);
            if pool[n].end() == new_end {
                self.chunks.merge(pool, index, n);
            } else {
                let delta = (new_end - end) as u32;
                let successor = &mut pool[n];
                successor.offset += delta;
                successor.size -= delta;
                self.chunks.bin_insert(pool, n);
                pool[index].size += delta;
            }
        }

        // Reduce high
        if new_end < end {
            match next {
                Some(n) => {
                    let delta = (end - new_end) as u32;
                    pool[index].size -= delta;
                    self.chunks.bin_remove(pool, n);
                    let successor = &mut pool[n];
                    successor.offset -= delta;
                    successor.size += delta;
                    self.chunks.bin_insert(pool, n);
                }
                None => {
                    self.chunks.split(pool, index, new_end as u32, Side::High);
                }
            }
        }

        // Reduce low
        if new_start > offset {
            match prev {
                Some(p) => {
                    let delta = (new_start - offset) as u32;
                    self.chunks.bin_remove(pool, p);
                    pool[p].size += delta;
                    self.chunks.bin_insert(pool, p);
                    let chunk = &mut pool[index];
                    chunk.offset = target;
                    chunk.size -= delta;
                }
                None => {
                    self.chunks.split(pool, index, target, Side::Low);
                }
            }
        }

        debug!(
            "{}: moved [{}, {}) to [{}, {})",
            self.name, offset, end, new_start, new_end
        );
        self.assert_valid(pool);
        Ok(())
    }

    /// Return a used chunk to the free bins, merging it with free neighbours.
    pub fn free(&mut self, pool: &mut ChunkPool, index: usize) -> Result<()> {
        let chunk = &mut pool[index];
        if chunk.is_free() {
            warn!(
                "{}: [{}, {}) is already free",
                self.name,
                chunk.offset,
                chunk.end()
            );
            return MemoryHandleFreedSnafu.fail();
        }
        chunk.status = ChunkStatus::Free;
        chunk.domain = 0;

        let mut survivor = index;
        if let Some(p) = pool[index].prev().filter(|&p| pool[p].is_free()) {
            self.chunks.bin_remove(pool, p);
            self.chunks.merge(pool, p, index);
            survivor = p;
        }
        if let Some(n) = pool[survivor].next().filter(|&n| pool[n].is_free()) {
            self.chunks.bin_remove(pool, n);
            self.chunks.merge(pool, survivor, n);
        }
        self.chunks.bin_insert(pool, survivor);

        self.assert_valid(pool);
        Ok(())
    }

    /// Gather block and byte counts over the whole allocator.
    ///
    /// `segment` is accepted for domain-scoped accounting; those statistics
    /// are not collected, so `AllocatorStatus::segment` is always zero.
    pub fn status(&self, pool: &ChunkPool, segment: Segment) -> AllocatorStatus {
        let _ = segment;
        let mut global = SegmentStats {
            total_size: self.size,
            ..SegmentStats::default()
        };

        let mut min_free = None;
        for (_, chunk) in self.chunks.iter(pool) {
            global.record(chunk, &mut min_free);
        }
        global.min_free = min_free.unwrap_or(global.max_free);

        AllocatorStatus {
            global,
            segment: SegmentStats::default(),
        }
    }

    /// All chunks, in address order.
    pub fn infos<'a>(&'a self, pool: &'a ChunkPool) -> impl Iterator<Item = ChunkInfo> + 'a {
        self.chunks
            .iter(pool)
            .map(move |(index, chunk)| ChunkInfo::new(pool.handle(index), chunk))
    }
}

impl fmt::Debug for RemoteAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAllocator")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base", &self.base)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use alloc::vec::Vec;
    use test_log::test;

    use crate::error::Error;

    const ID: AllocatorId = AllocatorId(7);

    fn layout(allocator: &RemoteAllocator, pool: &ChunkPool) -> Vec<(u32, u32, ChunkStatus)> {
        allocator
            .infos(pool)
            .map(|info| (info.offset, info.size, info.status))
            .collect()
    }

    fn setup(size: u32) -> (ChunkPool, RemoteAllocator) {
        let mut pool = ChunkPool::default();
        let allocator = RemoteAllocator::new(&mut pool, ID, size, 0, "test").unwrap();
        (pool, allocator)
    }

    fn index_of(pool: &ChunkPool, handle: ChunkHandle) -> usize {
        pool.lookup(handle).unwrap()
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 16), 0);
        assert_eq!(round_up(1, 16), 16);
        assert_eq!(round_up(16, 16), 16);
        assert_eq!(round_up(17, 0), 17);
        assert_eq!(round_up(17, 1), 17);
        assert_eq!(round_up(17, 12), 24);
        assert_eq!(round_up(u64::from(u32::MAX), 4096), 1 << 32);
    }

    #[test]
    fn test_new_rejects_bad_ranges() {
        let mut pool = ChunkPool::default();
        let err = RemoteAllocator::new(&mut pool, ID, 0, 0, "empty").unwrap_err();
        assert_eq!(err, Error::InvalidParameter);
        let err = RemoteAllocator::new(&mut pool, ID, 2, u32::MAX, "wraps").unwrap_err();
        assert_eq!(err, Error::InvalidParameter);
        // Touching the very end of the offset space is fine
        let top = RemoteAllocator::new(&mut pool, ID, 1, u32::MAX, "top").unwrap();
        assert!(top.validity(&pool).is_valid());
    }

    #[test]
    fn test_alloc_aligned_splits_both_sides() {
        let (mut pool, mut allocator) = setup(1024);
        allocator
            .alloc(&mut pool, 10, 0, Segment::unrestricted(), 0)
            .unwrap();
        let h = allocator
            .alloc(&mut pool, 32, 64, Segment::unrestricted(), 3)
            .unwrap();
        log::info!("aligned: {}", allocator.chunks().display(&pool));

        assert_eq!(
            layout(&allocator, &pool),
            [
                (0, 10, ChunkStatus::Used),
                (10, 54, ChunkStatus::Free),
                (64, 32, ChunkStatus::Used),
                (96, 928, ChunkStatus::Free),
            ]
        );
        assert_eq!(pool[index_of(&pool, h)].domain, 3);
    }

    #[test]
    fn test_alloc_respects_segment() {
        let (mut pool, mut allocator) = setup(4096);
        let h = allocator
            .alloc(&mut pool, 100, 0, Segment::new(1000, 200), 1)
            .unwrap();
        let chunk = &pool[index_of(&pool, h)];
        assert_eq!((chunk.offset, chunk.size), (1000, 100));

        // 150 bytes no longer fit in what is left of the segment
        let err = allocator
            .alloc(&mut pool, 150, 0, Segment::new(1000, 200), 1)
            .unwrap_err();
        assert_eq!(err, Error::OutOfMemory);
        // And a request larger than its segment is a caller error
        let err = allocator
            .alloc(&mut pool, 300, 0, Segment::new(1000, 200), 1)
            .unwrap_err();
        assert_eq!(err, Error::InvalidParameter);
        let err = allocator
            .alloc(&mut pool, 0, 0, Segment::unrestricted(), 1)
            .unwrap_err();
        assert_eq!(err, Error::InvalidParameter);
    }

    #[test]
    fn test_alloc_prefers_smallest_fitting_bin() {
        let (mut pool, mut allocator) = setup(4096);
        let a = allocator.alloc(&mut pool, 1000, 0, Segment::unrestricted(), 0).unwrap();
        let _b = allocator.alloc(&mut pool, 8, 0, Segment::unrestricted(), 0).unwrap();
        let c = allocator.alloc(&mut pool, 40, 0, Segment::unrestricted(), 0).unwrap();
        let _d = allocator.alloc(&mut pool, 8, 0, Segment::unrestricted(), 0).unwrap();
        let a_index = index_of(&pool, a);
        allocator.free(&mut pool, a_index).unwrap();
        let c_index = index_of(&pool, c);
        allocator.free(&mut pool, c_index).unwrap();

        // The 40 byte hole is the best fit, even though the 1000 byte hole
        // comes first in address order.
        let e = allocator.alloc(&mut pool, 33, 0, Segment::unrestricted(), 0).unwrap();
        assert_eq!(pool[index_of(&pool, e)].offset, 1008);
    }

    #[test]
    fn test_free_merges_both_sides() {
        let (mut pool, mut allocator) = setup(300);
        let a = allocator.alloc(&mut pool, 100, 0, Segment::unrestricted(), 0).unwrap();
        let b = allocator.alloc(&mut pool, 100, 0, Segment::unrestricted(), 0).unwrap();
        let c = allocator.alloc(&mut pool, 100, 0, Segment::unrestricted(), 0).unwrap();
        assert_eq!(pool.live(), 3);

        let a_index = index_of(&pool, a);
        allocator.free(&mut pool, a_index).unwrap();
        let c_index = index_of(&pool, c);
        allocator.free(&mut pool, c_index).unwrap();
        assert_eq!(pool.live(), 3);

        let b_index = index_of(&pool, b);
        allocator.free(&mut pool, b_index).unwrap();
        assert_eq!(layout(&allocator, &pool), [(0, 300, ChunkStatus::Free)]);
        assert_eq!(pool.live(), 1);
        assert_eq!(pool.lookup(b), Err(Error::MemoryHandleFreed));
    }

    #[test]
    fn test_double_free_is_refused() {
        let (mut pool, mut allocator) = setup(300);
        let a = allocator.alloc(&mut pool, 100, 0, Segment::unrestricted(), 0).unwrap();
        let index = index_of(&pool, a);
        allocator.free(&mut pool, index).unwrap();
        // The chunk kept its record, since nothing was free below it
        assert_eq!(pool.lookup(a), Ok(index));
        let err = allocator.free(&mut pool, index).unwrap_err();
        assert_eq!(err, Error::MemoryHandleFreed);
        assert!(allocator.validity(&pool).is_valid());
    }

    #[test]
    fn test_resize() {
        let (mut pool, mut allocator) = setup(1024);
        allocator.resize(&mut pool, 2048).unwrap();
        assert_eq!(layout(&allocator, &pool), [(0, 2048, ChunkStatus::Free)]);

        allocator.alloc(&mut pool, 2048, 0, Segment::unrestricted(), 0).unwrap();
        allocator.resize(&mut pool, 2100).unwrap();
        assert_eq!(
            layout(&allocator, &pool),
            [(0, 2048, ChunkStatus::Used), (2048, 52, ChunkStatus::Free)]
        );

        assert_eq!(allocator.resize(&mut pool, 2000), Err(Error::OutOfMemory));
        allocator.resize(&mut pool, 2060).unwrap();
        assert_eq!(
            layout(&allocator, &pool),
            [(0, 2048, ChunkStatus::Used), (2048, 12, ChunkStatus::Free)]
        );
        allocator.resize(&mut pool, 2048).unwrap();
        assert_eq!(layout(&allocator, &pool), [(0, 2048, ChunkStatus::Used)]);
        assert_eq!(allocator.size(), 2048);
        assert_eq!(allocator.resize(&mut pool, 0), Err(Error::InvalidParameter));
    }

    #[test]
    fn test_realloc_grows_into_neighbours() {
        let (mut pool, mut allocator) = setup(1000);
        let a = allocator.alloc(&mut pool, 100, 0, Segment::unrestricted(), 0).unwrap();
        let b = allocator.alloc(&mut pool, 100, 0, Segment::unrestricted(), 9).unwrap();
        let a_index = index_of(&pool, a);
        allocator.free(&mut pool, a_index).unwrap();
        let b_index = index_of(&pool, b);

        // Down by 40, up by 50
        allocator.realloc(&mut pool, b_index, 190, 60, 0).unwrap();
        assert_eq!(
            layout(&allocator, &pool),
            [
                (0, 60, ChunkStatus::Free),
                (60, 190, ChunkStatus::Used),
                (250, 750, ChunkStatus::Free),
            ]
        );

        // Swallow the whole predecessor
        allocator.realloc(&mut pool, b_index, 250, 0, 0).unwrap();
        assert_eq!(
            layout(&allocator, &pool),
            [(0, 250, ChunkStatus::Used), (250, 750, ChunkStatus::Free)]
        );
        assert_eq!(pool.lookup(b), Ok(b_index));
        assert_eq!(pool[b_index].domain, 9);
    }

    #[test]
    fn test_realloc_shrinks() {
        let (mut pool, mut allocator) = setup(1000);
        let a = allocator.alloc(&mut pool, 100, 0, Segment::unrestricted(), 0).unwrap();
        let b = allocator.alloc(&mut pool, 100, 0, Segment::unrestricted(), 0).unwrap();
        let c = allocator.alloc(&mut pool, 100, 0, Segment::unrestricted(), 0).unwrap();
        let b_index = index_of(&pool, b);

        // Both neighbours used: the vacated ends become new free chunks
        allocator.realloc(&mut pool, b_index, 50, 120, 0).unwrap();
        assert_eq!(
            layout(&allocator, &pool),
            [
                (0, 100, ChunkStatus::Used),
                (100, 20, ChunkStatus::Free),
                (120, 50, ChunkStatus::Used),
                (170, 30, ChunkStatus::Free),
                (200, 100, ChunkStatus::Used),
                (300, 700, ChunkStatus::Free),
            ]
        );

        // Both neighbours free now: they just grow
        allocator.realloc(&mut pool, b_index, 10, 140, 0).unwrap();
        assert_eq!(
            layout(&allocator, &pool),
            [
                (0, 100, ChunkStatus::Used),
                (100, 40, ChunkStatus::Free),
                (140, 10, ChunkStatus::Used),
                (150, 50, ChunkStatus::Free),
                (200, 100, ChunkStatus::Used),
                (300, 700, ChunkStatus::Free),
            ]
        );

        let _ = (a, c);
    }

    #[test]
    fn test_realloc_is_all_or_nothing() {
        let (mut pool, mut allocator) = setup(1000);
        let a = allocator.alloc(&mut pool, 100, 0, Segment::unrestricted(), 0).unwrap();
        let b = allocator.alloc(&mut pool, 100, 0, Segment::unrestricted(), 0).unwrap();
        let a_index = index_of(&pool, a);

        // The successor is used
        assert_eq!(
            allocator.realloc(&mut pool, a_index, 150, 0, 0),
            Err(Error::OutOfMemory)
        );
        // There is no predecessor at all
        let b_index = index_of(&pool, b);
        allocator.free(&mut pool, a_index).unwrap();
        assert_eq!(
            allocator.realloc(&mut pool, b_index, 100, 150, 0),
            Ok(())
        );
        assert_eq!(
            allocator.realloc(&mut pool, b_index, 1001, 0, 0),
            Err(Error::OutOfMemory)
        );
        // Disjoint ranges, zero sizes and misaligned targets are rejected
        assert_eq!(
            allocator.realloc(&mut pool, b_index, 10, 500, 0),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            allocator.realloc(&mut pool, b_index, 0, 150, 0),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            allocator.realloc(&mut pool, b_index, 100, 150, 64),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            layout(&allocator, &pool),
            [
                (0, 150, ChunkStatus::Free),
                (150, 100, ChunkStatus::Used),
                (250, 750, ChunkStatus::Free),
            ]
        );
    }

    #[test]
    fn test_pool_exhaustion_changes_nothing() {
        let mut pool = ChunkPool::new(Some(2));
        let mut allocator = RemoteAllocator::new(&mut pool, ID, 1024, 0, "tight").unwrap();
        let a = allocator.alloc(&mut pool, 100, 0, Segment::unrestricted(), 0).unwrap();
        let before = layout(&allocator, &pool);

        // Would need a third record for the remainder
        let err = allocator
            .alloc(&mut pool, 100, 0, Segment::unrestricted(), 0)
            .unwrap_err();
        assert_eq!(err, Error::OutOfMemory);
        assert_eq!(before, layout(&allocator, &pool));

        // Taking the whole remainder needs no new record
        allocator.alloc(&mut pool, 924, 0, Segment::unrestricted(), 0).unwrap();
        let a_index = index_of(&pool, a);
        assert_eq!(
            allocator.realloc(&mut pool, a_index, 50, 0, 0),
            Err(Error::OutOfMemory)
        );
        assert_eq!(allocator.resize(&mut pool, 2048), Err(Error::OutOfMemory));
    }

    #[test]
    fn test_status() {
        let (mut pool, mut allocator) = setup(1024);
        let empty = allocator.status(&pool, Segment::unrestricted());
        assert_eq!(empty.global.free_blocks, 1);
        assert_eq!(empty.global.min_free, 1024);
        assert_eq!(empty.global.max_free, 1024);

        allocator.alloc(&mut pool, 1024, 0, Segment::unrestricted(), 0).unwrap();
        let full = allocator.status(&pool, Segment::unrestricted());
        assert_eq!(full.global.used_blocks, 1);
        assert_eq!(full.global.used_bytes, 1024);
        assert_eq!(full.global.free_blocks, 0);
        assert_eq!(full.global.min_free, 0);
        assert_eq!(full.global.total_size, 1024);
        assert_eq!(full.global.fragmentation(), 0.0);
        assert_eq!(full.segment, SegmentStats::default());
    }
}
