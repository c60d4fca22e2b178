//! Read-only views of an allocator: fragmentation statistics and per-chunk
//! records for dumps.

use core::fmt;

use crate::chunklist::{Chunk, ChunkHandle, ChunkStatus};

/// Block and byte counts over a set of chunks.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStats {
    pub used_blocks: usize,
    pub free_blocks: usize,
    pub used_bytes: u32,
    pub free_bytes: u32,
    /// Size of the smallest free block. Equal to `max_free` when nothing is
    /// free.
    pub min_free: u32,
    pub max_free: u32,
    pub total_size: u32,
}

impl SegmentStats {
    pub(crate) fn record(&mut self, chunk: &Chunk, min_free: &mut Option<u32>) {
        match chunk.status {
            ChunkStatus::Used => {
                self.used_blocks += 1;
                self.used_bytes += chunk.size;
            }
            ChunkStatus::Free => {
                self.free_blocks += 1;
                self.free_bytes += chunk.size;
                self.max_free = self.max_free.max(chunk.size);
                *min_free = Some(min_free.map_or(chunk.size, |m| m.min(chunk.size)));
            }
        }
    }

    /// The fraction of free bytes that lie outside the largest free block,
    /// between 0 (no fragmentation) and 1.
    pub fn fragmentation(&self) -> f32 {
        if self.free_bytes == 0 {
            return 0.0;
        }
        1.0 - self.max_free as f32 / self.free_bytes as f32
    }
}

/// The result of [`Heaps::status`](crate::Heaps::status).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStatus {
    /// Statistics over the whole allocator.
    pub global: SegmentStats,
    /// Statistics restricted to the requested segment.
    ///
    /// Reserved for domain-scoped accounting; always zero for now.
    pub segment: SegmentStats,
}

/// A snapshot of one chunk, as listed by
/// [`Heaps::chunks`](crate::Heaps::chunks) and [`Heaps::dump`](crate::Heaps::dump).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub handle: ChunkHandle,
    pub offset: u32,
    pub size: u32,
    pub status: ChunkStatus,
    pub domain: u32,
    pub user_data: u16,
}

impl ChunkInfo {
    pub(crate) fn new(handle: ChunkHandle, chunk: &Chunk) -> Self {
        ChunkInfo {
            handle,
            offset: chunk.offset,
            size: chunk.size,
            status: chunk.status,
            domain: chunk.domain,
            user_data: chunk.user_data,
        }
    }

    /// One past the last offset covered, widened so it cannot overflow.
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.size)
    }
}

impl fmt::Display for ChunkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            ChunkStatus::Free => write!(f, "{:#010x}..{:#010x} free", self.offset, self.end()),
            ChunkStatus::Used => write!(
                f,
                "{:#010x}..{:#010x} used domain={}",
                self.offset,
                self.end(),
                self.domain
            ),
        }
    }
}
