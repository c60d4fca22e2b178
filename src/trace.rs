//! Diagnostic events emitted by [`Heaps`](crate::Heaps).
//!
//! Sinks only observe; nothing they do feeds back into allocation decisions.

use alloc::string::String;
use alloc::vec::Vec;

/// Lifecycle events of a whole allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorEvent {
    Create,
    Resize,
    Destroy,
}

/// Events for a single chunk of memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemEvent {
    Alloc,
    Realloc,
    Free,
}

pub trait TraceSink {
    /// An allocator was created, resized or destroyed. `size` is its size
    /// after the event (before it, for `Destroy`).
    fn allocator_event(&mut self, kind: AllocatorEvent, name: &str, size: u32);

    /// A chunk was allocated, moved, or freed. For `Free`, `offset` and `size`
    /// describe the chunk before it was merged with its neighbours.
    fn mem_event(&mut self, kind: MemEvent, offset: u32, size: u32);
}

/// Forwards every event to the `log` facade, at trace level.
#[derive(Default, Debug, Clone, Copy)]
pub struct LogTrace;

impl TraceSink for LogTrace {
    fn allocator_event(&mut self, kind: AllocatorEvent, name: &str, size: u32) {
        log::trace!("{:?} {} ({} bytes)", kind, name, size);
    }

    fn mem_event(&mut self, kind: MemEvent, offset: u32, size: u32) {
        log::trace!("{:?} {:#x}+{:#x}", kind, offset, size);
    }
}

/// One event, as kept by [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Allocator {
        kind: AllocatorEvent,
        name: String,
        size: u32,
    },
    Mem {
        kind: MemEvent,
        offset: u32,
        size: u32,
    },
}

/// Keeps every event in memory, for inspection after the fact.
#[derive(Default, Debug, Clone)]
pub struct Recorder {
    pub events: Vec<Event>,
}

impl TraceSink for Recorder {
    fn allocator_event(&mut self, kind: AllocatorEvent, name: &str, size: u32) {
        self.events.push(Event::Allocator {
            kind,
            name: String::from(name),
            size,
        });
    }

    fn mem_event(&mut self, kind: MemEvent, offset: u32, size: u32) {
        self.events.push(Event::Mem { kind, offset, size });
    }
}
