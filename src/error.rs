use snafu::Snafu;

/// Errors returned by the allocator operations.
///
/// None of these leave partial changes behind: an operation either fails
/// before touching any chunk, or succeeds completely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A size was zero, larger than its segment, or a range ran past the end
    /// of the 32-bit offset space.
    #[snafu(display("invalid parameter"))]
    InvalidParameter,

    /// No free range satisfies the request, or the chunk pool is exhausted.
    #[snafu(display("out of memory"))]
    OutOfMemory,

    /// The handle was never issued by this context, or belonged to a
    /// destroyed allocator.
    #[snafu(display("unknown memory handle"))]
    UnknownMemoryHandle,

    /// The handle refers to memory that has already been freed.
    #[snafu(display("memory handle already freed"))]
    MemoryHandleFreed,

    /// The allocator id is not registered, or does not own the handle.
    #[snafu(display("unknown allocator"))]
    UnknownAllocator,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
