use std::{io, result};

use thiserror::Error;

pub type Result<T, E = Error> = result::Result<T, E>;

/// Error types for `pbf-core` operations (C1-C6: file access, the page
/// locator, memory buffers, the cache bucket and its stream-buffer facade,
/// and zlib compression).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("file stream is already open")]
    AlreadyOpen,

    #[error("file stream is not open")]
    NotOpen,

    #[error("request out of bound: pos={pos}, size={size}, stream_size={stream_size}")]
    OutOfBound { pos: u64, size: u64, stream_size: u64 },

    #[error("requested allocation of {requested} bytes exceeds the configured limit of {limit} bytes")]
    AllocationTooLarge { requested: u64, limit: u64 },

    #[error("copy length mismatch: expected {expected}, got {actual}")]
    CopyLengthMismatch { expected: usize, actual: usize },

    #[error("memory buffer has been released")]
    BufferReleased,

    #[error("page {page_id} is not resident in the cache bucket")]
    PageNotResident { page_id: u64 },

    #[error("cache bucket source reported size {reported} but copy_to at offset {offset} for {len} bytes failed")]
    SourceCopyFailed { reported: u64, offset: u64, len: u64 },
}
