use crate::error::Result;
use crate::memory_buffer::MemoryBuffer;

/// What a [`crate::cache_bucket::CacheBucket`] needs from whatever backs it.
///
/// Replaces the original's deep `IStreamBase → StreamBase → Stream`
/// hierarchy: the bucket depends only on this, not on a concrete file type.
pub trait CacheBucketSource {
    /// Total addressable size in bytes.
    fn size(&self) -> Result<u64>;

    /// Fills `dst` with `len` bytes read from `offset`. `dst` must already
    /// be sized to `len`.
    fn copy_to(&self, dst: &mut MemoryBuffer, offset: u64, len: u64) -> Result<()>;
}
