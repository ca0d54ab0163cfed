use crate::error::{Error, Result};

/// An owned, fixed-size byte region with bounded slice access and explicit
/// release.
///
/// No copy constructor is provided; a buffer is moved, not duplicated. Once
/// [`release`](MemoryBuffer::release) has been called every accessor returns
/// `None` — this mirrors the C++ original's "destroyed buffers are
/// observably empty, not dangling" contract.
#[derive(Debug)]
pub struct MemoryBuffer {
    data: Option<Box<[u8]>>,
    size: usize,
}

impl MemoryBuffer {
    /// Allocates exactly `size` zeroed bytes.
    pub fn new(size: usize) -> Result<Self> {
        let data = vec![0u8; size].into_boxed_slice();
        Ok(Self { data: Some(data), size })
    }

    /// Like [`new`](Self::new), but first rejects `size` against a ceiling
    /// the caller imposes (a configured page size, blob size, or
    /// decompressed-output bound) instead of attempting the allocation.
    pub fn new_checked(size: usize, limit: u64) -> Result<Self> {
        if size as u64 > limit {
            return Err(Error::AllocationTooLarge { requested: size as u64, limit });
        }
        Self::new(size)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_released(&self) -> bool {
        self.data.is_none()
    }

    /// Full contents, or `None` if released.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Contents from `at` to the end, or `None` if released or `at > size`.
    pub fn data_at(&self, at: usize) -> Option<&[u8]> {
        self.data.as_deref().and_then(|d| d.get(at..))
    }

    /// Contents `[at, at+len)`, or `None` if released or out of bounds.
    pub fn slice(&self, at: usize, len: usize) -> Option<&[u8]> {
        let end = at.checked_add(len)?;
        self.data.as_deref().and_then(|d| d.get(at..end))
    }

    /// Crate-internal mutable view, used by [`crate::file_stream::FileStream`]
    /// to fill a freshly allocated page without a redundant intermediate
    /// copy. Not part of the public contract in §4.2 — external callers only
    /// ever populate a buffer through `copy_from`/`copy_from_at`.
    pub(crate) fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        self.data.as_deref_mut()
    }

    /// Overwrites the whole buffer. Succeeds iff `src.len() == self.size()`.
    pub fn copy_from(&mut self, src: &[u8]) -> Result<()> {
        if src.len() != self.size {
            return Err(Error::CopyLengthMismatch { expected: self.size, actual: src.len() });
        }
        let Some(data) = self.data.as_deref_mut() else {
            return Err(Error::BufferReleased);
        };
        data.copy_from_slice(src);
        Ok(())
    }

    /// Overwrites `[at, at+src.len())`. Succeeds iff `at + src.len() <= size`.
    pub fn copy_from_at(&mut self, at: usize, src: &[u8]) -> Result<()> {
        let end = at
            .checked_add(src.len())
            .filter(|&end| end <= self.size)
            .ok_or(Error::CopyLengthMismatch { expected: self.size - at.min(self.size), actual: src.len() })?;
        let Some(data) = self.data.as_deref_mut() else {
            return Err(Error::BufferReleased);
        };
        data[at..end].copy_from_slice(src);
        Ok(())
    }

    /// Idempotent; drops the backing allocation.
    pub fn release(&mut self) {
        self.data = None;
    }
}
