use std::ops::Deref;

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

use crate::cache_bucket::{CacheBucket, CacheOptions};
use crate::capability::CacheBucketSource;
use crate::error::Result;
use crate::file_stream::FileStream;
use crate::locator::{PageLocator, PageLocatorKind, PageLocatorResult};
use crate::memory_buffer::MemoryBuffer;
use crate::page::Page;

/// What the PBF tokenizer needs from whatever serves it bytes.
///
/// Replaces the original's `IMemoryBufferAdapter`/`ICacheBucketBuffer`
/// hierarchy: the tokenizer depends only on this, not on a concrete
/// `StreamBuffer`. `Guard` carries a borrow tied to the adapter's own
/// internal locking; the default, file-backed implementation
/// ([`StreamBuffer`]) returns a [`MappedRwLockReadGuard`] so a zero-copy
/// single-page read can't outlive the lock that protects the page it points
/// into.
pub trait StreamAdapter {
    type Guard<'a>: Deref<Target = [u8]>
    where
        Self: 'a;

    fn size(&self) -> u64;
    fn is_open(&self) -> bool;
    fn locate(&self, pos: u64, size: u64) -> PageLocatorResult;

    /// Zero-copy read of a single-page range. Returns `None` (with the
    /// locator surfaced separately) when the range is not `SinglePage`, the
    /// page is absent and `prepend` is false, or the range is out of bound.
    fn inline_pointer(&self, pos: u64, size: u64, prepend: bool) -> (Option<Self::Guard<'_>>, PageLocatorResult);

    fn get_copy(&self, pos: u64, size: u64) -> Result<(Option<MemoryBuffer>, PageLocatorResult)>;
    fn remove_page_range(&self, pos: u64, size: u64) -> usize;
    fn remove_page(&self, page_id: u64) -> usize;
    fn required_pages(&self) -> Vec<Page>;
}

/// Facade combining a [`FileStream`] (as bucket source) with a
/// [`CacheBucket`]. A single reader-writer lock guards every bucket-touching
/// operation; concurrent readers that find their page already resident
/// never block each other, and only a reader that must materialize a page
/// upgrades to exclusive access.
pub struct StreamBuffer {
    inner: RwLock<CacheBucket<FileStream>>,
}

impl StreamBuffer {
    /// `max_alloc_bytes` is a pre-flight ceiling on any single page or
    /// cross-page-copy allocation the underlying bucket makes; see
    /// [`CacheBucket::open`].
    pub fn new(page_size: u64, max_cache_bytes: u64, options: CacheOptions, max_alloc_bytes: u64) -> Result<Self> {
        let bucket = CacheBucket::open(FileStream::new(), page_size, max_cache_bytes, options, max_alloc_bytes)?;
        Ok(Self { inner: RwLock::new(bucket) })
    }

    pub fn open(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let mut bucket = self.inner.write();
        bucket.source_mut().open(path)?;
        bucket.reset()
    }

    pub fn close(&self) {
        let mut bucket = self.inner.write();
        bucket.source_mut().close();
    }

    pub fn cache_size(&self) -> usize {
        self.inner.read().active_page_count()
    }

    pub fn is_good(&self) -> bool {
        self.inner.read().source().is_good()
    }

    pub fn is_eof(&self, pos: u64) -> bool {
        pos >= self.size()
    }
}

impl StreamAdapter for StreamBuffer {
    type Guard<'a> = MappedRwLockReadGuard<'a, [u8]>;

    fn size(&self) -> u64 {
        self.inner.read().total_size()
    }

    fn is_open(&self) -> bool {
        self.inner.read().source().is_open()
    }

    fn locate(&self, pos: u64, size: u64) -> PageLocatorResult {
        let bucket = self.inner.read();
        PageLocator::new(bucket.total_size(), bucket.page_size()).get_page_range(pos, size)
    }

    fn inline_pointer(&self, pos: u64, size: u64, prepend: bool) -> (Option<Self::Guard<'_>>, PageLocatorResult) {
        let upgradable = self.inner.upgradable_read();
        let locator = PageLocator::new(upgradable.total_size(), upgradable.page_size()).get_page_range(pos, size);
        if !matches!(locator.kind, PageLocatorKind::SinglePage) {
            return (None, locator);
        }
        let page_id = locator.start_page_id.unwrap();

        if upgradable.is_resident(page_id) {
            let reader = RwLockUpgradableReadGuard::downgrade(upgradable);
            let mapped = RwLockReadGuard::try_map(reader, |b| b.data_inline_ready(page_id, pos, size)).ok();
            return (mapped, locator);
        }

        if !prepend {
            return (None, locator);
        }

        let mut writer = RwLockUpgradableReadGuard::upgrade(upgradable);
        if writer.materialize(pos, size).is_err() {
            return (None, locator);
        }
        let reader = RwLockWriteGuard::downgrade(writer);
        let mapped = RwLockReadGuard::try_map(reader, |b| b.data_inline_ready(page_id, pos, size)).ok();
        (mapped, locator)
    }

    fn get_copy(&self, pos: u64, size: u64) -> Result<(Option<MemoryBuffer>, PageLocatorResult)> {
        let mut bucket = self.inner.write();
        match bucket.get_as_copy(pos, size)? {
            Some((buf, locator)) => Ok((Some(buf), locator)),
            None => {
                let locator = PageLocator::new(bucket.total_size(), bucket.page_size()).get_page_range(pos, size);
                Ok((None, locator))
            }
        }
    }

    fn remove_page_range(&self, pos: u64, size: u64) -> usize {
        self.inner.write().remove(pos, size)
    }

    fn remove_page(&self, page_id: u64) -> usize {
        self.inner.write().remove_page(page_id)
    }

    fn required_pages(&self) -> Vec<Page> {
        self.inner.read().required_pages()
    }
}
