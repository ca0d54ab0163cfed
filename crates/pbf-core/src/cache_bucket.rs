use std::collections::BTreeMap;

use log::{trace, warn};

use crate::capability::CacheBucketSource;
use crate::error::{Error, Result};
use crate::hints::unlikely;
use crate::locator::{PageLocator, PageLocatorKind, PageLocatorResult};
use crate::memory_buffer::MemoryBuffer;
use crate::page::{Page, PageState};

/// Whether a [`CacheBucket`] enforces a soft resident-page cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOptions {
    None,
    LimitMaxCacheSize,
}

/// A map from page-id to resident [`MemoryBuffer`], backed by a
/// [`CacheBucketSource`]. Not internally synchronized — see
/// [`crate::stream_buffer::StreamBuffer`], which owns the lock.
pub struct CacheBucket<S: CacheBucketSource> {
    source: S,
    page_size: u64,
    max_resident: Option<u64>,
    max_alloc_bytes: u64,
    pages: Vec<Page>,
    active_pages: BTreeMap<u64, Page>,
    caches: BTreeMap<u64, MemoryBuffer>,
}

impl<S: CacheBucketSource> CacheBucket<S> {
    /// `max_alloc_bytes` bounds any single allocation this bucket makes
    /// (one page, or one cross-page copy) — a pre-flight ceiling checked
    /// before the allocation is attempted, not a post-hoc cap.
    pub fn open(source: S, page_size: u64, max_cache_bytes: u64, options: CacheOptions, max_alloc_bytes: u64) -> Result<Self> {
        let file_size = source.size()?;
        let locator = PageLocator::new(file_size, page_size);
        let pages = locator.required_pages();
        let max_resident = match options {
            CacheOptions::None => None,
            CacheOptions::LimitMaxCacheSize => {
                Some(PageLocator::new(max_cache_bytes, page_size).total_pages().max(1))
            }
        };
        Ok(Self {
            source,
            page_size,
            max_resident,
            max_alloc_bytes,
            pages,
            active_pages: BTreeMap::new(),
            caches: BTreeMap::new(),
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn locator(&self) -> PageLocator {
        PageLocator::new(self.total_size(), self.page_size)
    }

    pub fn total_size(&self) -> u64 {
        self.pages.last().map_or(0, |p| p.end + 1)
    }

    pub fn required_pages(&self) -> Vec<Page> {
        self.pages.clone()
    }

    pub fn active_page_count(&self) -> usize {
        self.active_pages.len()
    }

    pub fn is_resident(&self, page_id: u64) -> bool {
        self.active_pages.contains_key(&page_id)
    }

    fn page_by_id(&self, page_id: u64) -> Option<Page> {
        self.pages.iter().find(|p| p.page_id == page_id).copied()
    }

    /// Materializes every page covering `(pos, size)`. Returns the count of
    /// pages resident in the range once done (including ones already
    /// resident).
    pub fn materialize(&mut self, pos: u64, size: u64) -> Result<usize> {
        let locator = self.locator().get_page_range(pos, size);
        if !locator.ok || matches!(locator.kind, PageLocatorKind::StartPageResolve) {
            return Ok(0);
        }
        let start = locator.start_page_id.unwrap();
        let end = locator.end_page_id.unwrap_or(start);

        let mut touched = Vec::new();
        let mut count = 0usize;
        for page_id in start..=end {
            if self.active_pages.contains_key(&page_id) {
                count += 1;
                touched.push(page_id);
                continue;
            }
            self.materialize_one(page_id)?;
            count += 1;
            touched.push(page_id);
        }

        self.evict_over_capacity(&touched);
        Ok(count)
    }

    fn materialize_one(&mut self, page_id: u64) -> Result<()> {
        let page = self.page_by_id(page_id).ok_or(Error::PageNotResident { page_id })?;
        trace!("cache_bucket: materializing page {page_id} [{}..{}]", page.start, page.end);
        let mut buf = MemoryBuffer::new_checked(page.size as usize, self.max_alloc_bytes)?;
        if let Err(err) = self.source.copy_to(&mut buf, page.start, page.size) {
            warn!("cache_bucket: source copy_to page {page_id} failed: {err}");
            return Err(Error::SourceCopyFailed { reported: self.total_size(), offset: page.start, len: page.size });
        }
        self.caches.insert(page_id, buf);
        let mut resident = page;
        resident.state = PageState::Allocated;
        self.active_pages.insert(page_id, resident);
        Ok(())
    }

    /// LRU-by-page-id eviction (DESIGN.md Open Question 4): the resident
    /// page furthest behind a forward read cursor has the smallest id.
    fn evict_over_capacity(&mut self, just_touched: &[u64]) {
        let Some(max_resident) = self.max_resident else { return };
        while self.active_pages.len() as u64 > max_resident {
            let victim = self
                .active_pages
                .keys()
                .copied()
                .find(|id| !just_touched.contains(id))
                .or_else(|| self.active_pages.keys().next().copied());
            let Some(victim) = victim else { break };
            trace!("cache_bucket: evicting page {victim} (LimitMaxCacheSize)");
            self.evict_page(victim);
        }
    }

    fn evict_page(&mut self, page_id: u64) -> bool {
        let had = self.active_pages.remove(&page_id).is_some();
        if let Some(mut buf) = self.caches.remove(&page_id) {
            buf.release();
        }
        had
    }

    /// Zero-copy access to a resident page's bytes at `global_pos`,
    /// materializing first when `prepend` is true and the page is absent.
    pub fn data_inline(&mut self, page_id: u64, global_pos: u64, size: u64, prepend: bool) -> Option<&[u8]> {
        let page = self.page_by_id(page_id)?;
        if !self.active_pages.contains_key(&page_id) {
            if !prepend {
                return None;
            }
            self.materialize_one(page_id).ok()?;
            self.evict_over_capacity(&[page_id]);
        }
        let in_page_offset = (global_pos - page.start) as usize;
        self.caches.get(&page_id)?.slice(in_page_offset, size as usize)
    }

    /// Read-only variant used once a page is already known resident (no
    /// materialize side effect); the basis for
    /// [`crate::stream_buffer::StreamBuffer`]'s shared-lock fast path.
    pub fn data_inline_ready(&self, page_id: u64, global_pos: u64, size: u64) -> Option<&[u8]> {
        let page = self.page_by_id(page_id)?;
        let in_page_offset = (global_pos - page.start) as usize;
        self.caches.get(&page_id)?.slice(in_page_offset, size as usize)
    }

    /// Copies `(pos, size)` into a freshly allocated buffer, materializing
    /// any page it touches. Fails with [`Error::OutOfBound`] when the
    /// locator rejects the range outright (the request ran past EOF);
    /// returns `None` for a non-error "no data to copy" resolution
    /// ([`PageLocatorKind::StartPageResolve`]/[`PageLocatorKind::Unknown`]).
    pub fn get_as_copy(&mut self, pos: u64, size: u64) -> Result<Option<(MemoryBuffer, PageLocatorResult)>> {
        let locator = self.locator().get_page_range(pos, size);
        if unlikely(!locator.ok) {
            return Err(Error::OutOfBound { pos, size, stream_size: locator.total_size });
        }

        let mut out = MemoryBuffer::new_checked(size as usize, self.max_alloc_bytes)?;

        match locator.kind {
            PageLocatorKind::SinglePage => {
                let page_id = locator.start_page_id.unwrap();
                if !self.active_pages.contains_key(&page_id) {
                    self.materialize_one(page_id)?;
                    self.evict_over_capacity(&[page_id]);
                }
                let page = self.page_by_id(page_id).unwrap();
                let in_page_offset = (pos - page.start) as usize;
                let src = self
                    .caches
                    .get(&page_id)
                    .and_then(|b| b.slice(in_page_offset, size as usize))
                    .ok_or(Error::PageNotResident { page_id })?;
                out.copy_from(src)?;
            }
            PageLocatorKind::CrossPage => {
                let start_page_id = locator.start_page_id.unwrap();
                let end_page_id = locator.end_page_id.unwrap();
                let global_end = locator.end.unwrap();
                let mut cursor = pos;
                let mut dst_offset = 0usize;
                for page_id in start_page_id..=end_page_id {
                    if !self.active_pages.contains_key(&page_id) {
                        self.materialize_one(page_id)?;
                    }
                    let page = self.page_by_id(page_id).unwrap();
                    let local_start = page.start.max(cursor);
                    let copy_end = (page.end + 1).min(global_end + 1);
                    let len = (copy_end - local_start) as usize;
                    let in_page_offset = (local_start - page.start) as usize;
                    let src = self
                        .caches
                        .get(&page_id)
                        .and_then(|b| b.slice(in_page_offset, len))
                        .ok_or(Error::PageNotResident { page_id })?;
                    out.copy_from_at(dst_offset, src)?;
                    dst_offset += len;
                    cursor = copy_end;
                }
                self.evict_over_capacity(&(start_page_id..=end_page_id).collect::<Vec<_>>());
            }
            _ => return Ok(None),
        }

        Ok(Some((out, locator)))
    }

    /// Evicts every active page overlapping `(pos, size)`. Returns the
    /// count evicted; pages not resident count as "already removed."
    pub fn remove(&mut self, pos: u64, size: u64) -> usize {
        let locator = self.locator().get_page_range(pos, size);
        if !locator.ok {
            return 0;
        }
        let start = locator.start_page_id.unwrap();
        let end = locator.end_page_id.unwrap_or(start);
        // A page absent from the cache counts as "already removed" too.
        for page_id in start..=end {
            self.evict_page(page_id);
        }
        (end - start + 1) as usize
    }

    pub fn remove_page(&mut self, page_id: u64) -> usize {
        if self.evict_page(page_id) { 1 } else { 0 }
    }

    /// Releases every resident page, re-reads the source's size, and
    /// rebuilds the page catalog.
    pub fn reset(&mut self) -> Result<()> {
        for (_, mut buf) in std::mem::take(&mut self.caches) {
            buf.release();
        }
        self.active_pages.clear();
        let file_size = self.source.size()?;
        self.pages = PageLocator::new(file_size, self.page_size).required_pages();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    struct MemSource(RefCell<Vec<u8>>);

    impl CacheBucketSource for MemSource {
        fn size(&self) -> Result<u64> {
            Ok(self.0.borrow().len() as u64)
        }
        fn copy_to(&self, dst: &mut MemoryBuffer, offset: u64, len: u64) -> Result<()> {
            let data = self.0.borrow();
            let slice = &data[offset as usize..(offset + len) as usize];
            dst.copy_from(slice)
        }
    }

    fn bucket(bytes: &[u8], page_size: u64) -> CacheBucket<MemSource> {
        CacheBucket::open(MemSource(RefCell::new(bytes.to_vec())), page_size, 0, CacheOptions::None, u64::MAX).unwrap()
    }

    #[test]
    fn materialize_and_dom_invariant() {
        let mut b = bucket(b"0123456789", 4);
        assert_eq!(b.materialize(0, 5).unwrap(), 2);
        assert_eq!(b.active_page_count(), 2);
        assert!(b.is_resident(1) && b.is_resident(2));
    }

    #[test]
    fn get_as_copy_single_page_copies_bytes() {
        let mut b = bucket(b"0123456789", 4);
        let (buf, locator) = b.get_as_copy(1, 2).unwrap().unwrap();
        assert_eq!(locator.kind, PageLocatorKind::SinglePage);
        assert_eq!(buf.data(), Some(&b"12"[..]));
    }

    #[test]
    fn get_as_copy_cross_page_copies_bytes() {
        let mut b = bucket(b"0123456789", 4);
        let (buf, locator) = b.get_as_copy(3, 4).unwrap().unwrap();
        assert_eq!(locator.kind, PageLocatorKind::CrossPage);
        assert_eq!(buf.data(), Some(&b"3456"[..]));
    }

    #[test]
    fn remove_releases_and_reports_count() {
        let mut b = bucket(b"0123456789", 4);
        b.materialize(0, 10).unwrap();
        assert_eq!(b.remove(0, 10), 3);
        assert_eq!(b.active_page_count(), 0);
    }

    #[test]
    fn limit_max_cache_size_evicts_lru() {
        let mut b = CacheBucket::open(
            MemSource(RefCell::new(b"0123456789abcdef".to_vec())),
            4,
            8,
            CacheOptions::LimitMaxCacheSize,
            u64::MAX,
        )
        .unwrap();
        b.materialize(0, 4).unwrap();
        b.materialize(4, 4).unwrap();
        b.materialize(8, 4).unwrap();
        assert!(b.active_page_count() <= 2);
    }

    #[test]
    fn get_as_copy_out_of_bound_is_an_error() {
        let mut b = bucket(b"0123456789", 4);
        assert!(matches!(b.get_as_copy(9, 5), Err(Error::OutOfBound { .. })));
    }

    #[test]
    fn materialize_one_rejects_a_page_over_the_alloc_ceiling() {
        let mut b = CacheBucket::open(MemSource(RefCell::new(b"0123456789".to_vec())), 4, 0, CacheOptions::None, 2).unwrap();
        assert!(matches!(b.materialize(0, 4), Err(Error::AllocationTooLarge { .. })));
    }
}
