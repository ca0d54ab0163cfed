use std::cell::RefCell;

use pbf_core::{CacheBucket, CacheBucketSource, CacheOptions, Error, MemoryBuffer, PageLocatorKind, Result};

/// A `CacheBucketSource` over an in-memory byte vector, so these tests
/// exercise `CacheBucket`'s materialize/evict/copy bookkeeping without a
/// real file underneath it.
struct MemSource(RefCell<Vec<u8>>);

impl CacheBucketSource for MemSource {
    fn size(&self) -> Result<u64> {
        Ok(self.0.borrow().len() as u64)
    }

    fn copy_to(&self, dst: &mut MemoryBuffer, offset: u64, len: u64) -> Result<()> {
        let data = self.0.borrow();
        dst.copy_from(&data[offset as usize..(offset + len) as usize])
    }
}

#[test]
fn cross_page_copy_reassembles_bytes_in_order() {
    let mut bucket = CacheBucket::open(MemSource(RefCell::new(b"0123456789abcdef".to_vec())), 4, 0, CacheOptions::None, u64::MAX).unwrap();
    let (buf, locator) = bucket.get_as_copy(2, 9).unwrap().unwrap();
    assert_eq!(locator.kind, PageLocatorKind::CrossPage);
    assert_eq!(buf.data(), Some(&b"23456789a"[..]));
}

#[test]
fn removing_a_range_evicts_every_page_it_touches() {
    let mut bucket = CacheBucket::open(MemSource(RefCell::new(b"0123456789abcdef".to_vec())), 4, 0, CacheOptions::None, u64::MAX).unwrap();
    bucket.materialize(0, 16).unwrap();
    assert_eq!(bucket.active_page_count(), 4);
    assert_eq!(bucket.remove(0, 16), 4);
    assert_eq!(bucket.active_page_count(), 0);
}

#[test]
fn a_page_bigger_than_the_alloc_ceiling_is_rejected_before_copying() {
    let mut bucket = CacheBucket::open(MemSource(RefCell::new(b"0123456789abcdef".to_vec())), 4, 0, CacheOptions::None, 2).unwrap();
    let err = bucket.get_as_copy(0, 4).unwrap_err();
    assert!(matches!(err, Error::AllocationTooLarge { requested: 4, limit: 2 }));
}

#[test]
fn reset_rebuilds_the_page_catalog_from_the_sources_current_size() {
    let source = MemSource(RefCell::new(b"01234567".to_vec()));
    let mut bucket = CacheBucket::open(source, 4, 0, CacheOptions::None, u64::MAX).unwrap();
    assert_eq!(bucket.required_pages().len(), 2);

    bucket.source_mut().0.borrow_mut().extend_from_slice(b"89ab");
    bucket.reset().unwrap();
    assert_eq!(bucket.required_pages().len(), 3);
}
