use std::io::Write;
use std::ops::Deref;

use pbf_core::{CacheOptions, Error, PageLocatorKind, StreamAdapter, StreamBuffer};

fn fixture(bytes: &[u8], page_size: u64, max_cache_bytes: u64, options: CacheOptions) -> (StreamBuffer, tempfile::NamedTempFile) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    let stream = StreamBuffer::new(page_size, max_cache_bytes, options, u64::MAX).unwrap();
    stream.open(file.path()).unwrap();
    (stream, file)
}

#[test]
fn scans_a_multi_page_file_record_by_record() {
    let data: Vec<u8> = (0u8..=255).collect();
    let (stream, _file) = fixture(&data, 16, 0, CacheOptions::None);

    let mut cursor = 0u64;
    let mut collected = Vec::new();
    while cursor < stream.size() {
        let (guard, locator) = stream.inline_pointer(cursor, 4, true);
        match guard {
            Some(bytes) => collected.extend_from_slice(bytes.deref()),
            None => {
                let (copy, _) = stream.get_copy(cursor, 4).unwrap();
                collected.extend_from_slice(copy.unwrap().data().unwrap());
            }
        }
        cursor += 4;
        let _ = locator;
    }

    assert_eq!(collected, data);
}

#[test]
fn limit_max_cache_size_keeps_residency_bounded_across_a_full_scan() {
    let data: Vec<u8> = (0u8..=255).collect();
    let (stream, _file) = fixture(&data, 16, 32, CacheOptions::LimitMaxCacheSize);

    for page in stream.required_pages() {
        let _ = stream.inline_pointer(page.start, 1, true);
        assert!(stream.cache_size() <= 2);
    }
}

#[test]
fn get_copy_past_eof_is_out_of_bound() {
    let (stream, _file) = fixture(b"0123456789", 4, 0, CacheOptions::None);
    let err = stream.get_copy(8, 10).unwrap_err();
    assert!(matches!(err, Error::OutOfBound { .. }));
}

#[test]
fn reset_after_reopen_reflects_the_new_file_size() {
    let (stream, file) = fixture(b"0123456789", 4, 0, CacheOptions::None);
    assert_eq!(stream.size(), 10);
    stream.close();

    let mut grown = std::fs::OpenOptions::new().append(true).open(file.path()).unwrap();
    grown.write_all(b"abcdef").unwrap();
    stream.open(file.path()).unwrap();

    assert_eq!(stream.size(), 16);
    let (guard, locator) = stream.inline_pointer(10, 2, true);
    assert_eq!(locator.kind, PageLocatorKind::SinglePage);
    assert_eq!(guard.unwrap().deref(), b"ab");
}
