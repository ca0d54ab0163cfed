use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace};
use prost::Message;

use pbf_core::{PageLocatorKind, StreamAdapter};
use pbf_proto::{Blob, BlobHeader};

use crate::blob::{PayloadKind, PbfBlobData};
use crate::error::{Error, Result};

/// A handle returned by the `on_*` registration methods. Matches it against
/// the token recorded alongside a handler so a caller can tell "my handler"
/// from "whatever handler happens to be installed" without comparing
/// `Box<dyn FnMut>` pointers (which isn't possible in safe Rust).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerToken(u64);

fn next_token() -> HandlerToken {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    HandlerToken(NEXT.fetch_add(1, Ordering::Relaxed))
}

struct Slot<F: ?Sized> {
    token: HandlerToken,
    handler: Box<F>,
}

/// C7: walks a stream adapter record by record, splitting it into
/// `(BlobHeader, Blob)` pairs and raising events. Each event has at most one
/// registered handler; re-registering replaces the previous one and returns
/// a fresh token.
pub struct Tokenizer<'a, S: StreamAdapter> {
    stream: &'a S,
    max_blob_bytes: u64,
    on_start: Option<Slot<dyn FnMut() + 'a>>,
    on_finish: Option<Slot<dyn FnMut(Result<()>) + 'a>>,
    on_data_ready: Option<Slot<dyn FnMut(PbfBlobData) + 'a>>,
    on_error: Option<Slot<dyn FnMut(&Error) + 'a>>,
}

impl<'a, S: StreamAdapter> Tokenizer<'a, S> {
    /// `max_blob_bytes` bounds a single record's claimed `header_len` and
    /// `datasize` — checked before `fetch` allocates anything to hold them,
    /// so a corrupt length prefix can't force an unbounded allocation.
    pub fn new(stream: &'a S, max_blob_bytes: u64) -> Self {
        Self { stream, max_blob_bytes, on_start: None, on_finish: None, on_data_ready: None, on_error: None }
    }

    pub fn on_start(&mut self, handler: impl FnMut() + 'a) -> HandlerToken {
        let token = next_token();
        self.on_start = Some(Slot { token, handler: Box::new(handler) });
        token
    }

    pub fn on_finish(&mut self, handler: impl FnMut(Result<()>) + 'a) -> HandlerToken {
        let token = next_token();
        self.on_finish = Some(Slot { token, handler: Box::new(handler) });
        token
    }

    pub fn on_data_ready(&mut self, handler: impl FnMut(PbfBlobData) + 'a) -> HandlerToken {
        let token = next_token();
        self.on_data_ready = Some(Slot { token, handler: Box::new(handler) });
        token
    }

    pub fn on_error(&mut self, handler: impl FnMut(&Error) + 'a) -> HandlerToken {
        let token = next_token();
        self.on_error = Some(Slot { token, handler: Box::new(handler) });
        token
    }

    /// Runs the §4.5 `split` algorithm to completion. Returns the same
    /// result that was (or would have been) passed to `on_finish`.
    pub fn split(&mut self) -> Result<()> {
        if let Some(slot) = &mut self.on_start {
            (slot.handler)();
        }

        let result = self.run();

        if let Err(err) = &result {
            if let Some(slot) = &mut self.on_error {
                (slot.handler)(err);
            }
        }
        if let Some(slot) = &mut self.on_finish {
            let reported = match &result {
                Ok(()) => Ok(()),
                Err(_) => Err(Error::MalformedRecord { position: 0, reason: "split aborted" }),
            };
            (slot.handler)(reported);
        }

        result
    }

    fn run(&mut self) -> Result<()> {
        let total = self.stream.size();
        let mut cursor: u64 = 0;
        let mut prev_page: Option<u64> = None;

        while cursor < total {
            let header_len_bytes = self.fetch(cursor, 4, &mut prev_page)?;
            let header_len = u32::from_be_bytes(header_len_bytes.try_into().unwrap()) as u64;
            cursor += 4;
            if header_len == 0 {
                return self.malformed(cursor);
            }
            if header_len > self.max_blob_bytes {
                return Err(Error::AllocationTooLarge { requested: header_len, limit: self.max_blob_bytes });
            }

            let header_bytes = self.fetch(cursor, header_len, &mut prev_page)?;
            let header = BlobHeader::decode(header_bytes.as_slice())?;
            cursor += header_len;

            let datasize = header.datasize as u64;
            if datasize == 0 {
                return self.malformed(cursor);
            }
            if datasize > self.max_blob_bytes {
                return Err(Error::AllocationTooLarge { requested: datasize, limit: self.max_blob_bytes });
            }

            let blob_bytes = self.fetch(cursor, datasize, &mut prev_page)?;
            let blob = Blob::decode(blob_bytes.as_slice())?;
            cursor += datasize;

            let (kind, payload) = match self.extract_payload(&blob, cursor) {
                Ok(pair) => pair,
                Err(err) => {
                    if let Some(slot) = &mut self.on_error {
                        (slot.handler)(&err);
                    }
                    continue;
                }
            };

            let data = PbfBlobData { header_type: header.r#type, datasize: header.datasize, payload_kind: kind, payload };
            match &mut self.on_data_ready {
                Some(slot) => (slot.handler)(data),
                None => trace!("tokenizer: no on_data_ready handler, dropping blob immediately"),
            }
        }

        Ok(())
    }

    fn malformed(&mut self, position: u64) -> Result<()> {
        let err = Error::MalformedRecord { position, reason: "zero-length header or blob" };
        Err(err)
    }

    fn extract_payload(&self, blob: &Blob, position: u64) -> Result<(PayloadKind, pbf_core::MemoryBuffer)> {
        if let Some(raw) = &blob.raw {
            let mut buf = pbf_core::MemoryBuffer::new_checked(raw.len(), self.max_blob_bytes)?;
            buf.copy_from(raw)?;
            return Ok((PayloadKind::Raw, buf));
        }
        if let Some(zlib) = &blob.zlib_data {
            let mut buf = pbf_core::MemoryBuffer::new_checked(zlib.len(), self.max_blob_bytes)?;
            buf.copy_from(zlib)?;
            return Ok((PayloadKind::Zlib, buf));
        }
        Err(Error::UnsupportedCompression { position })
    }

    /// Fetches `len` bytes starting at `pos`, preferring a zero-copy inline
    /// read and falling back to an owned copy on a cross-page range, then
    /// evicts the previously visited page if the cursor moved into a new
    /// one (§4.5 "CleanupBuffer").
    fn fetch(&self, pos: u64, len: u64, prev_page: &mut Option<u64>) -> Result<Vec<u8>> {
        let (inline, locator) = self.stream.inline_pointer(pos, len, true);
        let bytes = if matches!(locator.kind, PageLocatorKind::SinglePage) {
            inline.map(|g| g.to_vec())
        } else {
            None
        };

        let bytes = match bytes {
            Some(b) => b,
            None => {
                let (copy, _locator) = match self.stream.get_copy(pos, len) {
                    Ok(pair) => pair,
                    Err(pbf_core::Error::OutOfBound { .. }) => {
                        return Err(Error::MalformedRecord { position: pos, reason: "out of bound while reading length-prefixed field" });
                    }
                    Err(err) => return Err(err.into()),
                };
                copy.and_then(|b| b.data().map(|d| d.to_vec())).ok_or(Error::MalformedRecord {
                    position: pos,
                    reason: "out of bound while reading length-prefixed field",
                })?
            }
        };

        if let Some(start_page_id) = locator.start_page_id {
            if prev_page.is_some_and(|p| p != start_page_id) {
                let evicted = self.stream.remove_page(prev_page.unwrap());
                debug!("tokenizer: evicted {evicted} page(s) at page_id {}", prev_page.unwrap());
            }
            *prev_page = Some(start_page_id);
        }

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::ops::Deref;

    use pbf_core::{Page, PageLocator, PageLocatorResult};
    use prost::Message;

    use super::*;

    /// In-memory `StreamAdapter` test double so C7's logic is exercised
    /// without a real file underneath it.
    struct MemStream {
        bytes: Vec<u8>,
        page_size: u64,
        removed: RefCell<Vec<u64>>,
    }

    struct SliceGuard<'a>(&'a [u8]);
    impl<'a> Deref for SliceGuard<'a> {
        type Target = [u8];
        fn deref(&self) -> &[u8] {
            self.0
        }
    }

    impl StreamAdapter for MemStream {
        type Guard<'a> = SliceGuard<'a> where Self: 'a;

        fn size(&self) -> u64 {
            self.bytes.len() as u64
        }

        fn is_open(&self) -> bool {
            true
        }

        fn locate(&self, pos: u64, size: u64) -> PageLocatorResult {
            PageLocator::new(self.bytes.len() as u64, self.page_size).get_page_range(pos, size)
        }

        fn inline_pointer(&self, pos: u64, size: u64, _prepend: bool) -> (Option<Self::Guard<'_>>, PageLocatorResult) {
            let locator = self.locate(pos, size);
            if !matches!(locator.kind, PageLocatorKind::SinglePage) {
                return (None, locator);
            }
            (Some(SliceGuard(&self.bytes[pos as usize..(pos + size) as usize])), locator)
        }

        fn get_copy(&self, pos: u64, size: u64) -> pbf_core::Result<(Option<pbf_core::MemoryBuffer>, PageLocatorResult)> {
            let locator = self.locate(pos, size);
            if !locator.ok {
                return Err(pbf_core::Error::OutOfBound { pos, size, stream_size: locator.total_size });
            }
            let mut buf = pbf_core::MemoryBuffer::new(size as usize)?;
            buf.copy_from(&self.bytes[pos as usize..(pos + size) as usize])?;
            Ok((Some(buf), locator))
        }

        fn remove_page_range(&self, _pos: u64, _size: u64) -> usize {
            0
        }

        fn remove_page(&self, page_id: u64) -> usize {
            self.removed.borrow_mut().push(page_id);
            1
        }

        fn required_pages(&self) -> Vec<Page> {
            PageLocator::new(self.bytes.len() as u64, self.page_size).required_pages()
        }
    }

    fn encode_record(header_type: &str, raw_payload: &[u8]) -> Vec<u8> {
        let blob = Blob { raw: Some(raw_payload.to_vec()), ..Default::default() };
        let mut blob_bytes = Vec::new();
        blob.encode(&mut blob_bytes).unwrap();

        let header = BlobHeader { r#type: header_type.to_string(), indexdata: None, datasize: blob_bytes.len() as i32 };
        let mut header_bytes = Vec::new();
        header.encode(&mut header_bytes).unwrap();

        let mut out = Vec::new();
        out.extend((header_bytes.len() as u32).to_be_bytes());
        out.extend(header_bytes);
        out.extend(blob_bytes);
        out
    }

    #[test]
    fn splits_two_records_and_evicts_pages_as_it_goes() {
        let mut bytes = encode_record("OSMData", b"hello");
        bytes.extend(encode_record("OSMData", b"world"));
        let stream = MemStream { bytes, page_size: 8, removed: RefCell::new(Vec::new()) };

        let seen = RefCell::new(Vec::new());
        let mut tokenizer = Tokenizer::new(&stream, 1024 * 1024);
        tokenizer.on_data_ready(|data| seen.borrow_mut().push(data.header_type));

        tokenizer.split().unwrap();

        assert_eq!(seen.into_inner(), vec!["OSMData".to_string(), "OSMData".to_string()]);
        assert!(!stream.removed.borrow().is_empty());
    }

    #[test]
    fn zero_length_header_is_malformed() {
        let stream = MemStream { bytes: vec![0, 0, 0, 0], page_size: 8, removed: RefCell::new(Vec::new()) };
        let mut tokenizer = Tokenizer::new(&stream, 1024 * 1024);
        let result = tokenizer.split();
        assert!(result.is_err());
    }

    #[test]
    fn on_start_and_on_finish_both_fire() {
        let bytes = encode_record("OSMHeader", b"x");
        let stream = MemStream { bytes, page_size: 8, removed: RefCell::new(Vec::new()) };
        let started = RefCell::new(false);
        let finished = RefCell::new(false);

        let mut tokenizer = Tokenizer::new(&stream, 1024 * 1024);
        tokenizer.on_start(|| *started.borrow_mut() = true);
        tokenizer.on_finish(|result| *finished.borrow_mut() = result.is_ok());
        tokenizer.on_data_ready(|_| {});

        tokenizer.split().unwrap();
        assert!(*started.borrow());
        assert!(*finished.borrow());
    }

    #[test]
    fn truncated_file_is_malformed_not_a_bare_core_error() {
        let mut bytes = encode_record("OSMData", b"hello world");
        bytes.truncate(bytes.len() - 4);
        let stream = MemStream { bytes, page_size: 8, removed: RefCell::new(Vec::new()) };
        let mut tokenizer = Tokenizer::new(&stream, 1024 * 1024);
        let err = tokenizer.split().unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { .. }));
    }

    #[test]
    fn blob_over_the_max_size_is_rejected_before_any_fetch() {
        let bytes = encode_record("OSMData", b"hello");
        let stream = MemStream { bytes, page_size: 8, removed: RefCell::new(Vec::new()) };
        let mut tokenizer = Tokenizer::new(&stream, 4);
        let err = tokenizer.split().unwrap_err();
        assert!(matches!(err, Error::AllocationTooLarge { limit: 4, .. }));
    }

    #[test]
    fn unsupported_compression_reports_error_and_continues() {
        let blob = Blob { lzma_data: Some(b"z".to_vec()), ..Default::default() };
        let mut blob_bytes = Vec::new();
        blob.encode(&mut blob_bytes).unwrap();
        let header = BlobHeader { r#type: "OSMData".into(), indexdata: None, datasize: blob_bytes.len() as i32 };
        let mut header_bytes = Vec::new();
        header.encode(&mut header_bytes).unwrap();
        let mut bytes = Vec::new();
        bytes.extend((header_bytes.len() as u32).to_be_bytes());
        bytes.extend(header_bytes);
        bytes.extend(blob_bytes);

        let stream = MemStream { bytes, page_size: 8, removed: RefCell::new(Vec::new()) };
        let errors = RefCell::new(0);
        let mut tokenizer = Tokenizer::new(&stream, 1024 * 1024);
        tokenizer.on_error(|_| *errors.borrow_mut() += 1);
        tokenizer.on_data_ready(|_| panic!("should not reach on_data_ready"));

        tokenizer.split().unwrap();
        assert_eq!(*errors.borrow(), 1);
    }
}
