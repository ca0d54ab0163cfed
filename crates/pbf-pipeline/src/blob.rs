use pbf_core::MemoryBuffer;

/// Which field of `Blob` the tokenizer pulled the payload from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Raw,
    Zlib,
}

/// A decoded `(BlobHeader, Blob)` record, minus the parts the decoder
/// doesn't need: just enough to dispatch on `header.type` and decompress.
/// Ownership transfers from the tokenizer to whichever worker dequeues it;
/// the worker releases `payload` once decoded.
pub struct PbfBlobData {
    pub header_type: String,
    pub datasize: i32,
    pub payload_kind: PayloadKind,
    pub payload: MemoryBuffer,
}
