use std::result;

use thiserror::Error;

pub type Result<T, E = Error> = result::Result<T, E>;

/// Error types for `pbf-pipeline` operations (C7-C9: the tokenizer, the
/// decoder, and the reader's worker-pool orchestration).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] pbf_core::Error),

    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    #[error("malformed record at position {position}: {reason}")]
    MalformedRecord { position: u64, reason: &'static str },

    #[error("unsupported compression in blob at position {position}")]
    UnsupportedCompression { position: u64 },

    #[error("invariant violation decoding {entity}: {detail}")]
    InvariantViolation { entity: &'static str, detail: String },

    #[error("HeaderBlock declares unknown required feature {feature:?}")]
    UnknownRequiredFeature { feature: String },

    #[error("requested allocation of {requested} bytes exceeds the configured limit of {limit} bytes")]
    AllocationTooLarge { requested: u64, limit: u64 },

    #[error("reader is not running")]
    NotRunning,
}
