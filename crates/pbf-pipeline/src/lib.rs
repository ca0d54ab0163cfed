//! Tokenizer, decoder, and worker-pool orchestration (C7-C9) on top of
//! `pbf-core`'s paged streaming substrate and `pbf-proto`'s generated OSM-PBF
//! message types.

mod blob;
mod config;
mod counters;
mod decoder;
pub mod error;
mod element;
mod field_decoder;
mod queue;
mod reader;
mod round_robin;
mod tokenizer;

pub use blob::{PayloadKind, PbfBlobData};
pub use config::Config;
pub use counters::Counters;
pub use decoder::{DecoderOptions, PbfDecoder, SkipOptions};
pub use element::{BoundingBox, FileHeader, MemberType, Node, OsmElement, Relation, RelationMember, Tags, Way};
pub use error::*;
pub use queue::WorkerQueue;
pub use reader::{OsmPbfReader, StreamState};
pub use round_robin::RoundRobin;
pub use tokenizer::{HandlerToken, Tokenizer};
