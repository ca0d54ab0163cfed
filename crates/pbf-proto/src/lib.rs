//! Generated bindings for the OSM-PBF wire format (`fileformat.proto`,
//! `osmformat.proto`), built by `prost-build` in `build.rs`.
//!
//! This crate is the "OSM-PBF schema library" external collaborator: it has
//! no opinion about caching, compression or threading, it only knows how to
//! turn bytes into `Blob`/`BlobHeader`/`HeaderBlock`/`PrimitiveBlock` and
//! back.

#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/osmpbf.rs"));
