//! # vod: a VOD packager core
//!
//! Turns ISO-BMFF (MP4) sources into adaptive-streaming segments on demand:
//!
//! - **[`mp4`]**: parses `moov` metadata into normalized per-track frame
//!   tables, tolerant of arbitrarily malformed input, and provides the
//!   shared fragment box writers.
//! - **[`hds`]**: muxes HDS F4F fragments (`afra`/`moof`/`mdat` with Adobe
//!   tag framing), bootstrap (`abst`) boxes and F4M manifests.
//! - **[`hls`]**: M3U8 playlist builders plus the MPEG-TS muxer contract.
//! - **[`cenc`]**: Common Encryption (AES-CTR) fragment writers with
//!   `saiz`/`saio` auxiliary data.
//! - **[`io`]**: the cooperative read-cache / write-buffer pipeline.
//!
//! ## Request model
//!
//! The core is single-threaded and cooperative. One request owns one state
//! machine; suspension happens only at the I/O boundary, where the read
//! cache may report a range as not resident yet. Every muxer and encryptor
//! then preserves its position and returns [`Error::Again`]; the host
//! re-enters the same operation once data is ready, and the concatenated
//! output is byte-identical to an uninterrupted run.
//!
//! Bytes reach the sink in final fragment order. Cancellation is dropping
//! the request state; nothing runs in the background.

mod config;
mod error;

#[cfg(test)]
pub(crate) mod test_support;

pub mod cenc;
pub mod hds;
pub mod hls;
pub mod io;
pub mod model;
pub mod mp4;

pub use config::*;
pub use error::*;
