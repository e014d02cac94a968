//! HTTP Dynamic Streaming: F4F fragment muxing, bootstrap boxes, AMF0
//! metadata and the F4M manifest.

mod amf0;
mod bootstrap;
mod fragment;
mod manifest;

pub use amf0::*;
pub use bootstrap::*;
pub use fragment::*;
pub use manifest::*;
