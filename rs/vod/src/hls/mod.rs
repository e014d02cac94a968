//! HTTP Live Streaming: M3U8 playlist builders and the contract of the
//! external MPEG-TS segment muxer.

mod playlist;
mod ts;

pub use playlist::*;
pub use ts::*;
