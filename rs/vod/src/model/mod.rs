//! The in-memory frame model shared by the parser, muxers and encryptor.

mod frame;
mod media_set;
mod timescale;
mod track;

pub use frame::*;
pub use media_set::*;
pub use timescale::*;
pub use track::*;
