use crate::Result;
use crate::io::ReadCache;

/// One video key frame's position within the segmented TS output, as
/// reported by the muxer's simulation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IframeRef {
	/// 1-based segment the key frame lands in.
	pub segment_index: u32,

	/// Time until the next key frame (or the presentation end), in
	/// milliseconds.
	pub duration_ms: u32,

	/// Byte offset of the key frame's PES data within its segment.
	pub offset: u32,

	/// Byte size of the key frame's PES data.
	pub size: u32,
}

/// Contract of the MPEG-TS segment muxer.
///
/// The muxer itself lives outside this crate; it packetizes PES into
/// 188-byte TS packets. It must obey the same cooperative model as the
/// fragment muxers here: [`process_frames`](Self::process_frames) may
/// yield [`Again`](crate::Error::Again) with its position preserved, and
/// its simulation pass must pick frames exactly like its write pass so the
/// iframe byte ranges it reports are the ones it later emits.
pub trait TsMuxer {
	/// Streams the TS packets of the current segment to the sink the muxer
	/// was built with.
	fn process_frames(&mut self, cache: &mut dyn ReadCache) -> Result<()>;

	/// Pure pass over the whole presentation reporting every video key
	/// frame, for the iframes playlist.
	fn simulate_iframes(&mut self, segment_duration_ms: u32, on_iframe: &mut dyn FnMut(IframeRef)) -> Result<()>;
}
