/// A single media sample within a track, immutable once parsing finishes.
///
/// Frames live in one flat vector per track; every cursor into a frame
/// table (`first_frame`, `cur_frame`, ...) is a plain index, so a muxer
/// suspended mid-fragment resumes by re-reading its own integers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Frame {
	/// Decode timestamp, normalized to [`TIMESCALE_90K`](super::TIMESCALE_90K).
	pub dts: u64,

	/// Presentation timestamp, normalized to [`TIMESCALE_90K`](super::TIMESCALE_90K).
	/// Never less than `dts - pts_delay`; the parser shifts all timestamps
	/// so presentation times start at zero.
	pub pts: u64,

	/// Duration in the owning track's timescale.
	pub duration: u32,

	/// Payload size in bytes.
	pub size: u32,

	/// Absolute byte offset of the payload within the source file.
	pub offset: u64,

	/// Composition-to-decode delay in the owning track's timescale.
	pub pts_delay: u32,

	/// Sync sample flag. Every frame of a track without a sync-sample table
	/// is a sync sample.
	pub key_frame: bool,
}
