use bytes::Bytes;

use super::Frame;

/// The media types the packager muxes. Also used as read-cache slot ids so
/// audio and video reads never evict each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MediaType {
	Video,
	Audio,
}

impl MediaType {
	pub const COUNT: usize = 2;

	pub fn index(self) -> usize {
		match self {
			Self::Video => 0,
			Self::Audio => 1,
		}
	}
}

/// Codecs understood well enough for sample-entry framing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecId {
	Avc,
	Aac,
	Mp3,
}

/// Geometry and bitstream framing of a video track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoInfo {
	pub width: u16,
	pub height: u16,

	/// Bytes of length prefix before each NAL unit, 1 to 4.
	pub nal_packet_size_length: u8,
}

/// Shape of an audio track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioInfo {
	pub channels: u16,
	pub bits_per_sample: u16,
	pub sample_rate: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaInfo {
	Video(VideoInfo),
	Audio(AudioInfo),
}

impl MediaInfo {
	pub fn media_type(&self) -> MediaType {
		match self {
			Self::Video(_) => MediaType::Video,
			Self::Audio(_) => MediaType::Audio,
		}
	}
}

/// One parsed source track: a frame table plus the metadata needed to mux
/// and encrypt it. Owned by a [`MediaSet`](super::MediaSet) for the
/// duration of one request.
#[derive(Clone, Debug)]
pub struct Track {
	pub media_info: MediaInfo,
	pub codec: CodecId,

	/// Codec configuration replayed verbatim in front of key frames:
	/// the AVC decoder configuration record or the AAC
	/// AudioSpecificConfig.
	pub extra_data: Bytes,

	/// Ticks per second of `duration`, frame durations and delays.
	pub timescale: u32,

	/// Track duration in `timescale` units.
	pub duration: u64,

	/// Track duration normalized to [`TIMESCALE_90K`](super::TIMESCALE_90K).
	pub duration_90k: u64,

	/// Zero-based index of this track among the source's tracks of the
	/// same media type.
	pub track_index: u32,

	/// Average bitrate in bits per second, derived from the frame table.
	pub bitrate: u32,

	/// Smallest frame duration, in `timescale` units.
	pub min_frame_duration: u32,

	/// The frames selected by the clip window, in decode order.
	pub frames: Vec<Frame>,

	/// Index of `frames[0]` within the full source track.
	pub first_frame_index: u32,

	/// Decode time of `frames[0]` in `timescale` units.
	pub first_frame_time_offset: u64,

	pub key_frame_count: u32,

	/// Sum of all frame payload sizes, in bytes.
	pub total_frames_size: u64,

	/// Media time (in `timescale` units) contributed by earlier clips of
	/// the same sequence that were never parsed.
	pub clip_sequence_offset: u64,

	/// Source file the frame offsets point into.
	pub file_index: u32,
}

impl Track {
	pub fn media_type(&self) -> MediaType {
		self.media_info.media_type()
	}

	pub fn video_info(&self) -> Option<&VideoInfo> {
		match &self.media_info {
			MediaInfo::Video(info) => Some(info),
			MediaInfo::Audio(_) => None,
		}
	}

	pub fn audio_info(&self) -> Option<&AudioInfo> {
		match &self.media_info {
			MediaInfo::Audio(info) => Some(info),
			MediaInfo::Video(_) => None,
		}
	}
}
