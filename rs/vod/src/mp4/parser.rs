use bytes::Bytes;

use crate::model::{
	AudioInfo, CodecId, MediaInfo, MediaSet, MediaType, Track, VideoInfo, rescale_time, TIMESCALE_90K,
};
use crate::{Error, Result};

use super::atom::{AtomInfo, FourCc, collect_trak_atoms, walk_atoms};
use super::esds::parse_esds;

/// Frames larger than this are rejected as malformed.
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

pub const DEFAULT_MAX_FRAME_COUNT: u32 = 1024 * 1024;

/// Upper bound on accumulated media time in track timescale units, far
/// beyond any real presentation but low enough that every later rescale
/// stays inside 64 bits.
const MAX_TOTAL_DURATION: u64 = 1 << 44;

/// Which tracks of each media type to parse, one bit per track index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackMask {
	pub video: u32,
	pub audio: u32,
}

impl TrackMask {
	pub const ALL: TrackMask = TrackMask { video: u32::MAX, audio: u32::MAX };

	pub fn contains(&self, media_type: MediaType, track_index: u32) -> bool {
		if track_index >= 32 {
			return false;
		}

		let mask = match media_type {
			MediaType::Video => self.video,
			MediaType::Audio => self.audio,
		};
		mask & (1 << track_index) != 0
	}
}

/// Clip window and safety bounds for one parse request.
#[derive(Clone, Copy, Debug)]
pub struct ParseParams {
	/// Clip window start, in milliseconds.
	pub start_ms: u32,

	/// Clip window end, in milliseconds; `u32::MAX` leaves it open.
	pub end_ms: u32,

	pub tracks: TrackMask,

	pub max_frame_count: u32,

	/// Media time contributed by earlier clips of the sequence, in each
	/// track's own timescale.
	pub clip_sequence_offset: u64,

	/// Source file index recorded on every parsed track.
	pub file_index: u32,
}

impl Default for ParseParams {
	fn default() -> Self {
		Self {
			start_ms: 0,
			end_ms: u32::MAX,
			tracks: TrackMask::ALL,
			max_frame_count: DEFAULT_MAX_FRAME_COUNT,
			clip_sequence_offset: 0,
			file_index: 0,
		}
	}
}

/// Parses every requested track of a complete `moov` box body.
///
/// Unsupported handlers and codecs are skipped silently; structural damage
/// is [`Error::BadData`]; a clip window that selects no frames is
/// [`Error::BadRequest`]. Parsing is pure: the same input yields the same
/// frame tables.
pub fn parse_moov(params: &ParseParams, moov: &[u8]) -> Result<Vec<Track>> {
	let mut tracks = Vec::new();
	let mut track_counts = [0u32; MediaType::COUNT];

	walk_atoms(moov, true, &mut |atom| {
		if atom.name != FourCc::TRAK {
			return Ok(true);
		}

		if let Some(track) = parse_trak(params, atom.data, &mut track_counts)? {
			tracks.push(track);
		}
		Ok(true)
	})?;

	Ok(tracks)
}

/// [`parse_moov`] plus assembly into a single-sequence VOD media set.
pub fn parse_media_set(params: &ParseParams, moov: &[u8]) -> Result<MediaSet> {
	MediaSet::single_clip_vod(parse_moov(params, moov)?)
}

fn parse_trak(params: &ParseParams, trak: &[u8], track_counts: &mut [u32; MediaType::COUNT]) -> Result<Option<Track>> {
	let atoms = collect_trak_atoms(trak)?;

	let Some(media_type) = parse_hdlr(&atoms.hdlr)? else {
		return Ok(None);
	};

	let Some(entry) = parse_stsd(&atoms.stsd, media_type)? else {
		return Ok(None);
	};

	let track_index = track_counts[media_type.index()];
	track_counts[media_type.index()] += 1;
	if !params.tracks.contains(media_type, track_index) {
		return Ok(None);
	}

	let mut trak_info = TrakParse::new(params, entry);
	trak_info.parse_mdhd(&atoms.mdhd)?;
	trak_info.parse_stts(&atoms.stts)?;
	trak_info.parse_ctts(&atoms.ctts)?;
	trak_info.parse_stsc(&atoms.stsc)?;
	trak_info.parse_stsz(&atoms.stsz)?;
	trak_info.parse_stco(&atoms.stco)?;
	trak_info.parse_stss(&atoms.stss)?;

	Ok(Some(trak_info.finish(track_index)))
}

fn parse_hdlr(atom: &AtomInfo) -> Result<Option<MediaType>> {
	if atom.data.len() < 24 {
		tracing::error!(size = atom.data.len(), "hdlr atom too small");
		return Err(Error::BadData("hdlr atom too small"));
	}

	Ok(match &atom.data[8..12] {
		b"vide" => Some(MediaType::Video),
		b"soun" => Some(MediaType::Audio),
		_ => None,
	})
}

/// The codec identity and shape pulled out of one `stsd` sample entry.
struct SampleEntry {
	codec: CodecId,
	extra_data: Bytes,
	media_info: MediaInfo,
}

/// Fixed part of a video sample entry after the common 16-byte header.
const STSD_VIDEO_SIZE: usize = 70;

/// Fixed part of an audio sample entry after the common 16-byte header.
const STSD_AUDIO_SIZE: usize = 20;

fn skip_stsd_video(data: &[u8], pos: usize) -> Option<(usize, u16, u16)> {
	if pos + STSD_VIDEO_SIZE > data.len() {
		return None;
	}

	let width = be_u16(data, pos + 16);
	let height = be_u16(data, pos + 18);
	let bits_per_coded_sample = be_u16(data, pos + 66);
	let colortable_id = be_u16(data, pos + 68);
	let mut pos = pos + STSD_VIDEO_SIZE;

	let color_depth = bits_per_coded_sample & 0x1F;
	let color_greyscale = bits_per_coded_sample & 0x20;
	if matches!(color_depth, 2 | 4 | 8) && color_greyscale == 0 && colortable_id == 0 {
		if pos + 8 > data.len() {
			return None;
		}

		let color_start = be_u32(data, pos);
		let color_end = be_u16(data, pos + 6);
		pos += 8;
		if color_start <= 255 && color_end <= 255 && u32::from(color_end) >= color_start {
			pos += (u32::from(color_end) - color_start + 1) as usize * 8;
		}
	}

	Some((pos, width, height))
}

fn skip_stsd_audio(data: &[u8], pos: usize) -> Option<(usize, AudioInfo)> {
	if pos + STSD_AUDIO_SIZE > data.len() {
		return None;
	}

	let info = AudioInfo {
		channels: be_u16(data, pos + 8),
		bits_per_sample: be_u16(data, pos + 10),
		sample_rate: be_u32(data, pos + 16) >> 16,
	};
	Some((pos + STSD_AUDIO_SIZE, info))
}

fn parse_stsd(atom: &AtomInfo, media_type: MediaType) -> Result<Option<SampleEntry>> {
	let data = atom.data;
	if data.len() < 8 {
		tracing::error!(size = data.len(), "stsd atom too small");
		return Err(Error::BadData("stsd atom too small"));
	}

	let entries = be_u32(data, 4);
	let mut pos = 8usize;
	let mut format = FourCc::default();
	let mut video_shape = (0u16, 0u16);
	let mut audio_shape = None;

	for _ in 0..entries {
		if pos + 8 > data.len() {
			tracing::error!("not enough room for stsd entry header");
			return Err(Error::BadData("stsd entry overflows the atom"));
		}

		let entry_size = be_u32(data, pos);
		format = FourCc([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);
		pos += 8;
		if entry_size >= 16 {
			pos += 8;
		}

		let skipped = match media_type {
			MediaType::Video => skip_stsd_video(data, pos).map(|(next, width, height)| {
				video_shape = (width, height);
				next
			}),
			MediaType::Audio => skip_stsd_audio(data, pos).map(|(next, info)| {
				audio_shape = Some(info);
				next
			}),
		};

		match skipped {
			Some(next) => pos = next,
			None => {
				tracing::error!(format = %format, "stsd entry too small for its media type");
				return Err(Error::BadData("stsd entry overflows the atom"));
			}
		}
	}

	if pos > data.len() {
		tracing::error!("stsd overflows before the codec configuration");
		return Err(Error::BadData("stsd entry overflows the atom"));
	}

	match media_type {
		MediaType::Video => {
			if !matches!(&format.0, b"avc1" | b"h264" | b"H264") {
				return Ok(None);
			}

			let mut extra_data = None;
			walk_atoms(&data[pos..], true, &mut |inner| {
				if inner.name == FourCc::AVCC {
					extra_data = Some(inner.data);
					return Ok(false);
				}
				Ok(true)
			})?;

			let Some(extra_data) = extra_data else {
				tracing::error!("no avcC record in the video sample entry");
				return Err(Error::BadData("missing codec configuration"));
			};
			if extra_data.len() < 5 {
				tracing::error!(size = extra_data.len(), "avcC record too small");
				return Err(Error::BadData("avcC record too small"));
			}

			Ok(Some(SampleEntry {
				codec: CodecId::Avc,
				extra_data: Bytes::copy_from_slice(extra_data),
				media_info: MediaInfo::Video(VideoInfo {
					width: video_shape.0,
					height: video_shape.1,
					nal_packet_size_length: (extra_data[4] & 0x3) + 1,
				}),
			}))
		}

		MediaType::Audio => {
			if &format.0 != b"mp4a" {
				return Ok(None);
			}

			let mut parsed = None;
			walk_atoms(&data[pos..], true, &mut |inner| {
				if inner.name == FourCc::ESDS {
					parsed = parse_esds(inner.data)?.map(|(object_type, config)| {
						(object_type, Bytes::copy_from_slice(config))
					});
					return Ok(false);
				}
				Ok(true)
			})?;

			let Some((object_type, extra_data)) = parsed else {
				tracing::error!("no decoder specific info in the audio sample entry");
				return Err(Error::BadData("missing codec configuration"));
			};

			let codec = match object_type {
				0x69 | 0x6B => CodecId::Mp3,
				_ => CodecId::Aac,
			};

			let Some(audio) = audio_shape else {
				return Err(Error::BadData("stsd entry overflows the atom"));
			};

			Ok(Some(SampleEntry {
				codec,
				extra_data,
				media_info: MediaInfo::Audio(audio),
			}))
		}
	}
}

/// One frame being assembled; timestamps are in the track's own timescale
/// until `finish` normalizes them.
#[derive(Clone, Copy, Default)]
struct FrameBuild {
	dts: u64,
	pts: i64,
	duration: u32,
	size: u32,
	offset: u64,
	key_frame: bool,
}

struct TrakParse<'a> {
	params: &'a ParseParams,
	entry: SampleEntry,

	timescale: u32,
	duration: u64,
	dts_shift: u32,

	frames: Vec<FrameBuild>,

	/// Chunk index per frame while mapping the sample tables; dropped once
	/// offsets are resolved.
	chunks: Vec<u32>,

	first_frame: u32,
	last_frame: u32,
	key_frame_count: u32,

	chunk_equals_sample: bool,
	first_chunk_frame_index: u32,
	first_frame_chunk_offset: u64,
}

impl<'a> TrakParse<'a> {
	fn new(params: &'a ParseParams, entry: SampleEntry) -> Self {
		Self {
			params,
			entry,
			timescale: 0,
			duration: 0,
			dts_shift: 0,
			frames: Vec::new(),
			chunks: Vec::new(),
			first_frame: 0,
			last_frame: 0,
			key_frame_count: 0,
			chunk_equals_sample: false,
			first_chunk_frame_index: 0,
			first_frame_chunk_offset: 0,
		}
	}

	fn parse_mdhd(&mut self, atom: &AtomInfo) -> Result<()> {
		let data = atom.data;
		if data.len() < 24 {
			tracing::error!(size = data.len(), "mdhd atom too small");
			return Err(Error::BadData("mdhd atom too small"));
		}

		if data[0] == 1 {
			if data.len() < 36 {
				tracing::error!(size = data.len(), "64-bit mdhd atom too small");
				return Err(Error::BadData("mdhd atom too small"));
			}
			self.timescale = be_u32(data, 20);
			self.duration = be_u64(data, 24);
		} else {
			self.timescale = be_u32(data, 12);
			self.duration = u64::from(be_u32(data, 16));
		}

		if self.timescale == 0 {
			tracing::error!("mdhd timescale is zero");
			return Err(Error::BadData("zero timescale"));
		}

		if self.duration > MAX_TOTAL_DURATION {
			tracing::error!(duration = self.duration, "track duration out of range");
			return Err(Error::BadData("track duration out of range"));
		}

		Ok(())
	}

	fn clip_bound(&self, millis: u32, which: &'static str) -> Result<u64> {
		let Some(scaled) = u64::from(millis).checked_mul(u64::from(self.timescale)) else {
			tracing::error!(millis, timescale = self.timescale, which, "clip offset too large");
			return Err(Error::BadData("clip offset too large"));
		};
		Ok(scaled / 1000)
	}

	fn parse_stts(&mut self, atom: &AtomInfo) -> Result<()> {
		let data = atom.data;
		if data.len() < 8 {
			tracing::error!(size = data.len(), "stts atom too small");
			return Err(Error::BadData("stts atom too small"));
		}

		let entries = be_u32(data, 4) as usize;
		if entries.checked_mul(8).is_none_or(|need| need > data.len() - 8) {
			tracing::error!(entries, size = data.len(), "stts entry count exceeds the atom size");
			return Err(Error::BadData("stts entries exceed atom size"));
		}

		let start_time = self.clip_bound(self.params.start_ms, "start")?;
		let end_time = if self.params.end_ms == u32::MAX {
			u64::MAX
		} else {
			self.clip_bound(self.params.end_ms, "end")?
		};

		// constant frame rate sources declare one run; pre-size for it
		let mut initial_alloc = 128u64;
		if entries == 1 {
			let run_duration = be_u32(data, 12);
			initial_alloc = if end_time == u64::MAX {
				u64::from(be_u32(data, 8))
			} else {
				if run_duration == 0 {
					tracing::error!("stts sample duration is zero");
					return Err(Error::BadData("zero sample duration"));
				}
				(end_time - start_time) / u64::from(run_duration) + 1
			};

			if initial_alloc > u64::from(self.params.max_frame_count) {
				tracing::error!(
					initial_alloc,
					max = self.params.max_frame_count,
					"frame estimate exceeds the frame count limit"
				);
				return Err(Error::BadData("frame count exceeds the limit"));
			}
		}
		self.frames = Vec::with_capacity(initial_alloc.min(u64::from(self.params.max_frame_count)) as usize);

		let mut accum: u64 = 0;
		let mut frame_index: u32 = 0;
		let mut first_frame = None;

		for entry in 0..entries {
			if accum > end_time {
				break;
			}

			let at = 8 + entry * 8;
			let mut sample_count = be_u32(data, at);
			let sample_duration = be_u32(data, at + 4);
			if sample_duration == 0 {
				tracing::error!("stts sample duration is zero");
				return Err(Error::BadData("zero sample duration"));
			}

			let next_accum = accum + u64::from(sample_duration) * u64::from(sample_count);
			if next_accum > MAX_TOTAL_DURATION {
				tracing::error!(next_accum, "stts durations accumulate out of range");
				return Err(Error::BadData("stts durations out of range"));
			}
			if start_time > next_accum {
				frame_index = frame_index.wrapping_add(sample_count);
				accum = next_accum;
				continue;
			}

			if start_time > accum {
				let skip = ((start_time - accum) / u64::from(sample_duration)) as u32;
				sample_count -= skip;
				frame_index = frame_index.wrapping_add(skip);
				accum += u64::from(skip) * u64::from(sample_duration);
			}

			for _ in 0..sample_count {
				if accum >= start_time && accum < end_time {
					if first_frame.is_none() {
						first_frame = Some(frame_index);
					}

					if self.frames.len() as u32 >= self.params.max_frame_count {
						tracing::error!(max = self.params.max_frame_count, "frame count exceeds the limit");
						return Err(Error::BadData("frame count exceeds the limit"));
					}

					self.frames.push(FrameBuild {
						dts: accum,
						pts: accum as i64,
						duration: sample_duration,
						..FrameBuild::default()
					});
				}

				frame_index = frame_index.wrapping_add(1);
				accum += u64::from(sample_duration);
			}
		}

		let Some(first_frame) = first_frame else {
			tracing::error!(
				start = self.params.start_ms,
				end = self.params.end_ms,
				"no frames inside the clip window"
			);
			return Err(Error::BadRequest("no frames inside the clip window"));
		};

		self.first_frame = first_frame;
		self.last_frame = first_frame + self.frames.len() as u32;
		self.chunks = vec![0; self.frames.len()];

		Ok(())
	}

	fn parse_ctts(&mut self, atom: &AtomInfo) -> Result<()> {
		let data = atom.data;
		if data.is_empty() {
			return Ok(());
		}

		if data.len() < 8 {
			tracing::error!(size = data.len(), "ctts atom too small");
			return Err(Error::BadData("ctts atom too small"));
		}

		let entries = be_u32(data, 4) as usize;
		if entries.checked_mul(8).is_none_or(|need| need > data.len() - 8) {
			tracing::error!(entries, size = data.len(), "ctts entry count exceeds the atom size");
			return Err(Error::BadData("ctts entries exceed atom size"));
		}

		let mut dts_shift: u32 = 0;
		let mut frame_index: u32 = 0;

		for entry in 0..entries {
			if frame_index >= self.last_frame {
				break;
			}

			let at = 8 + entry * 8;
			let mut sample_count = be_u32(data, at);
			let sample_duration = be_u32(data, at + 4) as i32;

			if sample_duration < 0 {
				dts_shift = dts_shift.max(sample_duration.unsigned_abs());
			}

			if self.first_frame > frame_index.wrapping_add(sample_count) {
				frame_index = frame_index.wrapping_add(sample_count);
				continue;
			}

			if self.first_frame > frame_index {
				let skip = self.first_frame - frame_index;
				sample_count -= skip;
				frame_index += skip;
			}

			for _ in 0..sample_count {
				if frame_index >= self.first_frame && frame_index < self.last_frame {
					self.frames[(frame_index - self.first_frame) as usize].pts += i64::from(sample_duration);
				}
				frame_index += 1;
			}
		}

		self.dts_shift = dts_shift;
		Ok(())
	}

	fn parse_stsc(&mut self, atom: &AtomInfo) -> Result<()> {
		let data = atom.data;
		if data.len() < 8 {
			tracing::error!(size = data.len(), "stsc atom too small");
			return Err(Error::BadData("stsc atom too small"));
		}

		let entries = be_u32(data, 4) as usize;
		if entries == 0 || entries.checked_mul(12).is_none_or(|need| need > data.len() - 8) {
			tracing::error!(entries, size = data.len(), "stsc entry count exceeds the atom size");
			return Err(Error::BadData("stsc entries exceed atom size"));
		}

		// chunk == sample is common enough to shortcut the whole mapping
		if entries == 1 && be_u32(data, 8) == 1 && be_u32(data, 12) == 1 {
			self.chunk_equals_sample = true;
			self.first_chunk_frame_index = 0;
			return Ok(());
		}

		let first_chunk = |index: usize| -> Result<u32> {
			let value = be_u32(data, 8 + index * 12);
			if value < 1 {
				tracing::error!(index, "stsc chunk index is zero");
				return Err(Error::BadData("zero chunk index"));
			}
			Ok(value - 1)
		};
		let samples_per_chunk = |index: usize| -> Result<u32> {
			let value = be_u32(data, 8 + index * 12 + 4);
			if value == 0 {
				tracing::error!(index, "stsc samples per chunk is zero");
				return Err(Error::BadData("zero samples per chunk"));
			}
			Ok(value)
		};

		let mut entry = 0usize;
		let mut frame_index: u32 = 0;
		let mut out = 0usize;
		let mut next_chunk = first_chunk(0)?;

		if frame_index < self.first_frame {
			// fast forward whole entries until the first frame is inside one
			while entry + 1 < entries {
				let cur_chunk = next_chunk;
				let following = first_chunk(entry + 1)?;
				let spc = samples_per_chunk(entry)?;

				if following <= cur_chunk {
					tracing::error!(following, cur_chunk, "stsc chunk index going backwards");
					return Err(Error::BadData("chunk index non-monotonic"));
				}

				let entry_samples = u64::from(following - cur_chunk) * u64::from(spc);
				if entry_samples > u64::from(u32::MAX) || u64::from(frame_index) + entry_samples > u64::from(u32::MAX) {
					tracing::error!(entry_samples, "stsc entry sample count too large");
					return Err(Error::BadData("stsc entry too large"));
				}

				if frame_index + entry_samples as u32 >= self.first_frame {
					next_chunk = cur_chunk;
					break;
				}

				frame_index += entry_samples as u32;
				next_chunk = following;
				entry += 1;
			}
		}

		while entry < entries {
			let spc = samples_per_chunk(entry)?;
			let mut cur_chunk = next_chunk;
			next_chunk = if entry + 1 < entries {
				let following = first_chunk(entry + 1)?;
				if following <= cur_chunk {
					tracing::error!(following, cur_chunk, "stsc chunk index going backwards");
					return Err(Error::BadData("chunk index non-monotonic"));
				}
				following
			} else {
				u32::MAX
			};

			while cur_chunk < next_chunk {
				let mut cur_sample = spc;
				if frame_index < self.first_frame {
					let skip = (self.first_frame - frame_index).min(spc);
					cur_sample -= skip;
					frame_index += skip;
				}

				while cur_sample > 0 {
					if frame_index == self.first_frame {
						self.first_chunk_frame_index = frame_index - (spc - cur_sample);
					}

					if out >= self.frames.len() {
						return Ok(());
					}

					self.chunks[out] = cur_chunk;
					out += 1;
					cur_sample -= 1;
					frame_index += 1;
				}

				cur_chunk += 1;
			}

			entry += 1;
		}

		tracing::error!("sample to chunk table ends before the last frame");
		Err(Error::BadData("stsc table ends before the last frame"))
	}

	fn parse_stsz(&mut self, atom: &AtomInfo) -> Result<()> {
		let data = atom.data;
		if data.len() < 12 {
			tracing::error!(size = data.len(), "stsz atom too small");
			return Err(Error::BadData("stsz atom too small"));
		}

		let first_frame_index_in_chunk = self.first_frame - self.first_chunk_frame_index;

		let field_size;
		if atom.name == FourCc::STZ2 {
			field_size = usize::from(data[7]);
			if field_size == 0 {
				tracing::error!("stz2 field size is zero");
				return Err(Error::BadData("zero stz2 field size"));
			}
		} else {
			let uniform_size = be_u32(data, 4);
			if uniform_size != 0 {
				if uniform_size > MAX_FRAME_SIZE {
					tracing::error!(uniform_size, "uniform frame size too big");
					return Err(Error::BadData("frame size too big"));
				}

				self.first_frame_chunk_offset = u64::from(first_frame_index_in_chunk) * u64::from(uniform_size);
				for frame in &mut self.frames {
					frame.size = uniform_size;
				}
				return Ok(());
			}
			field_size = 32;
		}

		let entries = be_u32(data, 8);
		if entries < self.last_frame {
			tracing::error!(entries, last_frame = self.last_frame, "size table smaller than the last frame");
			return Err(Error::BadData("stsz entries fewer than frames"));
		}

		let need = (u64::from(entries) * field_size as u64).div_ceil(8);
		if need > (data.len() - 12) as u64 {
			tracing::error!(entries, field_size, size = data.len(), "stsz entry count exceeds the atom size");
			return Err(Error::BadData("stsz entries exceed atom size"));
		}

		match field_size {
			32 => {
				let mut pos = 12 + self.first_chunk_frame_index as usize * 4;
				for _ in 0..first_frame_index_in_chunk {
					self.first_frame_chunk_offset += u64::from(be_u32(data, pos));
					pos += 4;
				}
				for frame in &mut self.frames {
					frame.size = be_u32(data, pos);
					pos += 4;
					if frame.size > MAX_FRAME_SIZE {
						tracing::error!(size = frame.size, "frame size too big");
						return Err(Error::BadData("frame size too big"));
					}
				}
			}

			16 => {
				let mut pos = 12 + self.first_chunk_frame_index as usize * 2;
				for _ in 0..first_frame_index_in_chunk {
					self.first_frame_chunk_offset += u64::from(be_u16(data, pos));
					pos += 2;
				}
				for frame in &mut self.frames {
					frame.size = u32::from(be_u16(data, pos));
					pos += 2;
				}
			}

			8 => {
				let mut pos = 12 + self.first_chunk_frame_index as usize;
				for _ in 0..first_frame_index_in_chunk {
					self.first_frame_chunk_offset += u64::from(data[pos]);
					pos += 1;
				}
				for frame in &mut self.frames {
					frame.size = u32::from(data[pos]);
					pos += 1;
				}
			}

			// TODO: 4-bit stz2 fields; no real-world source has needed them yet
			_ => {
				tracing::error!(field_size, "unsupported sample size field");
				return Err(Error::BadData("unsupported stz2 field size"));
			}
		}

		Ok(())
	}

	fn parse_stco(&mut self, atom: &AtomInfo) -> Result<()> {
		let data = atom.data;
		if data.len() < 8 {
			tracing::error!(size = data.len(), "chunk offset atom too small");
			return Err(Error::BadData("stco atom too small"));
		}

		let entries = be_u32(data, 4);
		let entry_size: usize = if atom.name == FourCc::CO64 { 8 } else { 4 };
		if (entries as usize).checked_mul(entry_size).is_none_or(|need| need > data.len() - 8) {
			tracing::error!(entries, size = data.len(), "chunk offset entry count exceeds the atom size");
			return Err(Error::BadData("stco entries exceed atom size"));
		}

		let read_entry = |index: usize| -> u64 {
			let at = 8 + index * entry_size;
			if entry_size == 8 { be_u64(data, at) } else { u64::from(be_u32(data, at)) }
		};

		if self.chunk_equals_sample {
			if entries < self.last_frame {
				tracing::error!(entries, last_frame = self.last_frame, "chunk offset table smaller than the last frame");
				return Err(Error::BadData("stco entries fewer than frames"));
			}

			for (index, frame) in self.frames.iter_mut().enumerate() {
				frame.offset = read_entry(self.first_frame as usize + index);
			}
			return Ok(());
		}

		let Some(&last_chunk) = self.chunks.last() else {
			return Err(Error::Unexpected("empty frame table"));
		};
		if last_chunk >= entries {
			tracing::error!(entries, last_chunk, "chunk offset table smaller than the last chunk");
			return Err(Error::BadData("stco entries fewer than chunks"));
		}

		let mut cur_chunk_index = self.chunks[0];
		let mut next_entry = cur_chunk_index as usize;
		let mut cur_file_offset = read_entry(next_entry) + self.first_frame_chunk_offset;
		next_entry += 1;

		for (index, frame) in self.frames.iter_mut().enumerate() {
			// chunk indices grow by exactly one, so the next table entry is
			// always the next chunk's base offset
			if self.chunks[index] != cur_chunk_index {
				cur_chunk_index = self.chunks[index];
				cur_file_offset = read_entry(next_entry);
				next_entry += 1;
			}

			frame.offset = cur_file_offset;
			cur_file_offset += u64::from(frame.size);
		}

		Ok(())
	}

	fn parse_stss(&mut self, atom: &AtomInfo) -> Result<()> {
		let data = atom.data;
		if data.is_empty() {
			// no sync sample table: every frame is a random access point
			for frame in &mut self.frames {
				frame.key_frame = true;
			}
			self.key_frame_count = self.frames.len() as u32;
			return Ok(());
		}

		if data.len() < 8 {
			tracing::error!(size = data.len(), "stss atom too small");
			return Err(Error::BadData("stss atom too small"));
		}

		let entries = be_u32(data, 4) as usize;
		if entries.checked_mul(4).is_none_or(|need| need > data.len() - 8) {
			tracing::error!(entries, size = data.len(), "stss entry count exceeds the atom size");
			return Err(Error::BadData("stss entries exceed atom size"));
		}

		for entry in 0..entries {
			let Some(frame_index) = be_u32(data, 8 + entry * 4).checked_sub(1) else {
				continue;
			};

			if frame_index >= self.first_frame && frame_index < self.last_frame {
				let frame = &mut self.frames[(frame_index - self.first_frame) as usize];
				if !frame.key_frame {
					frame.key_frame = true;
					self.key_frame_count += 1;
				}
			}
		}

		Ok(())
	}

	fn finish(self, track_index: u32) -> Track {
		let dts_shift = i64::from(self.dts_shift);
		let timescale = self.timescale;

		let mut total_frames_size = 0u64;
		let mut total_frames_duration = 0u64;
		let mut min_frame_duration = u32::MAX;
		let first_frame_time_offset = self.frames.first().map(|frame| frame.dts).unwrap_or(0);

		let frames = self
			.frames
			.iter()
			.map(|build| {
				total_frames_size += u64::from(build.size);
				total_frames_duration += u64::from(build.duration);
				min_frame_duration = min_frame_duration.min(build.duration);

				let pts_track = build.pts + dts_shift;
				crate::model::Frame {
					dts: rescale_time(build.dts, timescale, TIMESCALE_90K),
					pts: rescale_time(pts_track as u64, timescale, TIMESCALE_90K),
					duration: build.duration,
					size: build.size,
					offset: build.offset,
					pts_delay: (pts_track - build.dts as i64) as u32,
					key_frame: build.key_frame,
				}
			})
			.collect();

		let bitrate = if total_frames_duration > 0 {
			(total_frames_size * 8 * u64::from(timescale) / total_frames_duration).min(u64::from(u32::MAX)) as u32
		} else {
			0
		};

		Track {
			media_info: self.entry.media_info,
			codec: self.entry.codec,
			extra_data: self.entry.extra_data,
			timescale,
			duration: self.duration,
			duration_90k: rescale_time(self.duration, timescale, TIMESCALE_90K),
			track_index,
			bitrate,
			min_frame_duration: if min_frame_duration == u32::MAX { 0 } else { min_frame_duration },
			frames,
			first_frame_index: self.first_frame,
			first_frame_time_offset,
			key_frame_count: self.key_frame_count,
			total_frames_size,
			clip_sequence_offset: self.params.clip_sequence_offset,
			file_index: self.params.file_index,
		}
	}
}

fn be_u16(data: &[u8], pos: usize) -> u16 {
	u16::from_be_bytes([data[pos], data[pos + 1]])
}

fn be_u32(data: &[u8], pos: usize) -> u32 {
	u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn be_u64(data: &[u8], pos: usize) -> u64 {
	(u64::from(be_u32(data, pos)) << 32) | u64::from(be_u32(data, pos + 4))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{self, Sizes, TrakSpec};

	fn parse_one(params: &ParseParams, spec: &TrakSpec) -> Track {
		let moov = test_support::moov(std::slice::from_ref(spec));
		let mut tracks = parse_moov(params, &moov).unwrap();
		assert_eq!(tracks.len(), 1);
		tracks.pop().unwrap()
	}

	#[test]
	fn chunk_equals_sample_uses_offsets_directly() {
		let mut spec = TrakSpec::video(25000, 100, 1000, 500);
		spec.chunk_offsets = (0..100).map(|i| 7000 + i * 12345).collect();

		let track = parse_one(&ParseParams::default(), &spec);

		assert_eq!(track.frames.len(), 100);
		for (i, frame) in track.frames.iter().enumerate() {
			assert_eq!(frame.offset, 7000 + i as u64 * 12345);
			assert_eq!(frame.size, 500);
			assert!(frame.key_frame);
		}
		assert_eq!(track.key_frame_count, 100);
		assert_eq!(track.first_frame_index, 0);
	}

	#[test]
	fn negative_ctts_shifts_all_pts_non_negative() {
		let mut spec = TrakSpec::video(30000, 15, 1000, 100);
		spec.ctts = Some(vec![(5, -3000), (10, 2000)]);

		let track = parse_one(&ParseParams::default(), &spec);

		assert_eq!(track.frames[0].pts, 0);
		assert_eq!(track.frames[0].dts, 0);
		assert_eq!(track.frames[0].pts_delay, 0);

		// frame 5: dts 5000, composition offset +2000, shift +3000
		assert_eq!(track.frames[5].dts, rescale_time(5000, 30000, TIMESCALE_90K));
		assert_eq!(track.frames[5].pts, rescale_time(5000 + 2000 + 3000, 30000, TIMESCALE_90K));
		assert_eq!(track.frames[5].pts_delay, 5000);

		for frame in &track.frames {
			assert!(frame.pts >= frame.dts - u64::from(frame.pts_delay).min(frame.dts));
		}
	}

	#[test]
	fn clip_window_trims_and_rebases() {
		let mut spec = TrakSpec::video(1000, 10, 1000, 0);
		spec.stsc = vec![(1, 10, 1)];
		spec.sizes = Sizes::Each((1..=10).collect());
		spec.chunk_offsets = vec![5000];

		let params = ParseParams {
			start_ms: 2000,
			end_ms: 5000,
			..ParseParams::default()
		};
		let track = parse_one(&params, &spec);

		assert_eq!(track.frames.len(), 3);
		assert_eq!(track.first_frame_index, 2);
		assert_eq!(track.first_frame_time_offset, 2000);

		// sizes 1 and 2 precede the window inside the shared chunk
		assert_eq!(track.frames[0].offset, 5000 + 1 + 2);
		assert_eq!(track.frames[0].size, 3);
		assert_eq!(track.frames[1].offset, 5000 + 1 + 2 + 3);
		assert_eq!(track.frames[2].offset, 5000 + 1 + 2 + 3 + 4);
	}

	#[test]
	fn clip_window_outside_media_is_bad_request() {
		let spec = TrakSpec::video(1000, 10, 1000, 100);
		let params = ParseParams {
			start_ms: 60_000,
			..ParseParams::default()
		};

		let moov = test_support::moov(&[spec]);
		assert_eq!(
			parse_moov(&params, &moov).err(),
			Some(Error::BadRequest("no frames inside the clip window"))
		);
	}

	#[test]
	fn multi_chunk_mapping_re_reads_chunk_bases() {
		let mut spec = TrakSpec::video(1000, 7, 1000, 0);
		// chunks: #0 and #1 hold 2 samples each, #2 onwards hold 3
		spec.stsc = vec![(1, 2, 1), (3, 3, 1)];
		spec.sizes = Sizes::Each(vec![10, 11, 12, 13, 14, 15, 16]);
		spec.chunk_offsets = vec![1000, 2000, 3000];

		let track = parse_one(&ParseParams::default(), &spec);

		let offsets: Vec<u64> = track.frames.iter().map(|frame| frame.offset).collect();
		assert_eq!(offsets, vec![1000, 1010, 2000, 2012, 3000, 3014, 3029]);
	}

	#[test]
	fn stss_marks_only_listed_frames_inside_the_window() {
		let mut spec = TrakSpec::video(1000, 10, 1000, 100);
		spec.stss = Some(vec![1, 4, 9, 11, 0]);

		let track = parse_one(&ParseParams::default(), &spec);

		let keys: Vec<usize> = track
			.frames
			.iter()
			.enumerate()
			.filter(|(_, frame)| frame.key_frame)
			.map(|(i, _)| i)
			.collect();
		assert_eq!(keys, vec![0, 3, 8]);
		assert_eq!(track.key_frame_count, 3);
	}

	#[test]
	fn compact_sizes_parse_8_and_16_bit_fields() {
		for field_size in [8u8, 16] {
			let mut spec = TrakSpec::video(1000, 4, 1000, 0);
			spec.stsc = vec![(1, 4, 1)];
			spec.sizes = Sizes::Compact(field_size, vec![7, 9, 11, 13]);
			spec.chunk_offsets = vec![100];

			let track = parse_one(&ParseParams::default(), &spec);
			let sizes: Vec<u32> = track.frames.iter().map(|frame| frame.size).collect();
			assert_eq!(sizes, vec![7, 9, 11, 13]);
			assert_eq!(track.total_frames_size, 40);
		}
	}

	#[test]
	fn four_bit_sizes_are_rejected() {
		let mut spec = TrakSpec::video(1000, 4, 1000, 0);
		spec.sizes = Sizes::Compact(4, vec![1, 2, 3, 4]);

		let moov = test_support::moov(&[spec]);
		assert_eq!(
			parse_moov(&ParseParams::default(), &moov).err(),
			Some(Error::BadData("unsupported stz2 field size"))
		);
	}

	#[test]
	fn oversized_frames_are_rejected() {
		let mut spec = TrakSpec::video(1000, 2, 1000, 0);
		spec.stsc = vec![(1, 2, 1)];
		spec.sizes = Sizes::Each(vec![100, MAX_FRAME_SIZE + 1]);
		spec.chunk_offsets = vec![100];

		let moov = test_support::moov(&[spec]);
		assert_eq!(
			parse_moov(&ParseParams::default(), &moov).err(),
			Some(Error::BadData("frame size too big"))
		);
	}

	#[test]
	fn zero_sample_duration_is_rejected() {
		let mut spec = TrakSpec::video(1000, 4, 1000, 100);
		spec.stts = vec![(4, 0)];

		let moov = test_support::moov(&[spec]);
		assert_eq!(
			parse_moov(&ParseParams::default(), &moov).err(),
			Some(Error::BadData("zero sample duration"))
		);
	}

	#[test]
	fn frame_count_limit_is_enforced() {
		let spec = TrakSpec::video(1000, 100, 1000, 100);
		let params = ParseParams {
			max_frame_count: 10,
			..ParseParams::default()
		};

		let moov = test_support::moov(&[spec]);
		assert_eq!(
			parse_moov(&params, &moov).err(),
			Some(Error::BadData("frame count exceeds the limit"))
		);
	}

	#[test]
	fn co64_offsets_are_read() {
		let mut spec = TrakSpec::video(1000, 3, 1000, 100);
		spec.co64 = true;
		spec.chunk_offsets = vec![1 << 33, (1 << 33) + 100, (1 << 33) + 200];

		let track = parse_one(&ParseParams::default(), &spec);
		assert_eq!(track.frames[2].offset, (1 << 33) + 200);
	}

	#[test]
	fn audio_track_pulls_decoder_specific_info() {
		let spec = TrakSpec::audio(44100, 20, 1024, 300);
		let track = parse_one(&ParseParams::default(), &spec);

		assert_eq!(track.codec, CodecId::Aac);
		assert_eq!(&track.extra_data[..], &[0x12, 0x10]);
		let audio = track.audio_info().unwrap();
		assert_eq!(audio.channels, 2);
		assert_eq!(audio.sample_rate, 44100);
		assert_eq!(audio.bits_per_sample, 16);
	}

	#[test]
	fn video_geometry_and_nal_length_come_from_stsd() {
		let track = parse_one(&ParseParams::default(), &TrakSpec::video(90000, 4, 3000, 100));
		let video = track.video_info().unwrap();
		assert_eq!((video.width, video.height), (1280, 720));
		assert_eq!(video.nal_packet_size_length, 4);
	}

	#[test]
	fn unsupported_tracks_are_skipped_silently() {
		let mut text = TrakSpec::video(1000, 2, 1000, 10);
		text.format = *b"mjpg";

		let moov = test_support::moov(&[text, TrakSpec::audio(44100, 5, 1024, 100)]);
		let tracks = parse_moov(&ParseParams::default(), &moov).unwrap();

		assert_eq!(tracks.len(), 1);
		assert_eq!(tracks[0].media_type(), MediaType::Audio);
	}

	#[test]
	fn track_mask_selects_by_per_type_index() {
		let moov = test_support::moov(&[
			TrakSpec::video(1000, 2, 1000, 10),
			TrakSpec::video(1000, 4, 1000, 10),
			TrakSpec::audio(44100, 5, 1024, 100),
		]);

		let params = ParseParams {
			tracks: TrackMask { video: 0b10, audio: 0 },
			..ParseParams::default()
		};
		let tracks = parse_moov(&params, &moov).unwrap();

		assert_eq!(tracks.len(), 1);
		assert_eq!(tracks[0].track_index, 1);
		assert_eq!(tracks[0].frames.len(), 4);
	}

	#[test]
	fn parsing_is_idempotent() {
		let mut spec = TrakSpec::video(30000, 50, 1001, 0);
		spec.ctts = Some(vec![(20, -500), (30, 1500)]);
		spec.stsc = vec![(1, 5, 1), (4, 7, 1)];
		spec.sizes = Sizes::Each((1..=50).map(|i| i * 3).collect());
		spec.chunk_offsets = (0..10).map(|i| 10_000 + i * 5_000).collect();
		spec.stss = Some(vec![1, 11, 31]);

		let moov = test_support::moov(&[spec]);
		let first = parse_moov(&ParseParams::default(), &moov).unwrap();
		let second = parse_moov(&ParseParams::default(), &moov).unwrap();

		assert_eq!(first[0].frames, second[0].frames);
		assert_eq!(first[0].key_frame_count, second[0].key_frame_count);
	}

	mod properties {
		use super::*;
		use proptest::prelude::*;

		#[derive(Debug, Clone)]
		struct ChunkRun {
			chunks: u32,
			samples_per_chunk: u32,
		}

		fn chunk_runs() -> impl Strategy<Value = Vec<ChunkRun>> {
			proptest::collection::vec(
				(1u32..4, 1u32..6).prop_map(|(chunks, samples_per_chunk)| ChunkRun { chunks, samples_per_chunk }),
				1..4,
			)
		}

		fn arbitrary_spec() -> impl Strategy<Value = TrakSpec> {
			(chunk_runs(), 1u32..2000, proptest::collection::vec(1u32..100_000, 64))
				.prop_map(|(runs, duration, raw_sizes)| {
					let total: u32 = runs.iter().map(|run| run.chunks * run.samples_per_chunk).sum();
					let chunk_count: u32 = runs.iter().map(|run| run.chunks).sum();

					let mut stsc = Vec::new();
					let mut first_chunk = 1u32;
					for run in &runs {
						stsc.push((first_chunk, run.samples_per_chunk, 1));
						first_chunk += run.chunks;
					}

					let sizes: Vec<u32> = (0..total).map(|i| raw_sizes[i as usize % raw_sizes.len()]).collect();

					let mut spec = TrakSpec::video(90000, total, duration, 0);
					spec.stsc = stsc;
					spec.sizes = Sizes::Each(sizes);
					spec.chunk_offsets = (0..chunk_count).map(|i| 1_000_000 + u64::from(i) * 10_000_000).collect();
					spec
				})
		}

		proptest! {
			/// Parsing the same tables twice yields identical frame tables.
			#[test]
			fn parse_is_pure(spec in arbitrary_spec()) {
				let moov = test_support::moov(&[spec]);
				let first = parse_moov(&ParseParams::default(), &moov).unwrap();
				let second = parse_moov(&ParseParams::default(), &moov).unwrap();
				prop_assert_eq!(&first[0].frames, &second[0].frames);
			}

			/// Frames of one chunk are laid out back to back; sizes add up.
			#[test]
			fn offsets_are_consistent_within_chunks(spec in arbitrary_spec()) {
				let sizes = match &spec.sizes {
					Sizes::Each(sizes) => sizes.clone(),
					_ => unreachable!(),
				};

				let moov = test_support::moov(&[spec]);
				let tracks = parse_moov(&ParseParams::default(), &moov).unwrap();
				let track = &tracks[0];

				prop_assert_eq!(track.frames.len(), sizes.len());
				prop_assert_eq!(track.total_frames_size, sizes.iter().map(|s| u64::from(*s)).sum::<u64>());

				for pair in track.frames.windows(2) {
					let contiguous = pair[0].offset + u64::from(pair[0].size) == pair[1].offset;
					let new_chunk = (pair[1].offset - 1_000_000) % 10_000_000 == 0;
					prop_assert!(contiguous || new_chunk);
				}
			}

			/// Arbitrary corruption must surface as a structured error, never
			/// a panic or a hang.
			#[test]
			fn corruption_is_rejected_gracefully(
				spec in arbitrary_spec(),
				at in 0usize..4096,
				value in 0u8..=255,
			) {
				let mut moov = test_support::moov(&[spec]);
				let len = moov.len();
				moov[at % len] = value;

				match parse_moov(&ParseParams::default(), &moov) {
					Ok(_) => {}
					Err(Error::BadData(_)) | Err(Error::BadRequest(_)) => {}
					Err(other) => prop_assert!(false, "unexpected error kind: {other:?}"),
				}
			}
		}
	}
}
