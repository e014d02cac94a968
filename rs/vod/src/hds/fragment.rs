use bytes::{BufMut, Bytes, BytesMut};

use crate::io::{ReadCache, Sink, WriteBuffer};
use crate::model::{Clip, Frame, MediaType, Track, rescale_time, HDS_TIMESCALE};
use crate::mp4::{MFHD_ATOM_SIZE, put_atom_header, put_u24, write_mfhd};
use crate::{Error, Result};

use super::amf0::{CODEC_ID_AVC, SOUND_FORMAT_AAC, SOUND_FORMAT_MP3};

const TAG_TYPE_AUDIO: u8 = 8;
const TAG_TYPE_VIDEO: u8 = 9;

const AVC_PACKET_TYPE_SEQUENCE_HEADER: u8 = 0;
const AVC_PACKET_TYPE_NALU: u8 = 1;

const FRAME_TYPE_KEY_FRAME: u8 = 1;
const FRAME_TYPE_INTER_FRAME: u8 = 2;

const AAC_PACKET_TYPE_SEQUENCE_HEADER: u8 = 0;
const AAC_PACKET_TYPE_RAW: u8 = 1;

/// Adobe mux tag header: type, 24-bit size, 24+8-bit timestamp, stream id.
const ADOBE_TAG_HEADER_SIZE: u32 = 11;
const VIDEO_TAG_SUBHEADER_SIZE: u32 = 5;
const AUDIO_TAG_SUBHEADER_SIZE: u32 = 2;

/// 4-byte back pointer following every tag payload.
const TAG_BACK_POINTER_SIZE: u32 = 4;

const AFRA_ATOM_FIXED_SIZE: u64 = 8 + 13;
const AFRA_ENTRY_SIZE: u64 = 16;

const TFHD_ATOM_SIZE: u64 = 8 + 20;

/// Every frame gets its own single-sample `trun`.
const TRUN_SIZE_SINGLE_VIDEO_FRAME: u64 = 8 + 12 + 4 * 4;
const TRUN_SIZE_SINGLE_AUDIO_FRAME: u64 = 8 + 12 + 2 * 4;

fn tag_size(media_type: MediaType) -> u32 {
	ADOBE_TAG_HEADER_SIZE
		+ match media_type {
			MediaType::Video => VIDEO_TAG_SUBHEADER_SIZE,
			MediaType::Audio => AUDIO_TAG_SUBHEADER_SIZE,
		}
}

/// The FLV `sound_info` byte: format, rate bucket, sample width, channels.
fn sound_info(track: &Track) -> u8 {
	let Some(audio) = track.audio_info() else {
		return 0;
	};

	let sound_format = match track.codec {
		crate::model::CodecId::Mp3 => SOUND_FORMAT_MP3,
		_ => SOUND_FORMAT_AAC,
	};

	let sound_rate: u8 = match audio.sample_rate {
		0..=8000 => 0,
		8001..=16000 => 1,
		16001..=32000 => 2,
		_ => 3,
	};

	let sound_size: u8 = if audio.bits_per_sample == 8 { 0 } else { 1 };
	let sound_type: u8 = if audio.channels == 1 { 0 } else { 1 };

	(sound_format << 4) | (sound_rate << 2) | (sound_size << 1) | sound_type
}

fn write_adobe_tag_header(buf: &mut impl BufMut, tag_type: u8, data_size: u32, timestamp: u32) {
	buf.put_u8(tag_type);
	put_u24(buf, data_size);
	put_u24(buf, timestamp);
	buf.put_u8((timestamp >> 24) as u8);
	put_u24(buf, 0);
}

fn write_video_tag_header(
	buf: &mut impl BufMut,
	data_size: u32,
	timestamp: u32,
	frame_type: u8,
	avc_packet_type: u8,
	comp_time_offset: u32,
) {
	write_adobe_tag_header(buf, TAG_TYPE_VIDEO, data_size + VIDEO_TAG_SUBHEADER_SIZE, timestamp);
	buf.put_u8((frame_type << 4) | CODEC_ID_AVC);
	buf.put_u8(avc_packet_type);
	put_u24(buf, comp_time_offset);
}

fn write_audio_tag_header(buf: &mut impl BufMut, data_size: u32, timestamp: u32, sound_info: u8, aac_packet_type: u8) {
	write_adobe_tag_header(buf, TAG_TYPE_AUDIO, data_size + AUDIO_TAG_SUBHEADER_SIZE, timestamp);
	buf.put_u8(sound_info);
	buf.put_u8(aac_packet_type);
}

/// Sequence-header tags for every stream, replayed in front of key frames.
fn write_codec_config(buf: &mut impl BufMut, streams: &[StreamState], clip: &Clip, timestamp: u32) {
	for stream in streams {
		let track = &clip.tracks[stream.track];
		let extra = &track.extra_data;
		let mut packet_size = ADOBE_TAG_HEADER_SIZE + extra.len() as u32;

		match stream.media_type {
			MediaType::Video => {
				write_video_tag_header(
					buf,
					extra.len() as u32,
					timestamp,
					FRAME_TYPE_KEY_FRAME,
					AVC_PACKET_TYPE_SEQUENCE_HEADER,
					0,
				);
				packet_size += VIDEO_TAG_SUBHEADER_SIZE;
			}
			MediaType::Audio => {
				write_audio_tag_header(
					buf,
					extra.len() as u32,
					timestamp,
					stream.sound_info,
					AAC_PACKET_TYPE_SEQUENCE_HEADER,
				);
				packet_size += AUDIO_TAG_SUBHEADER_SIZE;
			}
		}

		buf.put_slice(extra);
		buf.put_u32(packet_size);
	}
}

struct StreamState {
	track: usize,
	media_type: MediaType,
	timescale: u32,
	file_index: u32,
	sound_info: u8,

	first_frame_time_offset: u64,
	next_frame_time_offset: u64,
	next_frame_dts: u64,

	cur_frame: usize,
	frame_count: usize,

	/// Output offset of each frame's payload relative to the `mdat` box
	/// start, precomputed by the simulation pass.
	output_offsets: Vec<u32>,
	cur_output: usize,
}

impl StreamState {
	fn reset(&mut self) {
		self.cur_frame = 0;
		self.cur_output = 0;
		self.next_frame_time_offset = self.first_frame_time_offset;
		self.next_frame_dts = rescale_time(self.next_frame_time_offset, self.timescale, HDS_TIMESCALE);
	}

	fn advance(&mut self, frame: &Frame) {
		self.next_frame_time_offset += u64::from(frame.duration);
		self.next_frame_dts = rescale_time(self.next_frame_time_offset, self.timescale, HDS_TIMESCALE);
		self.cur_frame += 1;
	}
}

#[derive(Clone, Copy)]
struct CurrentFrame {
	frame: Frame,
	pos: u32,
	header_size: u32,
	file_index: u32,
	slot: u32,
}

/// Muxes one clip into an HDS F4F fragment.
///
/// [`init_fragment`](Self::init_fragment) runs the pure simulation pass:
/// it interleaves the streams by decode time, precomputes every frame's
/// output offset, and materializes the complete fragment header
/// (`afra` + `moof` + `mdat` header). [`process_frames`](Self::process_frames)
/// then replays the same schedule effectfully, streaming tagged frame
/// payloads through the write buffer.
pub struct HdsMuxer<S: Sink> {
	streams: Vec<StreamState>,
	codec_config_size: u32,
	write_buffer: WriteBuffer<S>,
	cur: Option<CurrentFrame>,
	done: bool,
}

fn traf_atom_size(track: &Track) -> u64 {
	let trun_size = match track.media_type() {
		MediaType::Video => TRUN_SIZE_SINGLE_VIDEO_FRAME,
		MediaType::Audio => TRUN_SIZE_SINGLE_AUDIO_FRAME,
	};
	8 + TFHD_ATOM_SIZE + track.frames.len() as u64 * trun_size
}

fn moof_atom_size(clip: &Clip) -> u64 {
	8 + MFHD_ATOM_SIZE + clip.tracks.iter().map(traf_atom_size).sum::<u64>()
}

fn codec_config_size(clip: &Clip) -> u32 {
	clip.tracks
		.iter()
		.map(|track| tag_size(track.media_type()) + TAG_BACK_POINTER_SIZE + track.extra_data.len() as u32)
		.sum()
}

fn mdat_atom_size(clip: &Clip) -> u64 {
	let config = u64::from(codec_config_size(clip));
	let video_key_frames = u64::from(clip.video_key_frame_count());

	let mut size = 8;
	for track in &clip.tracks {
		let frame_overhead = u64::from(tag_size(track.media_type()) + TAG_BACK_POINTER_SIZE);
		size += track.total_frames_size + track.frames.len() as u64 * frame_overhead;
	}

	size += video_key_frames.max(1) * config;
	size
}

/// The advertised size of the complete fragment, available without muxing
/// a single body byte (HEAD request optimization).
pub fn total_fragment_size(clip: &Clip) -> u64 {
	let afra = AFRA_ATOM_FIXED_SIZE + u64::from(clip.video_key_frame_count()) * AFRA_ENTRY_SIZE;
	afra + moof_atom_size(clip) + mdat_atom_size(clip)
}

impl<S: Sink> HdsMuxer<S> {
	/// Builds the complete fragment header and the muxer that will stream
	/// its body. The returned total size covers header plus body, to the
	/// byte.
	pub fn init_fragment(clip: &Clip, segment_index: u32, sink: S) -> Result<(Bytes, u64, Self)> {
		let mut streams: Vec<StreamState> = clip
			.tracks
			.iter()
			.enumerate()
			.map(|(index, track)| {
				let mut stream = StreamState {
					track: index,
					media_type: track.media_type(),
					timescale: track.timescale,
					file_index: track.file_index,
					sound_info: sound_info(track),
					first_frame_time_offset: track.first_frame_time_offset,
					next_frame_time_offset: 0,
					next_frame_dts: 0,
					cur_frame: 0,
					frame_count: track.frames.len(),
					output_offsets: vec![0; track.frames.len()],
					cur_output: 0,
				};
				stream.reset();
				stream
			})
			.collect();

		let config_size = codec_config_size(clip);
		let video_key_frames = clip.video_key_frame_count();

		let afra_atom_size = AFRA_ATOM_FIXED_SIZE + u64::from(video_key_frames) * AFRA_ENTRY_SIZE;
		let moof_atom_size = moof_atom_size(clip);
		let mdat_atom_size = mdat_atom_size(clip);

		let mut header_size = afra_atom_size + moof_atom_size + 8;
		if video_key_frames == 0 {
			// no explicit key frames: the codec config goes once in front
			// of the whole mdat body
			header_size += u64::from(config_size);
		}

		let total_size = afra_atom_size + moof_atom_size + mdat_atom_size;

		let mut header = BytesMut::with_capacity(header_size as usize);

		// afra
		put_atom_header(&mut header, afra_atom_size, b"afra");
		header.put_u32(0);
		header.put_u8(0xC0); // long ids, long offsets
		header.put_u32(HDS_TIMESCALE);
		header.put_u32(video_key_frames);

		simulate(&mut streams, clip, config_size, afra_atom_size + moof_atom_size, &mut header);

		// moof
		put_atom_header(&mut header, moof_atom_size, b"moof");
		write_mfhd(&mut header, segment_index);

		let base_data_offset = AFRA_ATOM_FIXED_SIZE + moof_atom_size;
		for stream in &streams {
			let track = &clip.tracks[stream.track];

			put_atom_header(&mut header, traf_atom_size(track), b"traf");

			put_atom_header(&mut header, TFHD_ATOM_SIZE, b"tfhd");
			header.put_u32(3); // base data offset + sample description
			header.put_u32(1); // track id
			header.put_u64(base_data_offset);
			header.put_u32(1); // sample description index

			for (frame, output_offset) in track.frames.iter().zip(&stream.output_offsets) {
				match stream.media_type {
					MediaType::Video => {
						put_atom_header(&mut header, TRUN_SIZE_SINGLE_VIDEO_FRAME, b"trun");
						header.put_u32(0xF01);
						header.put_u32(1);
						header.put_u32(*output_offset);
						header.put_u32(frame.duration);
						header.put_u32(frame.size);
						if frame.key_frame {
							header.put_u32(0x02000000);
						} else {
							header.put_u32(0x01010000);
						}
						header.put_u32(frame.pts_delay);
					}
					MediaType::Audio => {
						put_atom_header(&mut header, TRUN_SIZE_SINGLE_AUDIO_FRAME, b"trun");
						header.put_u32(0x301);
						header.put_u32(1);
						header.put_u32(*output_offset);
						header.put_u32(frame.duration);
						header.put_u32(frame.size);
					}
				}
			}
		}

		// mdat
		put_atom_header(&mut header, mdat_atom_size, b"mdat");

		if video_key_frames == 0 {
			let timestamp = streams.first().map(|stream| stream.next_frame_dts).unwrap_or(0);
			write_codec_config(&mut header, &streams, clip, timestamp as u32);
		}

		if header.len() as u64 != header_size {
			tracing::error!(
				written = header.len(),
				expected = header_size,
				"fragment header size accounting mismatch"
			);
			return Err(Error::Unexpected("fragment header size mismatch"));
		}

		let muxer = Self {
			streams,
			codec_config_size: config_size,
			write_buffer: WriteBuffer::new(sink),
			cur: None,
			done: false,
		};

		Ok((header.freeze(), total_size, muxer))
	}

	fn choose_stream_by_offset(&self) -> Option<usize> {
		let mut result: Option<usize> = None;

		for (index, stream) in self.streams.iter().enumerate() {
			if stream.cur_frame >= stream.frame_count {
				continue;
			}

			let better = match result {
				Some(best) => {
					stream.output_offsets[stream.cur_output] < self.streams[best].output_offsets[self.streams[best].cur_output]
				}
				None => true,
			};
			if better {
				result = Some(index);
			}
		}

		result
	}

	/// Picks the next frame by precomputed output offset, reserves room for
	/// its tag header (plus codec config on video key frames) and writes
	/// them. Returns `false` when the schedule is exhausted.
	fn start_frame(&mut self, clip: &Clip) -> Result<bool> {
		let Some(selected) = self.choose_stream_by_offset() else {
			return Ok(false);
		};

		let stream = &mut self.streams[selected];
		let track = &clip.tracks[stream.track];
		let frame = track.frames[stream.cur_frame];
		let media_type = stream.media_type;
		let stream_sound_info = stream.sound_info;
		let timescale = stream.timescale;
		let file_index = stream.file_index;
		let cur_frame_dts = stream.next_frame_dts;

		stream.cur_output += 1;
		stream.advance(&frame);

		let header_size = tag_size(media_type);
		let replay_config = media_type == MediaType::Video && frame.key_frame;
		let alloc_size = header_size + if replay_config { self.codec_config_size } else { 0 };

		let mut dst = self.write_buffer.get_bytes(alloc_size as usize)?;

		if replay_config {
			write_codec_config(&mut dst, &self.streams, clip, cur_frame_dts as u32);
		}

		match media_type {
			MediaType::Video => {
				let comp_time_offset = rescale_time(u64::from(frame.pts_delay), timescale, HDS_TIMESCALE);
				write_video_tag_header(
					&mut dst,
					frame.size,
					cur_frame_dts as u32,
					if frame.key_frame { FRAME_TYPE_KEY_FRAME } else { FRAME_TYPE_INTER_FRAME },
					AVC_PACKET_TYPE_NALU,
					comp_time_offset as u32,
				);
			}
			MediaType::Audio => {
				write_audio_tag_header(&mut dst, frame.size, cur_frame_dts as u32, stream_sound_info, AAC_PACKET_TYPE_RAW);
			}
		}

		self.cur = Some(CurrentFrame {
			frame,
			pos: 0,
			header_size,
			file_index,
			slot: media_type.index() as u32,
		});

		Ok(true)
	}

	/// Streams tagged frame payloads in the precomputed order.
	///
	/// Returns [`Error::Again`] after flushing buffered output when the
	/// read cache comes up dry; re-invoke to resume. A dry cache that
	/// made no progress on a resumed call means the source is truncated.
	pub fn process_frames(&mut self, clip: &Clip, cache: &mut impl ReadCache) -> Result<()> {
		if self.done {
			return Ok(());
		}

		let first_time = self.cur.is_none();
		let mut wrote_data = false;

		loop {
			if self.cur.is_none() && !self.start_frame(clip)? {
				break;
			}

			let Some(cur) = self.cur else {
				return Err(Error::Unexpected("no current frame after start"));
			};

			let offset = cur.frame.offset + u64::from(cur.pos);
			let want = cur.frame.size - cur.pos;
			let Some(buffer) = cache.get(cur.slot, cur.file_index, offset, want)? else {
				if !wrote_data && !first_time {
					tracing::error!("no frame data was handled, probably a truncated file");
					return Err(Error::BadData("truncated frame data"));
				}

				self.write_buffer.flush()?;
				return Err(Error::Again);
			};

			wrote_data = true;
			let write_size = (want as usize).min(buffer.len());
			self.write_buffer.write(&buffer[..write_size])?;

			let new_pos = cur.pos + write_size as u32;
			if new_pos >= cur.frame.size {
				let packet_size = cur.header_size + cur.frame.size;
				let mut dst = self.write_buffer.get_bytes(4)?;
				dst.put_u32(packet_size);
				self.cur = None;
			} else if let Some(cur) = &mut self.cur {
				cur.pos = new_pos;
			}
		}

		self.write_buffer.flush()?;
		self.done = true;
		Ok(())
	}
}

/// The pure pass: pick frames by decode time, assign output offsets, and
/// append one `afra` entry per video key frame. Leaves every stream reset
/// for the effectful pass.
fn simulate(streams: &mut [StreamState], clip: &Clip, codec_config_size: u32, afra_entries_base: u64, header: &mut BytesMut) {
	let mut cur_offset: u32 = 8; // mdat box header

	loop {
		let mut selected: Option<usize> = None;
		for (index, stream) in streams.iter().enumerate() {
			if stream.cur_frame >= stream.frame_count {
				continue;
			}

			let better = match selected {
				Some(best) => stream.next_frame_dts < streams[best].next_frame_dts,
				None => true,
			};
			if better {
				selected = Some(index);
			}
		}

		let Some(selected) = selected else {
			break;
		};

		let stream = &mut streams[selected];
		let frame = clip.tracks[stream.track].frames[stream.cur_frame];

		if stream.media_type == MediaType::Video && frame.key_frame {
			header.put_u64(stream.next_frame_dts);
			header.put_u64(afra_entries_base + u64::from(cur_offset));
			cur_offset += codec_config_size;
		}

		cur_offset += tag_size(stream.media_type);
		stream.output_offsets[stream.cur_output] = cur_offset;
		stream.cur_output += 1;

		cur_offset += frame.size + TAG_BACK_POINTER_SIZE;
		stream.advance(&frame);
	}

	for stream in streams {
		stream.reset();
	}
}
