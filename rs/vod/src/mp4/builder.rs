use bytes::BufMut;

use crate::io::{ReadCache, Sink, WriteBuffer};
use crate::model::{MediaType, Sequence};
use crate::{Error, Result};

use super::writer::put_atom_header;

pub const MFHD_ATOM_SIZE: u64 = 16;

/// Per-sample row widths of a whole-fragment `trun`.
pub const TRUN_VIDEO_ROW_SIZE: u64 = 16;
pub const TRUN_AUDIO_ROW_SIZE: u64 = 8;

pub fn write_mfhd(buf: &mut impl BufMut, segment_index: u32) {
	put_atom_header(buf, MFHD_ATOM_SIZE, b"mfhd");
	buf.put_u32(0);
	buf.put_u32(segment_index);
}

pub const TFHD_ATOM_SIZE: u64 = 16;

/// `tfhd` with default-base-is-moof; data offsets are relative to the
/// `moof` box start.
pub fn write_tfhd(buf: &mut impl BufMut, track_id: u32) {
	put_atom_header(buf, TFHD_ATOM_SIZE, b"tfhd");
	buf.put_u32(0x020000);
	buf.put_u32(track_id);
}

pub fn trun_atom_size(media_type: MediaType, frame_count: u32) -> u64 {
	let row = match media_type {
		MediaType::Video => TRUN_VIDEO_ROW_SIZE,
		MediaType::Audio => TRUN_AUDIO_ROW_SIZE,
	};
	8 + 12 + u64::from(frame_count) * row
}

/// Writes one `trun` covering every frame of `media_type` across the
/// sequence's clips. `first_frame_offset` is relative to the `moof` start.
pub fn write_trun(buf: &mut impl BufMut, sequence: &Sequence, media_type: MediaType, first_frame_offset: u32) {
	let frame_count: u32 = sequence
		.clips
		.iter()
		.filter_map(|clip| clip.track_of(media_type))
		.map(|track| track.frames.len() as u32)
		.sum();

	put_atom_header(buf, trun_atom_size(media_type, frame_count), b"trun");
	match media_type {
		MediaType::Video => buf.put_u32(0xF01),
		MediaType::Audio => buf.put_u32(0x301),
	}
	buf.put_u32(frame_count);
	buf.put_u32(first_frame_offset);

	for clip in &sequence.clips {
		let Some(track) = clip.track_of(media_type) else {
			continue;
		};

		for frame in &track.frames {
			buf.put_u32(frame.duration);
			buf.put_u32(frame.size);
			if media_type == MediaType::Video {
				if frame.key_frame {
					buf.put_u32(0x00000000);
				} else {
					buf.put_u32(0x00010000);
				}
				buf.put_u32(frame.pts_delay);
			}
		}
	}
}

enum Output<W: Sink> {
	/// Forward every cache buffer straight to the sink.
	Direct(W),

	/// Coalesce cache buffers before handing them on.
	Buffered(WriteBuffer<W>),
}

impl<W: Sink> Output<W> {
	fn write(&mut self, data: &[u8]) -> Result<()> {
		match self {
			Self::Direct(sink) => sink.write(data),
			Self::Buffered(buffer) => buffer.write(data),
		}
	}

	fn flush(&mut self) -> Result<()> {
		match self {
			Self::Direct(_) => Ok(()),
			Self::Buffered(buffer) => buffer.flush(),
		}
	}
}

/// Streams the raw frame payloads of one media type of a sequence, clip by
/// clip, in frame table order. This is the body writer of unfragmented
/// `mdat` content; an encryptor slots in as the sink.
///
/// All position state is plain integers, so an [`Error::Again`] from the
/// read cache suspends the writer losslessly.
pub struct FrameWriter<W: Sink> {
	output: Output<W>,
	media_type: MediaType,

	clip: usize,
	frame: usize,
	frame_pos: u32,
	started: bool,
	first_time: bool,
	done: bool,
}

impl<W: Sink> FrameWriter<W> {
	pub fn new(media_type: MediaType, sink: W, reuse_buffers: bool) -> Self {
		Self {
			output: if reuse_buffers {
				Output::Direct(sink)
			} else {
				Output::Buffered(WriteBuffer::new(sink))
			},
			media_type,
			clip: 0,
			frame: 0,
			frame_pos: 0,
			started: false,
			first_time: true,
			done: false,
		}
	}

	pub fn sink_mut(&mut self) -> &mut W {
		match &mut self.output {
			Output::Direct(sink) => sink,
			Output::Buffered(buffer) => buffer.sink_mut(),
		}
	}

	fn has_frame(&self, sequence: &Sequence) -> bool {
		self.clip < sequence.clips.len()
			&& sequence.clips[self.clip]
				.track_of(self.media_type)
				.is_some_and(|track| self.frame < track.frames.len())
	}

	fn move_to_next_frame(&mut self, sequence: &Sequence) -> bool {
		while !self.has_frame(sequence) {
			self.clip += 1;
			if self.clip >= sequence.clips.len() {
				return false;
			}

			self.frame = 0;
			self.frame_pos = 0;
			self.first_time = true;
		}

		true
	}

	/// Streams frames until the table is exhausted (`Ok`) or the cache
	/// comes up dry ([`Error::Again`]); call again with the same sequence
	/// to resume.
	pub fn process(&mut self, sequence: &Sequence, cache: &mut impl ReadCache) -> Result<()> {
		if self.done {
			return Ok(());
		}

		if !self.started {
			if !self.move_to_next_frame(sequence) {
				self.done = true;
				return self.output.flush();
			}
			self.started = true;
		}

		let mut processed_data = false;

		loop {
			let Some(track) = sequence.clips[self.clip].track_of(self.media_type) else {
				return Err(Error::Unexpected("frame cursor left on a clip without a track"));
			};
			let frame = track.frames[self.frame];

			let want = frame.size - self.frame_pos;
			let read = cache.get(
				self.media_type.index() as u32,
				track.file_index,
				frame.offset + u64::from(self.frame_pos),
				want,
			)?;

			let Some(buffer) = read else {
				self.output.flush()?;
				if !processed_data && !self.first_time {
					tracing::error!("no frame data was handled, probably a truncated file");
					return Err(Error::BadData("truncated frame data"));
				}

				self.first_time = false;
				return Err(Error::Again);
			};

			processed_data = true;
			let size = (want as usize).min(buffer.len());
			self.output.write(&buffer[..size])?;
			self.frame_pos += size as u32;

			if self.frame_pos < frame.size {
				continue;
			}

			self.frame += 1;
			self.frame_pos = 0;
			if !self.move_to_next_frame(sequence) {
				self.done = true;
				return self.output.flush();
			}
		}
	}
}
