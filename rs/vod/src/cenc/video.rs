use bytes::{BufMut, Bytes, BytesMut};

use crate::io::{SegmentWriter, Sink, Tail, WriteBuffer};
use crate::model::{MediaType, Sequence};
use crate::{Error, Result};

use super::{
	CencCore, DrmInfo, FragmentAuxInfo, IV_SIZE, MIN_ENCRYPT_CHUNK, SAIO_ATOM_SIZE, SAIZ_FIXED_ATOM_SIZE,
	apply_keystream,
};

/// iv + subsample count, before the per-subsample pairs.
const AUX_ENTRY_FIXED_SIZE: usize = IV_SIZE + 2;

/// clear length (u16) + encrypted length (u32).
const AUX_SUBSAMPLE_SIZE: usize = 6;

#[derive(Clone, Copy, PartialEq, Eq)]
enum VideoState {
	PacketSize,
	NalType,
	PacketData,
}

/// Encrypting segment writer for video: splits each frame into its
/// length-prefixed NAL units, keeps the prefix and the NAL header byte in
/// the clear, encrypts the rest, and accumulates one auxiliary-data entry
/// per frame.
///
/// `header_writer` runs once the last frame ends; whatever it returns is
/// prepended to the body through [`SegmentWriter::write_head`]. It cannot
/// run earlier: `saiz` collapses to a default sample size only if every
/// frame turned out to carry the same subsample count.
pub struct CencVideoWriter<W, H>
where
	W: SegmentWriter,
	H: FnMut(&FragmentAuxInfo<'_>) -> Result<Bytes>,
{
	core: CencCore,
	write_buffer: WriteBuffer<Tail<W>>,
	header_writer: H,

	state: VideoState,
	nal_packet_size_length: u32,
	length_bytes_left: u32,
	packet_size_left: u32,

	subsample_count: u16,
	auxiliary_data: BytesMut,
	sample_sizes: Vec<u8>,
	header_written: bool,
}

impl<W, H> CencVideoWriter<W, H>
where
	W: SegmentWriter,
	H: FnMut(&FragmentAuxInfo<'_>) -> Result<Bytes>,
{
	pub fn new(drm: &DrmInfo, sequence: &Sequence, writer: W, header_writer: H) -> Result<Self> {
		let core = CencCore::new(MediaType::Video, drm, sequence)?;
		let total_frames = core.total_frame_count() as usize;

		// one subsample per frame is the common case for progressive AVC
		let initial_size = (AUX_ENTRY_FIXED_SIZE + AUX_SUBSAMPLE_SIZE) * total_frames + AUX_SUBSAMPLE_SIZE;

		let mut this = Self {
			core,
			write_buffer: WriteBuffer::new(Tail(writer)),
			header_writer,
			state: VideoState::PacketSize,
			nal_packet_size_length: 0,
			length_bytes_left: 0,
			packet_size_left: 0,
			subsample_count: 0,
			auxiliary_data: BytesMut::with_capacity(initial_size),
			sample_sizes: Vec::with_capacity(total_frames),
			header_written: false,
		};

		let (has_frames, _) = this.core.move_to_next_frame();
		if !has_frames {
			// an empty segment gets no body writes, so the header goes out now
			this.finalize()?;
			return Ok(this);
		}

		this.init_track()?;
		Ok(this)
	}

	fn init_track(&mut self) -> Result<()> {
		let nal_packet_size_length = u32::from(self.core.clips[self.core.clip].nal_packet_size_length);
		if !(1..=4).contains(&nal_packet_size_length) {
			tracing::error!(nal_packet_size_length, "invalid nal packet size length");
			return Err(Error::BadData("invalid nal packet size length"));
		}

		self.nal_packet_size_length = nal_packet_size_length;
		self.state = VideoState::PacketSize;
		self.length_bytes_left = nal_packet_size_length;
		self.packet_size_left = 0;
		Ok(())
	}

	fn start_frame(&mut self) -> Result<()> {
		self.auxiliary_data.put_slice(&self.core.iv);
		self.auxiliary_data.put_u16(0); // patched with the subsample count on frame end
		self.subsample_count = 0;

		self.core.start_frame()
	}

	fn add_subsample(&mut self, bytes_clear: u16, bytes_encrypted: u32) {
		self.auxiliary_data.put_u16(bytes_clear);
		self.auxiliary_data.put_u32(bytes_encrypted);
		self.subsample_count += 1;
	}

	fn end_frame(&mut self) -> Result<()> {
		let sample_size = AUX_ENTRY_FIXED_SIZE + usize::from(self.subsample_count) * AUX_SUBSAMPLE_SIZE;
		if sample_size > usize::from(u8::MAX) {
			tracing::error!(subsamples = self.subsample_count, "auxiliary sample size overflows a saiz row");
			return Err(Error::BadData("too many nal units in one frame"));
		}

		self.sample_sizes.push(sample_size as u8);

		// patch the subsample count at the front of this frame's entry
		let at = self.auxiliary_data.len() - sample_size + IV_SIZE;
		self.auxiliary_data[at..at + 2].copy_from_slice(&self.subsample_count.to_be_bytes());

		Ok(())
	}

	fn finalize(&mut self) -> Result<()> {
		self.write_buffer.flush()?;

		let first = self.sample_sizes.first().copied().unwrap_or(0);
		let uniform = self.sample_sizes.iter().all(|size| *size == first);
		let default_auxiliary_sample_size = if uniform { first } else { 0 };

		let saiz_sample_count = self.sample_sizes.len() as u32;
		let mut saiz_atom_size = SAIZ_FIXED_ATOM_SIZE;
		if default_auxiliary_sample_size == 0 {
			saiz_atom_size += u64::from(saiz_sample_count);
		}

		let info = FragmentAuxInfo {
			default_auxiliary_sample_size,
			saiz_sample_count,
			saiz_atom_size,
			saio_atom_size: SAIO_ATOM_SIZE,
			auxiliary_data: &self.auxiliary_data,
			sample_sizes: &self.sample_sizes,
		};

		let header = (self.header_writer)(&info)?;
		self.write_buffer.sink_mut().0.write_head(&header)?;
		self.header_written = true;
		Ok(())
	}

	/// Consumes a chunk of streamed frame payload bytes.
	pub fn write(&mut self, buffer: &[u8]) -> Result<()> {
		let mut pos = 0usize;

		while pos < buffer.len() {
			match self.state {
				VideoState::PacketSize => {
					if self.core.frame_size_left == 0 {
						self.start_frame()?;
						if self.core.frame_size_left == 0 {
							self.state = VideoState::PacketData;
							continue;
						}
					}

					while self.length_bytes_left > 0 && pos < buffer.len() {
						self.packet_size_left = (self.packet_size_left << 8) | u32::from(buffer[pos]);
						pos += 1;
						self.length_bytes_left -= 1;
					}

					if pos >= buffer.len() {
						break;
					}

					let nal_total = match self.nal_packet_size_length.checked_add(self.packet_size_left) {
						Some(total) if self.core.frame_size_left >= total => total,
						_ => {
							tracing::error!(
								frame_size_left = self.core.frame_size_left,
								packet_size = self.packet_size_left,
								"nal unit overflows its frame"
							);
							return Err(Error::BadData("nal unit overflows its frame"));
						}
					};
					self.core.frame_size_left -= nal_total;

					self.state = VideoState::NalType;
				}

				VideoState::NalType => {
					let length_size = self.nal_packet_size_length as usize;
					let dst = self.write_buffer.get_bytes(length_size + 1)?;
					for (shift, byte) in dst[..length_size].iter_mut().enumerate() {
						*byte = (self.packet_size_left >> ((length_size - 1 - shift) * 8)) as u8;
					}
					dst[length_size] = buffer[pos];
					pos += 1;

					if self.packet_size_left == 0 {
						tracing::error!("zero size nal packet");
						return Err(Error::BadData("zero size nal packet"));
					}
					self.packet_size_left -= 1;

					self.add_subsample(self.nal_packet_size_length as u16 + 1, self.packet_size_left);
					self.state = VideoState::PacketData;
				}

				VideoState::PacketData => {
					let write_size = (buffer.len() - pos).min(self.packet_size_left as usize);
					let end = pos + write_size;
					while pos < end {
						let spare = self.write_buffer.spare(MIN_ENCRYPT_CHUNK)?;
						let size = (end - pos).min(spare.len());
						let Some(cipher) = self.core.cipher.as_mut() else {
							return Err(Error::Unexpected("no armed cipher inside a frame"));
						};
						apply_keystream(cipher, &buffer[pos..pos + size], &mut spare[..size])?;
						self.write_buffer.commit(size);
						pos += size;
					}

					self.packet_size_left -= write_size as u32;
					if self.packet_size_left > 0 {
						continue;
					}

					self.state = VideoState::PacketSize;
					self.length_bytes_left = self.nal_packet_size_length;

					if self.core.frame_size_left > 0 {
						continue;
					}

					self.end_frame()?;

					let (has_frames, entered_new_clip) = self.core.move_to_next_frame();
					if has_frames {
						if entered_new_clip {
							self.init_track()?;
						}
						continue;
					}

					self.finalize()?;
				}
			}
		}

		Ok(())
	}

	pub fn header_written(&self) -> bool {
		self.header_written
	}
}

impl<W, H> Sink for CencVideoWriter<W, H>
where
	W: SegmentWriter,
	H: FnMut(&FragmentAuxInfo<'_>) -> Result<Bytes>,
{
	fn write(&mut self, data: &[u8]) -> Result<()> {
		CencVideoWriter::write(self, data)
	}
}
