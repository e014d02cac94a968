use bytes::{BufMut, BytesMut};

use crate::io::{SegmentWriter, Sink, Tail, WriteBuffer};
use crate::model::{MediaType, Sequence};
use crate::{Error, Result};

use super::{
	CencCore, DrmInfo, FragmentAuxInfo, IV_SIZE, MIN_ENCRYPT_CHUNK, SAIO_ATOM_SIZE, SAIZ_FIXED_ATOM_SIZE,
	apply_keystream, increment_iv_be64,
};

/// Encrypting segment writer for audio: whole frames are encrypted, there
/// are no subsamples, and the auxiliary data is just the IV sequence.
///
/// Unlike video, everything the fragment header needs is known upfront
/// ([`auxiliary_data`](Self::auxiliary_data), [`aux_info`](Self::aux_info)),
/// so the caller writes the header before streaming the body.
pub struct CencAudioWriter<W: SegmentWriter> {
	core: CencCore,
	write_buffer: WriteBuffer<Tail<W>>,
	start_iv: [u8; IV_SIZE],
	total_frame_count: u32,
}

impl<W: SegmentWriter> CencAudioWriter<W> {
	pub fn new(drm: &DrmInfo, sequence: &Sequence, writer: W) -> Result<Self> {
		let mut core = CencCore::new(MediaType::Audio, drm, sequence)?;
		core.move_to_next_frame();
		let start_iv = core.iv;
		let total_frame_count = core.total_frame_count();

		Ok(Self {
			core,
			write_buffer: WriteBuffer::new(Tail(writer)),
			start_iv,
			total_frame_count,
		})
	}

	/// The complete auxiliary payload: one IV per frame, counting up from
	/// the starting IV.
	pub fn auxiliary_data(&self) -> BytesMut {
		let mut buf = BytesMut::with_capacity(IV_SIZE * self.total_frame_count as usize);
		let mut iv = self.start_iv;
		for _ in 0..self.total_frame_count {
			buf.put_slice(&iv);
			increment_iv_be64(&mut iv);
		}
		buf
	}

	/// `saiz`/`saio` inputs for the fragment header; every row is one IV.
	pub fn aux_info<'a>(&self, auxiliary_data: &'a [u8]) -> FragmentAuxInfo<'a> {
		FragmentAuxInfo {
			default_auxiliary_sample_size: IV_SIZE as u8,
			saiz_sample_count: self.total_frame_count,
			saiz_atom_size: SAIZ_FIXED_ATOM_SIZE,
			saio_atom_size: SAIO_ATOM_SIZE,
			auxiliary_data,
			sample_sizes: &[],
		}
	}

	pub fn write_head(&mut self, header: &[u8]) -> Result<()> {
		self.write_buffer.sink_mut().0.write_head(header)
	}

	/// Consumes a chunk of streamed frame payload bytes, encrypting them
	/// in place.
	pub fn write(&mut self, buffer: &[u8]) -> Result<()> {
		let mut pos = 0usize;

		while pos < buffer.len() {
			if self.core.frame_size_left == 0 {
				self.core.start_frame()?;
			}

			let write_size = (buffer.len() - pos).min(self.core.frame_size_left as usize);
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

			self.core.frame_size_left -= write_size as u32;
			if self.core.frame_size_left > 0 {
				break;
			}

			let (has_frames, _) = self.core.move_to_next_frame();
			if !has_frames {
				self.write_buffer.flush()?;
			}
		}

		Ok(())
	}
}

impl<W: SegmentWriter> Sink for CencAudioWriter<W> {
	fn write(&mut self, data: &[u8]) -> Result<()> {
		CencAudioWriter::write(self, data)
	}
}
