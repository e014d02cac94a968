//! Common Encryption (AES-CTR, 128-bit) fragment writers.
//!
//! The encryptors wrap the plain fragment body writer: they receive the
//! streamed frame payloads, transform them in place (clear NAL headers,
//! encrypted NAL bodies for video; whole frames for audio) and accumulate
//! the per-sample auxiliary data the fragment header needs. The header is
//! emitted last, through [`SegmentWriter::write_head`], because `saiz`
//! cannot be sized before the last sample is seen.

mod audio;
mod video;

pub use audio::*;
pub use video::*;

use aes::Aes128;
use bytes::{BufMut, Bytes, BytesMut};
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};
use serde::{Deserialize, Serialize};

use crate::model::{MediaType, Sequence};
use crate::mp4::{TFHD_ATOM_SIZE, put_atom_header, trun_atom_size, write_mfhd, write_tfhd, write_trun};
use crate::{Error, Result};

pub use crate::io::SegmentWriter;

/// Fleet-wide upper bound on the source frame rate, used to estimate how
/// many frames earlier, unparsed clips contributed to the IV counter.
pub const MAX_FRAME_RATE: u64 = 60;

pub const IV_SIZE: usize = 16;

/// Whatever room the write buffer has left, but never less than one
/// cipher block.
const MIN_ENCRYPT_CHUNK: usize = 16;

pub(crate) type Cipher = Ctr128BE<Aes128>;

/// Prepared DRM material. Key provisioning is the host's concern; the
/// core only consumes the finished key set.
#[derive(Clone, Deserialize, Serialize)]
pub struct DrmInfo {
	#[serde(with = "hex")]
	pub key: [u8; 16],
	#[serde(with = "hex")]
	pub iv: [u8; 16],
	#[serde(with = "hex")]
	pub kid: [u8; 16],
	pub pssh: Bytes,
}

impl std::fmt::Debug for DrmInfo {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DrmInfo")
			.field("kid", &hex::encode(self.kid))
			.field("pssh_len", &self.pssh.len())
			.finish_non_exhaustive()
	}
}

/// Advances the per-frame IV: the high 64 bits count frames, big endian.
pub(crate) fn increment_iv_be64(iv: &mut [u8; IV_SIZE]) {
	let mut high = [0u8; 8];
	high.copy_from_slice(&iv[..8]);
	let next = u64::from_be_bytes(high).wrapping_add(1);
	iv[..8].copy_from_slice(&next.to_be_bytes());
}

/// The frame sizes of one clip, snapshotted so the writer does not borrow
/// the media set across suspensions.
pub(crate) struct ClipFrames {
	pub sizes: Vec<u32>,
	pub nal_packet_size_length: u8,
}

/// Cipher and frame cursor state shared by the audio and video writers.
pub(crate) struct CencCore {
	key: [u8; IV_SIZE],
	pub iv: [u8; IV_SIZE],
	pub cipher: Option<Cipher>,

	pub clips: Vec<ClipFrames>,
	pub clip: usize,
	pub frame: usize,
	pub frame_size_left: u32,
}

impl CencCore {
	/// Seeds the IV counter from the base IV, the first parsed frame's
	/// index, and an estimate of the frames in earlier unparsed clips.
	pub fn new(media_type: MediaType, drm: &DrmInfo, sequence: &Sequence) -> Result<Self> {
		let Some(track) = sequence.clips.first().and_then(|clip| clip.track_of(media_type)) else {
			tracing::error!(?media_type, "sequence has no track of the encrypted media type");
			return Err(Error::BadRequest("no track of the requested media type"));
		};

		let mut high = [0u8; 8];
		high.copy_from_slice(&drm.iv[..8]);
		let mut counter = u64::from_be_bytes(high);
		counter = counter.wrapping_add(u64::from(track.first_frame_index));
		counter = counter.wrapping_add(track.clip_sequence_offset * MAX_FRAME_RATE / u64::from(track.timescale));

		let mut iv = drm.iv;
		iv[..8].copy_from_slice(&counter.to_be_bytes());

		let clips = sequence
			.clips
			.iter()
			.map(|clip| {
				let track = clip.track_of(media_type);
				ClipFrames {
					sizes: track.map(|track| track.frames.iter().map(|frame| frame.size).collect()).unwrap_or_default(),
					nal_packet_size_length: track
						.and_then(|track| track.video_info())
						.map(|info| info.nal_packet_size_length)
						.unwrap_or(0),
				}
			})
			.collect();

		Ok(Self {
			key: drm.key,
			iv,
			cipher: None,
			clips,
			clip: 0,
			frame: 0,
			frame_size_left: 0,
		})
	}

	/// Moves past exhausted clips. Returns `(has_frame, entered_new_clip)`.
	pub fn move_to_next_frame(&mut self) -> (bool, bool) {
		let mut entered_new_clip = false;
		loop {
			let Some(clip) = self.clips.get(self.clip) else {
				return (false, entered_new_clip);
			};
			if self.frame < clip.sizes.len() {
				return (true, entered_new_clip);
			}

			self.clip += 1;
			self.frame = 0;
			self.frame_size_left = 0;
			entered_new_clip = true;
		}
	}

	/// Arms the cipher with the current IV and advances it for the next
	/// frame.
	pub fn start_frame(&mut self) -> Result<()> {
		let Some(size) = self.clips.get(self.clip).and_then(|clip| clip.sizes.get(self.frame)) else {
			tracing::error!("body bytes extend past the last frame");
			return Err(Error::BadData("no more frames"));
		};

		self.frame_size_left = *size;
		self.frame += 1;

		self.cipher = Some(Cipher::new(&self.key.into(), &self.iv.into()));
		increment_iv_be64(&mut self.iv);

		Ok(())
	}

	pub fn total_frame_count(&self) -> u32 {
		self.clips.iter().map(|clip| clip.sizes.len() as u32).sum()
	}
}

pub(crate) const SAIZ_FIXED_ATOM_SIZE: u64 = 8 + 9;
pub(crate) const SAIO_ATOM_SIZE: u64 = 8 + 12;

/// Everything the fragment header needs from a finished encryptor.
pub struct FragmentAuxInfo<'a> {
	/// Common `saiz` row value, or 0 when the per-sample array is needed.
	pub default_auxiliary_sample_size: u8,
	pub saiz_sample_count: u32,
	pub saiz_atom_size: u64,
	pub saio_atom_size: u64,
	pub auxiliary_data: &'a [u8],
	pub sample_sizes: &'a [u8],
}

impl FragmentAuxInfo<'_> {
	/// Writes `saiz` and `saio`; `auxiliary_data_offset` is the absolute
	/// byte position of the auxiliary payload within the final segment.
	pub fn write_saiz_saio(&self, buf: &mut BytesMut, auxiliary_data_offset: u64) {
		put_atom_header(buf, self.saiz_atom_size, b"saiz");
		buf.put_u32(0); // version + flags
		buf.put_u8(self.default_auxiliary_sample_size);
		buf.put_u32(self.saiz_sample_count);
		if self.default_auxiliary_sample_size == 0 {
			buf.put_slice(self.sample_sizes);
		}

		put_atom_header(buf, self.saio_atom_size, b"saio");
		buf.put_u32(0); // version + flags
		buf.put_u32(1); // entry count
		buf.put_u32(auxiliary_data_offset as u32);
	}
}

/// Assembles the encrypted fragment header: `moof(mfhd, traf(tfhd, trun,
/// saiz, saio))` followed by the `mdat` header and the auxiliary payload,
/// which sits at the front of the `mdat` body so `saio` can point at it.
pub fn build_fragment_header(
	sequence: &Sequence,
	media_type: MediaType,
	segment_index: u32,
	aux: &FragmentAuxInfo<'_>,
) -> Result<Bytes> {
	let frame_count: u32 = sequence
		.clips
		.iter()
		.filter_map(|clip| clip.track_of(media_type))
		.map(|track| track.frames.len() as u32)
		.sum();
	let total_frames_size: u64 = sequence
		.clips
		.iter()
		.filter_map(|clip| clip.track_of(media_type))
		.map(|track| track.total_frames_size)
		.sum();

	let traf_size = 8 + TFHD_ATOM_SIZE + trun_atom_size(media_type, frame_count) + aux.saiz_atom_size + aux.saio_atom_size;
	let moof_size = 8 + 16 + traf_size;
	let aux_offset = moof_size + 8;
	let mdat_size = 8 + aux.auxiliary_data.len() as u64 + total_frames_size;
	let header_size = moof_size + 8 + aux.auxiliary_data.len() as u64;

	let mut buf = BytesMut::with_capacity(header_size as usize);

	put_atom_header(&mut buf, moof_size, b"moof");
	write_mfhd(&mut buf, segment_index);

	put_atom_header(&mut buf, traf_size, b"traf");
	write_tfhd(&mut buf, 1);
	write_trun(&mut buf, sequence, media_type, (aux_offset + aux.auxiliary_data.len() as u64) as u32);
	aux.write_saiz_saio(&mut buf, aux_offset);

	put_atom_header(&mut buf, mdat_size, b"mdat");
	buf.put_slice(aux.auxiliary_data);

	if buf.len() as u64 != header_size {
		tracing::error!(written = buf.len(), expected = header_size, "encrypted header size accounting mismatch");
		return Err(Error::Unexpected("fragment header size mismatch"));
	}

	Ok(buf.freeze())
}

pub(crate) fn apply_keystream(cipher: &mut Cipher, input: &[u8], output: &mut [u8]) -> Result<()> {
	cipher
		.apply_keystream_b2b(input, output)
		.map_err(|_| Error::Unexpected("cipher buffer length mismatch"))
}


#[cfg(test)]
mod pipeline_tests {
	use super::*;
	use crate::io::{ReadCache, SliceCache};
	use crate::model::{Clip, Frame, MediaInfo, VideoInfo};
	use crate::mp4::FrameWriter;
	use crate::test_support::bare_track;
	use ctr::cipher::KeyIvInit;
	use std::cell::RefCell;
	use std::rc::Rc;

	#[derive(Clone, Default)]
	struct SharedSegment(Rc<RefCell<(Vec<u8>, Vec<u8>)>>);

	impl SharedSegment {
		fn head(&self) -> Vec<u8> {
			self.0.borrow().0.clone()
		}

		fn tail(&self) -> Vec<u8> {
			self.0.borrow().1.clone()
		}
	}

	impl SegmentWriter for SharedSegment {
		fn write_tail(&mut self, data: &[u8]) -> Result<()> {
			self.0.borrow_mut().1.extend_from_slice(data);
			Ok(())
		}

		fn write_head(&mut self, data: &[u8]) -> Result<()> {
			self.0.borrow_mut().0.extend_from_slice(data);
			Ok(())
		}
	}

	fn test_drm(base_iv_counter: u64) -> DrmInfo {
		let mut iv = [0u8; IV_SIZE];
		iv[..8].copy_from_slice(&base_iv_counter.to_be_bytes());
		DrmInfo {
			key: *b"0123456789abcdef",
			iv,
			kid: [7; 16],
			pssh: Bytes::from_static(b"pssh"),
		}
	}

	/// Renders one frame as length-prefixed NAL units; each entry is the
	/// NAL unit length including its header byte.
	fn nal_frame(nal_sizes: &[u32], fill: u8) -> Vec<u8> {
		let mut out = Vec::new();
		for (index, size) in nal_sizes.iter().enumerate() {
			out.extend_from_slice(&size.to_be_bytes());
			out.push(0x65 + index as u8); // nal header byte
			out.extend(std::iter::repeat_n(fill, *size as usize - 1));
		}
		out
	}

	fn video_sequence(frames: &[Vec<u8>], first_frame_index: u32) -> (Sequence, Bytes) {
		let mut source = vec![0u8; 64];
		let mut table = Vec::new();

		for payload in frames {
			table.push(Frame {
				size: payload.len() as u32,
				offset: source.len() as u64,
				duration: 3000,
				key_frame: true,
				..Frame::default()
			});
			source.extend_from_slice(payload);
		}

		let info = MediaInfo::Video(VideoInfo { width: 640, height: 360, nal_packet_size_length: 4 });
		let mut track = bare_track(info, 90000, 90000);
		track.total_frames_size = table.iter().map(|frame| u64::from(frame.size)).sum();
		track.frames = table;
		track.first_frame_index = first_frame_index;

		let sequence = Sequence { index: 0, clips: vec![Clip::new(vec![track])] };
		(sequence, Bytes::from(source))
	}

	fn audio_sequence(frame_sizes: &[u32], first_frame_index: u32) -> (Sequence, Bytes) {
		let mut source = vec![0u8; 32];
		let mut table = Vec::new();

		for (index, size) in frame_sizes.iter().enumerate() {
			table.push(Frame {
				size: *size,
				offset: source.len() as u64,
				duration: 1024,
				..Frame::default()
			});
			source.extend(std::iter::repeat_n(index as u8, *size as usize));
		}

		let info = MediaInfo::Audio(crate::model::AudioInfo { channels: 2, bits_per_sample: 16, sample_rate: 44100 });
		let mut track = bare_track(info, 44100, 44100);
		track.total_frames_size = table.iter().map(|frame| u64::from(frame.size)).sum();
		track.frames = table;
		track.first_frame_index = first_frame_index;

		let sequence = Sequence { index: 0, clips: vec![Clip::new(vec![track])] };
		(sequence, Bytes::from(source))
	}

	/// Splits the auxiliary payload into (iv, [(clear, encrypted)]) rows.
	fn parse_aux(mut aux: &[u8]) -> Vec<([u8; 16], Vec<(u16, u32)>)> {
		let mut rows = Vec::new();
		while !aux.is_empty() {
			let mut iv = [0u8; 16];
			iv.copy_from_slice(&aux[..16]);
			let count = u16::from_be_bytes([aux[16], aux[17]]) as usize;
			aux = &aux[18..];

			let mut subsamples = Vec::new();
			for _ in 0..count {
				let clear = u16::from_be_bytes([aux[0], aux[1]]);
				let encrypted = u32::from_be_bytes([aux[2], aux[3], aux[4], aux[5]]);
				subsamples.push((clear, encrypted));
				aux = &aux[6..];
			}
			rows.push((iv, subsamples));
		}
		rows
	}

	struct CapturedAux {
		default_sample_size: u8,
		sample_count: u32,
		aux: Vec<u8>,
	}

	fn run_video(
		drm: &DrmInfo,
		sequence: &Sequence,
		cache: &mut impl ReadCache,
	) -> (SharedSegment, Rc<RefCell<Option<CapturedAux>>>) {
		let segment = SharedSegment::default();
		let captured: Rc<RefCell<Option<CapturedAux>>> = Rc::new(RefCell::new(None));

		let header_writer = {
			let captured = captured.clone();
			let sequence = sequence.clone();
			move |info: &FragmentAuxInfo<'_>| {
				*captured.borrow_mut() = Some(CapturedAux {
					default_sample_size: info.default_auxiliary_sample_size,
					sample_count: info.saiz_sample_count,
					aux: info.auxiliary_data.to_vec(),
				});
				build_fragment_header(&sequence, MediaType::Video, 1, info)
			}
		};

		let encryptor = CencVideoWriter::new(drm, sequence, segment.clone(), header_writer).unwrap();
		let mut writer = FrameWriter::new(MediaType::Video, encryptor, true);

		loop {
			match writer.process(sequence, cache) {
				Ok(()) => break,
				Err(Error::Again) => continue,
				Err(other) => panic!("unexpected error: {other:?}"),
			}
		}
		assert!(writer.sink_mut().header_written());

		(segment, captured)
	}

	fn decrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
		let mut cipher = Cipher::new(key.into(), iv.into());
		let mut out = vec![0u8; data.len()];
		cipher.apply_keystream_b2b(data, &mut out).unwrap();
		out
	}

	#[test]
	fn video_uniform_subsample_counts_collapse_saiz() {
		let frames: Vec<Vec<u8>> = (0..30).map(|i| nal_frame(&[5, 7], i as u8)).collect();
		let (sequence, source) = video_sequence(&frames, 0);
		let mut cache = SliceCache::new(source);

		let drm = test_drm(1);
		let (_, captured) = run_video(&drm, &sequence, &mut cache);

		let captured = captured.borrow();
		let captured = captured.as_ref().unwrap();
		assert_eq!(captured.default_sample_size, 16 + 2 + 2 * 6);
		assert_eq!(captured.sample_count, 30);
		assert_eq!(captured.aux.len(), 30 * 30);

		let rows = parse_aux(&captured.aux);
		assert_eq!(rows.len(), 30);
		for (index, (iv, subsamples)) in rows.iter().enumerate() {
			// per-frame IVs count up from the base IV
			assert_eq!(u64::from_be_bytes(iv[..8].try_into().unwrap()), 1 + index as u64);

			// each NAL unit: clear length prefix + header byte, encrypted rest
			assert_eq!(subsamples, &vec![(5u16, 4u32), (5, 6)]);
			let total: u64 = subsamples.iter().map(|(c, e)| u64::from(*c) + u64::from(*e)).sum();
			assert_eq!(total, 20);
		}
	}

	#[test]
	fn video_body_decrypts_back_to_the_source() {
		let frames: Vec<Vec<u8>> = vec![nal_frame(&[9], 0x41), nal_frame(&[6, 5], 0x42)];
		let (sequence, source) = video_sequence(&frames, 3);
		let mut cache = SliceCache::new(source);

		let drm = test_drm(100);
		let (segment, captured) = run_video(&drm, &sequence, &mut cache);

		let tail = segment.tail();
		assert_eq!(tail.len(), frames.iter().map(Vec::len).sum::<usize>());

		let captured = captured.borrow();
		let rows = parse_aux(&captured.as_ref().unwrap().aux);
		assert_eq!(u64::from_be_bytes(rows[0].0[..8].try_into().unwrap()), 103);

		let mut pos = 0usize;
		for (frame, (iv, subsamples)) in frames.iter().zip(&rows) {
			let mut clear_parts = Vec::new();
			let mut encrypted_parts = Vec::new();
			for (clear, encrypted) in subsamples {
				clear_parts.push(&tail[pos..pos + *clear as usize]);
				pos += *clear as usize;
				encrypted_parts.push(&tail[pos..pos + *encrypted as usize]);
				pos += *encrypted as usize;
			}

			// the keystream runs across the whole frame's encrypted bytes
			let joined: Vec<u8> = encrypted_parts.concat();
			let decrypted = decrypt(&drm.key, iv, &joined);

			let mut expected = Vec::new();
			let mut src_pos = 0usize;
			for (clear, encrypted) in subsamples {
				assert_eq!(&frame[src_pos..src_pos + *clear as usize], clear_parts.remove(0));
				src_pos += *clear as usize;
				expected.extend_from_slice(&frame[src_pos..src_pos + *encrypted as usize]);
				src_pos += *encrypted as usize;
			}
			assert_eq!(decrypted, expected);
		}
	}

	#[test]
	fn video_fragment_header_accounts_for_every_byte() {
		let frames: Vec<Vec<u8>> = (0..4).map(|i| nal_frame(&[10], i)).collect();
		let (sequence, source) = video_sequence(&frames, 0);
		let mut cache = SliceCache::new(source);

		let drm = test_drm(0);
		let (segment, _) = run_video(&drm, &sequence, &mut cache);

		let head = segment.head();
		let tail = segment.tail();

		let moof_size = u32::from_be_bytes(head[0..4].try_into().unwrap()) as usize;
		assert_eq!(&head[4..8], b"moof");

		let mdat_size = u32::from_be_bytes(head[moof_size..moof_size + 4].try_into().unwrap()) as usize;
		assert_eq!(&head[moof_size + 4..moof_size + 8], b"mdat");

		// advertised mdat covers the aux payload in the header plus the body
		let aux_len = head.len() - moof_size - 8;
		assert_eq!(mdat_size, 8 + aux_len + tail.len());

		// saio points at the aux payload right after the mdat header
		let saio_needle = b"saio";
		let saio_at = head.windows(4).position(|window| window == saio_needle).unwrap();
		let saio_offset = u32::from_be_bytes(head[saio_at + 12..saio_at + 16].try_into().unwrap()) as usize;
		assert_eq!(saio_offset, moof_size + 8);
	}

	#[test]
	fn zero_size_nal_packet_is_rejected() {
		let mut frame = Vec::new();
		frame.extend_from_slice(&0u32.to_be_bytes());
		frame.push(0x65);
		let (sequence, source) = video_sequence(&[frame], 0);
		let mut cache = SliceCache::new(source);

		let segment = SharedSegment::default();
		let sequence_for_header = sequence.clone();
		let encryptor = CencVideoWriter::new(
			&test_drm(0),
			&sequence,
			segment,
			move |info: &FragmentAuxInfo<'_>| build_fragment_header(&sequence_for_header, MediaType::Video, 1, info),
		)
		.unwrap();
		let mut writer = FrameWriter::new(MediaType::Video, encryptor, true);

		assert_eq!(writer.process(&sequence, &mut cache).err(), Some(Error::BadData("zero size nal packet")));
	}

	/// Serves bounded chunks and periodically pretends the range is not
	/// resident, to exercise suspend and resume.
	struct StutterCache {
		inner: SliceCache,
		max_chunk: usize,
		calls: u32,
	}

	impl ReadCache for StutterCache {
		fn get(&mut self, slot: u32, file_index: u32, offset: u64, want: u32) -> Result<Option<&[u8]>> {
			self.calls += 1;
			if self.calls % 3 == 0 {
				return Ok(None);
			}

			let max_chunk = self.max_chunk;
			Ok(self
				.inner
				.get(slot, file_index, offset, want)?
				.map(|buffer| &buffer[..buffer.len().min(max_chunk)]))
		}
	}

	#[test]
	fn video_suspend_resume_is_byte_identical() {
		let frames: Vec<Vec<u8>> = (0..6).map(|i| nal_frame(&[40, 25], i)).collect();
		let (sequence, source) = video_sequence(&frames, 0);

		let drm = test_drm(9);
		let mut plain_cache = SliceCache::new(source.clone());
		let (uninterrupted, _) = run_video(&drm, &sequence, &mut plain_cache);

		let mut stutter = StutterCache { inner: SliceCache::new(source), max_chunk: 7, calls: 0 };
		let (resumed, _) = run_video(&drm, &sequence, &mut stutter);

		assert_eq!(uninterrupted.head(), resumed.head());
		assert_eq!(uninterrupted.tail(), resumed.tail());
	}

	#[test]
	fn audio_aux_data_is_the_iv_sequence() {
		let (sequence, source) = audio_sequence(&[100; 50], 10);
		let mut cache = SliceCache::new(source.clone());

		let drm = test_drm(1);
		let segment = SharedSegment::default();
		let mut encryptor = CencAudioWriter::new(&drm, &sequence, segment.clone()).unwrap();

		let aux = encryptor.auxiliary_data();
		assert_eq!(aux.len(), 50 * 16);

		// starting counter: base 1 plus the first frame index
		assert_eq!(u64::from_be_bytes(aux[..8].try_into().unwrap()), 11);
		assert_eq!(u64::from_be_bytes(aux[16 * 49..16 * 49 + 8].try_into().unwrap()), 60);

		let info = encryptor.aux_info(&aux);
		assert_eq!(info.default_auxiliary_sample_size, 16);
		assert_eq!(info.saiz_sample_count, 50);

		let header = build_fragment_header(&sequence, MediaType::Audio, 1, &info).unwrap();
		encryptor.write_head(&header).unwrap();

		let mut writer = FrameWriter::new(MediaType::Audio, encryptor, true);
		writer.process(&sequence, &mut cache).unwrap();

		// whole frames decrypt back to the source with their aux IVs
		let tail = segment.tail();
		assert_eq!(tail.len(), 50 * 100);
		for index in 0..50usize {
			let mut iv = [0u8; 16];
			iv.copy_from_slice(&aux[index * 16..index * 16 + 16]);
			let decrypted = decrypt(&drm.key, &iv, &tail[index * 100..(index + 1) * 100]);
			assert_eq!(decrypted, vec![index as u8; 100]);
		}

		// the header reached the sink before the body, with saio pointing
		// just past the moof and mdat headers
		let head = segment.head();
		let moof_size = u32::from_be_bytes(head[0..4].try_into().unwrap()) as usize;
		let saio_at = head.windows(4).position(|window| window == b"saio").unwrap();
		let saio_offset = u32::from_be_bytes(head[saio_at + 12..saio_at + 16].try_into().unwrap()) as usize;
		assert_eq!(saio_offset, moof_size + 8);
	}

	#[test]
	fn empty_video_segment_emits_the_header_immediately() {
		let info = MediaInfo::Video(VideoInfo { width: 640, height: 360, nal_packet_size_length: 4 });
		let track = bare_track(info, 90000, 90000);
		let sequence = Sequence { index: 0, clips: vec![Clip::new(vec![track])] };

		let segment = SharedSegment::default();
		let sequence_for_header = sequence.clone();
		let encryptor = CencVideoWriter::new(
			&test_drm(0),
			&sequence,
			segment.clone(),
			move |info: &FragmentAuxInfo<'_>| build_fragment_header(&sequence_for_header, MediaType::Video, 1, info),
		)
		.unwrap();

		assert!(encryptor.header_written());
		assert!(!segment.head().is_empty());
		assert!(segment.tail().is_empty());
	}
}
