use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, bail};
use bytes::{BufMut, Bytes, BytesMut};

use vod::PackagerConfig;
use vod::cenc::{CencAudioWriter, CencVideoWriter, FragmentAuxInfo, build_fragment_header};
use vod::hds::{HdsMuxer, build_bootstrap, build_manifest, segment_durations};
use vod::hls::build_index_playlist;
use vod::io::{SegmentWriter, SliceCache};
use vod::model::{MediaSet, MediaType, Sequence};
use vod::mp4::{
	FrameWriter, ParseParams, TFHD_ATOM_SIZE, find_moov, parse_media_set, trun_atom_size, write_mfhd, write_tfhd,
	write_trun,
};

fn load_media_set(source: &Bytes, params: &ParseParams) -> anyhow::Result<MediaSet> {
	let (offset, size) = find_moov(source).context("locating the moov box")?;
	let end = offset
		.checked_add(size)
		.filter(|end| *end <= source.len() as u64)
		.context("moov box is truncated")?;

	parse_media_set(params, &source[offset as usize..end as usize]).context("parsing the moov box")
}

/// One clip window per output segment, 1-based like the segment URLs.
fn segment_windows(duration_millis: u64, segment_duration_ms: u32) -> Vec<(u32, u32, u32)> {
	let segment_duration = u64::from(segment_duration_ms.max(1));
	let count = duration_millis.div_ceil(segment_duration);

	(0..count)
		.map(|index| {
			let start = (index * segment_duration).min(u64::from(u32::MAX)) as u32;
			let end = if index + 1 == count {
				u32::MAX
			} else {
				((index + 1) * segment_duration).min(u64::from(u32::MAX)) as u32
			};
			(index as u32 + 1, start, end)
		})
		.collect()
}

pub fn package_hds(config: &PackagerConfig, out_dir: &Path, source: Vec<u8>) -> anyhow::Result<()> {
	let source = Bytes::from(source);
	let set = load_media_set(&source, &ParseParams::default())?;

	let manifest = build_manifest(config, "stream", &set).context("building the manifest")?;
	std::fs::write(out_dir.join("manifest.f4m"), manifest)?;

	let bootstrap = build_bootstrap(&set, config.segment_duration_ms).context("building the bootstrap")?;
	std::fs::write(out_dir.join(format!("{}.abst", config.bootstrap_file_name_prefix)), &bootstrap)?;

	for (segment_index, start_ms, end_ms) in segment_windows(set.duration_millis(), config.segment_duration_ms) {
		let params = ParseParams { start_ms, end_ms, ..ParseParams::default() };
		let segment_set = load_media_set(&source, &params)
			.with_context(|| format!("parsing segment {segment_index}"))?;
		let clip = &segment_set.sequences[0].clips[0];

		let body = Rc::new(RefCell::new(Vec::new()));
		let sink = {
			let body = body.clone();
			move |data: &[u8]| {
				body.borrow_mut().extend_from_slice(data);
				Ok(())
			}
		};

		let (header, total_size, mut muxer) =
			HdsMuxer::init_fragment(clip, segment_index, sink).context("sizing the fragment")?;

		let mut cache = SliceCache::new(source.clone());
		muxer
			.process_frames(clip, &mut cache)
			.with_context(|| format!("muxing segment {segment_index}"))?;

		let mut fragment = Vec::with_capacity(total_size as usize);
		fragment.extend_from_slice(&header);
		fragment.extend_from_slice(&body.borrow());
		if fragment.len() as u64 != total_size {
			bail!("segment {segment_index}: emitted {} bytes, advertised {total_size}", fragment.len());
		}

		let name = format!("{}{}.f4f", config.fragment_file_name_prefix, segment_index);
		std::fs::write(out_dir.join(&name), &fragment)?;
		tracing::info!(name, size = fragment.len(), "fragment written");
	}

	Ok(())
}

pub fn package_hls(config: &PackagerConfig, out_dir: &Path, source: Vec<u8>) -> anyhow::Result<()> {
	let source = Bytes::from(source);
	let set = load_media_set(&source, &ParseParams::default())?;

	let playlist = build_index_playlist(
		&config.fragment_file_name_prefix,
		config.segment_duration_ms,
		0,
		u64::MAX,
		None,
		&set,
	)
	.context("building the index playlist")?;

	std::fs::write(out_dir.join("index.m3u8"), playlist)?;

	let durations = segment_durations(set.duration_millis(), config.segment_duration_ms);
	tracing::info!(
		segments = durations.segment_count,
		"playlist written; TS segment muxing is handled by the embedding server"
	);
	Ok(())
}

#[derive(Clone, Default)]
struct MemorySegment(Rc<RefCell<(Vec<u8>, Vec<u8>)>>);

impl MemorySegment {
	fn into_bytes(self) -> Vec<u8> {
		let inner = self.0.borrow();
		let mut out = Vec::with_capacity(inner.0.len() + inner.1.len());
		out.extend_from_slice(&inner.0);
		out.extend_from_slice(&inner.1);
		out
	}
}

impl SegmentWriter for MemorySegment {
	fn write_tail(&mut self, data: &[u8]) -> vod::Result<()> {
		self.0.borrow_mut().1.extend_from_slice(data);
		Ok(())
	}

	fn write_head(&mut self, data: &[u8]) -> vod::Result<()> {
		self.0.borrow_mut().0.extend_from_slice(data);
		Ok(())
	}
}

fn put_atom_header(buf: &mut BytesMut, size: u64, name: &[u8; 4]) {
	buf.put_u32(size as u32);
	buf.put_slice(name);
}

fn plain_fragment_header(sequence: &Sequence, media_type: MediaType, segment_index: u32) -> BytesMut {
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

	let traf_size = 8 + TFHD_ATOM_SIZE + trun_atom_size(media_type, frame_count);
	let moof_size = 8 + 16 + traf_size;

	let mut buf = BytesMut::with_capacity(moof_size as usize + 8);
	put_atom_header(&mut buf, moof_size, b"moof");
	write_mfhd(&mut buf, segment_index);
	put_atom_header(&mut buf, traf_size, b"traf");
	write_tfhd(&mut buf, 1);
	write_trun(&mut buf, sequence, media_type, (moof_size + 8) as u32);
	put_atom_header(&mut buf, 8 + total_frames_size, b"mdat");
	buf
}

fn drive<W: vod::io::Sink>(writer: &mut FrameWriter<W>, sequence: &Sequence, cache: &mut SliceCache) -> anyhow::Result<()> {
	loop {
		match writer.process(sequence, cache) {
			Ok(()) => return Ok(()),
			Err(vod::Error::Again) => continue,
			Err(other) => return Err(other).context("streaming the fragment body"),
		}
	}
}

fn fmp4_segment(
	config: &PackagerConfig,
	sequence: &Sequence,
	media_type: MediaType,
	segment_index: u32,
	source: &Bytes,
) -> anyhow::Result<Vec<u8>> {
	let mut cache = SliceCache::new(source.clone());
	let segment = MemorySegment::default();

	match &config.encryption {
		Some(drm) if media_type == MediaType::Video => {
			let header_sequence = sequence.clone();
			let encryptor = CencVideoWriter::new(drm, sequence, segment.clone(), move |info: &FragmentAuxInfo<'_>| {
				build_fragment_header(&header_sequence, MediaType::Video, segment_index, info)
			})
			.context("initializing the video encryptor")?;

			let mut writer = FrameWriter::new(media_type, encryptor, true);
			drive(&mut writer, sequence, &mut cache)?;
		}

		Some(drm) => {
			let mut encryptor =
				CencAudioWriter::new(drm, sequence, segment.clone()).context("initializing the audio encryptor")?;

			let aux = encryptor.auxiliary_data();
			let header = build_fragment_header(sequence, media_type, segment_index, &encryptor.aux_info(&aux))
				.context("building the fragment header")?;
			encryptor.write_head(&header).context("writing the fragment header")?;

			let mut writer = FrameWriter::new(media_type, encryptor, true);
			drive(&mut writer, sequence, &mut cache)?;
		}

		None => {
			let header = plain_fragment_header(sequence, media_type, segment_index);
			let mut segment_sink = segment.clone();
			segment_sink.write_head(&header).context("writing the fragment header")?;

			let sink = move |data: &[u8]| segment_sink.write_tail(data);
			let mut writer = FrameWriter::new(media_type, sink, false);
			drive(&mut writer, sequence, &mut cache)?;
		}
	}

	Ok(segment.into_bytes())
}

pub fn package_fmp4(config: &PackagerConfig, out_dir: &Path, source: Vec<u8>) -> anyhow::Result<()> {
	let source = Bytes::from(source);
	let set = load_media_set(&source, &ParseParams::default())?;

	for (segment_index, start_ms, end_ms) in segment_windows(set.duration_millis(), config.segment_duration_ms) {
		let params = ParseParams { start_ms, end_ms, ..ParseParams::default() };
		let segment_set = load_media_set(&source, &params)
			.with_context(|| format!("parsing segment {segment_index}"))?;
		let sequence = &segment_set.sequences[0];

		for (media_type, marker) in [(MediaType::Video, 'v'), (MediaType::Audio, 'a')] {
			if sequence.clips[0].track_of(media_type).is_none() {
				continue;
			}

			let fragment = fmp4_segment(config, sequence, media_type, segment_index, &source)
				.with_context(|| format!("muxing segment {segment_index}"))?;

			let name = format!("{}{}-{}1.m4s", config.fragment_file_name_prefix, segment_index, marker);
			std::fs::write(out_dir.join(&name), &fragment)?;
			tracing::info!(name, size = fragment.len(), "fragment written");
		}
	}

	Ok(())
}
