//! Builders for synthetic MP4 metadata used across the test suites.

use crate::model::MediaType;

pub fn boxed(name: &[u8; 4], body: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(body.len() + 8);
	out.extend_from_slice(&(body.len() as u32 + 8).to_be_bytes());
	out.extend_from_slice(name);
	out.extend_from_slice(body);
	out
}

fn full_box_header(entries: u32) -> Vec<u8> {
	let mut out = vec![0, 0, 0, 0];
	out.extend_from_slice(&entries.to_be_bytes());
	out
}

/// Frame size layout of a synthetic track.
#[derive(Clone, Debug)]
pub enum Sizes {
	Uniform(u32),
	Each(Vec<u32>),
	/// stz2 with the given field size in bits.
	Compact(u8, Vec<u32>),
}

/// Declarative description of one `trak`, rendered to boxes by [`moov`].
#[derive(Clone, Debug)]
pub struct TrakSpec {
	pub media_type: MediaType,
	pub format: [u8; 4],
	pub timescale: u32,
	pub duration: u64,
	/// (sample_count, sample_duration) runs.
	pub stts: Vec<(u32, u32)>,
	/// (sample_count, composition_offset) runs; `None` omits the box.
	pub ctts: Option<Vec<(u32, i32)>>,
	/// (first_chunk, samples_per_chunk, sample_description_index).
	pub stsc: Vec<(u32, u32, u32)>,
	pub sizes: Sizes,
	pub chunk_offsets: Vec<u64>,
	pub co64: bool,
	/// 1-based sync sample indices; `None` omits the box.
	pub stss: Option<Vec<u32>>,
	pub extra_data: Vec<u8>,
	pub width: u16,
	pub height: u16,
	pub channels: u16,
	pub bits_per_sample: u16,
	pub sample_rate: u32,
}

impl TrakSpec {
	/// A video track of `count` frames with constant duration and size.
	pub fn video(timescale: u32, count: u32, duration: u32, size: u32) -> Self {
		Self {
			media_type: MediaType::Video,
			format: *b"avc1",
			timescale,
			duration: u64::from(count) * u64::from(duration),
			stts: vec![(count, duration)],
			ctts: None,
			stsc: vec![(1, 1, 1)],
			sizes: Sizes::Uniform(size),
			chunk_offsets: (0..count).map(|i| 4096 + u64::from(i) * u64::from(size)).collect(),
			co64: false,
			stss: None,
			extra_data: test_avcc(),
			width: 1280,
			height: 720,
			channels: 0,
			bits_per_sample: 0,
			sample_rate: 0,
		}
	}

	/// An audio track of `count` frames with constant duration and size.
	pub fn audio(timescale: u32, count: u32, duration: u32, size: u32) -> Self {
		Self {
			media_type: MediaType::Audio,
			format: *b"mp4a",
			timescale,
			duration: u64::from(count) * u64::from(duration),
			stts: vec![(count, duration)],
			ctts: None,
			stsc: vec![(1, 1, 1)],
			sizes: Sizes::Uniform(size),
			chunk_offsets: (0..count).map(|i| (1 << 20) + u64::from(i) * u64::from(size)).collect(),
			co64: false,
			stss: None,
			extra_data: vec![0x12, 0x10],
			width: 0,
			height: 0,
			channels: 2,
			bits_per_sample: 16,
			sample_rate: 44100,
		}
	}
}

/// AVC decoder configuration with a 4-byte NAL length prefix.
pub fn test_avcc() -> Vec<u8> {
	vec![1, 0x64, 0x00, 0x1f, 0xFF, 0xE1, 0x00, 0x02, 0x67, 0x42, 0x01, 0x00, 0x01, 0x68, 0xCE]
}

fn hdlr_box(media_type: MediaType) -> Vec<u8> {
	let mut body = vec![0; 8];
	body.extend_from_slice(match media_type {
		MediaType::Video => b"vide",
		MediaType::Audio => b"soun",
	});
	body.extend_from_slice(&[0; 12]);
	boxed(b"hdlr", &body)
}

fn mdhd_box(timescale: u32, duration: u64) -> Vec<u8> {
	let mut body = vec![0; 12];
	body.extend_from_slice(&timescale.to_be_bytes());
	body.extend_from_slice(&(duration as u32).to_be_bytes());
	body.extend_from_slice(&[0; 4]);
	boxed(b"mdhd", &body)
}

fn esds_box(config: &[u8]) -> Vec<u8> {
	let mut body = vec![0, 0, 0, 0];
	let dec_specific_len = 2 + config.len();
	let dec_config_len = 13 + dec_specific_len;
	let es_len = 3 + 2 + dec_config_len;

	body.push(0x03);
	body.push(es_len as u8);
	body.extend_from_slice(&[0, 1, 0]);
	body.push(0x04);
	body.push(dec_config_len as u8);
	body.push(0x40);
	body.extend_from_slice(&[0; 12]);
	body.push(0x05);
	body.push(config.len() as u8);
	body.extend_from_slice(config);
	boxed(b"esds", &body)
}

fn stsd_box(spec: &TrakSpec) -> Vec<u8> {
	let mut entry = Vec::new();
	entry.extend_from_slice(&[0; 6]);
	entry.extend_from_slice(&1u16.to_be_bytes());

	match spec.media_type {
		MediaType::Video => {
			let mut fixed = vec![0u8; 70];
			fixed[16..18].copy_from_slice(&spec.width.to_be_bytes());
			fixed[18..20].copy_from_slice(&spec.height.to_be_bytes());
			fixed[66..68].copy_from_slice(&24u16.to_be_bytes());
			fixed[68..70].copy_from_slice(&0xFFFFu16.to_be_bytes());
			entry.extend_from_slice(&fixed);
			entry.extend_from_slice(&boxed(b"avcC", &spec.extra_data));
		}
		MediaType::Audio => {
			let mut fixed = vec![0u8; 20];
			fixed[8..10].copy_from_slice(&spec.channels.to_be_bytes());
			fixed[10..12].copy_from_slice(&spec.bits_per_sample.to_be_bytes());
			fixed[16..20].copy_from_slice(&(spec.sample_rate << 16).to_be_bytes());
			entry.extend_from_slice(&fixed);
			entry.extend_from_slice(&esds_box(&spec.extra_data));
		}
	}

	let mut full_entry = Vec::new();
	full_entry.extend_from_slice(&(entry.len() as u32 + 8).to_be_bytes());
	full_entry.extend_from_slice(&spec.format);
	full_entry.extend_from_slice(&entry);

	let mut body = full_box_header(1);
	body.extend_from_slice(&full_entry);
	boxed(b"stsd", &body)
}

fn stts_box(runs: &[(u32, u32)]) -> Vec<u8> {
	let mut body = full_box_header(runs.len() as u32);
	for (count, duration) in runs {
		body.extend_from_slice(&count.to_be_bytes());
		body.extend_from_slice(&duration.to_be_bytes());
	}
	boxed(b"stts", &body)
}

fn ctts_box(runs: &[(u32, i32)]) -> Vec<u8> {
	let mut body = full_box_header(runs.len() as u32);
	for (count, offset) in runs {
		body.extend_from_slice(&count.to_be_bytes());
		body.extend_from_slice(&offset.to_be_bytes());
	}
	boxed(b"ctts", &body)
}

fn stsc_box(entries: &[(u32, u32, u32)]) -> Vec<u8> {
	let mut body = full_box_header(entries.len() as u32);
	for (first_chunk, samples, desc) in entries {
		body.extend_from_slice(&first_chunk.to_be_bytes());
		body.extend_from_slice(&samples.to_be_bytes());
		body.extend_from_slice(&desc.to_be_bytes());
	}
	boxed(b"stsc", &body)
}

fn stsz_box(sizes: &Sizes, frame_count: u32) -> Vec<u8> {
	match sizes {
		Sizes::Uniform(size) => {
			let mut body = vec![0; 4];
			body.extend_from_slice(&size.to_be_bytes());
			body.extend_from_slice(&frame_count.to_be_bytes());
			boxed(b"stsz", &body)
		}
		Sizes::Each(values) => {
			let mut body = vec![0; 4];
			body.extend_from_slice(&0u32.to_be_bytes());
			body.extend_from_slice(&(values.len() as u32).to_be_bytes());
			for value in values {
				body.extend_from_slice(&value.to_be_bytes());
			}
			boxed(b"stsz", &body)
		}
		Sizes::Compact(field_size, values) => {
			let mut body = vec![0, 0, 0, 0, 0, 0, 0, *field_size];
			body.extend_from_slice(&(values.len() as u32).to_be_bytes());
			for value in values {
				match field_size {
					8 => body.push(*value as u8),
					16 => body.extend_from_slice(&(*value as u16).to_be_bytes()),
					_ => body.extend_from_slice(&value.to_be_bytes()),
				}
			}
			boxed(b"stz2", &body)
		}
	}
}

fn stco_box(offsets: &[u64], co64: bool) -> Vec<u8> {
	let mut body = full_box_header(offsets.len() as u32);
	for offset in offsets {
		if co64 {
			body.extend_from_slice(&offset.to_be_bytes());
		} else {
			body.extend_from_slice(&(*offset as u32).to_be_bytes());
		}
	}
	boxed(if co64 { b"co64" } else { b"stco" }, &body)
}

fn stss_box(indices: &[u32]) -> Vec<u8> {
	let mut body = full_box_header(indices.len() as u32);
	for index in indices {
		body.extend_from_slice(&index.to_be_bytes());
	}
	boxed(b"stss", &body)
}

pub fn trak_box(spec: &TrakSpec) -> Vec<u8> {
	let frame_count = spec.stts.iter().map(|(count, _)| count).sum();

	let mut stbl = stsd_box(spec);
	stbl.extend_from_slice(&stts_box(&spec.stts));
	if let Some(ctts) = &spec.ctts {
		stbl.extend_from_slice(&ctts_box(ctts));
	}
	stbl.extend_from_slice(&stsc_box(&spec.stsc));
	stbl.extend_from_slice(&stsz_box(&spec.sizes, frame_count));
	stbl.extend_from_slice(&stco_box(&spec.chunk_offsets, spec.co64));
	if let Some(stss) = &spec.stss {
		stbl.extend_from_slice(&stss_box(stss));
	}

	let stbl_box = boxed(b"stbl", &stbl);
	let minf_box = boxed(b"minf", &stbl_box);

	let mut mdia = hdlr_box(spec.media_type);
	mdia.extend_from_slice(&mdhd_box(spec.timescale, spec.duration));
	mdia.extend_from_slice(&minf_box);

	boxed(b"trak", &boxed(b"mdia", &mdia))
}

pub fn moov(specs: &[TrakSpec]) -> Vec<u8> {
	let mut body = Vec::new();
	for spec in specs {
		body.extend_from_slice(&trak_box(spec));
	}
	body
}

use crate::model::{CodecId, MediaInfo, Track};
use bytes::Bytes;

/// A bare track for tests that construct frame tables by hand.
pub fn bare_track(media_info: MediaInfo, timescale: u32, duration: u64) -> Track {
	Track {
		media_info,
		codec: match media_info {
			MediaInfo::Video(_) => CodecId::Avc,
			MediaInfo::Audio(_) => CodecId::Aac,
		},
		extra_data: Bytes::new(),
		timescale,
		duration,
		duration_90k: crate::model::rescale_time(duration, timescale, crate::model::TIMESCALE_90K),
		track_index: 0,
		bitrate: 0,
		min_frame_duration: 0,
		frames: Vec::new(),
		first_frame_index: 0,
		first_frame_time_offset: 0,
		key_frame_count: 0,
		total_frames_size: 0,
		clip_sequence_offset: 0,
		file_index: 0,
	}
}
