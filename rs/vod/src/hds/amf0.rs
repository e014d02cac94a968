use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{BufMut, BytesMut};

use crate::model::{MediaType, PresentationKind, Track};

pub const CODEC_ID_AVC: u8 = 0x7;
pub const SOUND_FORMAT_AAC: u8 = 0xA;
pub const SOUND_FORMAT_MP3: u8 = 0x2;

const AMF0_TYPE_NUMBER: u8 = 0x00;
const AMF0_TYPE_BOOLEAN: u8 = 0x01;
const AMF0_TYPE_STRING: u8 = 0x02;
const AMF0_TYPE_ECMA_ARRAY: u8 = 0x08;
const AMF0_TYPE_OBJECT_END: u8 = 0x09;

const ON_METADATA: &str = "onMetaData";

#[derive(Clone, Copy, PartialEq, Eq)]
enum FieldGroup {
	Common,
	Video,
	Audio,
}

#[derive(Clone, Copy)]
enum FieldValue {
	Duration,
	Width,
	Height,
	VideoDataRate,
	FrameRate,
	VideoCodecId,
	AudioDataRate,
	AudioSampleRate,
	AudioSampleSize,
	Stereo,
	AudioCodecId,
	FileSize,
}

struct MetadataField {
	name: &'static str,
	group: FieldGroup,
	value: FieldValue,
}

/// The `onMetaData` fields in emission order. Duration is only present for
/// finished presentations; the per-media groups only when the media type
/// is.
static METADATA_FIELDS: &[MetadataField] = &[
	MetadataField { name: "duration", group: FieldGroup::Common, value: FieldValue::Duration },
	MetadataField { name: "width", group: FieldGroup::Video, value: FieldValue::Width },
	MetadataField { name: "height", group: FieldGroup::Video, value: FieldValue::Height },
	MetadataField { name: "videodatarate", group: FieldGroup::Video, value: FieldValue::VideoDataRate },
	MetadataField { name: "framerate", group: FieldGroup::Video, value: FieldValue::FrameRate },
	MetadataField { name: "videocodecid", group: FieldGroup::Video, value: FieldValue::VideoCodecId },
	MetadataField { name: "audiodatarate", group: FieldGroup::Audio, value: FieldValue::AudioDataRate },
	MetadataField { name: "audiosamplerate", group: FieldGroup::Audio, value: FieldValue::AudioSampleRate },
	MetadataField { name: "audiosamplesize", group: FieldGroup::Audio, value: FieldValue::AudioSampleSize },
	MetadataField { name: "stereo", group: FieldGroup::Audio, value: FieldValue::Stereo },
	MetadataField { name: "audiocodecid", group: FieldGroup::Audio, value: FieldValue::AudioCodecId },
	MetadataField { name: "filesize", group: FieldGroup::Common, value: FieldValue::FileSize },
];

fn append_number(buf: &mut BytesMut, value: f64) {
	buf.put_u8(AMF0_TYPE_NUMBER);
	buf.put_f64(value);
}

fn append_boolean(buf: &mut BytesMut, value: bool) {
	buf.put_u8(AMF0_TYPE_BOOLEAN);
	buf.put_u8(u8::from(value));
}

fn append_raw_string(buf: &mut BytesMut, value: &str) {
	buf.put_u16(value.len() as u16);
	buf.put_slice(value.as_bytes());
}

fn append_string(buf: &mut BytesMut, value: &str) {
	buf.put_u8(AMF0_TYPE_STRING);
	append_raw_string(buf, value);
}

fn append_array_header(buf: &mut BytesMut, count: u32) {
	buf.put_u8(AMF0_TYPE_ECMA_ARRAY);
	buf.put_u32(count);
}

fn append_array_end(buf: &mut BytesMut) {
	buf.put_u16(0);
	buf.put_u8(AMF0_TYPE_OBJECT_END);
}

/// The per-media tracks the metadata describes, by [`MediaType`] index.
pub type MetadataTracks<'a> = [Option<&'a Track>; MediaType::COUNT];

/// Longest presentation duration among the present tracks, as seconds.
fn max_duration_seconds(tracks: &MetadataTracks) -> f64 {
	let video = tracks[MediaType::Video.index()];
	let audio = tracks[MediaType::Audio.index()];

	let longest = match (video, audio) {
		(Some(video), Some(audio)) => {
			if video.duration * u64::from(audio.timescale) > audio.duration * u64::from(video.timescale) {
				video
			} else {
				audio
			}
		}
		(Some(video), None) => video,
		(None, Some(audio)) => audio,
		(None, None) => return 0.0,
	};

	longest.duration as f64 / f64::from(longest.timescale)
}

fn group_enabled(group: FieldGroup, kind: PresentationKind, tracks: &MetadataTracks, value: FieldValue) -> bool {
	match group {
		FieldGroup::Common => !matches!(value, FieldValue::Duration) || kind == PresentationKind::Vod,
		FieldGroup::Video => tracks[MediaType::Video.index()].is_some(),
		FieldGroup::Audio => tracks[MediaType::Audio.index()].is_some(),
	}
}

/// Serializes the `onMetaData` AMF0 blob for one rendition.
pub fn write_metadata(kind: PresentationKind, tracks: &MetadataTracks) -> BytesMut {
	let mut buf = BytesMut::new();

	let count = METADATA_FIELDS
		.iter()
		.filter(|field| group_enabled(field.group, kind, tracks, field.value))
		.count() as u32;

	append_string(&mut buf, ON_METADATA);
	append_array_header(&mut buf, count);

	for field in METADATA_FIELDS {
		if !group_enabled(field.group, kind, tracks, field.value) {
			continue;
		}

		append_raw_string(&mut buf, field.name);

		let video = tracks[MediaType::Video.index()];
		let audio = tracks[MediaType::Audio.index()];
		match field.value {
			FieldValue::Duration => append_number(&mut buf, max_duration_seconds(tracks)),
			FieldValue::Width => {
				let width = video.and_then(Track::video_info).map(|info| info.width).unwrap_or(0);
				append_number(&mut buf, f64::from(width));
			}
			FieldValue::Height => {
				let height = video.and_then(Track::video_info).map(|info| info.height).unwrap_or(0);
				append_number(&mut buf, f64::from(height));
			}
			FieldValue::VideoDataRate => {
				append_number(&mut buf, f64::from(video.map(|track| track.bitrate).unwrap_or(0)) / 1000.0);
			}
			FieldValue::FrameRate => {
				let rate = video
					.filter(|track| track.min_frame_duration > 0)
					.map(|track| f64::from(track.timescale) / f64::from(track.min_frame_duration))
					.unwrap_or(0.0);
				append_number(&mut buf, rate);
			}
			FieldValue::VideoCodecId => append_number(&mut buf, f64::from(CODEC_ID_AVC)),
			FieldValue::AudioDataRate => {
				append_number(&mut buf, f64::from(audio.map(|track| track.bitrate).unwrap_or(0)) / 1000.0);
			}
			FieldValue::AudioSampleRate => {
				let rate = audio.and_then(Track::audio_info).map(|info| info.sample_rate).unwrap_or(0);
				append_number(&mut buf, f64::from(rate));
			}
			FieldValue::AudioSampleSize => {
				let bits = audio.and_then(Track::audio_info).map(|info| info.bits_per_sample).unwrap_or(0);
				append_number(&mut buf, f64::from(bits));
			}
			FieldValue::Stereo => {
				let channels = audio.and_then(Track::audio_info).map(|info| info.channels).unwrap_or(0);
				append_boolean(&mut buf, channels > 1);
			}
			FieldValue::AudioCodecId => {
				let format = match audio.map(|track| track.codec) {
					Some(crate::model::CodecId::Mp3) => SOUND_FORMAT_MP3,
					_ => SOUND_FORMAT_AAC,
				};
				append_number(&mut buf, f64::from(format));
			}
			FieldValue::FileSize => {
				let size = video.map(|track| track.total_frames_size).unwrap_or(0)
					+ audio.map(|track| track.total_frames_size).unwrap_or(0);
				append_number(&mut buf, size as f64);
			}
		}
	}

	append_array_end(&mut buf);
	buf
}

/// [`write_metadata`] base64-encoded for embedding in a manifest.
pub fn write_base64_metadata(kind: PresentationKind, tracks: &MetadataTracks) -> String {
	BASE64.encode(write_metadata(kind, tracks))
}
