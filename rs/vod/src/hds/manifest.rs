use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::BytesMut;

use crate::model::{MediaSet, MediaType, PresentationKind, Sequence};
use crate::{Error, PackagerConfig, Result};

use super::amf0::{MetadataTracks, write_base64_metadata};
use super::bootstrap::{abst_atom_size, segment_durations, write_abst};

fn sequence_tracks(sequence: &Sequence) -> Result<MetadataTracks<'_>> {
	let Some(clip) = sequence.clips.first() else {
		tracing::error!(sequence = sequence.index, "sequence has no clips");
		return Err(Error::Unexpected("sequence without clips"));
	};

	Ok([
		clip.track_of(MediaType::Video),
		clip.track_of(MediaType::Audio),
	])
}

fn push_stream_url(out: &mut String, prefix: &str, has_multi_sequences: bool, sequence: &Sequence, tracks: &MetadataTracks) {
	out.push_str(prefix);
	if has_multi_sequences {
		out.push_str(&format!("-f{}", sequence.index + 1));
	}
	if let Some(video) = tracks[MediaType::Video.index()] {
		out.push_str(&format!("-v{}", video.track_index + 1));
	}
	if let Some(audio) = tracks[MediaType::Audio.index()] {
		out.push_str(&format!("-a{}", audio.track_index + 1));
	}
}

/// Builds the F4M manifest: per-sequence inline bootstrap, optional DRM
/// additional headers, and media entries with AMF0 metadata.
pub fn build_manifest(config: &PackagerConfig, manifest_id: &str, set: &MediaSet) -> Result<String> {
	let durations = segment_durations(set.duration_millis(), config.segment_duration_ms);
	let has_multi_sequences = set.sequences.len() > 1;

	let mut out = String::new();
	out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
	out.push_str("<manifest\n  xmlns=\"http://ns.adobe.com/f4m/1.0\">\n");
	out.push_str(&format!("  <id>{manifest_id}</id>\n"));

	match set.kind {
		PresentationKind::Vod => {
			let total = set.duration_millis();
			out.push_str(&format!("  <duration>{}.{:03}</duration>\n", total / 1000, total % 1000));
			out.push_str("  <streamType>recorded</streamType>\n");
		}
		PresentationKind::Live => {
			out.push_str("  <streamType>live</streamType>\n");
		}
	}

	// bootstrap tags
	for (index, sequence) in set.sequences.iter().enumerate() {
		match set.kind {
			PresentationKind::Vod => {
				let mut abst = BytesMut::with_capacity(abst_atom_size(set, &durations) as usize);
				write_abst(&mut abst, set, &durations);

				out.push_str(&format!(
					"  <bootstrapInfo\n    profile=\"named\"\n    id=\"bootstrap{index}\">"
				));
				out.push_str(&BASE64.encode(&abst));
				out.push_str("</bootstrapInfo>\n");
			}
			PresentationKind::Live => {
				let tracks = sequence_tracks(sequence)?;
				out.push_str(&format!(
					"  <bootstrapInfo\n    profile=\"named\"\n    id=\"bootstrap{index}\"\n    url=\""
				));
				push_stream_url(&mut out, &config.bootstrap_file_name_prefix, has_multi_sequences, sequence, &tracks);
				out.push_str(".abst\"/>\n");
			}
		}
	}

	// DRM additional headers carry the prepared pssh blob
	if let Some(encryption) = &config.encryption {
		for index in 0..set.sequences.len() {
			out.push_str(&format!("  <drmAdditionalHeader\n    id=\"drmMetadata{index}\">\n      "));
			out.push_str(&BASE64.encode(&encryption.pssh));
			out.push_str("\n  </drmAdditionalHeader>\n");
		}
	}

	// media tags
	for (index, sequence) in set.sequences.iter().enumerate() {
		let tracks = sequence_tracks(sequence)?;

		if let Some(video) = tracks[MediaType::Video.index()] {
			let mut bitrate = video.bitrate;
			if let Some(audio) = tracks[MediaType::Audio.index()] {
				bitrate += audio.bitrate;
			}

			let (width, height) = video
				.video_info()
				.map(|info| (u32::from(info.width), u32::from(info.height)))
				.unwrap_or((0, 0));
			out.push_str(&format!(
				"  <media\n    bitrate=\"{}\"\n    width=\"{width}\"\n    height=\"{height}\"\n    url=\"",
				bitrate / 1000
			));
		} else {
			let bitrate = tracks[MediaType::Audio.index()].map(|track| track.bitrate).unwrap_or(0);
			out.push_str(&format!("  <media\n    bitrate=\"{}\"\n    url=\"", bitrate / 1000));
		}

		push_stream_url(&mut out, &config.fragment_file_name_prefix, has_multi_sequences, sequence, &tracks);
		out.push('-');

		if config.encryption.is_some() {
			out.push_str(&format!(
				"\"\n    bootstrapInfoId=\"bootstrap{index}\"\n    drmAdditionalHeaderId=\"drmMetadata{index}\">\n    <metadata>"
			));
		} else {
			out.push_str(&format!("\"\n    bootstrapInfoId=\"bootstrap{index}\">\n    <metadata>"));
		}

		out.push_str(&write_base64_metadata(set.kind, &tracks));
		out.push_str("</metadata>\n  </media>\n");
	}

	out.push_str("</manifest>\n");
	Ok(out)
}
