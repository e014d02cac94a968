use crate::model::{MediaSet, MediaType};
use crate::{Error, Result};

use super::IframeRef;

/// More than a day of ten second segments; a request asking for more is
/// not a real playlist.
const MAX_SEGMENT_COUNT: u64 = 10 * 1024;

const M3U8_FOOTER: &str = "#EXT-X-ENDLIST\n";

/// `millis` formatted as seconds with three decimals, no floats involved.
fn format_seconds(millis: u64) -> String {
	format!("{}.{:03}", millis / 1000, millis % 1000)
}

/// The `-v1-a1` style track selector appended to segment file names.
pub fn required_tracks_suffix(set: &MediaSet) -> String {
	let mut out = String::new();
	for track in set.tracks() {
		let marker = match track.media_type() {
			MediaType::Video => 'v',
			MediaType::Audio => 'a',
		};
		out.push('-');
		out.push(marker);
		out.push_str(&(track.track_index + 1).to_string());
	}
	out
}

fn push_extinf(out: &mut String, duration_millis: u64) {
	out.push_str("#EXTINF:");
	out.push_str(&format_seconds(duration_millis));
	out.push_str(",\n");
}

fn push_segment_name(out: &mut String, prefix: &str, segment_index: u32, tracks: &str) {
	out.push_str(prefix);
	out.push_str(&segment_index.to_string());
	out.push_str(tracks);
	out.push_str(".ts\n");
}

fn playlist_header(out: &mut String, segment_duration_ms: u32, version: u32, encryption_key_uri: Option<&str>) {
	out.push_str("#EXTM3U\n");
	out.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", (segment_duration_ms + 500) / 1000));
	out.push_str("#EXT-X-ALLOW-CACHE:YES\n");
	if let Some(uri) = encryption_key_uri {
		out.push_str(&format!("#EXT-X-KEY:METHOD=AES-128,URI=\"{uri}\"\n"));
	}
	out.push_str(&format!("#EXT-X-VERSION:{version}\n"));
	out.push_str("#EXT-X-MEDIA-SEQUENCE:1\n");
}

/// Builds the index playlist: one fixed-length entry per segment, with the
/// trailing remainder at millisecond precision.
pub fn build_index_playlist(
	segment_file_name_prefix: &str,
	segment_duration_ms: u32,
	clip_from_ms: u64,
	clip_to_ms: u64,
	encryption_key_uri: Option<&str>,
	set: &MediaSet,
) -> Result<String> {
	let total = set.duration_millis();
	if total <= clip_from_ms {
		tracing::error!(clip_from_ms, total, "clip start exceeds the presentation duration");
		return Err(Error::BadRequest("clip start exceeds the presentation duration"));
	}

	let mut duration_millis = total.min(clip_to_ms) - clip_from_ms;
	let segment_duration = u64::from(segment_duration_ms.max(1));

	let segment_count = duration_millis.div_ceil(segment_duration);
	if segment_count > MAX_SEGMENT_COUNT {
		tracing::error!(segment_count, "segment count out of range");
		return Err(Error::BadData("segment count out of range"));
	}

	let tracks = required_tracks_suffix(set);
	let mut out = String::new();
	playlist_header(&mut out, segment_duration_ms, 3, encryption_key_uri);

	let mut segment_index = 1u32;
	while duration_millis > 0 {
		if duration_millis >= segment_duration {
			push_extinf(&mut out, segment_duration);
			duration_millis -= segment_duration;
		} else {
			push_extinf(&mut out, duration_millis);
			duration_millis = 0;
		}

		push_segment_name(&mut out, segment_file_name_prefix, segment_index, &tracks);
		segment_index += 1;
	}

	out.push_str(M3U8_FOOTER);
	Ok(out)
}

/// Builds the iframes-only playlist from the TS muxer's simulation
/// output: one `#EXTINF` + byte range + segment URL per video key frame.
pub fn build_iframes_playlist(
	segment_file_name_prefix: &str,
	segment_duration_ms: u32,
	set: &MediaSet,
	iframes: impl IntoIterator<Item = IframeRef>,
) -> Result<String> {
	let tracks = required_tracks_suffix(set);

	let mut out = String::new();
	out.push_str("#EXTM3U\n");
	out.push_str(&format!(
		"#EXT-X-TARGETDURATION:{}\n",
		u64::from(segment_duration_ms).div_ceil(1000)
	));
	out.push_str("#EXT-X-VERSION:4\n");
	out.push_str("#EXT-X-MEDIA-SEQUENCE:1\n");
	out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
	out.push_str("#EXT-X-I-FRAMES-ONLY\n");

	for iframe in iframes {
		push_extinf(&mut out, u64::from(iframe.duration_ms));
		out.push_str(&format!("#EXT-X-BYTERANGE:{}@{}\n", iframe.size, iframe.offset));
		push_segment_name(&mut out, segment_file_name_prefix, iframe.segment_index, &tracks);
	}

	out.push_str(M3U8_FOOTER);
	Ok(out)
}
