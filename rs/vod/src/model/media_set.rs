use crate::{Error, Result};

use super::{MediaType, Track};

/// Whether the presentation is complete or still growing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentationKind {
	Vod,
	Live,
}

/// The tracks of one time range of a sequence, already filtered down to
/// the requested track set and clip window.
#[derive(Clone, Debug)]
pub struct Clip {
	pub tracks: Vec<Track>,

	/// Index into `tracks` of the longest track per media type.
	pub longest_track: [Option<usize>; MediaType::COUNT],
}

impl Clip {
	pub fn new(tracks: Vec<Track>) -> Self {
		let mut longest_track = [None; MediaType::COUNT];
		for (index, track) in tracks.iter().enumerate() {
			let slot = &mut longest_track[track.media_type().index()];
			let longer = match *slot {
				Some(cur) => {
					let cur: &Track = &tracks[cur];
					track.duration_90k > cur.duration_90k
				}
				None => true,
			};
			if longer {
				*slot = Some(index);
			}
		}

		Self { tracks, longest_track }
	}

	pub fn track_of(&self, media_type: MediaType) -> Option<&Track> {
		self.longest_track[media_type.index()].map(|index| &self.tracks[index])
	}

	pub fn total_frame_count(&self) -> u32 {
		self.tracks.iter().map(|track| track.frames.len() as u32).sum()
	}

	pub fn video_key_frame_count(&self) -> u32 {
		self.tracks
			.iter()
			.filter(|track| track.media_type() == MediaType::Video)
			.map(|track| track.key_frame_count)
			.sum()
	}
}

/// One adaptation variant: the clips of a single rendition, in
/// presentation order.
#[derive(Clone, Debug)]
pub struct Sequence {
	pub index: u32,
	pub clips: Vec<Clip>,
}

impl Sequence {
	pub fn total_frame_count(&self) -> u32 {
		self.clips.iter().map(Clip::total_frame_count).sum()
	}
}

/// Everything parsed on behalf of one request: the sequences to mux, each
/// holding at least one track. Dropped when the response completes.
#[derive(Clone, Debug)]
pub struct MediaSet {
	pub kind: PresentationKind,
	pub sequences: Vec<Sequence>,

	/// End of the presentation is part of this set (always true for VOD).
	pub presentation_end: bool,
}

impl MediaSet {
	/// Builds a single-sequence, single-clip VOD set from parsed tracks.
	pub fn single_clip_vod(tracks: Vec<Track>) -> Result<Self> {
		if tracks.is_empty() {
			tracing::error!("no tracks matched the requested track set");
			return Err(Error::BadRequest("no tracks matched the request"));
		}

		Ok(Self {
			kind: PresentationKind::Vod,
			sequences: vec![Sequence {
				index: 0,
				clips: vec![Clip::new(tracks)],
			}],
			presentation_end: true,
		})
	}

	/// Presentation duration in milliseconds: the longest track wins.
	pub fn duration_millis(&self) -> u64 {
		self.tracks()
			.map(|track| track.duration_90k / 90)
			.max()
			.unwrap_or(0)
	}

	pub fn tracks(&self) -> impl Iterator<Item = &Track> {
		self.sequences
			.iter()
			.flat_map(|sequence| sequence.clips.iter())
			.flat_map(|clip| clip.tracks.iter())
	}
}
