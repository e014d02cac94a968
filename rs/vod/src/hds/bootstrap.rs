use bytes::{BufMut, Bytes, BytesMut};

use crate::model::{MediaSet, PresentationKind, rescale_time, HDS_TIMESCALE};
use crate::mp4::put_atom_header;
use crate::{Error, Result};

/// One run of equally long segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentDurationItem {
	pub segment_index: u32,

	/// Duration of each segment in the run, in `timescale` units.
	pub duration: u64,

	pub repeat_count: u32,
}

/// Run-length encoded segment durations of one presentation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentDurations {
	pub items: Vec<SegmentDurationItem>,
	pub segment_count: u32,
	pub start_time: u64,
	pub end_time: u64,
	pub timescale: u32,
}

/// Splits a VOD presentation into fixed segments; the last one takes the
/// remainder.
pub fn segment_durations(duration_millis: u64, segment_duration_ms: u32) -> SegmentDurations {
	let segment_duration = u64::from(segment_duration_ms.max(1));
	let full = duration_millis / segment_duration;
	let remainder = duration_millis % segment_duration;

	let mut items = Vec::new();
	if full > 0 {
		items.push(SegmentDurationItem {
			segment_index: 0,
			duration: segment_duration,
			repeat_count: full as u32,
		});
	}
	if remainder > 0 {
		items.push(SegmentDurationItem {
			segment_index: full as u32,
			duration: remainder,
			repeat_count: 1,
		});
	}

	SegmentDurations {
		items,
		segment_count: (full + u64::from(remainder > 0)) as u32,
		start_time: 0,
		end_time: duration_millis,
		timescale: HDS_TIMESCALE,
	}
}

const ABST_FIXED_BODY_SIZE: u64 = 35;
const ASRT_ATOM_SIZE: u64 = 8 + 9 + 8;
const AFRT_FIXED_SIZE: u64 = 8 + 13;
const AFRT_ENTRY_SIZE: u64 = 16;

/// abst + asrt + one fragment run table, without any afrt entries.
const ABST_BASE_ATOM_SIZE: u64 = 8 + ABST_FIXED_BODY_SIZE + ASRT_ATOM_SIZE + 1 + AFRT_FIXED_SIZE;

pub fn abst_atom_size(set: &MediaSet, durations: &SegmentDurations) -> u64 {
	let mut fragment_run_entries = u64::from(durations.items.len() as u32);
	let mut size = ABST_BASE_ATOM_SIZE;
	if set.presentation_end {
		fragment_run_entries += 1; // zero sentinel
		size += 1; // discontinuity indicator
	}

	size + fragment_run_entries * AFRT_ENTRY_SIZE
}

/// Writes the HDS bootstrap box: a single segment run covering every
/// fragment, plus one fragment run entry per segment-duration item.
pub fn write_abst(buf: &mut BytesMut, set: &MediaSet, durations: &SegmentDurations) {
	let mut fragment_run_entries = durations.items.len() as u32;
	let mut afrt_atom_size = AFRT_FIXED_SIZE;
	if set.presentation_end {
		fragment_run_entries += 1;
		afrt_atom_size += 1;
	}
	afrt_atom_size += u64::from(fragment_run_entries) * AFRT_ENTRY_SIZE;

	// abst
	put_atom_header(buf, abst_atom_size(set, durations), b"abst");
	buf.put_u32(0); // version + flags
	buf.put_u32(1); // bootstrap info version
	buf.put_u8(if set.kind == PresentationKind::Live { 0x20 } else { 0 });
	buf.put_u32(HDS_TIMESCALE);
	buf.put_u64(durations.end_time); // current media time
	buf.put_u64(0); // smpte offset
	buf.put_u8(0); // movie identifier
	buf.put_u8(0); // server entries
	buf.put_u8(0); // quality entries
	buf.put_u8(0); // drm data
	buf.put_u8(0); // metadata
	buf.put_u8(1); // segment run table count

	// abst.asrt
	put_atom_header(buf, ASRT_ATOM_SIZE, b"asrt");
	buf.put_u32(0); // version + flags
	buf.put_u8(0); // quality entries
	buf.put_u32(1); // segment run entries
	buf.put_u32(1); // first segment
	buf.put_u32(durations.segment_count); // fragments per segment

	buf.put_u8(1); // fragment run table count

	// abst.afrt
	put_atom_header(buf, afrt_atom_size, b"afrt");
	buf.put_u32(0); // version + flags
	buf.put_u32(HDS_TIMESCALE);
	buf.put_u8(0); // quality entries
	buf.put_u32(fragment_run_entries);

	let mut start_offset: u64 = 0;
	for item in &durations.items {
		let timestamp = durations.start_time + rescale_time(start_offset, durations.timescale, HDS_TIMESCALE);
		let duration = rescale_time(item.duration, durations.timescale, HDS_TIMESCALE);

		buf.put_u32(item.segment_index + 1); // first fragment
		buf.put_u64(timestamp);
		buf.put_u32(duration as u32);
		start_offset += item.duration * u64::from(item.repeat_count);
	}

	if set.presentation_end {
		buf.put_u32(0);
		buf.put_u64(0);
		buf.put_u32(0);
		buf.put_u8(0); // discontinuity indicator: end of presentation
	}
}

/// Builds the standalone bootstrap response for one media set.
pub fn build_bootstrap(set: &MediaSet, segment_duration_ms: u32) -> Result<Bytes> {
	let durations = segment_durations(set.duration_millis(), segment_duration_ms);
	let expected = abst_atom_size(set, &durations);

	let mut buf = BytesMut::with_capacity(expected as usize);
	write_abst(&mut buf, set, &durations);

	if buf.len() as u64 != expected {
		tracing::error!(written = buf.len(), expected, "bootstrap size accounting mismatch");
		return Err(Error::Unexpected("bootstrap size mismatch"));
	}

	Ok(buf.freeze())
}
