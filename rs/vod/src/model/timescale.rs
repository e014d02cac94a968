/// The timescale every parsed timestamp is normalized to.
pub const TIMESCALE_90K: u32 = 90_000;

/// The fixed HDS timescale (milliseconds).
pub const HDS_TIMESCALE: u32 = 1_000;

/// Rescales `time` from `cur_scale` ticks per second to `new_scale`,
/// rounding to the nearest tick.
pub fn rescale_time(time: u64, cur_scale: u32, new_scale: u32) -> u64 {
	(time * u64::from(new_scale) + u64::from(cur_scale) / 2) / u64::from(cur_scale)
}
