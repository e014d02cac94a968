use serde::{Deserialize, Serialize};

use crate::cenc::DrmInfo;

/// Per-location packager configuration.
///
/// Parsing the host configuration format is the embedding's concern; the
/// core only consumes the finished struct.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PackagerConfig {
	/// Target duration of each output segment, in milliseconds.
	pub segment_duration_ms: u32,

	/// URL prefix of fragment files in generated manifests.
	pub fragment_file_name_prefix: String,

	/// URL prefix of bootstrap files in generated manifests.
	pub bootstrap_file_name_prefix: String,

	/// Emit absolute rather than relative URLs in manifests.
	pub absolute_manifest_urls: bool,

	/// Prepared DRM material; `None` leaves segments in the clear.
	pub encryption: Option<DrmInfo>,
}

impl Default for PackagerConfig {
	fn default() -> Self {
		Self {
			segment_duration_ms: 10_000,
			fragment_file_name_prefix: "frag".to_string(),
			bootstrap_file_name_prefix: "bootstrap".to_string(),
			absolute_manifest_urls: false,
			encryption: None,
		}
	}
}
