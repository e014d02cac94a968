use bytes::Bytes;

use crate::{Error, Result};

/// Random-access reads into the source files, served from a host-managed
/// block cache.
///
/// Slot ids partition cached ranges so concurrent cursors (one per media
/// type) never evict each other. Returned buffers are borrowed for the
/// duration of a single call.
pub trait ReadCache {
	/// Requests up to `want` bytes of file `file_index` at `offset`.
	///
	/// `Ok(Some(buf))` hands back the resident prefix of the range; it may
	/// be shorter than `want` but is never empty. `Ok(None)` means the
	/// range is not resident yet: the caller must flush pending output,
	/// yield [`Error::Again`] and retry the same read once the host
	/// re-enters the state machine.
	fn get(&mut self, slot: u32, file_index: u32, offset: u64, want: u32) -> Result<Option<&[u8]>>;
}

/// Serves reads straight out of a fully resident source buffer. Used by
/// offline packaging and tests; a server host provides its own cache.
pub struct SliceCache {
	data: Bytes,
}

impl SliceCache {
	pub fn new(data: Bytes) -> Self {
		Self { data }
	}
}

impl ReadCache for SliceCache {
	fn get(&mut self, _slot: u32, _file_index: u32, offset: u64, want: u32) -> Result<Option<&[u8]>> {
		let len = self.data.len() as u64;
		if offset >= len {
			tracing::error!(offset, len, "read past the end of the source");
			return Err(Error::BadData("read past the end of the source"));
		}

		let start = offset as usize;
		let end = start + (want as usize).min(self.data.len() - start);
		Ok(Some(&self.data[start..end]))
	}
}
