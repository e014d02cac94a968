use crate::{Error, Result};

const ES_DESCR_TAG: u8 = 0x03;
const DEC_CONFIG_DESCR_TAG: u8 = 0x04;
const DEC_SPECIFIC_DESCR_TAG: u8 = 0x05;

/// Bytes skipped inside a decoder config descriptor before the nested
/// descriptors start: object type, stream type, buffer size, max and
/// average bitrate.
const DEC_CONFIG_FIXED_LEN: usize = 13;

/// Reads past the end yield zeros; the descriptor layout is self-limiting
/// and the final payload length is validated against what is left.
struct DescrReader<'a> {
	data: &'a [u8],
	pos: usize,
}

impl<'a> DescrReader<'a> {
	fn new(data: &'a [u8]) -> Self {
		Self { data, pos: 0 }
	}

	fn get_u8(&mut self) -> u8 {
		let value = self.data.get(self.pos).copied().unwrap_or(0);
		self.pos = (self.pos + 1).min(self.data.len());
		value
	}

	fn skip(&mut self, n: usize) {
		self.pos = (self.pos + n).min(self.data.len());
	}

	fn remaining(&self) -> usize {
		self.data.len() - self.pos
	}

	/// Variable-length descriptor length: 7 bits per byte, at most 4 bytes.
	fn get_len(&mut self) -> usize {
		let mut len = 0usize;
		for _ in 0..4 {
			let byte = self.get_u8();
			len = (len << 7) | usize::from(byte & 0x7f);
			if byte & 0x80 == 0 {
				break;
			}
		}
		len
	}

	fn get_descr(&mut self) -> (u8, usize) {
		let tag = self.get_u8();
		(tag, self.get_len())
	}
}

/// Extracts the `DecoderSpecificInfo` payload from an `esds` box body,
/// together with the stream's object type id.
pub(crate) fn parse_esds(data: &[u8]) -> Result<Option<(u8, &[u8])>> {
	let mut reader = DescrReader::new(data);
	reader.skip(4);

	let (tag, _len) = reader.get_descr();
	if tag == ES_DESCR_TAG {
		reader.skip(2);
		let flags = reader.get_u8();
		if flags & 0x80 != 0 {
			reader.skip(2);
		}
		if flags & 0x40 != 0 {
			let url_len = reader.get_u8();
			reader.skip(usize::from(url_len));
		}
		if flags & 0x20 != 0 {
			reader.skip(2);
		}
	} else {
		reader.skip(2);
	}

	let (tag, _len) = reader.get_descr();
	if tag != DEC_CONFIG_DESCR_TAG {
		return Ok(None);
	}

	let object_type_id = reader.get_u8();
	reader.skip(DEC_CONFIG_FIXED_LEN - 1);

	let (tag, len) = reader.get_descr();
	if tag != DEC_SPECIFIC_DESCR_TAG {
		return Ok(None);
	}

	if len > reader.remaining() {
		tracing::error!(len, remaining = reader.remaining(), "decoder specific info overflows esds");
		return Err(Error::BadData("decoder specific info overflows esds"));
	}

	Ok(Some((object_type_id, &data[reader.pos..reader.pos + len])))
}
