use bytes::BufMut;

/// Appends a 32-bit box header.
pub(crate) fn put_atom_header(buf: &mut impl BufMut, size: u64, name: &[u8; 4]) {
	buf.put_u32(size as u32);
	buf.put_slice(name);
}

pub(crate) fn put_u24(buf: &mut impl BufMut, value: u32) {
	buf.put_u8((value >> 16) as u8);
	buf.put_u8((value >> 8) as u8);
	buf.put_u8(value as u8);
}
