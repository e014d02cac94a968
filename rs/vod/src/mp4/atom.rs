use crate::{Error, Result};

/// A four character box type code.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
	pub const MOOV: FourCc = FourCc(*b"moov");
	pub const TRAK: FourCc = FourCc(*b"trak");
	pub const MDIA: FourCc = FourCc(*b"mdia");
	pub const MINF: FourCc = FourCc(*b"minf");
	pub const STBL: FourCc = FourCc(*b"stbl");
	pub const HDLR: FourCc = FourCc(*b"hdlr");
	pub const MDHD: FourCc = FourCc(*b"mdhd");
	pub const STCO: FourCc = FourCc(*b"stco");
	pub const CO64: FourCc = FourCc(*b"co64");
	pub const STSC: FourCc = FourCc(*b"stsc");
	pub const STSZ: FourCc = FourCc(*b"stsz");
	pub const STZ2: FourCc = FourCc(*b"stz2");
	pub const STTS: FourCc = FourCc(*b"stts");
	pub const CTTS: FourCc = FourCc(*b"ctts");
	pub const STSS: FourCc = FourCc(*b"stss");
	pub const STSD: FourCc = FourCc(*b"stsd");
	pub const AVCC: FourCc = FourCc(*b"avcC");
	pub const ESDS: FourCc = FourCc(*b"esds");
}

impl std::fmt::Debug for FourCc {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0.escape_ascii())
	}
}

impl std::fmt::Display for FourCc {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0.escape_ascii())
	}
}

pub const ATOM_HEADER_SIZE: u64 = 8;

/// One box encountered by the walker, header already consumed.
#[derive(Clone, Copy, Debug, Default)]
pub struct AtomInfo<'a> {
	pub name: FourCc,

	/// Byte offset of the body within the walked buffer.
	pub offset: usize,

	/// Declared body size. Exceeds `data.len()` only when walking an
	/// unvalidated file prefix whose trailing box is cut short.
	pub size: u64,

	/// The available body bytes.
	pub data: &'a [u8],
}

/// Iteratively walks the top-level boxes of `buffer`, handing each one to
/// `on_atom`. The callback returns `false` to stop the walk early.
///
/// A 32-bit size of 1 pulls a 64-bit extended size; a size of 0 extends
/// the box to the end of the container. With `validate_full` every box
/// body must fit inside `buffer`; without it the trailing box may be cut
/// short, which is what scanning a file prefix for `moov` needs.
pub fn walk_atoms<'a>(
	buffer: &'a [u8],
	validate_full: bool,
	on_atom: &mut dyn FnMut(AtomInfo<'a>) -> Result<bool>,
) -> Result<()> {
	let mut pos = 0usize;

	while buffer.len() - pos >= 8 {
		let mut size = u64::from(u32::from_be_bytes([
			buffer[pos],
			buffer[pos + 1],
			buffer[pos + 2],
			buffer[pos + 3],
		]));
		let name = FourCc([buffer[pos + 4], buffer[pos + 5], buffer[pos + 6], buffer[pos + 7]]);
		pos += 8;

		let header_size;
		if size == 1 {
			if buffer.len() - pos < 8 {
				tracing::error!(name = %name, "64-bit atom size with no room for it");
				return Err(Error::BadData("truncated 64-bit atom size"));
			}

			let bytes: [u8; 8] = buffer[pos..pos + 8].try_into().map_err(|_| Error::Unexpected("slice length"))?;
			size = u64::from_be_bytes(bytes);
			pos += 8;
			header_size = 16;
		} else {
			header_size = 8;
			if size == 0 {
				size = (buffer.len() - pos) as u64 + header_size;
			}
		}

		if size < header_size {
			tracing::error!(name = %name, size, header_size, "atom size smaller than its header");
			return Err(Error::BadData("atom size smaller than its header"));
		}

		let body = size - header_size;
		let remaining = (buffer.len() - pos) as u64;
		if validate_full && body > remaining {
			tracing::error!(name = %name, body, remaining, "atom overflows its container");
			return Err(Error::BadData("atom overflows its container"));
		}

		let take = body.min(remaining) as usize;
		let keep_going = on_atom(AtomInfo {
			name,
			offset: pos,
			size: body,
			data: &buffer[pos..pos + take],
		})?;
		if !keep_going {
			return Ok(());
		}

		if body > remaining {
			tracing::error!(name = %name, body, remaining, "atom overflows its container");
			return Err(Error::BadData("atom overflows its container"));
		}
		pos += body as usize;
	}

	Ok(())
}

/// Locates the `moov` box within a file prefix.
///
/// Returns the offset and declared size of the box body. The size may
/// extend past the prefix; the caller fetches the rest before parsing.
pub fn find_moov(buffer: &[u8]) -> Result<(u64, u64)> {
	let mut found = None;

	walk_atoms(buffer, false, &mut |atom| {
		if atom.name == FourCc::MOOV {
			found = Some((atom.offset as u64, atom.size));
			return Ok(false);
		}
		Ok(true)
	})?;

	match found {
		Some(moov) => Ok(moov),
		None => {
			tracing::error!("moov atom not found, source is not fast-start");
			Err(Error::BadData("moov atom not found"))
		}
	}
}

/// Atom slots collected from one `trak` box by the targeted descent.
#[derive(Clone, Copy, Debug)]
pub(crate) enum TrakSlot {
	Stco,
	Stsc,
	Stsz,
	Stts,
	Ctts,
	Stss,
	Stsd,
	Hdlr,
	Mdhd,
}

#[derive(Default)]
pub(crate) struct TrakAtoms<'a> {
	pub stco: AtomInfo<'a>,
	pub stsc: AtomInfo<'a>,
	pub stsz: AtomInfo<'a>,
	pub stts: AtomInfo<'a>,
	pub ctts: AtomInfo<'a>,
	pub stss: AtomInfo<'a>,
	pub stsd: AtomInfo<'a>,
	pub hdlr: AtomInfo<'a>,
	pub mdhd: AtomInfo<'a>,
}

impl<'a> TrakAtoms<'a> {
	fn slot_mut(&mut self, slot: TrakSlot) -> &mut AtomInfo<'a> {
		match slot {
			TrakSlot::Stco => &mut self.stco,
			TrakSlot::Stsc => &mut self.stsc,
			TrakSlot::Stsz => &mut self.stsz,
			TrakSlot::Stts => &mut self.stts,
			TrakSlot::Ctts => &mut self.ctts,
			TrakSlot::Stss => &mut self.stss,
			TrakSlot::Stsd => &mut self.stsd,
			TrakSlot::Hdlr => &mut self.hdlr,
			TrakSlot::Mdhd => &mut self.mdhd,
		}
	}
}

enum Target {
	Slot(TrakSlot),
	Children(&'static [RelevantAtom]),
}

/// One row of the targeted descent table: either capture this box into a
/// slot or recurse into its children with another table. One pass over the
/// trak collects exactly the boxes the parser needs.
struct RelevantAtom {
	name: FourCc,
	target: Target,
}

static RELEVANT_STBL: &[RelevantAtom] = &[
	RelevantAtom { name: FourCc::STCO, target: Target::Slot(TrakSlot::Stco) },
	RelevantAtom { name: FourCc::CO64, target: Target::Slot(TrakSlot::Stco) },
	RelevantAtom { name: FourCc::STSC, target: Target::Slot(TrakSlot::Stsc) },
	RelevantAtom { name: FourCc::STSZ, target: Target::Slot(TrakSlot::Stsz) },
	RelevantAtom { name: FourCc::STZ2, target: Target::Slot(TrakSlot::Stsz) },
	RelevantAtom { name: FourCc::STTS, target: Target::Slot(TrakSlot::Stts) },
	RelevantAtom { name: FourCc::CTTS, target: Target::Slot(TrakSlot::Ctts) },
	RelevantAtom { name: FourCc::STSS, target: Target::Slot(TrakSlot::Stss) },
	RelevantAtom { name: FourCc::STSD, target: Target::Slot(TrakSlot::Stsd) },
];

static RELEVANT_MINF: &[RelevantAtom] =
	&[RelevantAtom { name: FourCc::STBL, target: Target::Children(RELEVANT_STBL) }];

static RELEVANT_MDIA: &[RelevantAtom] = &[
	RelevantAtom { name: FourCc::MINF, target: Target::Children(RELEVANT_MINF) },
	RelevantAtom { name: FourCc::HDLR, target: Target::Slot(TrakSlot::Hdlr) },
	RelevantAtom { name: FourCc::MDHD, target: Target::Slot(TrakSlot::Mdhd) },
];

static RELEVANT_TRAK: &[RelevantAtom] =
	&[RelevantAtom { name: FourCc::MDIA, target: Target::Children(RELEVANT_MDIA) }];

/// Collects the parser-relevant atoms of one `trak` body in a single pass.
pub(crate) fn collect_trak_atoms<'a>(trak: &'a [u8]) -> Result<TrakAtoms<'a>> {
	let mut atoms = TrakAtoms::default();
	collect(trak, RELEVANT_TRAK, &mut atoms)?;
	Ok(atoms)
}

fn collect<'a>(buffer: &'a [u8], table: &'static [RelevantAtom], out: &mut TrakAtoms<'a>) -> Result<()> {
	walk_atoms(buffer, true, &mut |atom| {
		for row in table {
			if row.name != atom.name {
				continue;
			}

			match row.target {
				Target::Children(children) => collect(atom.data, children, out)?,
				Target::Slot(slot) => *out.slot_mut(slot) = atom,
			}
		}
		Ok(true)
	})
}
