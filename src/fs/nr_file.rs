//! Reader for Nanoréseau application files (`*NRUSTL*` header).
//!
//! Every file served to the stations starts with a 128-byte header carrying
//! the network metadata: type, binary/ASCII mode, MS-DOS compatible length,
//! status, version, dates and 48 application bytes. Machine-language binary
//! files continue with a record stream describing where each code chunk
//! loads (address and optional memory page) and where execution starts; all
//! other types carry their payload raw.

use core::fmt;
use std::fs;
use std::path::Path;

use log::{debug, warn};
use num_enum::TryFromPrimitive;
use thiserror::Error;
use time::{Date, Month};

#[derive(Debug, Error)]
pub enum FileFormatError {
	#[error("reading file failed: {0}")]
	Io(#[from] std::io::Error),
	#[error("not a nanoreseau file (bad header)")]
	BadMagic,
	#[error("bad nanoreseau file (at offset {0})")]
	BadAnchor(usize),
	#[error("truncated nanoreseau file")]
	Truncated,
	#[error("file carries no binary record stream")]
	NotBinary,
}

/// Record tags of the binary body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
enum RecordTag {
	SimpleCode = 0x00,
	Extended = 0x01,
	ExtendedCode = 0x02,
	ExtendedExecAddr = 0x03,
	SimpleExecAddr = 0xFF,
}

/// A chunk of machine code qualified by its load address and page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryCode {
	pub address: u16,
	/// Memory page, `None` for simple records.
	pub page: Option<u8>,
	pub data: Vec<u8>,
}

impl fmt::Display for BinaryCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "binary code of {} bytes at ${:04x}", self.data.len(), self.address)?;
		match self.page {
			Some(0) => write!(f, " (no page change)"),
			Some(page) => write!(f, " on page {}", page & !0x80),
			None => Ok(()),
		}
	}
}

/// The parsed record stream of a machine-language binary file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryData {
	pub machine_type: Option<u8>,
	pub code_language: Option<u8>,
	pub loading_byte: Option<u8>,
	pub app_name: Option<String>,
	pub segments: Vec<BinaryCode>,
	pub exec_address: Option<u16>,
	pub exec_page: Option<u8>,
}

impl fmt::Display for BinaryData {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.app_name {
			Some(name) => write!(f, "binary (extended) application {name}")?,
			None => write!(f, "binary (simple)")?,
		}
		if let Some(addr) = self.exec_address {
			write!(f, " starting at ${addr:04x}")?;
		}
		match self.exec_page {
			Some(0) => write!(f, " (no page change)")?,
			Some(page) => write!(f, " on page {}", page & !0x80)?,
			None => {}
		}
		for segment in &self.segments {
			write!(f, "\n{segment}")?;
		}
		Ok(())
	}
}

/// A Nanoréseau file as stored on a server disk.
#[derive(Debug, Clone)]
pub struct NanoreseauFile {
	/// Identifier of the peer that created the file.
	pub creator: String,
	/// File type: BASIC program or data, machine language, source, indexed.
	pub kind: u8,
	/// 0 for binary, 0xFF for ASCII.
	pub mode: u8,
	/// File length recorded for MS-DOS compatibility.
	pub ms_dos_len: u32,
	/// 0 read/write, 0xFF read-only.
	pub status: u8,
	pub version_major: u8,
	pub version_minor: u8,
	pub created: Option<Date>,
	pub modified: Option<Date>,
	/// Computer the file was created on (0 TO7, 1 MO5, 2 TO7/70).
	pub created_on: u8,
	/// Language the file was created with (0 n.c., 1 BASIC, 2 LOGO, 3 LSE).
	pub creation_language: u8,
	pub app_bytes: [u8; 48],
	/// Raw body following the header.
	pub payload: Vec<u8>,
}

impl NanoreseauFile {
	pub const TYPE_BASIC_PROGRAM: u8 = 0;
	pub const TYPE_BASIC_DATA: u8 = 1;
	pub const TYPE_MACHINE: u8 = 2;
	pub const TYPE_SOURCE: u8 = 3;
	pub const TYPE_INDEXED: u8 = 5;

	pub const MODE_BINARY: u8 = 0;
	pub const MODE_ASCII: u8 = 0xFF;

	pub const STATUS_RW: u8 = 0;
	pub const STATUS_RO: u8 = 0xFF;

	const MAGIC: &'static [u8; 8] = b"*NRUSTL*";

	pub fn open(path: &Path) -> Result<Self, FileFormatError> {
		Self::parse(&fs::read(path)?)
	}

	pub fn parse(bytes: &[u8]) -> Result<Self, FileFormatError> {
		let mut reader = Reader::new(bytes);
		if reader.take(8)? != Self::MAGIC {
			return Err(FileFormatError::BadMagic);
		}
		let creator = ascii(reader.take(8)?);
		if reader.u8()? != 0x01 {
			return Err(FileFormatError::BadAnchor(16));
		}
		let kind = reader.u8()?;
		let mode = reader.u8()?;
		let ms_dos_len = reader.u24_le()?;
		if reader.u8()? != 0x00 {
			return Err(FileFormatError::BadAnchor(22));
		}
		let status = reader.u8()?;
		let version_major = reader.u8()?;
		let version_minor = reader.u8()?;
		let created = parse_date(reader.take(3)?);
		let modified = parse_date(reader.take(3)?);
		let created_on = reader.u8()?;
		let creation_language = reader.u8()?;
		reader.take(46)?;
		let mut app_bytes = [0; 48];
		app_bytes.copy_from_slice(reader.take(48)?);
		Ok(Self {
			creator,
			kind,
			mode,
			ms_dos_len,
			status,
			version_major,
			version_minor,
			created,
			modified,
			created_on,
			creation_language,
			app_bytes,
			payload: reader.rest().to_vec(),
		})
	}

	pub fn is_machine_binary(&self) -> bool {
		self.kind == Self::TYPE_MACHINE && self.mode == Self::MODE_BINARY
	}

	/// Parses the record stream of a machine-language binary file into
	/// address-qualified code chunks and the execution address.
	pub fn binary_data(&self) -> Result<BinaryData, FileFormatError> {
		if !self.is_machine_binary() {
			return Err(FileFormatError::NotBinary);
		}
		let mut reader = Reader::new(&self.payload);
		let mut data = BinaryData::default();
		while let Ok(tag) = reader.u8() {
			match RecordTag::try_from(tag) {
				Ok(RecordTag::SimpleCode) => {
					let len = reader.u16_be()?;
					let address = reader.u16_be()?;
					data.segments.push(BinaryCode {
						address,
						page: None,
						data: reader.take(usize::from(len))?.to_vec(),
					});
				}
				Ok(RecordTag::SimpleExecAddr) => {
					reader.take(2)?;
					data.exec_address = Some(reader.u16_be()?);
					break;
				}
				Ok(RecordTag::Extended) => {
					data.machine_type = Some(reader.u8()?);
					data.code_language = Some(reader.u8()?);
					data.loading_byte = Some(reader.u8()?);
					reader.u16_be()?;
					data.app_name = Some(ascii(reader.take(32)?));
				}
				Ok(RecordTag::ExtendedCode) => {
					let len = reader.u16_be()?;
					let address = reader.u16_be()?;
					let page = reader.u8()?;
					data.segments.push(BinaryCode {
						address,
						page: Some(page),
						data: reader.take(usize::from(len))?.to_vec(),
					});
				}
				Ok(RecordTag::ExtendedExecAddr) => {
					if reader.u16_be()? != 0 {
						warn!("null bytes expected in execution address record");
					}
					data.exec_address = Some(reader.u16_be()?);
					data.exec_page = Some(reader.u8()?);
					break;
				}
				Err(_) => {
					debug!("unknown binary record tag {tag:#04x}, stopping");
					break;
				}
			}
		}
		Ok(data)
	}

	pub fn type_name(&self) -> &'static str {
		match self.kind {
			Self::TYPE_BASIC_PROGRAM => "BASIC program",
			Self::TYPE_BASIC_DATA => "BASIC data",
			Self::TYPE_MACHINE => "machine code",
			Self::TYPE_SOURCE => "source",
			Self::TYPE_INDEXED => "indexed file",
			_ => "unknown",
		}
	}

	pub fn status_name(&self) -> &'static str {
		match self.status {
			Self::STATUS_RW => "read/write",
			Self::STATUS_RO => "read-only",
			_ => "unknown",
		}
	}
}

impl fmt::Display for NanoreseauFile {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"file ID {} v{}.{}",
			self.creator, self.version_major, self.version_minor
		)?;
		if let Some(created) = self.created {
			write!(f, " of {created}")?;
		}
		if let Some(modified) = self.modified {
			write!(f, ", modified {modified}")?;
		}
		write!(
			f,
			", {} ({}), {} bytes",
			self.type_name(),
			self.status_name(),
			self.ms_dos_len,
		)
	}
}

/// Decodes a 3-byte yy/mm/dd date. Years below 80 are in the 2000s, a zero
/// month or day means no date was recorded.
fn parse_date(bytes: &[u8]) -> Option<Date> {
	let year = if bytes[0] < 80 {
		2000 + i32::from(bytes[0])
	} else {
		1900 + i32::from(bytes[0])
	};
	if bytes[1] == 0 || bytes[2] == 0 {
		return None;
	}
	let month = Month::try_from(bytes[1]).ok()?;
	Date::from_calendar_date(year, month, bytes[2]).ok()
}

fn ascii(bytes: &[u8]) -> String {
	bytes
		.iter()
		.map(|&b| if b.is_ascii() { char::from(b) } else { '?' })
		.collect::<String>()
		.trim_end_matches([' ', '\0'])
		.to_string()
}

struct Reader<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	fn new(buf: &'a [u8]) -> Self {
		Self { buf, pos: 0 }
	}

	fn take(&mut self, len: usize) -> Result<&'a [u8], FileFormatError> {
		let end = self.pos.checked_add(len).ok_or(FileFormatError::Truncated)?;
		let slice = self.buf.get(self.pos..end).ok_or(FileFormatError::Truncated)?;
		self.pos = end;
		Ok(slice)
	}

	fn u8(&mut self) -> Result<u8, FileFormatError> {
		Ok(self.take(1)?[0])
	}

	fn u16_be(&mut self) -> Result<u16, FileFormatError> {
		let bytes = self.take(2)?;
		Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
	}

	fn u24_le(&mut self) -> Result<u32, FileFormatError> {
		let bytes = self.take(3)?;
		Ok(u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16)
	}

	fn rest(&self) -> &'a [u8] {
		&self.buf[self.pos..]
	}
}
