//! Host-side filesystem conventions of the server.
//!
//! A server "disk" is a sub-directory of the base path named after its drive
//! letter (`A`, `B`, …). File names follow the 8.3 convention,
//! space-padded and case-insensitive. This module carries the descriptor
//! type shared by consignes and NR3.DAT, directory scanning for the catalog
//! handlers, and the drive helpers.

pub mod nr3dat;
pub mod nr_file;

use core::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;
use time::{Date, OffsetDateTime};

use crate::errors::NrError;

/// Number of logical drives a server can expose, `A` through `J`.
pub const DRIVE_COUNT: usize = 10;

/// Length of an 8.3 catalog record: name, extension, 24-bit size and the
/// modification date.
pub const CATALOG_RECORD_LEN: usize = 8 + 3 + 3 + 3;

/// Pads `name` with trailing spaces up to `len` characters.
pub fn pad_name(name: &str, len: usize) -> String {
	let mut padded = String::from(name);
	while padded.len() < len {
		padded.push(' ');
	}
	padded
}

/// The drive letter of a zero-based drive index.
pub fn drive_letter(index: u8) -> char {
	char::from(b'A' + index)
}

/// Which drive directories exist under `base`.
pub fn available_drives(base: &Path) -> [bool; DRIVE_COUNT] {
	core::array::from_fn(|i| base.join(drive_letter(i as u8).to_string()).is_dir())
}

/// Bit mask of the existing drives, drive `A` at bit 0.
pub fn drive_mask(base: &Path) -> u16 {
	available_drives(base)
		.iter()
		.enumerate()
		.filter(|(_, exists)| **exists)
		.fold(0, |mask, (i, _)| mask | 1 << i)
}

/// A file reference as the stations describe it: a drive and an 8.3 name.
///
/// The wire form is a drive index byte (`0x40 + index` gives the letter),
/// a space-padded name and a space-padded 3-byte extension. NR3.DAT uses a
/// 9-byte variant with a 5-character name, consignes the full 12-byte one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationFile {
	pub drive: char,
	pub name: String,
	pub extension: String,
}

impl ApplicationFile {
	/// Parses a descriptor of any size: drive byte, name, then a 3-byte
	/// extension.
	pub fn parse(data: &[u8]) -> Result<Self, NrError> {
		if data.len() < 4 {
			return Err(NrError::FileNameSyntaxError);
		}
		if data[0] > 26 {
			return Err(NrError::FileNameSyntaxError);
		}
		let drive = char::from(0x40 + data[0]);
		let name = field(&data[1..data.len() - 3])?;
		let extension = field(&data[data.len() - 3..])?;
		if name.is_empty() {
			return Err(NrError::FileNameSyntaxError);
		}
		Ok(Self {
			drive,
			name,
			extension,
		})
	}

	/// The host file name, `NAME.EXT`.
	pub fn file_name(&self) -> String {
		format!("{}.{}", self.name, self.extension)
	}

	/// Key of the file in the server-wide file table.
	pub fn virtual_location(&self) -> String {
		format!("{}:{}", self.drive, self.file_name())
	}

	/// The space-padded `NAMENAME.EXT` form used for catalog matching.
	pub fn padded_8_3(&self) -> String {
		format!("{}.{}", pad_name(&self.name, 8), pad_name(&self.extension, 3))
	}

	/// Where the file lives under the server base directory.
	pub fn host_path(&self, base: &Path) -> PathBuf {
		base.join(self.drive.to_string()).join(self.file_name())
	}
}

impl fmt::Display for ApplicationFile {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.drive, self.file_name())
	}
}

fn field(data: &[u8]) -> Result<String, NrError> {
	if !data.iter().all(|b| b.is_ascii() && !b.is_ascii_control()) {
		return Err(NrError::FileNameSyntaxError);
	}
	let text: String = data.iter().map(|&b| char::from(b)).collect();
	Ok(text.trim_end_matches(' ').to_string())
}

/// One directory entry kept for an in-progress catalog session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
	pub name: String,
	pub extension: String,
	pub size: u64,
	pub modified: Option<Date>,
	pub is_dir: bool,
}

impl CatalogEntry {
	/// Encodes the entry as a catalog record: padded name and extension,
	/// 24-bit big-endian size, then day, month and two-digit year of the
	/// modification date. Sub-catalogs set bit 7 of the first name byte.
	pub fn to_record(&self) -> [u8; CATALOG_RECORD_LEN] {
		let mut record = [b' '; CATALOG_RECORD_LEN];
		for (slot, byte) in record[..8].iter_mut().zip(self.name.bytes()) {
			*slot = byte;
		}
		for (slot, byte) in record[8..11].iter_mut().zip(self.extension.bytes()) {
			*slot = byte;
		}
		record[11] = (self.size >> 16) as u8;
		record[12] = (self.size >> 8) as u8;
		record[13] = self.size as u8;
		let (day, month, year) = match self.modified {
			Some(date) => (date.day(), u8::from(date.month()), (date.year() % 100) as u8),
			None => (0, 0, 0),
		};
		record[14] = day;
		record[15] = month;
		record[16] = year;
		if self.is_dir {
			record[0] |= 0x80;
		}
		record
	}
}

/// Lists the entries of a drive directory matching an 8.3 filter, where
/// `?` stands for one letter, digit or space. Matching is case-insensitive
/// over the space-padded names; entries come back sorted by name.
pub fn scan_catalog(base: &Path, filter: &ApplicationFile) -> Result<Vec<CatalogEntry>, NrError> {
	let pattern = filter_regex(&filter.padded_8_3());
	let dir = base.join(filter.drive.to_string());
	let mut listing = Vec::new();
	let entries = fs::read_dir(&dir).map_err(|_| NrError::BadDisk)?;
	for entry in entries {
		let Ok(entry) = entry else { continue };
		let file_name = entry.file_name();
		let raw_name = file_name.to_string_lossy();
		let (name, extension) = match raw_name.rsplit_once('.') {
			Some((stem, ext)) => (stem.to_string(), ext.to_string()),
			None => (raw_name.to_string(), String::new()),
		};
		let padded = if extension.is_empty() {
			pad_name(&name, 8)
		} else {
			format!("{}.{}", pad_name(&name, 8), pad_name(&extension, 3))
		};
		if !pattern.is_match(&padded) {
			continue;
		}
		let Ok(metadata) = entry.metadata() else {
			debug!("skipping unreadable catalog entry {raw_name}");
			continue;
		};
		let modified = metadata
			.modified()
			.ok()
			.map(|stamp| OffsetDateTime::from(stamp).date());
		listing.push(CatalogEntry {
			name,
			extension,
			size: metadata.len(),
			modified,
			is_dir: metadata.is_dir(),
		});
	}
	listing.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.extension.cmp(&b.extension)));
	Ok(listing)
}

/// Builds the anchored, case-insensitive regex of an 8.3 filter.
fn filter_regex(padded_filter: &str) -> Regex {
	let mut pattern = String::from("(?i)^");
	for c in padded_filter.chars() {
		if c == '?' {
			pattern.push_str("[A-Za-z0-9 ]");
		} else {
			pattern.push_str(&regex::escape(&c.to_string()));
		}
	}
	pattern.push('$');
	// The pattern only ever contains escaped literals and one fixed class.
	Regex::new(&pattern).unwrap()
}
