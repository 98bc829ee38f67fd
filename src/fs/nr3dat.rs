//! Reader for the `NR3.DAT` server configuration file.
//!
//! The file carries the network version, the application to run when a
//! station exits, the printer and logical-disk maps, and the boot table: for
//! each known 32-byte station signature, the binary file to push when that
//! station raises its initial call. It is read once at startup and treated
//! as immutable afterwards.

use core::fmt;
use core::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use log::{debug, info};
use thiserror::Error;

use crate::errors::NrError;
use crate::fs::ApplicationFile;

/// Length of a station signature in bytes.
pub const SIGNATURE_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("reading NR3.DAT failed: {0}")]
	Io(#[from] std::io::Error),
	#[error("truncated NR3.DAT")]
	Truncated,
	#[error("bad application file descriptor in NR3.DAT: {0}")]
	BadDescriptor(NrError),
	#[error("unable to find A folder in {0}")]
	MissingDriveA(PathBuf),
	#[error("NR3.DAT file not found in {0}")]
	NotFound(PathBuf),
}

/// The parsed `NR3.DAT` configuration.
#[derive(Debug, Clone)]
pub struct ConfigurationFile {
	pub version_major: u8,
	pub version_minor: u8,
	/// Application loaded when a station leaves the network software.
	pub exit_file: ApplicationFile,
	pub printers: [u8; 4],
	pub logical_disks: [u8; 10],
	pub listing_disk: u8,
	pub system_byte: u8,
	identifiers: HashMap<String, ApplicationFile>,
}

impl ConfigurationFile {
	/// Finds `NR3.DAT` under `<base>/A`, falling back to `<base>/B`. The
	/// `A` drive directory itself is mandatory.
	pub fn locate(base: &Path) -> Result<PathBuf, ConfigError> {
		let a_folder = base.join("A");
		if !a_folder.is_dir() {
			return Err(ConfigError::MissingDriveA(base.to_path_buf()));
		}
		let candidate = a_folder.join("NR3.DAT");
		if candidate.is_file() {
			return Ok(candidate);
		}
		let candidate = base.join("B").join("NR3.DAT");
		if candidate.is_file() {
			return Ok(candidate);
		}
		Err(ConfigError::NotFound(base.to_path_buf()))
	}

	/// Locates and parses the configuration of a server base directory.
	pub fn load(base: &Path) -> Result<Self, ConfigError> {
		let path = Self::locate(base)?;
		info!("found configuration file at {}", path.display());
		Self::parse(&fs::read(path)?)
	}

	pub fn parse(bytes: &[u8]) -> Result<Self, ConfigError> {
		fn take<'a>(
			bytes: &'a [u8],
			pos: &mut usize,
			len: usize,
		) -> Result<&'a [u8], ConfigError> {
			let slice = bytes
				.get(*pos..*pos + len)
				.ok_or(ConfigError::Truncated)?;
			*pos += len;
			Ok(slice)
		}

		let pos = &mut 0;
		let version_major = take(bytes, pos, 1)?[0];
		let version_minor = take(bytes, pos, 1)?[0];
		let exit_file =
			ApplicationFile::parse(take(bytes, pos, 9)?).map_err(ConfigError::BadDescriptor)?;
		let mut printers = [0; 4];
		printers.copy_from_slice(take(bytes, pos, 4)?);
		let mut logical_disks = [0; 10];
		logical_disks.copy_from_slice(take(bytes, pos, 10)?);
		let listing_disk = take(bytes, pos, 1)?[0];
		let system_byte = take(bytes, pos, 1)?[0];
		let id_count = take(bytes, pos, 1)?[0];
		debug!("configuration holds {id_count} identifiers");
		let mut identifiers = HashMap::new();
		for _ in 0..id_count {
			let key = signature_key(take(bytes, pos, SIGNATURE_LEN)?);
			let file = ApplicationFile::parse(take(bytes, pos, 12)?)
				.map_err(ConfigError::BadDescriptor)?;
			// Duplicate signatures: the last entry wins.
			identifiers.insert(key, file);
		}
		Ok(Self {
			version_major,
			version_minor,
			exit_file,
			printers,
			logical_disks,
			listing_disk,
			system_byte,
			identifiers,
		})
	}

	/// The `M.m` version string.
	pub fn version(&self) -> String {
		format!("{}.{}", self.version_major, self.version_minor)
	}

	/// Boot file registered for a station signature key.
	pub fn boot_file(&self, signature: &str) -> Option<&ApplicationFile> {
		self.identifiers.get(signature)
	}

	pub fn identifiers(&self) -> impl Iterator<Item = (&String, &ApplicationFile)> {
		self.identifiers.iter()
	}
}

impl fmt::Display for ConfigurationFile {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"configuration file v{} exit file: {}\nidentifiers:",
			self.version(),
			self.exit_file.file_name()
		)?;
		for (signature, file) in &self.identifiers {
			write!(f, "\n{signature} -> {file}")?;
		}
		Ok(())
	}
}

/// The registry key of a raw signature: its lowercase hex encoding.
pub fn signature_key(signature: &[u8]) -> String {
	let mut key = String::with_capacity(signature.len() * 2);
	for byte in signature {
		write!(key, "{byte:02x}").expect("writing to a string cannot fail");
	}
	key
}
