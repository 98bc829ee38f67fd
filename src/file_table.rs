//! The shared table of files held open by the stations.
//!
//! Entries are keyed by virtual location (drive letter plus 8.3 name) and
//! exist only while at least one station holds the file. The table enforces
//! the exclusion discipline of the network: a reservation shuts everyone
//! else out, writers exclude readers and other writers, and readers exclude
//! writers. Each live entry carries a logical number the slaves use to
//! refer to the file without resending its name.

use hashbrown::{HashMap, HashSet};
use log::debug;

use crate::errors::NrError;
use crate::fs::ApplicationFile;

/// Logical numbers are allocated in this inclusive range.
const LOGICAL_NUMBER_MAX: u8 = 255;

/// Book-keeping of one file currently used by the stations.
#[derive(Debug, Clone)]
pub struct FileMetadata {
	pub file: ApplicationFile,
	pub logical_number: u8,
	reserved_by: Option<u8>,
	open_write_by: Option<u8>,
	open_read_by: HashSet<u8>,
}

impl FileMetadata {
	fn new(file: ApplicationFile, logical_number: u8) -> Self {
		Self {
			file,
			logical_number,
			reserved_by: None,
			open_write_by: None,
			open_read_by: HashSet::new(),
		}
	}

	/// Registers a station as reader.
	pub fn add_reader(&mut self, station_id: u8) -> Result<(), NrError> {
		if self.is_reserved_by_other(station_id) {
			return Err(NrError::FileAlreadyReserved);
		}
		if let Some(writer) = self.open_write_by {
			if writer == station_id {
				return Err(NrError::FileAlreadyOpenForWrite);
			}
			return Err(NrError::FileAlreadyOpenForWriteOtherSta);
		}
		self.open_read_by.insert(station_id);
		Ok(())
	}

	/// Registers a station as the writer.
	pub fn add_writer(&mut self, station_id: u8) -> Result<(), NrError> {
		if self.is_reserved_by_other(station_id) {
			return Err(NrError::FileAlreadyReserved);
		}
		if !self.open_read_by.is_empty() {
			return Err(NrError::FileAlreadyOpenForRead);
		}
		if let Some(writer) = self.open_write_by {
			if writer == station_id {
				return Err(NrError::FileAlreadyOpenForWrite);
			}
			return Err(NrError::FileAlreadyOpenForWriteOtherSta);
		}
		self.open_write_by = Some(station_id);
		Ok(())
	}

	/// Reserves the file for exclusive use by a station.
	pub fn reserve(&mut self, station_id: u8) -> Result<(), NrError> {
		if self.is_reserved_by_other(station_id) {
			return Err(NrError::FileAlreadyReserved);
		}
		let open_by_other = self.open_write_by.is_some_and(|writer| writer != station_id)
			|| self.open_read_by.iter().any(|&reader| reader != station_id);
		if open_by_other {
			return Err(NrError::FileOpen);
		}
		self.reserved_by = Some(station_id);
		Ok(())
	}

	/// Drops every hold `station_id` has on the file. Returns whether any
	/// holder is left.
	fn release(&mut self, station_id: u8) -> bool {
		self.open_read_by.remove(&station_id);
		if self.open_write_by == Some(station_id) {
			self.open_write_by = None;
		}
		if self.reserved_by == Some(station_id) {
			self.reserved_by = None;
		}
		self.reserved_by.is_some()
			|| self.open_write_by.is_some()
			|| !self.open_read_by.is_empty()
	}

	fn is_reserved_by_other(&self, station_id: u8) -> bool {
		self.reserved_by.is_some_and(|owner| owner != station_id)
	}
}

/// The virtual-path keyed table of open files.
#[derive(Debug, Default)]
pub struct FileTable {
	entries: HashMap<String, FileMetadata>,
}

impl FileTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the entry of `file`, creating it with a fresh logical number
	/// when no station uses the file yet.
	pub fn get_or_create(&mut self, file: &ApplicationFile) -> Result<&mut FileMetadata, NrError> {
		let key = file.virtual_location();
		if !self.entries.contains_key(&key) {
			let logical_number = self.free_logical_number()?;
			debug!("tracking {key} as logical file {logical_number}");
			self.entries
				.insert(key.clone(), FileMetadata::new(file.clone(), logical_number));
		}
		Ok(self.entries.get_mut(&key).expect("entry was just inserted"))
	}

	/// Looks a live entry up by its logical number.
	pub fn by_logical_number(&mut self, logical_number: u8) -> Result<&mut FileMetadata, NrError> {
		self.entries
			.values_mut()
			.find(|entry| entry.logical_number == logical_number)
			.ok_or(NrError::BadLogicNumber)
	}

	/// Drops every hold of `station_id` on the file with this logical
	/// number and forgets the entry once nobody holds it anymore.
	pub fn close(&mut self, logical_number: u8, station_id: u8) -> Result<(), NrError> {
		let entry = self.by_logical_number(logical_number)?;
		let key = entry.file.virtual_location();
		if !entry.release(station_id) {
			debug!("dropping {key}, no holders left");
			self.entries.remove(&key);
		}
		Ok(())
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn contains(&self, file: &ApplicationFile) -> bool {
		self.entries.contains_key(&file.virtual_location())
	}

	/// The smallest logical number not in use, 1 to [`LOGICAL_NUMBER_MAX`].
	fn free_logical_number(&self) -> Result<u8, NrError> {
		(1..=LOGICAL_NUMBER_MAX)
			.find(|n| {
				!self
					.entries
					.values()
					.any(|entry| entry.logical_number == *n)
			})
			.ok_or(NrError::FileTableSaturated)
	}
}
