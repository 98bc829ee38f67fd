//! The command semantics behind the dispatcher: station bootstrap, file
//! access, catalog listing and the small informational requests.
//!
//! Handlers translate domain failures into a compte-rendu carrying the
//! error code and finish their exchange by disconnecting the peer. Only
//! transport failures bubble up, the dispatcher then forces the disconnect.

use log::{error, info, warn};
use time::OffsetDateTime;

use super::{Bus, OS_TYPE, STACK_SAVE_CODE, Server, TaskError, VERSION_MAJOR, VERSION_MINOR};
use crate::consigne::Consigne;
use crate::drivers::error::DeviceError;
use crate::errors::NrError;
use crate::fs::nr3dat::{SIGNATURE_LEN, signature_key};
use crate::fs::nr_file::NanoreseauFile;
use crate::fs::{ApplicationFile, CATALOG_RECORD_LEN, available_drives, pad_name, scan_catalog};

/// Initial call of a booting station: looks its signature up in the boot
/// registry and, on a hit, pushes the registered binary and jumps into it.
pub(crate) fn init_call<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	if let Some(station) = server.stations.get_mut(station_id) {
		// A booting slave starts from a clean session.
		station.clean();
	}
	let Some(signature) = consigne.ctx_data.get(..SIGNATURE_LEN) else {
		warn!("initial call from station {station_id} carries no signature");
		return server.disconnect_station(station_id);
	};
	let key = signature_key(signature);
	info!("looking for signature {key}");
	let Some(boot_file) = server.config.boot_file(&key).cloned() else {
		info!("station identifier {key} not found in configuration file");
		return server.disconnect_station(station_id);
	};
	server.send_execute_code(station_id, &STACK_SAVE_CODE, false)?;
	let binary = match server.send_binary_file(&boot_file, station_id) {
		Ok(binary) => binary,
		Err(TaskError::Device(err)) => return Err(err),
		Err(TaskError::File(err)) => {
			error!("bootstrap of station {station_id} failed: {err}");
			return server.disconnect_station(station_id);
		}
	};
	let Some(exec_address) = binary.exec_address else {
		error!("{boot_file} has no execution address");
		return server.disconnect_station(station_id);
	};
	server.send_jump(station_id, exec_address)?;
	server.disconnect_station(station_id)
}

/// CHBIN: loads a binary file named by the station and jumps into it.
pub(crate) fn chbin<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	match load_binary(server, consigne, station_id) {
		Ok((exec_address, exec_page)) => {
			let mut report = [0u8; 4];
			report[1..3].copy_from_slice(&exec_address.to_be_bytes());
			report[3] = exec_page;
			server.send_report(&report, station_id, true)?;
			server.send_jump(station_id, exec_address)?;
		}
		Err(TaskError::Device(err)) => return Err(err),
		Err(TaskError::File(err)) => {
			info!("CHBIN failed with error {err}");
			server.send_report(&[err.code(), 0, 0, 0], station_id, true)?;
		}
	}
	server.disconnect_station(station_id)
}

fn load_binary<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(u16, u8), TaskError> {
	let descriptor = consigne
		.ctx_data
		.get(..12)
		.ok_or(NrError::FileNameSyntaxError)?;
	let file = ApplicationFile::parse(descriptor)?;
	let mode = consigne.ctx_data.get(12).copied().unwrap_or(0);
	info!("CHBIN request from {station_id}: {file} mode: {mode}");
	let binary = server.send_binary_file(&file, station_id)?;
	info!("CHBIN loaded file {file}");
	let exec_address = binary.exec_address.ok_or_else(|| {
		error!("{file} has no execution address");
		NrError::BinaryFileLoadError
	})?;
	Ok((exec_address, binary.exec_page.unwrap_or(0)))
}

/// CLEAR: resets the station's identifier and catalog session.
pub(crate) fn clear<D: Bus>(
	server: &mut Server<D>,
	_consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	if let Some(station) = server.stations.get_mut(station_id) {
		station.clean();
	}
	server.send_report(&[0], station_id, false)?;
	info!("CLEAR executed on station {station_id}");
	server.disconnect_station(station_id)
}

/// SYSINF: version, operating system type and the available disk mask.
pub(crate) fn sysinf<D: Bus>(
	server: &mut Server<D>,
	_consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	let mask = crate::fs::drive_mask(&server.base_path).to_be_bytes();
	let report = [0, VERSION_MAJOR, VERSION_MINOR, OS_TYPE, mask[0], mask[1], 0];
	server.send_report(&report, station_id, false)?;
	info!("SYSINF executed on station {station_id}");
	server.disconnect_station(station_id)
}

/// CATP: starts a catalog session from an 8.3 filter and sends its first
/// chunk.
pub(crate) fn catp<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	let listing = consigne
		.ctx_data
		.get(..12)
		.ok_or(NrError::FileNameSyntaxError)
		.and_then(ApplicationFile::parse)
		.and_then(|filter| {
			info!(
				"CATP request from {station_id}: using filter {}",
				filter.padded_8_3()
			);
			scan_catalog(&server.base_path, &filter)
		});
	match listing {
		Ok(listing) => {
			if let Some(station) = server.stations.get_mut(station_id) {
				station.catalog = listing;
				station.catalog_cursor = 0;
			}
			send_catalog(server, consigne, station_id)
		}
		Err(err) => {
			info!("CATP failed with error {err}");
			let report = [err.code(), 0, 0, catalog_os_type()];
			server.send_report(&report, station_id, true)?;
			server.disconnect_station(station_id)
		}
	}
}

/// CATS: sends the next chunk of the running catalog session.
pub(crate) fn cats<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	send_catalog(server, consigne, station_id)
}

/// Emits as many catalog records as the station's receive buffer holds,
/// then reports the count. The final chunk of a session carries
/// `END_OF_CATALOG`.
fn send_catalog<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	let msg_len = usize::from(consigne.msg_len);
	let mut error = 0u8;
	let mut count = 0usize;
	let mut buffer = Vec::new();
	if let Some(station) = server.stations.get_mut(station_id) {
		if msg_len < CATALOG_RECORD_LEN {
			error = NrError::RxBufferTooSmall.code();
		} else if station.catalog.is_empty() {
			error = NrError::FileNotExisting.code();
		} else {
			let capacity = msg_len / CATALOG_RECORD_LEN;
			count = (station.catalog.len() - station.catalog_cursor).min(capacity);
			let chunk = station.catalog_cursor..station.catalog_cursor + count;
			for entry in &station.catalog[chunk] {
				buffer.extend_from_slice(&entry.to_record());
			}
			station.catalog_cursor += count;
			if station.catalog_cursor == station.catalog.len() {
				error = NrError::EndOfCatalog.code();
			}
		}
	}
	if !buffer.is_empty() {
		server
			.device
			.send_data(consigne.msg_addr, 0, &buffer, station_id)?;
	}
	let report = [error, (count >> 8) as u8, count as u8, catalog_os_type()];
	server.send_report(&report, station_id, true)?;
	server.disconnect_station(station_id)
}

fn catalog_os_type() -> u8 {
	u8::from(OS_TYPE == 2)
}

/// DATE: the wall clock, down to a tenths byte that historical servers
/// always left at zero.
pub(crate) fn date<D: Bus>(
	server: &mut Server<D>,
	_consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	info!("DATE request from {station_id}");
	let report = encode_date(&local_now());
	server.send_report(&report, station_id, false)?;
	server.disconnect_station(station_id)
}

fn local_now() -> OffsetDateTime {
	OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn encode_date(now: &OffsetDateTime) -> [u8; 8] {
	[
		0,
		now.day(),
		now.month().into(),
		(now.year() % 100) as u8,
		now.hour(),
		now.minute(),
		now.second(),
		0,
	]
}

/// DSKF: free space on a drive. The reply saturates the 16-bit field.
pub(crate) fn dskf<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	let drives = available_drives(&server.base_path);
	let disk = consigne.ctx_data.first().copied().unwrap_or(0);
	info!("DSKF request from {station_id}: getting free space on drive {disk}");
	let exists = usize::from(disk) < drives.len() && drives[usize::from(disk)];
	let error = if exists { 0 } else { NrError::BadDisk.code() };
	server.send_report(&[error, 0xFF, 0xFF], station_id, false)?;
	server.disconnect_station(station_id)
}

/// ID: registers the 8-character identifier of a station, refusing
/// identifiers already held by another one.
pub(crate) fn id<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	let len = consigne.ctx_data.len().min(8);
	let text: String = consigne.ctx_data[..len].iter().map(|&b| char::from(b)).collect();
	let identifier = pad_name(&text, 8);
	info!("ID request from {station_id}: new ID: {identifier:?}");
	let error = if server.stations.identifier_in_use(&identifier, station_id) {
		NrError::DuplicateId.code()
	} else {
		if let Some(station) = server.stations.get_mut(station_id) {
			station.identifier = identifier;
		}
		0
	};
	server.send_report(&[error], station_id, true)?;
	server.disconnect_station(station_id)
}

/// OUVFL: opens a file for reading.
pub(crate) fn ouvfl<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	open_file(server, consigne, station_id, false)
}

/// OUVFE: opens a file for writing. Writes themselves are not supported,
/// but the open takes the lock so the exclusion rules hold.
pub(crate) fn ouvfe<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	open_file(server, consigne, station_id, true)
}

fn open_file<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
	write: bool,
) -> Result<(), DeviceError> {
	let name = if write { "OUVFE" } else { "OUVFL" };
	let report = match try_open(server, consigne, station_id, write) {
		Ok(report) => report,
		Err(err) => {
			info!("{name} failed with error {err}");
			[err.code(), 0, 0, 0, 0, 0, 0]
		}
	};
	server.send_report(&report, station_id, true)?;
	server.disconnect_station(station_id)
}

fn try_open<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
	write: bool,
) -> Result<[u8; 7], NrError> {
	let descriptor = consigne
		.ctx_data
		.get(..12)
		.ok_or(NrError::FileNameSyntaxError)?;
	let app_file = ApplicationFile::parse(descriptor)?;
	info!(
		"{} request from {station_id} file: {app_file}",
		if write { "OUVFE" } else { "OUVFL" }
	);
	let path = app_file.host_path(&server.base_path);
	if !path.is_file() {
		info!("file {app_file} does not exist or is not a file");
		return Err(NrError::FileNotExisting);
	}
	let existed = server.files.contains(&app_file);
	let entry = server.files.get_or_create(&app_file)?;
	let logical_number = entry.logical_number;
	let lock = if write {
		entry.add_writer(station_id)
	} else {
		entry.add_reader(station_id)
	};
	if let Err(err) = lock {
		if !existed {
			server.files.close(logical_number, station_id).ok();
		}
		return Err(err);
	}
	match NanoreseauFile::open(&path) {
		Ok(nr_file) => {
			let size = nr_file.ms_dos_len;
			Ok([
				0,
				logical_number,
				nr_file.kind,
				nr_file.mode,
				size as u8,
				(size >> 8) as u8,
				(size >> 16) as u8,
			])
		}
		Err(err) => {
			info!("reading {} failed: {err}", path.display());
			server.files.close(logical_number, station_id).ok();
			Err(NrError::BadDisk)
		}
	}
}

/// LIRFI: reads from an open file into the slave's memory.
pub(crate) fn lirfi<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	let report = match try_read(server, consigne, station_id) {
		Ok((data, read_bytes, error)) => {
			server
				.device
				.send_data(consigne.msg_addr, consigne.page, &data, station_id)?;
			let bytes = (read_bytes as u16).to_be_bytes();
			[error, bytes[0], bytes[1]]
		}
		Err(err) => {
			info!("LIRFI failed with error {err}");
			[err.code(), 0, 0]
		}
	};
	server.send_report(&report, station_id, true)?;
	server.disconnect_station(station_id)
}

fn try_read<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(Vec<u8>, usize, u8), NrError> {
	let ctx = &consigne.ctx_data;
	if ctx.len() < 4 {
		return Err(NrError::BadParameters);
	}
	let logical_number = ctx[0];
	let offset = usize::from(ctx[1]) << 16 | usize::from(ctx[2]) << 8 | usize::from(ctx[3]);
	info!(
		"LIRFI request from {station_id} on file number {logical_number} at offset {offset}, \
		 up to {} bytes",
		consigne.msg_len
	);
	let entry = server.files.by_logical_number(logical_number)?;
	let path = entry.file.host_path(&server.base_path);
	let nr_file = NanoreseauFile::open(&path).map_err(|err| {
		info!("reading {} failed: {err}", path.display());
		NrError::BadDisk
	})?;
	let payload = nr_file.payload;
	let mut error = 0;
	let mut read_bytes = usize::from(consigne.msg_len);
	if read_bytes > payload.len() {
		read_bytes = payload.len();
		error = NrError::EndOfFile.code();
	}
	let start = offset.min(payload.len());
	let end = (start + read_bytes).min(payload.len());
	Ok((payload[start..end].to_vec(), read_bytes, error))
}

/// FERFI: closes an open file.
pub(crate) fn ferfi<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(), DeviceError> {
	let error = match close_file(server, consigne, station_id) {
		Ok(()) => 0,
		Err(err) => {
			info!("FERFI failed with error {err}");
			err.code()
		}
	};
	server.send_report(&[error], station_id, true)?;
	server.disconnect_station(station_id)
}

fn close_file<D: Bus>(
	server: &mut Server<D>,
	consigne: &Consigne,
	station_id: u8,
) -> Result<(), NrError> {
	let logical_number = consigne
		.ctx_data
		.first()
		.copied()
		.ok_or(NrError::BadParameters)?;
	info!("FERFI request from {station_id} on file number {logical_number}");
	server.files.close(logical_number, station_id)
}
