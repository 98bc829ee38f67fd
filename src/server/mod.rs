//! The Nanoréseau master engine.
//!
//! One dispatch runs at a time: the loop blocks on the bridge status, reads
//! the pending consigne when a station selects the master and hands it to
//! the matching task handler. Handlers run to completion, including their
//! outbound consignes, and finish every exchange by disconnecting the peer.

pub mod dispatch;
mod tasks;

use std::path::PathBuf;

use log::{debug, error, info, warn};
use smallvec::SmallVec;

use crate::consigne::{Consigne, TaskCode};
use crate::drivers::error::DeviceError;
use crate::drivers::picoreseau::{DeviceEvent, DeviceStatus, PicoreseauDevice};
use crate::errors::NrError;
use crate::file_table::FileTable;
use crate::fs::ApplicationFile;
use crate::fs::nr3dat::ConfigurationFile;
use crate::fs::nr_file::{BinaryData, NanoreseauFile};
use crate::station::StationTable;

/// Network version announced in SYSINF replies.
pub const VERSION_MAJOR: u8 = 3;
pub const VERSION_MINOR: u8 = 3;
/// Operating system type announced to the stations: an MS-DOS master.
pub const OS_TYPE: u8 = 2;

/// 6809 routine saving the slave's stack before a bootstrap download.
const STACK_SAVE_CODE: [u8; 36] = [
	0x34, 0x52, 0x11, 0x8C, 0x20, 0x80, 0x23, 0x06, 0x11, 0x8C, 0x20, 0xCC,
	0x23, 0x14, 0x1A, 0xFF, 0xCE, 0x20, 0xAC, 0x86, 0x10, 0xAE, 0xE1, 0xAF,
	0xC1, 0x4A, 0x26, 0xF9, 0x10, 0xCE, 0x20, 0xAC, 0x1C, 0x00, 0x35, 0xD2,
];
/// 6809 routine selecting the current application slot.
const SET_APPLICATION_CODE: [u8; 6] = [0x86, 0x01, 0xB7, 0x1F, 0xF7, 0x39];
/// 6809 jump stub; bytes 5..7 receive the execution address.
const JUMP_CODE: [u8; 7] = [0x10, 0xCE, 0x20, 0xCC, 0x7E, 0x50, 0x00];

/// The transport primitives the engine needs from the bridge.
///
/// The production implementation is [`PicoreseauDevice`]; the test suite
/// substitutes a recording mock.
pub trait Bus {
	/// Blocks until the device status changes or an event is flagged.
	fn wait_new_status(&mut self) -> Result<DeviceStatus, DeviceError>;
	/// Reads the pending consigne and the address of its sender.
	fn get_consigne(&mut self) -> Result<(Consigne, u8), DeviceError>;
	/// Emits a consigne and waits for its completion on the bus.
	fn send_consigne(&mut self, consigne: &Consigne) -> Result<(), DeviceError>;
	/// Streams raw bytes into a slave's memory and waits for completion.
	fn send_data(&mut self, addr: u16, page: u8, data: &[u8], peer: u8)
	-> Result<(), DeviceError>;
	/// Drops the link with a peer without waiting.
	fn disconnect_peer(&mut self, peer: u8) -> Result<(), DeviceError>;
}

impl Bus for PicoreseauDevice {
	fn wait_new_status(&mut self) -> Result<DeviceStatus, DeviceError> {
		PicoreseauDevice::wait_new_status(self)
	}

	fn get_consigne(&mut self) -> Result<(Consigne, u8), DeviceError> {
		PicoreseauDevice::get_consigne(self)
	}

	fn send_consigne(&mut self, consigne: &Consigne) -> Result<(), DeviceError> {
		PicoreseauDevice::send_consigne(self, consigne)
	}

	fn send_data(
		&mut self,
		addr: u16,
		page: u8,
		data: &[u8],
		peer: u8,
	) -> Result<(), DeviceError> {
		PicoreseauDevice::send_data(self, addr, page, data, peer)
	}

	fn disconnect_peer(&mut self, peer: u8) -> Result<(), DeviceError> {
		PicoreseauDevice::disconnect_peer(self, peer)
	}
}

/// A handler failure: either the bridge gave up mid-exchange, or a domain
/// error that is answered with a compte-rendu.
#[derive(Debug)]
pub(crate) enum TaskError {
	Device(DeviceError),
	File(NrError),
}

impl From<DeviceError> for TaskError {
	fn from(err: DeviceError) -> Self {
		TaskError::Device(err)
	}
}

impl From<NrError> for TaskError {
	fn from(err: NrError) -> Self {
		TaskError::File(err)
	}
}

/// The network master.
pub struct Server<D> {
	pub(crate) base_path: PathBuf,
	pub(crate) config: ConfigurationFile,
	pub(crate) stations: StationTable,
	pub(crate) files: FileTable,
	pub(crate) device: D,
}

impl<D: Bus> Server<D> {
	pub fn new(base_path: impl Into<PathBuf>, config: ConfigurationFile, device: D) -> Self {
		Self {
			base_path: base_path.into(),
			config,
			stations: StationTable::new(),
			files: FileTable::new(),
			device,
		}
	}

	/// The underlying transport, mainly useful to inspect mocks in tests.
	pub fn device(&self) -> &D {
		&self.device
	}

	/// A station slot, `None` for addresses outside 1..31.
	pub fn station(&self, station_id: u8) -> Option<&crate::station::Station> {
		self.stations.get(station_id)
	}

	/// Serves the network until the transport fails.
	pub fn run(&mut self) -> Result<(), DeviceError> {
		loop {
			let status = self.device.wait_new_status()?;
			debug!("new device status: {status}");
			match status.event {
				DeviceEvent::Selected => {
					let (consigne, peer) = self.device.get_consigne()?;
					info!("station {peer} selected: {consigne}");
					self.handle_consigne(&consigne, peer)?;
				}
				DeviceEvent::Error => {
					warn!("device error #{}: {}", status.error, status.message);
				}
				DeviceEvent::None | DeviceEvent::CmdDone => {}
			}
		}
	}

	/// Dispatches one inbound consigne: marks the station online, resolves
	/// the handler and runs it. Unknown or unimplemented commands and
	/// transport failures all end with a disconnected peer.
	pub fn handle_consigne(&mut self, consigne: &Consigne, peer: u8) -> Result<(), DeviceError> {
		let Some(station) = self.stations.get_mut(peer) else {
			warn!("consigne from invalid station address {peer}");
			return self.device.disconnect_peer(peer);
		};
		if !station.is_online() {
			info!("discovered new station #{peer}");
			station.computer = Some(consigne.computer);
		}
		match dispatch::resolve::<D>(consigne.code_tache, consigne.code_app) {
			dispatch::Resolution::Run(handler) => {
				if let Err(err) = handler(self, consigne, peer) {
					error!("task failed on station {peer}: {err}, disconnecting peer");
					return self.disconnect_station(peer);
				}
				Ok(())
			}
			dispatch::Resolution::UnknownTask => {
				error!(
					"unsupported task code {}, disconnecting peer",
					consigne.code_tache
				);
				self.disconnect_station(peer)
			}
			dispatch::Resolution::UnknownApp => {
				error!(
					"unsupported application code {} for task {}, disconnecting peer",
					consigne.code_app,
					crate::consigne::task_name(consigne.code_tache)
				);
				self.disconnect_station(peer)
			}
			dispatch::Resolution::Unimplemented(task) => {
				error!(
					"no handler defined for task {}/{}, disconnecting peer",
					consigne.code_app,
					task.description()
				);
				self.disconnect_station(peer)
			}
		}
	}

	/// Sends a disconnection request and puts the slot back offline.
	///
	/// Every exchange ends here, so the session state survives: the
	/// identifier and a running catalog session are only dropped by
	/// `CLEAR` or by the next initial call.
	pub(crate) fn disconnect_station(&mut self, station_id: u8) -> Result<(), DeviceError> {
		self.device.disconnect_peer(station_id)?;
		if let Some(station) = self.stations.get_mut(station_id) {
			station.computer = None;
		}
		Ok(())
	}

	/// Sends a compte-rendu to a station, optionally retargeting the
	/// slave-side buffer it is copied to.
	pub(crate) fn send_report_at(
		&mut self,
		data: &[u8],
		station_id: u8,
		load_addr: Option<u16>,
		load_page: Option<u8>,
		delayed: bool,
	) -> Result<(), DeviceError> {
		let mut consigne = Consigne {
			dest: station_id,
			computer: self.station_computer(station_id),
			code_tache: TaskCode::CopyReport.into(),
			delayed,
			ctx_data: SmallVec::from_slice(data),
			..Default::default()
		};
		if let Some(addr) = load_addr {
			consigne.msg_addr = addr;
		}
		if let Some(page) = load_page {
			consigne.page = page;
		}
		self.device.send_consigne(&consigne)
	}

	pub(crate) fn send_report(
		&mut self,
		data: &[u8],
		station_id: u8,
		delayed: bool,
	) -> Result<(), DeviceError> {
		self.send_report_at(data, station_id, None, None, delayed)
	}

	/// Sends machine code to be run on a station, immediately or queued
	/// behind the delayed bit.
	pub(crate) fn send_execute_code(
		&mut self,
		station_id: u8,
		code: &[u8],
		delayed: bool,
	) -> Result<(), DeviceError> {
		let consigne = Consigne {
			dest: station_id,
			computer: self.station_computer(station_id),
			code_tache: TaskCode::ExecCode.into(),
			delayed,
			msg_len: code.len() as u16,
			ctx_data: SmallVec::from_slice(code),
			..Default::default()
		};
		self.device.send_consigne(&consigne)
	}

	/// Pushes a machine-language binary into a station's memory: selects
	/// the application slot, then streams every code chunk to its load
	/// address. Returns the parsed binary so callers can jump to its
	/// execution address.
	pub(crate) fn send_binary_file(
		&mut self,
		file: &ApplicationFile,
		station_id: u8,
	) -> Result<BinaryData, TaskError> {
		let path = file.host_path(&self.base_path);
		let nr_file = NanoreseauFile::open(&path).map_err(|err| {
			info!("cannot read {}: {err}", path.display());
			NrError::BinaryFileLoadError
		})?;
		info!("will send the file {nr_file}");
		let binary = nr_file.binary_data().map_err(|err| {
			error!("file {file} is not a valid binary file: {err}");
			NrError::BinaryFileLoadError
		})?;
		self.send_execute_code(station_id, &SET_APPLICATION_CODE, false)?;
		for chunk in &binary.segments {
			debug!("{chunk}");
			self.device
				.send_data(chunk.address, chunk.page.unwrap_or(0), &chunk.data, station_id)?;
		}
		Ok(binary)
	}

	/// Sends the delayed jump stub targeting a binary's execution address.
	pub(crate) fn send_jump(
		&mut self,
		station_id: u8,
		exec_address: u16,
	) -> Result<(), DeviceError> {
		let mut code = JUMP_CODE;
		code[5..7].copy_from_slice(&exec_address.to_be_bytes());
		self.send_execute_code(station_id, &code, true)
	}

	fn station_computer(&self, station_id: u8) -> u8 {
		self.stations
			.get(station_id)
			.and_then(|station| station.computer)
			.unwrap_or_default()
	}
}
