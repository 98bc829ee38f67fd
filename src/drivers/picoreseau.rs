//! USB transport façade for the picoreseau bridge device.
//!
//! The bridge MCU terminates the HDLC-like physical layer and exposes a
//! request/reply protocol on a pair of vendor bulk endpoints. The façade
//! reduces it to five blocking primitives: poll the status block, fetch the
//! pending consigne, push a consigne, stream raw data into a slave's memory
//! and disconnect a peer. Writes that trigger bus activity are confirmed by
//! polling until the device signals `CMD_DONE` or `ERROR`.

use core::fmt;
use core::time::Duration;
use std::thread;

use log::{debug, info};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use rusb::{DeviceHandle, GlobalContext};

use crate::consigne::{Consigne, FRAME_LEN, TaskCode};
use crate::drivers::error::DeviceError;
use crate::drivers::usb::UsbCommand;

/// Vendor/product pair of the bridge.
pub const VENDOR_ID: u16 = 0xbaba;
pub const PRODUCT_ID: u16 = 0x0001;

/// Picoreseau data USB endpoints.
const EP_OUT: u8 = 0x03;
const EP_IN: u8 = 0x83;

/// Size of the status block returned for a `GetStatus` command.
const STATUS_REPLY_LEN: usize = 68;
/// Bytes of the status block carrying the error message.
const STATUS_MSG_LEN: usize = 60;

/// Interval between two status polls while waiting on the device.
const POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Timeout of a single USB transfer.
const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Bus state reported by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DeviceState {
	Idle = 0,
	/// A station raised an initial-call rendezvous.
	RdvInitCall = 1,
	Busy = 2,
}

/// Edge-triggered event accompanying a status block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DeviceEvent {
	None = 0,
	Error = 1,
	/// A station selected the master; a consigne is pending.
	Selected = 2,
	/// The previously issued command completed on the bus.
	CmdDone = 3,
}

/// One parsed status block of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
	pub state: DeviceState,
	pub error: u8,
	pub event: DeviceEvent,
	pub message: String,
}

impl DeviceStatus {
	fn parse(buf: &[u8]) -> Result<Self, DeviceError> {
		if buf.len() < 3 + STATUS_MSG_LEN {
			return Err(DeviceError::ShortTransfer {
				expected: STATUS_REPLY_LEN,
				transferred: buf.len(),
			});
		}
		let message = buf[3..3 + STATUS_MSG_LEN]
			.iter()
			.take_while(|&&b| b != 0)
			.map(|&b| char::from(b))
			.collect();
		Ok(Self {
			state: DeviceState::try_from(buf[0])
				.map_err(|_| DeviceError::UnknownState(buf[0]))?,
			error: buf[1],
			event: DeviceEvent::try_from(buf[2])
				.map_err(|_| DeviceError::UnknownEvent(buf[2]))?,
			message,
		})
	}
}

impl fmt::Display for DeviceStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{:?}, event {:?}, error #{}: {}",
			self.state, self.event, self.error, self.message
		)
	}
}

/// Exclusive handle on the bridge device.
pub struct PicoreseauDevice {
	handle: DeviceHandle<GlobalContext>,
	last_status: Option<DeviceStatus>,
}

impl PicoreseauDevice {
	/// Looks for a bridge on the USB buses, claims it and resets its
	/// protocol state machine.
	pub fn detect() -> Result<Self, DeviceError> {
		let mut handle = rusb::open_device_with_vid_pid(VENDOR_ID, PRODUCT_ID)
			.ok_or(DeviceError::NotFound)?;
		let descriptor = handle.device().device_descriptor()?;
		if let Ok(product) = handle.read_product_string_ascii(&descriptor) {
			info!("found device {product}");
		}
		handle.set_auto_detach_kernel_driver(true).ok();
		handle.claim_interface(0)?;
		// State reset, see the firmware's vendor request 1.
		handle.write_control(0x41, 1, 0, 0, &[], IO_TIMEOUT)?;
		Ok(Self {
			handle,
			last_status: None,
		})
	}

	fn write_all(&self, buf: &[u8]) -> Result<(), DeviceError> {
		let written = self.handle.write_bulk(EP_OUT, buf, IO_TIMEOUT)?;
		if written != buf.len() {
			return Err(DeviceError::ShortTransfer {
				expected: buf.len(),
				transferred: written,
			});
		}
		Ok(())
	}

	fn write_command(&self, command: &UsbCommand<'_>) -> Result<(), DeviceError> {
		self.write_all(&command.to_bytes())
	}

	fn read_reply(&self, len: usize) -> Result<Vec<u8>, DeviceError> {
		let mut buf = vec![0; len];
		let read = self.handle.read_bulk(EP_IN, &mut buf, IO_TIMEOUT)?;
		if read != len {
			return Err(DeviceError::ShortTransfer {
				expected: len,
				transferred: read,
			});
		}
		Ok(buf)
	}

	/// Requests and parses one status block.
	pub fn poll_status(&self) -> Result<DeviceStatus, DeviceError> {
		self.write_command(&UsbCommand::GetStatus)?;
		DeviceStatus::parse(&self.read_reply(STATUS_REPLY_LEN)?)
	}

	/// Polls until the status differs from the last one returned here, or
	/// until the device flags an event.
	pub fn wait_new_status(&mut self) -> Result<DeviceStatus, DeviceError> {
		loop {
			thread::sleep(POLL_INTERVAL);
			let status = self.poll_status()?;
			let changed = match &self.last_status {
				Some(last) => last.state != status.state || last.error != status.error,
				None => true,
			};
			if changed || status.event != DeviceEvent::None {
				self.last_status = Some(status.clone());
				return Ok(status);
			}
		}
	}

	/// Reads back the consigne pending on the bus and the address of the
	/// station that sent it.
	pub fn get_consigne(&mut self) -> Result<(Consigne, u8), DeviceError> {
		self.write_command(&UsbCommand::GetConsigne)?;
		let reply = self.read_reply(1 + FRAME_LEN)?;
		let peer = reply[0];
		let consigne = Consigne::from_bytes(&reply[1..])?;
		debug!("received consigne from peer {peer}: {consigne}");
		Ok((consigne, peer))
	}

	/// Emits a consigne on the bus and waits for its completion.
	pub fn send_consigne(&mut self, consigne: &Consigne) -> Result<(), DeviceError> {
		debug!("sending consigne: {consigne}");
		self.write_command(&UsbCommand::PutConsigne(consigne))?;
		self.wait_completion()
	}

	/// Streams `data` into the slave's memory at `addr` on `page`. The
	/// receive pointer of the peer is retargeted first with a zero-task
	/// consigne, then the raw bytes are pushed.
	pub fn send_data(
		&mut self,
		addr: u16,
		page: u8,
		data: &[u8],
		peer: u8,
	) -> Result<(), DeviceError> {
		let retarget = Consigne {
			dest: peer,
			code_tache: TaskCode::InitCall.into(),
			msg_len: data.len() as u16,
			page,
			msg_addr: addr,
			..Default::default()
		};
		self.send_consigne(&retarget)?;
		debug!("sending {} raw bytes to peer {peer} at ${addr:04x}", data.len());
		self.write_command(&UsbCommand::PutData {
			len: data.len() as u16,
		})?;
		self.write_all(data)?;
		self.wait_completion()
	}

	/// Asks the bridge to drop the link with a peer. Does not wait.
	pub fn disconnect_peer(&mut self, peer: u8) -> Result<(), DeviceError> {
		debug!("disconnecting peer #{peer}");
		self.write_command(&UsbCommand::Disconnect { peer })
	}

	/// Polls until the last command is acknowledged with `CmdDone`, or
	/// fails with the error message reported by the device.
	fn wait_completion(&mut self) -> Result<(), DeviceError> {
		loop {
			thread::sleep(POLL_INTERVAL);
			let status = self.poll_status()?;
			match status.event {
				DeviceEvent::CmdDone => return Ok(()),
				DeviceEvent::Error => {
					return Err(DeviceError::Reported {
						code: status.error,
						message: status.message,
					});
				}
				DeviceEvent::None | DeviceEvent::Selected => {}
			}
		}
	}
}
