//! Tag-length framing of the commands the host sends to the bridge MCU.
//!
//! Every frame written to the OUT endpoint starts with one command tag byte
//! followed by a command-specific payload. The data bytes announced by
//! [`UsbCommand::PutData`] are not part of the frame, they follow in a
//! second bulk write.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::consigne::{Consigne, FRAME_LEN};

/// Command tags understood by the bridge firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CommandTag {
	GetStatus = 0,
	GetConsigne = 1,
	PutConsigne = 2,
	GetData = 3,
	PutData = 4,
	Disconnect = 5,
}

/// One host→bridge command.
#[derive(Debug, Clone)]
pub enum UsbCommand<'a> {
	/// Poll the device status block.
	GetStatus,
	/// Fetch the consigne pending on the bus.
	GetConsigne,
	/// Emit a consigne on the bus.
	PutConsigne(&'a Consigne),
	/// Ask the device to receive `len` raw bytes from the bus.
	GetData { len: u16 },
	/// Announce `len` raw bytes to be pushed on the bus.
	PutData { len: u16 },
	/// Drop the link with a peer station.
	Disconnect { peer: u8 },
}

impl UsbCommand<'_> {
	pub fn tag(&self) -> CommandTag {
		match self {
			UsbCommand::GetStatus => CommandTag::GetStatus,
			UsbCommand::GetConsigne => CommandTag::GetConsigne,
			UsbCommand::PutConsigne(_) => CommandTag::PutConsigne,
			UsbCommand::GetData { .. } => CommandTag::GetData,
			UsbCommand::PutData { .. } => CommandTag::PutData,
			UsbCommand::Disconnect { .. } => CommandTag::Disconnect,
		}
	}

	/// Serializes the command frame. Length payloads are little-endian,
	/// unlike the big-endian consigne header they may carry.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut buf = vec![u8::from(self.tag())];
		match self {
			UsbCommand::GetStatus | UsbCommand::GetConsigne => {}
			UsbCommand::PutConsigne(consigne) => {
				buf.extend_from_slice(&consigne.to_sized_bytes(FRAME_LEN));
			}
			UsbCommand::GetData { len } | UsbCommand::PutData { len } => {
				buf.extend_from_slice(&len.to_le_bytes());
			}
			UsbCommand::Disconnect { peer } => buf.push(*peer),
		}
		buf
	}
}
