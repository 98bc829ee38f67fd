//! Codec for the 62-byte command frames (*consignes*) of the Nanoréseau bus.
//!
//! A consigne starts with a length byte followed by a fixed ten byte header
//! and up to [`CTX_DATA_MAX`] bytes of command-specific payload. All
//! multi-byte header fields are big-endian. The high bit of the task code is
//! not part of the code itself: it asks the slave to queue the command until
//! further notice and is kept separately as [`Consigne::delayed`].

use core::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use smallvec::SmallVec;
use thiserror::Error;

/// Header bytes preceding the context data, including the length byte.
pub const HEADER_LEN: usize = 11;
/// Maximum number of context bytes a frame can carry.
pub const CTX_DATA_MAX: usize = 51;
/// Size of a full frame as exchanged with the bridge device.
pub const FRAME_LEN: usize = HEADER_LEN + CTX_DATA_MAX;

/// Mask of the delayed-execution bit in the task code byte.
const DELAYED_BIT: u8 = 0x80;

/// Task classes a consigne can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TaskCode {
	/// Initial call of a station, also used as a no-op to retarget the
	/// slave's receive pointer.
	InitCall = 0,
	Hold = 1,
	ExecCode = 2,
	Display = 3,
	SendScreen = 4,
	SendMemory = 5,
	/// Compte-rendu reply carrying a success or error payload.
	CopyReport = 6,
	Basic1 = 7,
	File = 9,
	Printer = 11,
}

impl TaskCode {
	pub fn name(self) -> &'static str {
		match self {
			TaskCode::InitCall => "initial call",
			TaskCode::Hold => "put on hold",
			TaskCode::ExecCode => "execute code",
			TaskCode::Display => "display",
			TaskCode::SendScreen => "send screen",
			TaskCode::SendMemory => "send memory",
			TaskCode::CopyReport => "copy report",
			TaskCode::Basic1 => "Basic 1.0",
			TaskCode::File => "file",
			TaskCode::Printer => "printer",
		}
	}
}

/// Pretty name of a raw task code byte, "unknown" for codes without a task.
pub fn task_name(code: u8) -> &'static str {
	TaskCode::try_from(code).map_or("unknown", TaskCode::name)
}

/// Computer models on the network, as announced in the consigne header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Computer {
	To7 = 0,
	Mo5 = 1,
	To770 = 2,
}

impl fmt::Display for Computer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Computer::To7 => "TO7",
			Computer::Mo5 => "MO5",
			Computer::To770 => "TO7/70",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
	#[error("consigne frame too short ({0} bytes, need at least {HEADER_LEN})")]
	TooShort(usize),
}

/// One command frame of the Nanoréseau bus.
///
/// `length` mirrors the length byte of the serialized frame; it is filled in
/// on decode and recomputed on encode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consigne {
	pub length: u8,
	/// Destination station address (1..31).
	pub dest: u8,
	/// Task class, low seven bits only.
	pub code_tache: u8,
	/// Queue the command on the slave instead of running it immediately.
	pub delayed: bool,
	pub code_app: u8,
	/// Length of the target buffer on the slave.
	pub msg_len: u16,
	/// Memory page selector on the slave.
	pub page: u8,
	/// Target memory address on the slave.
	pub msg_addr: u16,
	/// Computer model of the peer (0 TO7, 1 MO5, 2 TO7/70).
	pub computer: u8,
	/// Application selector (0 unspecified, 1 Basic 1.0, 2 LOGO, 3 LSE).
	pub application: u8,
	pub ctx_data: SmallVec<[u8; CTX_DATA_MAX]>,
}

impl Consigne {
	/// Decodes a frame. The header is taken from the first [`HEADER_LEN`]
	/// bytes, everything after it becomes context data (padding included,
	/// the codes do not know how much of it is meaningful).
	pub fn from_bytes(buf: &[u8]) -> Result<Self, FrameError> {
		if buf.len() < HEADER_LEN {
			return Err(FrameError::TooShort(buf.len()));
		}
		let code_tache = buf[2];
		Ok(Self {
			length: buf[0],
			dest: buf[1],
			code_tache: code_tache & !DELAYED_BIT,
			delayed: code_tache & DELAYED_BIT != 0,
			code_app: buf[3],
			msg_len: u16::from_be_bytes([buf[4], buf[5]]),
			page: buf[6],
			msg_addr: u16::from_be_bytes([buf[7], buf[8]]),
			computer: buf[9],
			application: buf[10],
			ctx_data: SmallVec::from_slice(&buf[HEADER_LEN..]),
		})
	}

	/// The value of the length byte for this frame: the nine header bytes
	/// after destination plus the context data, zero-padded to the next
	/// multiple of four.
	pub fn encoded_length(&self) -> u8 {
		let body = HEADER_LEN - 2 + self.ctx_data.len();
		(body.next_multiple_of(4)) as u8
	}

	/// Serializes the frame, zero-padding the body to a multiple of four.
	pub fn to_bytes(&self) -> Vec<u8> {
		self.to_sized_bytes(0)
	}

	/// Serializes the frame and grows it with trailing zeros up to `floor`
	/// bytes. The bridge device expects fixed [`FRAME_LEN`] frames.
	pub fn to_sized_bytes(&self, floor: usize) -> Vec<u8> {
		debug_assert!(self.ctx_data.len() <= CTX_DATA_MAX);
		let length = self.encoded_length();
		let mut buf = Vec::with_capacity(usize::from(length) + 2);
		buf.push(length);
		buf.push(self.dest);
		let mut code_tache = self.code_tache;
		if self.delayed {
			code_tache |= DELAYED_BIT;
		}
		buf.push(code_tache);
		buf.push(self.code_app);
		buf.extend_from_slice(&self.msg_len.to_be_bytes());
		buf.push(self.page);
		buf.extend_from_slice(&self.msg_addr.to_be_bytes());
		buf.push(self.computer);
		buf.push(self.application);
		buf.extend_from_slice(&self.ctx_data);
		buf.resize((usize::from(length) + 2).max(floor), 0);
		buf
	}
}

impl fmt::Display for Consigne {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"tache {} ({}), app {}, msg_len {}, page {}, addr ${:04x}, {} ctx bytes{}",
			self.code_tache,
			task_name(self.code_tache),
			self.code_app,
			self.msg_len,
			self.page,
			self.msg_addr,
			self.ctx_data.len(),
			if self.delayed { ", delayed" } else { "" },
		)
	}
}
