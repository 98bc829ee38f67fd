//! Bridge device plumbing: host→bridge command framing and the USB
//! transport façade.

pub mod picoreseau;
pub mod usb;

/// A common error module for the device layer. [`DeviceError`] values are
/// passed on to higher layers, which answer by disconnecting the peer.
pub mod error {
	use thiserror::Error;

	use crate::consigne::FrameError;

	#[derive(Debug, Error)]
	pub enum DeviceError {
		#[error("no USB picoreseau device found")]
		NotFound,
		#[error("USB transfer failed: {0}")]
		Usb(#[from] rusb::Error),
		#[error("short USB transfer ({transferred} of {expected} bytes)")]
		ShortTransfer { expected: usize, transferred: usize },
		#[error("device sent an unknown state {0:#04x}")]
		UnknownState(u8),
		#[error("device sent an unknown event {0:#04x}")]
		UnknownEvent(u8),
		#[error("device reported error {code}: {message}")]
		Reported { code: u8, message: String },
		#[error("device sent a malformed consigne: {0}")]
		Frame(#[from] FrameError),
	}
}
