//! Protocol error codes of the Nanoréseau network.
//!
//! Every file or control operation that fails on the server side is answered
//! with a compte-rendu whose first byte carries one of these codes. The table
//! is the full MS-DOS master taxonomy; only a subset is produced by this
//! server, the rest is kept for completeness and logging.

use core::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Numeric error codes understood by the slave stations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum NrError {
	BadDisk = 128,
	FileNameSyntaxError = 129,
	BadIdentification = 130,
	TransmitError = 131,
	DuplicateId = 132,
	EndOfCatalog = 133,
	FileNotExisting = 134,
	AmbiguousFileName = 135,
	WrongIdentification = 137,
	FileAlreadyReserved = 138,
	FileAlreadyOpenForWrite = 139,
	LogicNumberTableSaturated = 140,
	FileTableSaturated = 141,
	FileAlreadyExists = 142,
	FileWithoutNetworkHeader = 143,
	FileReadOnly = 144,
	FileAlreadyOpenForRead = 145,
	FileAlreadyOpenForWriteOtherSta = 146,
	BadLogicNumber = 147,
	ServerDiskExchanged = 148,
	EndOfFile = 149,
	FileOpen = 151,
	FileNotIndexed = 153,
	NonExistingFunction = 154,
	ServerDiskError = 155,
	RxBufferTooSmall = 157,
	RequestedRxLengthTooLong = 160,
	ServerDiskFull = 161,
	BadParameters = 162,
	EndOfSpoolFile = 163,
	SpoolFileNonExisting = 164,
	SaturatedSpool = 165,
	BinaryFileLoadError = 166,
	PrinterNonExisting = 167,
	IoDeviceNotOpen = 169,
	IndexedFileMaxLength = 180,
	RecordNonExisting = 181,
	ReservedRecord = 182,
	TooMuchRecords = 183,
	ReservationTableFull = 184,
	RecordOffsetTooBig = 185,
	FilePartiallyReserved = 186,
}

impl NrError {
	/// The wire representation of the code.
	pub fn code(self) -> u8 {
		self.into()
	}
}

impl fmt::Display for NrError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?} ({})", self, self.code())
	}
}

impl core::error::Error for NrError {}
