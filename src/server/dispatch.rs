//! Resolution of inbound consignes to task handlers.
//!
//! The handler table is a two-level mapping: the task class first, then the
//! application sub-code. Commands the server knows about but does not
//! implement (writes, indexed files, printer spooling, …) resolve to
//! [`Resolution::Unimplemented`] so the caller can log what was asked
//! before dropping the peer.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{Bus, Server, tasks};
use crate::consigne::{Consigne, TaskCode};
use crate::drivers::error::DeviceError;

/// Application sub-codes of the file task, plus the two legacy program
/// exchange rows that live in the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FileTask {
	Prog = 1,
	Tele = 16,
	Date = 32,
	Id = 33,
	Catp = 34,
	Cats = 35,
	Ouvfl = 36,
	Ouvfe = 37,
	Crefi = 39,
	Lirfi = 40,
	Ecrfi = 41,
	Ferfi = 42,
	Resfi = 43,
	Relfi = 44,
	Supfi = 45,
	Renfi = 46,
	Copie = 47,
	Imprim = 48,
	Sysinf = 49,
	System = 50,
	Dskf = 51,
	Liratt = 52,
	Ecratt = 53,
	Setmode = 54,
	Chbin = 55,
	Clear = 56,
	Rbuff = 57,
	Wbuff = 58,
	Garenr = 64,
	Chaenr = 65,
	Supenr = 66,
	Resenr = 67,
	Relenr = 68,
	Nes = 69,
	Dne = 70,
}

impl FileTask {
	pub fn description(self) -> &'static str {
		match self {
			FileTask::Prog => "Exchange program",
			FileTask::Tele => "Download program",
			FileTask::Date => "Request date and time",
			FileTask::Id => "Declare an identifier to server",
			FileTask::Catp | FileTask::Cats => "File catalog",
			FileTask::Ouvfl => "Open file for reading",
			FileTask::Ouvfe => "Open file for writing",
			FileTask::Crefi => "Create file",
			FileTask::Lirfi => "Read from file",
			FileTask::Ecrfi => "Write to file",
			FileTask::Ferfi => "Close file",
			FileTask::Resfi => "Reserve file",
			FileTask::Relfi => "Release file",
			FileTask::Supfi => "Delete file",
			FileTask::Renfi => "Rename file",
			FileTask::Copie => "Copy file",
			FileTask::Imprim => "Use server printer",
			FileTask::Sysinf => "Request system informations",
			FileTask::System => "Back to operating system",
			FileTask::Dskf => "Request free space on a server disk",
			FileTask::Liratt => "Get file attributes",
			FileTask::Ecratt => "Write file attributes",
			FileTask::Setmode => "Sets file creation mode",
			FileTask::Chbin => "Load binary file",
			FileTask::Clear => "Clean slave descriptor on server",
			FileTask::Rbuff => "Read common buffer",
			FileTask::Wbuff => "Write common buffer",
			FileTask::Garenr => "Park an indexed file record",
			FileTask::Chaenr => "Load an indexed file record",
			FileTask::Supenr => "Delete an indexed file record",
			FileTask::Resenr => "Reserve an indexed file record",
			FileTask::Relenr => "Release an indexed file record",
			FileTask::Nes => "Request next indexed file record number",
			FileTask::Dne => "Request last indexed file record number",
		}
	}
}

pub(crate) type Handler<D> = fn(&mut Server<D>, &Consigne, u8) -> Result<(), DeviceError>;

/// Outcome of a handler lookup.
pub(crate) enum Resolution<D> {
	Run(Handler<D>),
	UnknownTask,
	UnknownApp,
	Unimplemented(FileTask),
}

/// Resolves the handler of a (task code, application code) pair.
pub(crate) fn resolve<D: Bus>(code_tache: u8, code_app: u8) -> Resolution<D> {
	match TaskCode::try_from(code_tache) {
		Ok(TaskCode::InitCall) => match code_app {
			0 => Resolution::Run(tasks::init_call),
			_ => Resolution::UnknownApp,
		},
		Ok(TaskCode::File) => match FileTask::try_from(code_app) {
			Ok(FileTask::Date) => Resolution::Run(tasks::date),
			Ok(FileTask::Id) => Resolution::Run(tasks::id),
			Ok(FileTask::Catp) => Resolution::Run(tasks::catp),
			Ok(FileTask::Cats) => Resolution::Run(tasks::cats),
			Ok(FileTask::Ouvfl) => Resolution::Run(tasks::ouvfl),
			Ok(FileTask::Ouvfe) => Resolution::Run(tasks::ouvfe),
			Ok(FileTask::Lirfi) => Resolution::Run(tasks::lirfi),
			Ok(FileTask::Ferfi) => Resolution::Run(tasks::ferfi),
			Ok(FileTask::Sysinf) => Resolution::Run(tasks::sysinf),
			Ok(FileTask::Dskf) => Resolution::Run(tasks::dskf),
			Ok(FileTask::Chbin) => Resolution::Run(tasks::chbin),
			Ok(FileTask::Clear) => Resolution::Run(tasks::clear),
			Ok(stub) => Resolution::Unimplemented(stub),
			Err(_) => Resolution::UnknownApp,
		},
		_ => Resolution::UnknownTask,
	}
}
