//! End-to-end handler scenarios: consignes go in through the dispatcher,
//! every outbound exchange is recorded by a mock bus.

use std::fs;
use std::path::Path;

use nanoreseau::Consigne;
use nanoreseau::drivers::error::DeviceError;
use nanoreseau::drivers::picoreseau::{DeviceEvent, DeviceState, DeviceStatus};
use nanoreseau::fs::nr3dat::ConfigurationFile;
use nanoreseau::server::{Bus, Server};
use tempfile::TempDir;

/// The 6809 stack-save routine sent before a bootstrap download.
const STACK_SAVE_CODE: [u8; 36] = [
	0x34, 0x52, 0x11, 0x8C, 0x20, 0x80, 0x23, 0x06, 0x11, 0x8C, 0x20, 0xCC,
	0x23, 0x14, 0x1A, 0xFF, 0xCE, 0x20, 0xAC, 0x86, 0x10, 0xAE, 0xE1, 0xAF,
	0xC1, 0x4A, 0x26, 0xF9, 0x10, 0xCE, 0x20, 0xAC, 0x1C, 0x00, 0x35, 0xD2,
];
/// The 6809 application-slot selection routine preceding the code chunks.
const SET_APPLICATION_CODE: [u8; 6] = [0x86, 0x01, 0xB7, 0x1F, 0xF7, 0x39];

#[derive(Debug, Clone, PartialEq)]
enum BusOp {
	Consigne(Consigne),
	Data {
		addr: u16,
		page: u8,
		data: Vec<u8>,
		peer: u8,
	},
	Disconnect(u8),
}

#[derive(Default)]
struct MockBus {
	ops: Vec<BusOp>,
}

impl Bus for MockBus {
	fn wait_new_status(&mut self) -> Result<DeviceStatus, DeviceError> {
		Ok(DeviceStatus {
			state: DeviceState::Idle,
			error: 0,
			event: DeviceEvent::None,
			message: String::new(),
		})
	}

	fn get_consigne(&mut self) -> Result<(Consigne, u8), DeviceError> {
		unimplemented!("scenarios feed consignes directly")
	}

	fn send_consigne(&mut self, consigne: &Consigne) -> Result<(), DeviceError> {
		self.ops.push(BusOp::Consigne(consigne.clone()));
		Ok(())
	}

	fn send_data(
		&mut self,
		addr: u16,
		page: u8,
		data: &[u8],
		peer: u8,
	) -> Result<(), DeviceError> {
		self.ops.push(BusOp::Data {
			addr,
			page,
			data: data.to_vec(),
			peer,
		});
		Ok(())
	}

	fn disconnect_peer(&mut self, peer: u8) -> Result<(), DeviceError> {
		self.ops.push(BusOp::Disconnect(peer));
		Ok(())
	}
}

/// A 12-byte application-file descriptor: drive index, 8.3 name.
fn descriptor(drive: u8, name: &str, extension: &str) -> [u8; 12] {
	let mut raw = [b' '; 12];
	raw[0] = drive;
	raw[1..1 + name.len()].copy_from_slice(name.as_bytes());
	raw[9..9 + extension.len()].copy_from_slice(extension.as_bytes());
	raw
}

/// NR3.DAT bytes with the given signature table.
fn config_bytes(entries: &[([u8; 32], [u8; 12])]) -> Vec<u8> {
	let mut bytes = vec![3, 3];
	let mut exit = [b' '; 9];
	exit[0] = 1;
	exit[1..5].copy_from_slice(b"EXIT");
	exit[6..9].copy_from_slice(b"COM");
	bytes.extend_from_slice(&exit);
	bytes.extend_from_slice(&[0; 4]);
	bytes.extend_from_slice(&[0; 10]);
	bytes.extend_from_slice(&[0, 0]);
	bytes.push(entries.len() as u8);
	for (signature, file) in entries {
		bytes.extend_from_slice(signature);
		bytes.extend_from_slice(file);
	}
	bytes
}

/// A `*NRUSTL*` file: the 128-byte header followed by `payload`.
fn nr_file_bytes(kind: u8, mode: u8, len: u32, payload: &[u8]) -> Vec<u8> {
	let mut bytes = Vec::new();
	bytes.extend_from_slice(b"*NRUSTL*");
	bytes.extend_from_slice(b"SERVEUR ");
	bytes.push(0x01);
	bytes.push(kind);
	bytes.push(mode);
	bytes.extend_from_slice(&[len as u8, (len >> 8) as u8, (len >> 16) as u8]);
	bytes.push(0x00);
	bytes.push(0);
	bytes.extend_from_slice(&[3, 3]);
	bytes.extend_from_slice(&[24, 5, 3]);
	bytes.extend_from_slice(&[24, 5, 3]);
	bytes.extend_from_slice(&[1, 1]);
	bytes.extend_from_slice(&[0; 46]);
	bytes.extend_from_slice(&[0; 48]);
	bytes.extend_from_slice(payload);
	bytes
}

/// A machine binary with one code chunk and a simple execution address.
fn boot_binary(chunk_addr: u16, chunk: &[u8], exec_addr: u16) -> Vec<u8> {
	let mut payload = vec![0x00];
	payload.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
	payload.extend_from_slice(&chunk_addr.to_be_bytes());
	payload.extend_from_slice(chunk);
	payload.push(0xFF);
	payload.extend_from_slice(&[0x00, 0x00]);
	payload.extend_from_slice(&exec_addr.to_be_bytes());
	nr_file_bytes(2, 0, 0, &payload)
}

fn consigne(code_tache: u8, code_app: u8, ctx: &[u8]) -> Consigne {
	Consigne {
		dest: 0,
		code_tache,
		code_app,
		computer: 1,
		ctx_data: ctx.iter().copied().collect(),
		..Default::default()
	}
}

fn server_at(dir: &Path, entries: &[([u8; 32], [u8; 12])]) -> Server<MockBus> {
	let config = ConfigurationFile::parse(&config_bytes(entries)).unwrap();
	Server::new(dir, config, MockBus::default())
}

fn ops(server: &Server<MockBus>) -> &[BusOp] {
	&server.device().ops
}

/// Unwraps a recorded consigne op.
fn sent(op: &BusOp) -> &Consigne {
	match op {
		BusOp::Consigne(consigne) => consigne,
		other => panic!("expected a consigne, got {other:?}"),
	}
}

#[test]
fn init_call_with_known_signature_bootstraps_the_station() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();
	fs::write(
		dir.path().join("A/MENU.BIN"),
		boot_binary(0x5000, &[0xAA, 0xBB, 0xCC], 0xE000),
	)
	.unwrap();

	let signature: [u8; 32] = core::array::from_fn(|i| i as u8);
	let mut server = server_at(dir.path(), &[(signature, descriptor(1, "MENU", "BIN"))]);

	server
		.handle_consigne(&consigne(0, 0, &signature), 2)
		.unwrap();

	let ops = ops(&server);
	assert_eq!(ops.len(), 5);

	let preamble = sent(&ops[0]);
	assert_eq!(preamble.code_tache, 2);
	assert!(!preamble.delayed);
	assert_eq!(preamble.dest, 2);
	assert_eq!(&preamble.ctx_data[..], &STACK_SAVE_CODE);

	let set_app = sent(&ops[1]);
	assert_eq!(set_app.code_tache, 2);
	assert_eq!(&set_app.ctx_data[..], &SET_APPLICATION_CODE);

	assert_eq!(
		ops[2],
		BusOp::Data {
			addr: 0x5000,
			page: 0,
			data: vec![0xAA, 0xBB, 0xCC],
			peer: 2,
		}
	);

	let jump = sent(&ops[3]);
	assert_eq!(jump.code_tache, 2);
	assert!(jump.delayed);
	assert_eq!(&jump.ctx_data[..], &[0x10, 0xCE, 0x20, 0xCC, 0x7E, 0xE0, 0x00]);

	assert_eq!(ops[4], BusOp::Disconnect(2));
	assert!(!server.station(2).unwrap().is_online());
}

#[test]
fn init_call_with_unknown_signature_just_disconnects() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();

	let signature: [u8; 32] = core::array::from_fn(|i| i as u8);
	let mut server = server_at(dir.path(), &[(signature, descriptor(1, "MENU", "BIN"))]);

	let mut unknown = signature;
	unknown[0] = 0xAA;
	server.handle_consigne(&consigne(0, 0, &unknown), 2).unwrap();

	assert_eq!(ops(&server), [BusOp::Disconnect(2)]);
}

#[test]
fn lirfi_caps_reads_at_the_end_of_file() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();
	let payload = vec![0x42; 100];
	fs::write(
		dir.path().join("A/DATA.DAT"),
		nr_file_bytes(1, 0xFF, 100, &payload),
	)
	.unwrap();

	let mut server = server_at(dir.path(), &[]);

	// OUVFL allocates logical number 1.
	server
		.handle_consigne(&consigne(9, 36, &descriptor(1, "DATA", "DAT")), 3)
		.unwrap();
	{
		let ops = ops(&server);
		assert_eq!(ops.len(), 2);
		let report = sent(&ops[0]);
		assert_eq!(report.code_tache, 6);
		assert!(report.delayed);
		assert_eq!(&report.ctx_data[..], &[0, 1, 1, 0xFF, 100, 0, 0]);
		assert_eq!(ops[1], BusOp::Disconnect(3));
	}

	let mut read = consigne(9, 40, &[1, 0, 0, 0]);
	read.msg_len = 256;
	read.msg_addr = 0x2000;
	read.page = 1;
	server.handle_consigne(&read, 3).unwrap();

	let ops = &ops(&server)[2..];
	assert_eq!(ops.len(), 3);
	assert_eq!(
		ops[0],
		BusOp::Data {
			addr: 0x2000,
			page: 1,
			data: payload,
			peer: 3,
		}
	);
	let report = sent(&ops[1]);
	assert_eq!(&report.ctx_data[..], &[149, 0x00, 0x64]);
	assert_eq!(ops[2], BusOp::Disconnect(3));
}

#[test]
fn lirfi_slices_from_the_requested_offset() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();
	let payload: Vec<u8> = (0..100).collect();
	fs::write(
		dir.path().join("A/DATA.DAT"),
		nr_file_bytes(1, 0xFF, 100, &payload),
	)
	.unwrap();

	let mut server = server_at(dir.path(), &[]);
	server
		.handle_consigne(&consigne(9, 36, &descriptor(1, "DATA", "DAT")), 3)
		.unwrap();

	let mut read = consigne(9, 40, &[1, 0, 0, 10]);
	read.msg_len = 20;
	read.msg_addr = 0x3000;
	server.handle_consigne(&read, 3).unwrap();

	let ops = &ops(&server)[2..];
	match &ops[0] {
		BusOp::Data { data, .. } => {
			assert_eq!(data.as_slice(), &payload[10..30]);
		}
		other => panic!("expected a data burst, got {other:?}"),
	}
	let report = sent(&ops[1]);
	assert_eq!(&report.ctx_data[..], &[0, 0, 20]);
}

#[test]
fn ouvfe_conflicts_with_an_existing_reader() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();
	fs::write(
		dir.path().join("A/X.DAT"),
		nr_file_bytes(1, 0xFF, 4, b"ABCD"),
	)
	.unwrap();

	let mut server = server_at(dir.path(), &[]);
	let open = descriptor(1, "X", "DAT");

	server.handle_consigne(&consigne(9, 36, &open), 3).unwrap();
	let first = sent(&ops(&server)[0]);
	assert_eq!(first.ctx_data[0], 0);

	server.handle_consigne(&consigne(9, 37, &open), 4).unwrap();
	let ops = &ops(&server)[2..];
	let report = sent(&ops[0]);
	assert_eq!(report.dest, 4);
	assert_eq!(&report.ctx_data[..], &[145, 0, 0, 0, 0, 0, 0]);
	assert_eq!(ops[1], BusOp::Disconnect(4));
}

#[test]
fn ferfi_forgets_the_logical_number() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();
	fs::write(
		dir.path().join("A/X.DAT"),
		nr_file_bytes(1, 0xFF, 4, b"ABCD"),
	)
	.unwrap();

	let mut server = server_at(dir.path(), &[]);
	server
		.handle_consigne(&consigne(9, 36, &descriptor(1, "X", "DAT")), 3)
		.unwrap();
	server.handle_consigne(&consigne(9, 42, &[1]), 3).unwrap();
	let report = sent(&ops(&server)[2]);
	assert_eq!(&report.ctx_data[..], &[0]);

	// The number is gone, a second close is a bad logical number.
	server.handle_consigne(&consigne(9, 42, &[1]), 3).unwrap();
	let report = sent(&ops(&server)[4]);
	assert_eq!(&report.ctx_data[..], &[147]);
}

#[test]
fn catp_matches_single_character_wildcards() {
	let dir = TempDir::new().unwrap();
	let drive = dir.path().join("A");
	fs::create_dir(&drive).unwrap();
	for name in ["AB.DAT", "CDE.DAT", "Z.BIN"] {
		fs::write(drive.join(name), b"").unwrap();
	}

	let mut server = server_at(dir.path(), &[]);
	let mut catp = consigne(9, 34, &descriptor(1, "??", "DAT"));
	catp.msg_len = 100;
	catp.msg_addr = 0x4000;
	server.handle_consigne(&catp, 2).unwrap();

	let ops = ops(&server);
	assert_eq!(ops.len(), 3);
	match &ops[0] {
		BusOp::Data { addr, data, .. } => {
			assert_eq!(*addr, 0x4000);
			assert_eq!(data.len(), 17);
			assert_eq!(&data[..11], b"AB      DAT");
		}
		other => panic!("expected a data burst, got {other:?}"),
	}
	let report = sent(&ops[1]);
	assert!(report.delayed);
	// One entry, end of catalog, MS-DOS server.
	assert_eq!(&report.ctx_data[..], &[133, 0, 1, 1]);
	assert_eq!(ops[2], BusOp::Disconnect(2));
}

#[test]
fn cats_iterates_the_whole_listing_in_order() {
	let dir = TempDir::new().unwrap();
	let drive = dir.path().join("A");
	fs::create_dir(&drive).unwrap();
	for name in ["A.DAT", "B.DAT", "C.DAT"] {
		fs::write(drive.join(name), b"").unwrap();
	}

	let mut server = server_at(dir.path(), &[]);
	let filter = descriptor(1, "????????", "DAT");
	// One record fits per chunk.
	let mut catp = consigne(9, 34, &filter);
	catp.msg_len = 17;
	server.handle_consigne(&catp, 2).unwrap();

	let mut cats = consigne(9, 35, &[]);
	cats.msg_len = 17;
	server.handle_consigne(&cats, 2).unwrap();
	server.handle_consigne(&cats, 2).unwrap();

	let recorded = ops(&server);
	assert_eq!(recorded.len(), 9);
	let mut names = Vec::new();
	for chunk in recorded.chunks(3) {
		match &chunk[0] {
			BusOp::Data { data, .. } => names.push(data[..8].to_vec()),
			other => panic!("expected a data burst, got {other:?}"),
		}
	}
	assert_eq!(names, [b"A       ", b"B       ", b"C       "]);
	assert_eq!(&sent(&recorded[1]).ctx_data[..], &[0, 0, 1, 1]);
	assert_eq!(&sent(&recorded[4]).ctx_data[..], &[0, 0, 1, 1]);
	assert_eq!(&sent(&recorded[7]).ctx_data[..], &[133, 0, 1, 1]);
}

#[test]
fn catalog_of_a_missing_pattern_reports_no_file() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();

	let mut server = server_at(dir.path(), &[]);
	let mut catp = consigne(9, 34, &descriptor(1, "????????", "XYZ"));
	catp.msg_len = 100;
	server.handle_consigne(&catp, 2).unwrap();

	let report = sent(&ops(&server)[0]);
	assert_eq!(&report.ctx_data[..], &[134, 0, 0, 1]);
}

#[test]
fn duplicate_identifiers_are_refused() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();

	let mut server = server_at(dir.path(), &[]);
	server
		.handle_consigne(&consigne(9, 33, b"PUPIL  1"), 5)
		.unwrap();
	assert_eq!(&sent(&ops(&server)[0]).ctx_data[..], &[0]);
	assert_eq!(server.station(5).unwrap().identifier, "PUPIL  1");

	server
		.handle_consigne(&consigne(9, 33, b"PUPIL  1"), 6)
		.unwrap();
	let report = sent(&ops(&server)[2]);
	assert_eq!(report.dest, 6);
	assert_eq!(&report.ctx_data[..], &[132]);

	// Re-declaring its own identifier is fine.
	server
		.handle_consigne(&consigne(9, 33, b"PUPIL  1"), 5)
		.unwrap();
	assert_eq!(&sent(&ops(&server)[4]).ctx_data[..], &[0]);
}

#[test]
fn sysinf_reports_version_and_drive_mask() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();
	fs::create_dir(dir.path().join("C")).unwrap();

	let mut server = server_at(dir.path(), &[]);
	server.handle_consigne(&consigne(9, 49, &[]), 2).unwrap();

	let report = sent(&ops(&server)[0]);
	assert!(!report.delayed);
	assert_eq!(&report.ctx_data[..], &[0, 3, 3, 2, 0, 0b101, 0]);
}

#[test]
fn dskf_rejects_missing_drives() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();

	let mut server = server_at(dir.path(), &[]);
	server.handle_consigne(&consigne(9, 51, &[0]), 2).unwrap();
	assert_eq!(&sent(&ops(&server)[0]).ctx_data[..], &[0, 0xFF, 0xFF]);

	server.handle_consigne(&consigne(9, 51, &[3]), 2).unwrap();
	assert_eq!(&sent(&ops(&server)[2]).ctx_data[..], &[128, 0xFF, 0xFF]);
}

#[test]
fn clear_resets_the_station_state() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();

	let mut server = server_at(dir.path(), &[]);
	server
		.handle_consigne(&consigne(9, 33, b"PUPIL  9"), 7)
		.unwrap();
	server.handle_consigne(&consigne(9, 56, &[]), 7).unwrap();

	let report = sent(&ops(&server)[2]);
	assert!(!report.delayed);
	assert_eq!(&report.ctx_data[..], &[0]);
	assert_eq!(server.station(7).unwrap().identifier, "        ");
}

#[test]
fn unknown_commands_disconnect_without_a_report() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();

	let mut server = server_at(dir.path(), &[]);
	// Unknown task code.
	server.handle_consigne(&consigne(42, 0, &[]), 2).unwrap();
	// Unknown application code under the file task.
	server.handle_consigne(&consigne(9, 99, &[]), 3).unwrap();
	// A known but unimplemented stub: ECRFI.
	server.handle_consigne(&consigne(9, 41, &[]), 4).unwrap();

	assert_eq!(
		ops(&server),
		[BusOp::Disconnect(2), BusOp::Disconnect(3), BusOp::Disconnect(4)]
	);
}

#[test]
fn chbin_loads_and_jumps_with_a_report() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();
	fs::write(
		dir.path().join("A/GAME.BIN"),
		boot_binary(0x6000, &[0x11, 0x22], 0x6000),
	)
	.unwrap();

	let mut server = server_at(dir.path(), &[]);
	let mut ctx = Vec::new();
	ctx.extend_from_slice(&descriptor(1, "GAME", "BIN"));
	ctx.push(0);
	server.handle_consigne(&consigne(9, 55, &ctx), 2).unwrap();

	let ops = ops(&server);
	assert_eq!(ops.len(), 5);
	assert_eq!(&sent(&ops[0]).ctx_data[..], &SET_APPLICATION_CODE);
	assert_eq!(
		ops[1],
		BusOp::Data {
			addr: 0x6000,
			page: 0,
			data: vec![0x11, 0x22],
			peer: 2,
		}
	);
	let report = sent(&ops[2]);
	assert_eq!(report.code_tache, 6);
	assert_eq!(&report.ctx_data[..], &[0, 0x60, 0x00, 0]);
	let jump = sent(&ops[3]);
	assert!(jump.delayed);
	assert_eq!(&jump.ctx_data[..], &[0x10, 0xCE, 0x20, 0xCC, 0x7E, 0x60, 0x00]);
	assert_eq!(ops[4], BusOp::Disconnect(2));
}

#[test]
fn chbin_of_a_missing_file_reports_a_load_error() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();

	let mut server = server_at(dir.path(), &[]);
	let mut ctx = Vec::new();
	ctx.extend_from_slice(&descriptor(1, "NOPE", "BIN"));
	ctx.push(0);
	server.handle_consigne(&consigne(9, 55, &ctx), 2).unwrap();

	let ops = ops(&server);
	assert_eq!(ops.len(), 2);
	assert_eq!(&sent(&ops[0]).ctx_data[..], &[166, 0, 0, 0]);
	assert_eq!(ops[1], BusOp::Disconnect(2));
}

#[test]
fn stations_go_online_with_the_announced_computer() {
	let dir = TempDir::new().unwrap();
	fs::create_dir(dir.path().join("A")).unwrap();

	let mut server = server_at(dir.path(), &[]);
	server.handle_consigne(&consigne(9, 32, &[]), 2).unwrap();

	// The DATE exchange ends with a disconnect, the slot is offline again,
	// but the report carried the station's computer type.
	let report = sent(&ops(&server)[0]);
	assert_eq!(report.computer, 1);
	assert!(!server.station(2).unwrap().is_online());
}
