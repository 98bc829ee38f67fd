use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::info;
use nanoreseau::drivers::picoreseau::PicoreseauDevice;
use nanoreseau::fs::nr3dat::ConfigurationFile;
use nanoreseau::logging;
use nanoreseau::server::Server;

/// Nanoréseau master for a USB-attached picoreseau bridge.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
	/// Directory containing the server disks (`A`, `B`, …).
	base_path: PathBuf,

	/// Increase verbosity (-v debug, -vv trace).
	#[arg(short, long, action = clap::ArgAction::Count)]
	verbose: u8,
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	logging::init(cli.verbose);
	match run(cli) {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("error: {err:#}");
			ExitCode::FAILURE
		}
	}
}

fn run(cli: Cli) -> anyhow::Result<()> {
	info!("starting NR server");
	let config = ConfigurationFile::load(&cli.base_path)
		.context("loading the NR3.DAT configuration failed")?;
	info!("configuration file version: {}", config.version());

	info!("detecting picoreseau USB device...");
	let device = PicoreseauDevice::detect().context("opening the bridge device failed")?;
	info!("USB picoreseau found! Server is ready...");

	let mut server = Server::new(cli.base_path, config, device);
	server.run()?;
	Ok(())
}
