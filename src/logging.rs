//! Backend of the `log` facade: colored level tags on stderr.

use core::fmt;
use std::env;
use std::io::IsTerminal;

use anstyle::AnsiColor;
use log::{Level, LevelFilter, Metadata, Record};

struct ServerLogger;

static LOGGER: ServerLogger = ServerLogger;

impl log::Log for ServerLogger {
	fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
		true
	}

	fn log(&self, record: &Record<'_>) {
		if self.enabled(record.metadata()) {
			let level = ColorLevel(record.level());
			eprintln!("[{level}] {}: {}", record.target(), record.args());
		}
	}

	fn flush(&self) {}
}

/// Installs the logger. `verbosity` counts the `-v` flags of the command
/// line; the `NR_LOG` environment variable overrides it.
pub fn init(verbosity: u8) {
	log::set_logger(&LOGGER).expect("logger is only initialized once");
	log::set_max_level(max_level(verbosity));
}

fn max_level(verbosity: u8) -> LevelFilter {
	if let Ok(var) = env::var("NR_LOG") {
		if let Ok(level) = var.parse() {
			return level;
		}
	}
	match verbosity {
		0 => LevelFilter::Info,
		1 => LevelFilter::Debug,
		_ => LevelFilter::Trace,
	}
}

struct ColorLevel(Level);

impl fmt::Display for ColorLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let level = self.0;

		if no_color() {
			write!(f, "{level}")
		} else {
			let color = match level {
				Level::Trace => AnsiColor::Magenta,
				Level::Debug => AnsiColor::Blue,
				Level::Info => AnsiColor::Green,
				Level::Warn => AnsiColor::Yellow,
				Level::Error => AnsiColor::Red,
			};

			let style = anstyle::Style::new().fg_color(Some(color.into()));
			write!(f, "{style}{level}{style:#}")
		}
	}
}

fn no_color() -> bool {
	env::var_os("NO_COLOR").is_some_and(|val| !val.is_empty())
		|| !std::io::stderr().is_terminal()
}
