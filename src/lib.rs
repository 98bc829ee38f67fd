//! Host side of a Nanoréseau network emulator.
//!
//! Through a USB-attached bridge device this crate impersonates the network
//! master for a fleet of Thomson TO7, MO5 and TO7/70 slave stations: it
//! answers their initial calls with a bootstrap binary, then serves the
//! application-level file and control protocol (catalog listing, file
//! reads, date and time, identifier registration, binary loading and
//! machine-code execution).
//!
//! The crate splits into the frame codec ([`consigne`]), the bridge
//! transport ([`drivers`]), the on-disk formats ([`fs`]), the per-station
//! and per-file state ([`station`], [`file_table`]) and the protocol engine
//! itself ([`server`]).

pub mod consigne;
pub mod drivers;
pub mod errors;
pub mod file_table;
pub mod fs;
pub mod logging;
pub mod server;
pub mod station;

pub use crate::consigne::Consigne;
pub use crate::server::Server;
