//! Marlin2 firmware support
//!
//! Marlin2 printers are driven over a serial line with plain G-code. Each
//! command is acknowledged with `ok`, optionally preceded by payload lines.

pub mod commands;
pub mod connection;
pub mod machines;
pub mod printer;

pub use commands::{Command, CommandKind, CommandReply, GCode};
pub use connection::{CommandConnection, CommandTicket, ConnectionEvent};
pub use machines::{Calibration, DEFAULT_PROBE_SETTINGS};
pub use printer::{Completion, Marlin2Engine, Marlin2Printer, OperationKey};
