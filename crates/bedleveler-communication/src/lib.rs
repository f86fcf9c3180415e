//! # BedLeveler Communication
//!
//! Printer backends for BedLeveler.
//!
//! - Transports: serial line framing and port access, Moonraker HTTP client
//! - Marlin2: G-code commands, the FIFO command connection, operation
//!   machines and the [`Marlin2Printer`] facade
//! - Moonraker: reply envelopes, operation machines and the
//!   [`MoonrakerPrinter`] facade

pub mod communication;
pub mod firmware;

pub use communication::{
    http::{HttpReply, MoonrakerClient, ReqwestClient},
    line_framer::LineFramer,
    LineWriter, TransportEvent,
};

pub use firmware::marlin2::{
    Command, CommandConnection, CommandKind, CommandReply, GCode, Marlin2Engine, Marlin2Printer,
    DEFAULT_PROBE_SETTINGS,
};
pub use firmware::moonraker::MoonrakerPrinter;
