//! # BedLeveler
//!
//! Bed leveling assistant engine for 3D printers. Drives Marlin 2 printers
//! over a serial line and Klipper printers through Moonraker with one set of
//! high-level operations: init, home, temperatures, probe offsets, position,
//! travel bounds, mesh coordinates, probing and moves.
//!
//! ## Architecture
//!
//! 1. **bedleveler-core** - Errors, operation vocabulary, events, calculations
//! 2. **bedleveler-communication** - Transports and the Marlin2/Moonraker backends
//! 3. **bedleveler-settings** - Printer descriptors
//! 4. **bedleveler** - Command line front end

pub mod cli;

pub use bedleveler_communication::{Marlin2Printer, MoonrakerPrinter};
pub use bedleveler_core::{
    CommandPrinter, Error, EventDispatcher, OperationError, OperationKind, OperationOutput,
    OperationRequest, PrinterEvent, ProbeSettings, Result,
};
pub use bedleveler_settings::{Connection, PrinterInfo};

use anyhow::Context as _;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Logs go to stderr with pretty formatting so stdout only carries results.
/// The level follows `RUST_LOG` and defaults to INFO.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    Ok(())
}

/// Open the printer described by `info`.
///
/// `port` selects the serial device of a Marlin2 printer; `host` overrides
/// the Moonraker host stored in the descriptor.
pub fn connect(
    info: &PrinterInfo,
    port: Option<&str>,
    host: Option<&str>,
) -> anyhow::Result<Box<dyn CommandPrinter>> {
    match &info.connection {
        Connection::Marlin2(serial) => {
            let port = port.with_context(|| {
                format!("'{}' is a Marlin2 printer, --port is required", info.display_name)
            })?;
            let printer = Marlin2Printer::open(port, serial)?;
            Ok(Box::new(printer))
        }
        Connection::Moonraker(settings) => {
            let host = host.or(settings.host.as_deref()).with_context(|| {
                format!(
                    "'{}' has no Moonraker host, pass --host",
                    info.display_name
                )
            })?;
            let printer = MoonrakerPrinter::new(host)?;
            Ok(Box::new(printer))
        }
    }
}
