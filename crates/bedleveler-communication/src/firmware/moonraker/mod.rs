//! Moonraker firmware support
//!
//! Klipper printers are driven through the Moonraker REST API: G-code goes
//! through `printer/gcode/script`, state is read with `printer/objects/query`.

pub mod machines;
pub mod printer;
pub mod reply;

pub use machines::Endpoint;
pub use printer::MoonrakerPrinter;
