//! BedLeveler Settings Crate
//!
//! Loads, validates and saves printer descriptors.

pub mod error;
pub mod printer_info;

pub use error::{SettingsError, SettingsResult};
pub use printer_info::{
    default_printers_dir, list_printers, resolve_descriptor, Connection, ManualProbePoint,
    MoonrakerSettings, PrinterInfo, CURRENT_PRINTER_INFO_VERSION,
};
