//! Firmware backends
//!
//! - `marlin2`: serial G-code printers running Marlin 2
//! - `moonraker`: Klipper printers behind the Moonraker HTTP API

pub mod marlin2;
pub mod moonraker;

/// Format a G-code float parameter: rounded to 6 decimals, shortest form,
/// no exponent, `-0` printed as `0`
pub fn format_number(value: f64) -> String {
    let rounded = (value * 1_000_000.0).round() / 1_000_000.0;
    if rounded == 0.0 {
        return "0".to_string();
    }
    format!("{}", rounded)
}
