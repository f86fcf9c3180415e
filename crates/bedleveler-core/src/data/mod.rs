//! Data models for printer operations
//!
//! Result types returned by operations, serial connection settings and the
//! probe defaults used by the Probe operation.

pub mod mesh;
pub mod probe;

use crate::error::UsageError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use mesh::calculate_mesh_coordinates;
pub use probe::average_samples;

/// A point on the bed plane
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2F {
    /// X coordinate in mm
    pub x: f64,
    /// Y coordinate in mm
    pub y: f64,
}

impl Point2F {
    /// Create a new point
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point2F {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

/// Heater readings of the tool and the bed
///
/// Power values are normalised to the range 0.0..=1.0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Temperatures {
    /// Current tool temperature in °C
    pub tool_actual: f64,
    /// Target tool temperature in °C
    pub tool_desired: f64,
    /// Tool heater power
    pub tool_power: f64,
    /// Current bed temperature in °C
    pub bed_actual: f64,
    /// Target bed temperature in °C
    pub bed_desired: f64,
    /// Bed heater power
    pub bed_power: f64,
}

/// Offset of the probe relative to the nozzle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProbeOffsets {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Current toolhead position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CurrentPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: f64,
}

/// Travel limits of the toolhead
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: f64,
    pub max_z: f64,
}

/// Bed mesh probe locations
///
/// `grid` is row-major: `grid[row][column]`, row 0 at `min_y`, column 0 at `min_x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshCoordinates {
    pub row_count: usize,
    pub column_count: usize,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub grid: Vec<Vec<Point2F>>,
}

impl MeshCoordinates {
    /// Location of a single mesh point
    pub fn point(&self, row: usize, column: usize) -> Option<Point2F> {
        self.grid.get(row).and_then(|r| r.get(column)).copied()
    }
}

/// Result of probing a single bed location
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Requested X location in mm
    pub x: f64,
    /// Requested Y location in mm
    pub y: f64,
    /// Measured bed height in mm
    pub z: f64,
}

/// Defaults used when probing a single point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Number of samples averaged per probe
    pub sample_count: u32,
    /// Height the probe travels at between points, in mm
    pub z_height: f64,
    /// Horizontal travel speed
    pub xy_speed: f64,
}

impl ProbeSettings {
    /// Create validated probe settings
    pub fn new(sample_count: u32, z_height: f64, xy_speed: f64) -> Result<Self, UsageError> {
        let settings = Self {
            sample_count,
            z_height,
            xy_speed,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check the invariants of the settings
    pub fn validate(&self) -> Result<(), UsageError> {
        if self.sample_count < 1 {
            return Err(UsageError::InvalidSampleCount(self.sample_count));
        }
        if self.z_height.is_nan() || self.z_height < 0.0 {
            return Err(UsageError::NegativeProbeHeight(self.z_height));
        }
        if self.xy_speed.is_nan() || self.xy_speed <= 0.0 {
            return Err(UsageError::InvalidProbeSpeed(self.xy_speed));
        }
        Ok(())
    }
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial flow control setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

/// Serial line parameters of a Marlin2 printer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Flow control
    pub flow_control: FlowControl,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::None,
        }
    }
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate, self.data_bits, parity, self.stop_bits
        )
    }
}
