//! Printer descriptors
//!
//! A descriptor names a printer, says how to reach it and lists the bed
//! locations offered for manual probing.

use crate::error::{SettingsError, SettingsResult};
use bedleveler_core::SerialSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Descriptor format written by this version
pub const CURRENT_PRINTER_INFO_VERSION: u32 = 2;

const EXTENSIONS: [&str; 2] = ["json", "toml"];

fn current_version() -> u32 {
    CURRENT_PRINTER_INFO_VERSION
}

/// Moonraker connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MoonrakerSettings {
    /// `name` or `name:port`. May be left out and given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// How the printer is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum Connection {
    Marlin2(SerialSettings),
    Moonraker(MoonrakerSettings),
}

impl Connection {
    pub fn mode_name(&self) -> &'static str {
        match self {
            Connection::Marlin2(_) => "Marlin2",
            Connection::Moonraker(_) => "Moonraker",
        }
    }
}

/// A named bed location for manual probing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualProbePoint {
    pub name: String,
    pub row: usize,
    pub column: usize,
    pub x: f64,
    pub y: f64,
}

/// A printer descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterInfo {
    #[serde(default = "current_version")]
    pub version: u32,
    pub display_name: String,
    pub connection: Connection,
    #[serde(default)]
    pub manual_probe_points: Vec<ManualProbePoint>,
}

impl PrinterInfo {
    /// Descriptor with default connection parameters for the given mode
    pub fn new(display_name: impl Into<String>, connection: Connection) -> Self {
        Self {
            version: CURRENT_PRINTER_INFO_VERSION,
            display_name: display_name.into(),
            connection,
            manual_probe_points: Vec::new(),
        }
    }

    /// Load a descriptor from a `.json` or `.toml` file
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)?;

        let info: Self = match extension(path)? {
            "json" => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };

        info.validate()?;
        tracing::debug!("Loaded printer info '{}' from {}", info.display_name, path.display());
        Ok(info)
    }

    /// Save the descriptor as `.json` or `.toml`
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match extension(path)? {
            "json" => serde_json::to_string_pretty(self)
                .map_err(|e| SettingsError::SaveError(e.to_string()))?,
            _ => toml::to_string_pretty(self)
                .map_err(|e| SettingsError::SaveError(e.to_string()))?,
        };

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the descriptor
    pub fn validate(&self) -> SettingsResult<()> {
        if self.version != CURRENT_PRINTER_INFO_VERSION {
            return Err(SettingsError::UnsupportedVersion {
                found: self.version,
                expected: CURRENT_PRINTER_INFO_VERSION,
            });
        }

        if self.display_name.trim().is_empty() {
            return Err(SettingsError::invalid("display_name", "must not be empty"));
        }

        match &self.connection {
            Connection::Marlin2(serial) => {
                if serial.baud_rate == 0 {
                    return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
                }
                if !(5..=8).contains(&serial.data_bits) {
                    return Err(SettingsError::invalid(
                        "connection.data_bits",
                        format!("must be 5-8, got {}", serial.data_bits),
                    ));
                }
                if !matches!(serial.stop_bits, 1 | 2) {
                    return Err(SettingsError::invalid(
                        "connection.stop_bits",
                        format!("must be 1 or 2, got {}", serial.stop_bits),
                    ));
                }
            }
            Connection::Moonraker(moonraker) => {
                if moonraker.host.as_deref().is_some_and(|h| h.trim().is_empty()) {
                    return Err(SettingsError::invalid("connection.host", "must not be empty"));
                }
            }
        }

        let mut names = HashSet::new();
        for point in &self.manual_probe_points {
            if point.name.trim().is_empty() {
                return Err(SettingsError::invalid(
                    "manual_probe_points.name",
                    "must not be empty",
                ));
            }
            if !names.insert(point.name.as_str()) {
                return Err(SettingsError::invalid(
                    "manual_probe_points.name",
                    format!("duplicate point '{}'", point.name),
                ));
            }
            if !point.x.is_finite() || !point.y.is_finite() {
                return Err(SettingsError::invalid(
                    format!("manual_probe_points.{}", point.name),
                    "coordinates must be finite",
                ));
            }
        }

        Ok(())
    }

    /// Look up a manual probe point by name
    pub fn manual_probe_point(&self, name: &str) -> Option<&ManualProbePoint> {
        self.manual_probe_points.iter().find(|p| p.name == name)
    }
}

fn extension(path: &Path) -> SettingsResult<&'static str> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    EXTENSIONS
        .into_iter()
        .find(|known| ext.eq_ignore_ascii_case(known))
        .ok_or_else(|| SettingsError::UnsupportedFormat(format!("'{}', expected .json or .toml", ext)))
}

/// Directory holding the user's printer descriptors
pub fn default_printers_dir() -> SettingsResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("bedleveler").join("printers"))
        .ok_or_else(|| SettingsError::ConfigDirectory("No config directory on this platform".to_string()))
}

/// Descriptor files in `dir`, sorted by path
pub fn list_printers(dir: &Path) -> SettingsResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && extension(&path).is_ok() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Resolve a descriptor argument: an existing path, or a file stem looked up
/// in `dir` as `.json` then `.toml`
pub fn resolve_descriptor(descriptor: &str, dir: &Path) -> SettingsResult<PathBuf> {
    let path = Path::new(descriptor);
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", descriptor, ext)))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| SettingsError::NotFound(descriptor.to_string()))
}
