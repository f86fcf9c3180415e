//! Command line interface
//!
//! One invocation opens the printer, runs Init unless told otherwise, runs
//! one operation and prints its result as JSON on stdout.

use crate::connect;
use anyhow::Context as _;
use bedleveler_core::{
    CommandPrinter, HomeAxes, MoveRequest, OperationOutput, OperationRequest, PrinterEvent,
    ProbeSettings,
};
use bedleveler_settings::{default_printers_dir, resolve_descriptor, PrinterInfo};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;

const LONG_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_DATE"), ")");

#[derive(Parser, Debug)]
#[command(
    name = "bedleveler",
    version,
    long_version = LONG_VERSION,
    about = "Run bed leveling operations on Marlin2 and Moonraker printers."
)]
pub struct Cli {
    /// Printer descriptor: a .json/.toml path or a name in the printers directory
    #[arg(short, long)]
    pub printer: String,

    /// Directory searched for descriptor names
    #[arg(long)]
    pub printers_dir: Option<PathBuf>,

    /// Serial device of a Marlin2 printer
    #[arg(long)]
    pub port: Option<String>,

    /// Moonraker host, overrides the descriptor
    #[arg(long)]
    pub host: Option<String>,

    /// Do not run Init before the operation
    #[arg(long)]
    pub skip_init: bool,

    #[command(subcommand)]
    pub operation: OperationCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum OperationCommand {
    /// Home and read the printer calibration
    Init,
    /// Home the given axes, all when none is given
    Home {
        #[arg(short)]
        x: bool,
        #[arg(short)]
        y: bool,
        #[arg(short)]
        z: bool,
    },
    /// Read tool and bed temperatures
    Temperatures,
    /// Read the probe offsets
    ProbeOffsets,
    /// Read the current toolhead position
    Position,
    /// Read the travel bounds
    TravelBounds,
    /// Compute the bed mesh probe locations
    Mesh,
    /// Set the bed target temperature
    SetBedTemperature { temperature: f64 },
    /// Set the nozzle target temperature
    SetNozzleTemperature { temperature: f64 },
    /// Default number of samples per probe
    DefaultSampleCount,
    /// Default probe travel height
    DefaultZHeight,
    /// Default probe travel speed
    DefaultXySpeed,
    /// Probe the bed at a location
    Probe {
        #[arg(allow_negative_numbers = true)]
        x: f64,
        #[arg(allow_negative_numbers = true)]
        y: f64,
        #[command(flatten)]
        overrides: ProbeOverrides,
    },
    /// Probe one of the descriptor's manual probe points
    ManualProbe {
        name: String,
        #[command(flatten)]
        overrides: ProbeOverrides,
    },
    /// Move the toolhead
    Move {
        #[arg(long, allow_negative_numbers = true)]
        x: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        y: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        z: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        e: Option<f64>,
        /// Feed rate
        #[arg(long)]
        f: Option<f64>,
        /// Wait for the move to finish
        #[arg(long)]
        wait: bool,
        /// Coordinates are relative to the current position
        #[arg(long)]
        relative: bool,
    },
    /// Send one raw G-code line (or a Moonraker API path) and print the reply.
    /// Never runs Init.
    SendLine {
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },
}

/// Probe settings replacing the printer defaults for one run
#[derive(clap::Args, Debug, Clone, Copy, PartialEq, Default)]
pub struct ProbeOverrides {
    #[arg(long)]
    pub samples: Option<u32>,
    #[arg(long)]
    pub z_height: Option<f64>,
    #[arg(long)]
    pub xy_speed: Option<f64>,
}

impl ProbeOverrides {
    fn is_empty(&self) -> bool {
        self.samples.is_none() && self.z_height.is_none() && self.xy_speed.is_none()
    }

    /// Merge with the printer's current defaults
    pub fn apply(&self, current: Option<ProbeSettings>) -> anyhow::Result<Option<ProbeSettings>> {
        if self.is_empty() {
            return Ok(None);
        }
        let missing = "Probe defaults are unknown, pass --samples, --z-height and --xy-speed";
        let settings = ProbeSettings::new(
            self.samples
                .or(current.map(|c| c.sample_count))
                .context(missing)?,
            self.z_height.or(current.map(|c| c.z_height)).context(missing)?,
            self.xy_speed.or(current.map(|c| c.xy_speed)).context(missing)?,
        )?;
        Ok(Some(settings))
    }
}

impl OperationCommand {
    /// The operation request, resolving manual probe points against `info`
    pub fn request(&self, info: &PrinterInfo) -> anyhow::Result<OperationRequest> {
        let request = match self {
            Self::Init => OperationRequest::Init,
            Self::Home { x, y, z } => OperationRequest::Home(HomeAxes {
                x: *x,
                y: *y,
                z: *z,
            }),
            Self::Temperatures => OperationRequest::GetTemperatures,
            Self::ProbeOffsets => OperationRequest::GetProbeOffsets,
            Self::Position => OperationRequest::GetCurrentPosition,
            Self::TravelBounds => OperationRequest::GetTravelBounds,
            Self::Mesh => OperationRequest::GetMeshCoordinates,
            Self::SetBedTemperature { temperature } => OperationRequest::SetBedTemperature {
                temperature: *temperature,
            },
            Self::SetNozzleTemperature { temperature } => OperationRequest::SetNozzleTemperature {
                temperature: *temperature,
            },
            Self::DefaultSampleCount => OperationRequest::GetDefaultProbeSampleCount,
            Self::DefaultZHeight => OperationRequest::GetDefaultProbeZHeight,
            Self::DefaultXySpeed => OperationRequest::GetDefaultProbeXySpeed,
            Self::Probe { x, y, .. } => OperationRequest::Probe { x: *x, y: *y },
            Self::ManualProbe { name, .. } => {
                let point = info.manual_probe_point(name).with_context(|| {
                    format!("'{}' has no manual probe point '{}'", info.display_name, name)
                })?;
                OperationRequest::Probe {
                    x: point.x,
                    y: point.y,
                }
            }
            Self::Move {
                x,
                y,
                z,
                e,
                f,
                wait,
                relative,
            } => OperationRequest::Move(MoveRequest {
                x: *x,
                y: *y,
                z: *z,
                e: *e,
                f: *f,
                wait: *wait,
                relative: *relative,
            }),
            Self::SendLine { words } => OperationRequest::SendLine {
                line: words.join(" "),
            },
        };
        Ok(request)
    }

    fn probe_overrides(&self) -> ProbeOverrides {
        match self {
            Self::Probe { overrides, .. } | Self::ManualProbe { overrides, .. } => *overrides,
            _ => ProbeOverrides::default(),
        }
    }
}

fn operation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn log_events(printer: &dyn CommandPrinter) {
    let mut events = printer.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PrinterEvent::Sent { kind, command, .. }) => {
                    tracing::debug!("{} sent: {}", kind, command)
                }
                Ok(event) => tracing::debug!("{}", event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} printer events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Run one invocation and return the operation output
pub async fn run(cli: Cli) -> anyhow::Result<OperationOutput> {
    let printers_dir = match &cli.printers_dir {
        Some(dir) => dir.clone(),
        None => default_printers_dir()?,
    };
    let path = resolve_descriptor(&cli.printer, &printers_dir)?;
    let info = PrinterInfo::load_from_file(&path)
        .with_context(|| format!("Failed to load printer info {}", path.display()))?;
    tracing::info!(
        "Using {} printer '{}'",
        info.connection.mode_name(),
        info.display_name
    );

    let request = cli.operation.request(&info)?;
    let printer = connect(&info, cli.port.as_deref(), cli.host.as_deref())?;
    log_events(printer.as_ref());

    let context = json!({ "printer": info.display_name });

    let needs_init = !matches!(
        request,
        OperationRequest::Init | OperationRequest::SendLine { .. }
    );
    if !cli.skip_init && needs_init {
        printer
            .init(operation_id(), context.clone())
            .await
            .context("Init failed")?;
    }

    if let Some(settings) = cli
        .operation
        .probe_overrides()
        .apply(printer.probe_settings())?
    {
        printer.set_probe_settings(settings)?;
    }

    let kind = request.kind();
    let output = printer
        .execute(operation_id(), context, request)
        .await
        .with_context(|| format!("{} failed", kind))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bedleveler_core::SerialSettings;
    use bedleveler_settings::{Connection, ManualProbePoint};

    fn info() -> PrinterInfo {
        let mut info = PrinterInfo::new("Test", Connection::Marlin2(SerialSettings::default()));
        info.manual_probe_points.push(ManualProbePoint {
            name: "Center".to_string(),
            row: 1,
            column: 1,
            x: 117.5,
            y: 120.0,
        });
        info
    }

    #[test]
    fn test_parse_probe_with_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "bedleveler",
            "--printer",
            "ender3",
            "--port",
            "/dev/ttyUSB0",
            "probe",
            "-5",
            "20.5",
            "--samples",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(
            cli.operation.request(&info()).unwrap(),
            OperationRequest::Probe { x: -5.0, y: 20.5 }
        );
        assert_eq!(cli.operation.probe_overrides().samples, Some(3));
    }

    #[test]
    fn test_parse_home_axes() {
        let cli = Cli::try_parse_from(["bedleveler", "-p", "n4", "--skip-init", "home", "-z"])
            .unwrap();
        assert!(cli.skip_init);
        assert_eq!(
            cli.operation.request(&info()).unwrap(),
            OperationRequest::Home(HomeAxes {
                z: true,
                ..HomeAxes::default()
            })
        );
    }

    #[test]
    fn test_parse_send_line_joins_words() {
        let cli = Cli::try_parse_from(["bedleveler", "-p", "ender3", "send-line", "G0", "X-5", "F600"])
            .unwrap();
        assert_eq!(
            cli.operation.request(&info()).unwrap(),
            OperationRequest::SendLine {
                line: "G0 X-5 F600".to_string()
            }
        );
        assert!(Cli::try_parse_from(["bedleveler", "-p", "ender3", "send-line"]).is_err());
    }

    #[test]
    fn test_manual_probe_point_lookup() {
        let command = OperationCommand::ManualProbe {
            name: "Center".to_string(),
            overrides: ProbeOverrides::default(),
        };
        assert_eq!(
            command.request(&info()).unwrap(),
            OperationRequest::Probe { x: 117.5, y: 120.0 }
        );

        let command = OperationCommand::ManualProbe {
            name: "Corner".to_string(),
            overrides: ProbeOverrides::default(),
        };
        assert!(command.request(&info()).is_err());
    }

    #[test]
    fn test_probe_overrides_merge_with_defaults() {
        let current = ProbeSettings::new(1, 10.0, 5000.0).unwrap();
        let overrides = ProbeOverrides {
            samples: Some(4),
            ..ProbeOverrides::default()
        };
        assert_eq!(
            overrides.apply(Some(current)).unwrap(),
            Some(ProbeSettings::new(4, 10.0, 5000.0).unwrap())
        );
        assert_eq!(ProbeOverrides::default().apply(Some(current)).unwrap(), None);
        assert!(overrides.apply(None).is_err());

        let invalid = ProbeOverrides {
            samples: Some(0),
            ..ProbeOverrides::default()
        };
        assert!(invalid.apply(Some(current)).is_err());
    }
}
