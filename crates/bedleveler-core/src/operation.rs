//! Printer operation vocabulary
//!
//! Every backend exposes the same closed set of high-level operations. A
//! caller submits an [`OperationRequest`] together with a correlation id and
//! an opaque context, and receives exactly one [`OperationOutput`] or error.

use crate::data::{
    Bounds, CurrentPosition, MeshCoordinates, ProbeOffsets, ProbeResult, Temperatures,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-chosen correlation id of an operation
pub type OperationId = String;

/// Caller payload passed through every event of an operation unmodified
pub type Context = serde_json::Value;

/// Operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Init,
    Home,
    GetTemperatures,
    GetProbeOffsets,
    GetCurrentPosition,
    GetTravelBounds,
    GetMeshCoordinates,
    SetBedTemperature,
    SetNozzleTemperature,
    GetDefaultProbeSampleCount,
    GetDefaultProbeZHeight,
    GetDefaultProbeXySpeed,
    Probe,
    Move,
    SendLine,
}

impl OperationKind {
    /// All operation kinds
    pub const ALL: [OperationKind; 15] = [
        OperationKind::Init,
        OperationKind::Home,
        OperationKind::GetTemperatures,
        OperationKind::GetProbeOffsets,
        OperationKind::GetCurrentPosition,
        OperationKind::GetTravelBounds,
        OperationKind::GetMeshCoordinates,
        OperationKind::SetBedTemperature,
        OperationKind::SetNozzleTemperature,
        OperationKind::GetDefaultProbeSampleCount,
        OperationKind::GetDefaultProbeZHeight,
        OperationKind::GetDefaultProbeXySpeed,
        OperationKind::Probe,
        OperationKind::Move,
        OperationKind::SendLine,
    ];

    /// Name used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::Home => "Home",
            Self::GetTemperatures => "GetTemperatures",
            Self::GetProbeOffsets => "GetProbeOffsets",
            Self::GetCurrentPosition => "GetCurrentPosition",
            Self::GetTravelBounds => "GetTravelBounds",
            Self::GetMeshCoordinates => "GetMeshCoordinates",
            Self::SetBedTemperature => "SetBedTemperature",
            Self::SetNozzleTemperature => "SetNozzleTemperature",
            Self::GetDefaultProbeSampleCount => "GetDefaultProbeSampleCount",
            Self::GetDefaultProbeZHeight => "GetDefaultProbeZHeight",
            Self::GetDefaultProbeXySpeed => "GetDefaultProbeXYSpeed",
            Self::Probe => "Probe",
            Self::Move => "Move",
            Self::SendLine => "SendLine",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Axes to home. Homing with no axis selected homes all axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HomeAxes {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

impl HomeAxes {
    /// Home every axis
    pub fn all() -> Self {
        Self::default()
    }

    /// True when no axis is selected
    pub fn is_all(&self) -> bool {
        !self.x && !self.y && !self.z
    }
}

/// Parameters of a move. Axes left as `None` are omitted from the move.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveRequest {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
    /// Feed rate
    pub f: Option<f64>,
    /// Wait for the move to finish before reporting completion
    pub wait: bool,
    /// Interpret coordinates relative to the current position
    pub relative: bool,
}

/// A request for one high-level operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationRequest {
    Init,
    Home(HomeAxes),
    GetTemperatures,
    GetProbeOffsets,
    GetCurrentPosition,
    GetTravelBounds,
    GetMeshCoordinates,
    SetBedTemperature { temperature: f64 },
    SetNozzleTemperature { temperature: f64 },
    GetDefaultProbeSampleCount,
    GetDefaultProbeZHeight,
    GetDefaultProbeXySpeed,
    Probe { x: f64, y: f64 },
    Move(MoveRequest),
    /// Send one raw G-code line and collect whatever the printer answers
    SendLine { line: String },
}

impl OperationRequest {
    /// The kind of operation this request starts
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Init => OperationKind::Init,
            Self::Home(_) => OperationKind::Home,
            Self::GetTemperatures => OperationKind::GetTemperatures,
            Self::GetProbeOffsets => OperationKind::GetProbeOffsets,
            Self::GetCurrentPosition => OperationKind::GetCurrentPosition,
            Self::GetTravelBounds => OperationKind::GetTravelBounds,
            Self::GetMeshCoordinates => OperationKind::GetMeshCoordinates,
            Self::SetBedTemperature { .. } => OperationKind::SetBedTemperature,
            Self::SetNozzleTemperature { .. } => OperationKind::SetNozzleTemperature,
            Self::GetDefaultProbeSampleCount => OperationKind::GetDefaultProbeSampleCount,
            Self::GetDefaultProbeZHeight => OperationKind::GetDefaultProbeZHeight,
            Self::GetDefaultProbeXySpeed => OperationKind::GetDefaultProbeXySpeed,
            Self::Probe { .. } => OperationKind::Probe,
            Self::Move(_) => OperationKind::Move,
            Self::SendLine { .. } => OperationKind::SendLine,
        }
    }
}

/// Typed result of a finished operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "result")]
pub enum OperationOutput {
    Initialized,
    Homed,
    Temperatures(Temperatures),
    ProbeOffsets(ProbeOffsets),
    CurrentPosition(CurrentPosition),
    TravelBounds(Bounds),
    MeshCoordinates(MeshCoordinates),
    BedTemperatureSet,
    NozzleTemperatureSet,
    DefaultProbeSampleCount(u32),
    DefaultProbeZHeight(f64),
    DefaultProbeXySpeed(f64),
    Probed(ProbeResult),
    Moved,
    /// Reply lines of a raw line, in arrival order
    LineSent(Vec<String>),
}

impl OperationOutput {
    /// The kind of operation that produces this output
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Initialized => OperationKind::Init,
            Self::Homed => OperationKind::Home,
            Self::Temperatures(_) => OperationKind::GetTemperatures,
            Self::ProbeOffsets(_) => OperationKind::GetProbeOffsets,
            Self::CurrentPosition(_) => OperationKind::GetCurrentPosition,
            Self::TravelBounds(_) => OperationKind::GetTravelBounds,
            Self::MeshCoordinates(_) => OperationKind::GetMeshCoordinates,
            Self::BedTemperatureSet => OperationKind::SetBedTemperature,
            Self::NozzleTemperatureSet => OperationKind::SetNozzleTemperature,
            Self::DefaultProbeSampleCount(_) => OperationKind::GetDefaultProbeSampleCount,
            Self::DefaultProbeZHeight(_) => OperationKind::GetDefaultProbeZHeight,
            Self::DefaultProbeXySpeed(_) => OperationKind::GetDefaultProbeXySpeed,
            Self::Probed(_) => OperationKind::Probe,
            Self::Moved => OperationKind::Move,
            Self::LineSent(_) => OperationKind::SendLine,
        }
    }
}
