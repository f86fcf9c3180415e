//! # BedLeveler Core
//!
//! Core types, traits, and utilities for BedLeveler.
//! Provides the error taxonomy, the operation vocabulary shared by every
//! printer backend, operation events and the numeric helpers used to derive
//! probe and mesh results.

pub mod core;
pub mod data;
pub mod error;
pub mod operation;

pub use self::core::{
    event::{EventDispatcher, PrinterEvent},
    CommandPrinter, OperationResult, SharedProbeSettings,
};

pub use data::{
    average_samples, calculate_mesh_coordinates, Bounds, CurrentPosition, FlowControl,
    MeshCoordinates, Parity, Point2F, ProbeOffsets, ProbeResult, ProbeSettings, SerialSettings,
    Temperatures,
};

pub use error::{
    ConnectionError, Error, FirmwareError, GcodeError, OperationError, ResponseError, Result,
    UsageError,
};

pub use operation::{
    Context, HomeAxes, MoveRequest, OperationId, OperationKind, OperationOutput, OperationRequest,
};
