//! Printer abstraction shared by every backend

pub mod event;

use crate::data::{
    Bounds, CurrentPosition, MeshCoordinates, ProbeOffsets, ProbeResult, ProbeSettings,
    Temperatures,
};
use crate::error::{Error, OperationError, Result};
use crate::operation::{
    Context, HomeAxes, MoveRequest, OperationId, OperationKind, OperationOutput, OperationRequest,
};
use async_trait::async_trait;
use event::PrinterEvent;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Result of a single operation call
pub type OperationResult<T> = std::result::Result<T, OperationError>;

/// Probe defaults shared between a printer handle and its operations.
/// `None` until the backend knows them.
pub type SharedProbeSettings = Arc<RwLock<Option<ProbeSettings>>>;

fn mismatch(kind: OperationKind, output: OperationOutput) -> OperationError {
    OperationError::Failed(Error::other(format!(
        "{} produced unexpected output {:?}",
        kind, output
    )))
}

/// Uniform interface over printer backends
///
/// Each call carries a caller-chosen correlation id and an opaque context
/// that is echoed in every [`PrinterEvent`] of the operation. A call
/// resolves to exactly one typed result or error.
#[async_trait]
pub trait CommandPrinter: Send + Sync {
    /// Run one operation to completion
    async fn execute(
        &self,
        id: OperationId,
        context: Context,
        request: OperationRequest,
    ) -> OperationResult<OperationOutput>;

    /// Abort every active operation. Pending calls resolve to
    /// [`OperationError::Aborted`].
    fn abort(&self);

    /// Subscribe to operation events
    fn subscribe(&self) -> broadcast::Receiver<PrinterEvent>;

    /// Current probe defaults, if known
    fn probe_settings(&self) -> Option<ProbeSettings>;

    /// Replace the probe defaults used by later Probe calls
    fn set_probe_settings(&self, settings: ProbeSettings) -> Result<()>;

    async fn init(&self, id: OperationId, context: Context) -> OperationResult<()> {
        match self.execute(id, context, OperationRequest::Init).await? {
            OperationOutput::Initialized => Ok(()),
            other => Err(mismatch(OperationKind::Init, other)),
        }
    }

    async fn home(&self, id: OperationId, context: Context, axes: HomeAxes) -> OperationResult<()> {
        match self.execute(id, context, OperationRequest::Home(axes)).await? {
            OperationOutput::Homed => Ok(()),
            other => Err(mismatch(OperationKind::Home, other)),
        }
    }

    async fn get_temperatures(
        &self,
        id: OperationId,
        context: Context,
    ) -> OperationResult<Temperatures> {
        match self
            .execute(id, context, OperationRequest::GetTemperatures)
            .await?
        {
            OperationOutput::Temperatures(t) => Ok(t),
            other => Err(mismatch(OperationKind::GetTemperatures, other)),
        }
    }

    async fn get_probe_offsets(
        &self,
        id: OperationId,
        context: Context,
    ) -> OperationResult<ProbeOffsets> {
        match self
            .execute(id, context, OperationRequest::GetProbeOffsets)
            .await?
        {
            OperationOutput::ProbeOffsets(o) => Ok(o),
            other => Err(mismatch(OperationKind::GetProbeOffsets, other)),
        }
    }

    async fn get_current_position(
        &self,
        id: OperationId,
        context: Context,
    ) -> OperationResult<CurrentPosition> {
        match self
            .execute(id, context, OperationRequest::GetCurrentPosition)
            .await?
        {
            OperationOutput::CurrentPosition(p) => Ok(p),
            other => Err(mismatch(OperationKind::GetCurrentPosition, other)),
        }
    }

    async fn get_travel_bounds(&self, id: OperationId, context: Context) -> OperationResult<Bounds> {
        match self
            .execute(id, context, OperationRequest::GetTravelBounds)
            .await?
        {
            OperationOutput::TravelBounds(b) => Ok(b),
            other => Err(mismatch(OperationKind::GetTravelBounds, other)),
        }
    }

    async fn get_mesh_coordinates(
        &self,
        id: OperationId,
        context: Context,
    ) -> OperationResult<MeshCoordinates> {
        match self
            .execute(id, context, OperationRequest::GetMeshCoordinates)
            .await?
        {
            OperationOutput::MeshCoordinates(m) => Ok(m),
            other => Err(mismatch(OperationKind::GetMeshCoordinates, other)),
        }
    }

    async fn set_bed_temperature(
        &self,
        id: OperationId,
        context: Context,
        temperature: f64,
    ) -> OperationResult<()> {
        match self
            .execute(id, context, OperationRequest::SetBedTemperature { temperature })
            .await?
        {
            OperationOutput::BedTemperatureSet => Ok(()),
            other => Err(mismatch(OperationKind::SetBedTemperature, other)),
        }
    }

    async fn set_nozzle_temperature(
        &self,
        id: OperationId,
        context: Context,
        temperature: f64,
    ) -> OperationResult<()> {
        match self
            .execute(id, context, OperationRequest::SetNozzleTemperature { temperature })
            .await?
        {
            OperationOutput::NozzleTemperatureSet => Ok(()),
            other => Err(mismatch(OperationKind::SetNozzleTemperature, other)),
        }
    }

    async fn get_default_probe_sample_count(
        &self,
        id: OperationId,
        context: Context,
    ) -> OperationResult<u32> {
        match self
            .execute(id, context, OperationRequest::GetDefaultProbeSampleCount)
            .await?
        {
            OperationOutput::DefaultProbeSampleCount(n) => Ok(n),
            other => Err(mismatch(OperationKind::GetDefaultProbeSampleCount, other)),
        }
    }

    async fn get_default_probe_z_height(
        &self,
        id: OperationId,
        context: Context,
    ) -> OperationResult<f64> {
        match self
            .execute(id, context, OperationRequest::GetDefaultProbeZHeight)
            .await?
        {
            OperationOutput::DefaultProbeZHeight(h) => Ok(h),
            other => Err(mismatch(OperationKind::GetDefaultProbeZHeight, other)),
        }
    }

    async fn get_default_probe_xy_speed(
        &self,
        id: OperationId,
        context: Context,
    ) -> OperationResult<f64> {
        match self
            .execute(id, context, OperationRequest::GetDefaultProbeXySpeed)
            .await?
        {
            OperationOutput::DefaultProbeXySpeed(s) => Ok(s),
            other => Err(mismatch(OperationKind::GetDefaultProbeXySpeed, other)),
        }
    }

    async fn probe(
        &self,
        id: OperationId,
        context: Context,
        x: f64,
        y: f64,
    ) -> OperationResult<ProbeResult> {
        match self
            .execute(id, context, OperationRequest::Probe { x, y })
            .await?
        {
            OperationOutput::Probed(r) => Ok(r),
            other => Err(mismatch(OperationKind::Probe, other)),
        }
    }

    async fn move_to(
        &self,
        id: OperationId,
        context: Context,
        request: MoveRequest,
    ) -> OperationResult<()> {
        match self.execute(id, context, OperationRequest::Move(request)).await? {
            OperationOutput::Moved => Ok(()),
            other => Err(mismatch(OperationKind::Move, other)),
        }
    }

    /// Send a raw line. Returns the reply lines as received.
    async fn send_line(
        &self,
        id: OperationId,
        context: Context,
        line: String,
    ) -> OperationResult<Vec<String>> {
        match self
            .execute(id, context, OperationRequest::SendLine { line })
            .await?
        {
            OperationOutput::LineSent(lines) => Ok(lines),
            other => Err(mismatch(OperationKind::SendLine, other)),
        }
    }
}
