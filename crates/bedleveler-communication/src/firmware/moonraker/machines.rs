//! Moonraker operation state machines
//!
//! Each step is one GET request. The machine names the next endpoint and,
//! given the unwrapped `result` of the reply, decides the following one.

use super::reply::{expect_ok, Fields};
use crate::firmware::format_number;
use bedleveler_core::{
    calculate_mesh_coordinates, Bounds, CurrentPosition, Error, HomeAxes, MoveRequest,
    OperationOutput, OperationRequest, Point2F, ProbeOffsets, ProbeResult, ProbeSettings,
    Temperatures, UsageError,
};
use serde_json::Value;

/// Safety margin added to `bed_mesh.horizontal_move_z`, in mm
const PROBE_HEIGHT_MARGIN: f64 = 10.0;

/// A Moonraker REST endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `printer/objects/query` with `&`-joined object names
    Query(String),
    /// `printer/gcode/script` with a raw G-code script
    Script(String),
    /// Any other API path, starting with `/`
    Path(String),
}

impl Endpoint {
    fn query(objects: &str) -> Self {
        Endpoint::Query(objects.to_string())
    }

    fn script(gcode: impl Into<String>) -> Self {
        Endpoint::Script(gcode.into())
    }

    /// Full request URL on `host`
    pub fn url(&self, host: &str) -> String {
        match self {
            Endpoint::Query(objects) => format!("http://{}/printer/objects/query?{}", host, objects),
            Endpoint::Script(gcode) => format!(
                "http://{}/printer/gcode/script?script={}",
                host,
                urlencoding::encode(gcode)
            ),
            Endpoint::Path(path) => format!("http://{}{}", host, path),
        }
    }
}

/// What the printer has to do after a transition
#[derive(Debug)]
pub enum Effect {
    /// Issue the next request
    Get(Endpoint),
    /// The operation finished
    Finish(OperationOutput),
    /// Init finished; store the probe defaults declared in `printer.cfg`
    Initialized(ProbeSettings),
    /// The operation failed
    Fail(Error),
}

/// Result of starting or stepping a machine
#[derive(Debug)]
pub struct Transition {
    pub machine: Machine,
    pub effect: Effect,
}

impl Transition {
    fn get(machine: Machine, endpoint: Endpoint) -> Self {
        Self {
            machine,
            effect: Effect::Get(endpoint),
        }
    }

    fn finish(output: OperationOutput) -> Self {
        Self {
            machine: Machine::Done,
            effect: Effect::Finish(output),
        }
    }

    fn fail(error: impl Into<Error>) -> Self {
        Self {
            machine: Machine::Done,
            effect: Effect::Fail(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Homing,
    ReadingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStage {
    ReadingOffsets,
    Raising,
    WaitingForRaise,
    Moving,
    WaitingForMove,
    Probing,
    ReadingResult,
}

impl ProbeStage {
    fn context(&self) -> &'static str {
        match self {
            ProbeStage::ReadingOffsets => "Probe (query)",
            ProbeStage::Raising => "Probe (raise)",
            ProbeStage::WaitingForRaise => "Probe (wait for raise)",
            ProbeStage::Moving => "Probe (move)",
            ProbeStage::WaitingForMove => "Probe (wait for move)",
            ProbeStage::Probing => "Probe (probe)",
            ProbeStage::ReadingResult => "Probe (result)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeState {
    target: Point2F,
    settings: ProbeSettings,
    offsets: Point2F,
    stage: ProbeStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStage {
    Mode,
    Moving,
    Waiting,
}

/// A running operation
#[derive(Debug, Clone, PartialEq)]
pub enum Machine {
    Init(InitStage),
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
    Probe(ProbeState),
    Move(MoveRequest, MoveStage),
    SendLine,
    Done,
}

impl Machine {
    /// Start an operation. `probe_settings` is `None` until Init succeeded.
    pub fn start(request: &OperationRequest, probe_settings: Option<ProbeSettings>) -> Transition {
        let config = || Endpoint::query("configfile");
        match request {
            OperationRequest::Init => {
                Transition::get(Machine::Init(InitStage::Homing), Endpoint::script("G28"))
            }
            OperationRequest::Home(axes) => {
                Transition::get(Machine::Home, Endpoint::script(home_script(*axes)))
            }
            OperationRequest::GetTemperatures => Transition::get(
                Machine::GetTemperatures,
                Endpoint::query("heater_bed&extruder"),
            ),
            OperationRequest::GetProbeOffsets => {
                Transition::get(Machine::GetProbeOffsets, config())
            }
            OperationRequest::GetCurrentPosition => {
                Transition::get(Machine::GetCurrentPosition, Endpoint::query("gcode_move"))
            }
            OperationRequest::GetTravelBounds => {
                Transition::get(Machine::GetTravelBounds, Endpoint::query("toolhead"))
            }
            OperationRequest::GetMeshCoordinates => {
                Transition::get(Machine::GetMeshCoordinates, config())
            }
            OperationRequest::SetBedTemperature { temperature } => Transition::get(
                Machine::SetBedTemperature,
                Endpoint::script(format!("M140 S{}", format_number(*temperature))),
            ),
            OperationRequest::SetNozzleTemperature { temperature } => Transition::get(
                Machine::SetNozzleTemperature,
                Endpoint::script(format!("M104 S{}", format_number(*temperature))),
            ),
            OperationRequest::GetDefaultProbeSampleCount => {
                Transition::get(Machine::GetDefaultProbeSampleCount, config())
            }
            OperationRequest::GetDefaultProbeZHeight => {
                Transition::get(Machine::GetDefaultProbeZHeight, config())
            }
            OperationRequest::GetDefaultProbeXySpeed => {
                Transition::get(Machine::GetDefaultProbeXySpeed, config())
            }
            OperationRequest::Probe { x, y } => {
                let Some(settings) = probe_settings else {
                    return Transition::fail(UsageError::ProbeDefaultsUnknown);
                };
                if let Err(e) = settings.validate() {
                    return Transition::fail(e);
                }
                let state = ProbeState {
                    target: Point2F::new(*x, *y),
                    settings,
                    offsets: Point2F::default(),
                    stage: ProbeStage::ReadingOffsets,
                };
                Transition::get(Machine::Probe(state), config())
            }
            OperationRequest::Move(request) => {
                let mode = if request.relative { "G91" } else { "G90" };
                Transition::get(
                    Machine::Move(*request, MoveStage::Mode),
                    Endpoint::script(mode),
                )
            }
            OperationRequest::SendLine { line } => {
                let line = line.trim();
                if line.is_empty() {
                    return Transition::fail(UsageError::InvalidLine {
                        line: line.to_string(),
                        reason: "line is empty".to_string(),
                    });
                }
                let endpoint = if line.starts_with('/') {
                    Endpoint::Path(line.to_string())
                } else {
                    Endpoint::script(line)
                };
                Transition::get(Machine::SendLine, endpoint)
            }
        }
    }

    /// Advance with the `result` of the request in flight
    pub fn step(self, result: Value) -> Transition {
        match self.advance(&result) {
            Ok(transition) => transition,
            Err(error) => Transition::fail(error),
        }
    }

    fn advance(self, result: &Value) -> Result<Transition, Error> {
        let transition = match self {
            Machine::Init(InitStage::Homing) => {
                expect_ok("Init (home)", result)?;
                Transition::get(
                    Machine::Init(InitStage::ReadingConfig),
                    Endpoint::query("configfile"),
                )
            }
            Machine::Init(InitStage::ReadingConfig) => {
                let settings = probe_defaults(&Fields::new("Init (configfile)", result))?;
                Transition {
                    machine: Machine::Done,
                    effect: Effect::Initialized(settings),
                }
            }
            Machine::Home => {
                expect_ok("Home", result)?;
                Transition::finish(OperationOutput::Homed)
            }
            Machine::GetTemperatures => {
                let fields = Fields::new("GetTemperatures", result);
                Transition::finish(OperationOutput::Temperatures(Temperatures {
                    tool_actual: fields.f64("status.extruder.temperature")?,
                    tool_desired: fields.f64("status.extruder.target")?,
                    tool_power: fields.f64("status.extruder.power")?,
                    bed_actual: fields.f64("status.heater_bed.temperature")?,
                    bed_desired: fields.f64("status.heater_bed.target")?,
                    bed_power: fields.f64("status.heater_bed.power")?,
                }))
            }
            Machine::GetProbeOffsets => {
                let probe = Fields::new("GetProbeOffsets", result).config_section("probe")?;
                Transition::finish(OperationOutput::ProbeOffsets(ProbeOffsets {
                    x: probe.f64("x_offset")?,
                    y: probe.f64("y_offset")?,
                    z: probe.f64("z_offset")?,
                }))
            }
            Machine::GetCurrentPosition => {
                let fields = Fields::new("GetCurrentPosition", result);
                Transition::finish(OperationOutput::CurrentPosition(CurrentPosition {
                    x: fields.f64("status.gcode_move.gcode_position.0")?,
                    y: fields.f64("status.gcode_move.gcode_position.1")?,
                    z: fields.f64("status.gcode_move.gcode_position.2")?,
                    e: fields.f64("status.gcode_move.gcode_position.3")?,
                }))
            }
            Machine::GetTravelBounds => {
                let fields = Fields::new("GetTravelBounds", result);
                Transition::finish(OperationOutput::TravelBounds(Bounds {
                    min_x: fields.f64("status.toolhead.axis_minimum.0")?,
                    max_x: fields.f64("status.toolhead.axis_maximum.0")?,
                    min_y: fields.f64("status.toolhead.axis_minimum.1")?,
                    max_y: fields.f64("status.toolhead.axis_maximum.1")?,
                    min_z: fields.f64("status.toolhead.axis_minimum.2")?,
                    max_z: fields.f64("status.toolhead.axis_maximum.2")?,
                }))
            }
            Machine::GetMeshCoordinates => {
                let bed_mesh =
                    Fields::new("GetMeshCoordinates", result).config_section("bed_mesh")?;
                let (min_x, min_y) = bed_mesh.pair("mesh_min")?;
                let (max_x, max_y) = bed_mesh.pair("mesh_max")?;
                let (columns, rows) = bed_mesh.counts("probe_count")?;
                let mesh = calculate_mesh_coordinates(rows, columns, min_x, max_x, min_y, max_y)?;
                Transition::finish(OperationOutput::MeshCoordinates(mesh))
            }
            Machine::SetBedTemperature => {
                expect_ok("Set bed temperature", result)?;
                Transition::finish(OperationOutput::BedTemperatureSet)
            }
            Machine::SetNozzleTemperature => {
                expect_ok("Set nozzle temperature", result)?;
                Transition::finish(OperationOutput::NozzleTemperatureSet)
            }
            Machine::GetDefaultProbeSampleCount => {
                let fields = Fields::new("GetDefaultProbeSampleCount", result);
                let samples = fields.config_section("probe")?.u32("samples")?;
                Transition::finish(OperationOutput::DefaultProbeSampleCount(samples))
            }
            Machine::GetDefaultProbeZHeight => {
                let fields = Fields::new("GetDefaultProbeZHeight", result);
                let z = fields.config_section("bed_mesh")?.f64("horizontal_move_z")?;
                Transition::finish(OperationOutput::DefaultProbeZHeight(z))
            }
            Machine::GetDefaultProbeXySpeed => {
                let fields = Fields::new("GetDefaultProbeXYSpeed", result);
                let speed = fields.config_section("bed_mesh")?.f64("speed")?;
                Transition::finish(OperationOutput::DefaultProbeXySpeed(speed))
            }
            Machine::Probe(state) => step_probe(state, result)?,
            Machine::Move(request, stage) => step_move(request, stage, result)?,
            Machine::SendLine => Transition::finish(OperationOutput::LineSent(reply_lines(result))),
            Machine::Done => return Err(Error::other("Operation already finished")),
        };
        Ok(transition)
    }
}

fn home_script(axes: HomeAxes) -> String {
    let mut script = String::from("G28");
    for (selected, letter) in [(axes.x, " X"), (axes.y, " Y"), (axes.z, " Z")] {
        if selected {
            script.push_str(letter);
        }
    }
    script
}

/// Probe defaults declared in `printer.cfg`
fn probe_defaults(fields: &Fields<'_>) -> Result<ProbeSettings, Error> {
    let probe = fields.config_section("probe")?;
    let bed_mesh = fields.config_section("bed_mesh")?;
    let settings = ProbeSettings::new(
        probe.u32("samples")?,
        bed_mesh.f64("horizontal_move_z")? + PROBE_HEIGHT_MARGIN,
        bed_mesh.f64("speed")?,
    )?;
    Ok(settings)
}

fn step_probe(mut state: ProbeState, result: &Value) -> Result<Transition, Error> {
    let context = state.stage.context();
    let (stage, endpoint) = match state.stage {
        ProbeStage::ReadingOffsets => {
            let probe = Fields::new(context, result).config_section("probe")?;
            state.offsets = Point2F::new(probe.f64("x_offset")?, probe.f64("y_offset")?);
            (
                ProbeStage::Raising,
                Endpoint::script(format!("G0 Z{}", format_number(state.settings.z_height))),
            )
        }
        ProbeStage::Raising => {
            expect_ok(context, result)?;
            (ProbeStage::WaitingForRaise, Endpoint::script("M400"))
        }
        ProbeStage::WaitingForRaise => {
            expect_ok(context, result)?;
            // Klipper speeds are mm/s, G0 feed rates mm/min
            let script = format!(
                "G0 X{} Y{} F{}",
                format_number(state.target.x - state.offsets.x),
                format_number(state.target.y - state.offsets.y),
                format_number(60.0 * state.settings.xy_speed)
            );
            (ProbeStage::Moving, Endpoint::script(script))
        }
        ProbeStage::Moving => {
            expect_ok(context, result)?;
            (ProbeStage::WaitingForMove, Endpoint::script("M400"))
        }
        ProbeStage::WaitingForMove => {
            expect_ok(context, result)?;
            (
                ProbeStage::Probing,
                Endpoint::script(format!("PROBE SAMPLES={}", state.settings.sample_count)),
            )
        }
        ProbeStage::Probing => {
            expect_ok(context, result)?;
            (ProbeStage::ReadingResult, Endpoint::query("probe"))
        }
        ProbeStage::ReadingResult => {
            let z = Fields::new(context, result).f64("status.probe.last_z_result")?;
            tracing::debug!("Probed {}: {}", state.target, z);
            return Ok(Transition::finish(OperationOutput::Probed(ProbeResult {
                x: state.target.x,
                y: state.target.y,
                z,
            })));
        }
    };
    state.stage = stage;
    Ok(Transition::get(Machine::Probe(state), endpoint))
}

/// Console rendering of a `result`: strings as-is, anything else as JSON
fn reply_lines(result: &Value) -> Vec<String> {
    let text = match result {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    text.lines().map(str::to_string).collect()
}

fn move_script(request: &MoveRequest) -> String {
    let mut script = String::from("G0");
    let params = [
        ('X', request.x),
        ('Y', request.y),
        ('Z', request.z),
        ('E', request.e),
        ('F', request.f),
    ];
    for (letter, value) in params {
        if let Some(value) = value {
            script.push(' ');
            script.push(letter);
            script.push_str(&format_number(value));
        }
    }
    script
}

fn step_move(request: MoveRequest, stage: MoveStage, result: &Value) -> Result<Transition, Error> {
    let transition = match stage {
        MoveStage::Mode => {
            expect_ok("Move (mode)", result)?;
            Transition::get(
                Machine::Move(request, MoveStage::Moving),
                Endpoint::script(move_script(&request)),
            )
        }
        MoveStage::Moving if request.wait => {
            expect_ok("Move (move)", result)?;
            Transition::get(
                Machine::Move(request, MoveStage::Waiting),
                Endpoint::script("M400"),
            )
        }
        MoveStage::Moving | MoveStage::Waiting => {
            expect_ok("Move", result)?;
            Transition::finish(OperationOutput::Moved)
        }
    };
    Ok(transition)
}
