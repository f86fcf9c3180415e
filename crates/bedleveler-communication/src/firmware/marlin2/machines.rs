//! Marlin2 operation state machines
//!
//! Every operation is a chain of commands. A machine is a state tag plus a
//! pure step function: the parsed reply of the command in flight selects the
//! next state and the next effect. Machines never touch the connection.

use super::commands::{
    CommandKind, CommandReply, GCode, G0, G28, G30, G42, M104, M114, M140, M211, M420, M851,
};
use bedleveler_core::{
    average_samples, calculate_mesh_coordinates, Bounds, CurrentPosition, Error, HomeAxes,
    MoveRequest, OperationOutput, OperationRequest, Point2F, ProbeOffsets, ProbeResult,
    ProbeSettings, ResponseError, Temperatures,
};

/// Marlin reports heater power as PWM duty 0..=127
const MAX_POWER: f64 = 127.0;
/// Z height the nozzle is raised to before visiting the mesh corners
const MESH_RAISE_Z: f64 = 20.0;
/// Feed rate of the mesh corner moves, in mm/min
const MESH_SPEED: f64 = 5000.0;
const MESH_BANNER: &str = "Bilinear Leveling Grid:";

/// Firmware-independent probe defaults. Marlin cannot report them.
pub const DEFAULT_PROBE_SETTINGS: ProbeSettings = ProbeSettings {
    sample_count: 1,
    z_height: 10.0,
    xy_speed: 5000.0,
};

/// Probe offsets and travel bounds read by Init
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub offsets: ProbeOffsets,
    pub bounds: Bounds,
}

/// Printer state an operation starts from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartContext {
    pub probe_settings: ProbeSettings,
    pub calibration: Option<Calibration>,
}

/// What the engine has to do after a transition
#[derive(Debug)]
pub enum Effect {
    /// Queue the next command
    Send(GCode),
    /// The operation finished
    Finish(OperationOutput),
    /// Init finished; cache the calibration
    Initialized(Calibration),
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
    fn send(machine: Machine, gcode: GCode) -> Self {
        Self {
            machine,
            effect: Effect::Send(gcode),
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

    fn unexpected(command: CommandKind) -> Self {
        Self::fail(ResponseError::UnexpectedCommandReply {
            command: command.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitState {
    Homing,
    ReadingOffsets,
    ReadingBounds(ProbeOffsets),
    SettingAbsolute(Calibration),
}

/// Grid dimensions recovered from the verbose M420 report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshSize {
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeshState {
    ReadingReport,
    Raising(MeshSize),
    MovingToFirst(MeshSize),
    WaitingForFirst(MeshSize),
    ReadingFirst(MeshSize),
    MovingToLast(MeshSize, Point2F),
    WaitingForLast(MeshSize, Point2F),
    ReadingLast(MeshSize, Point2F),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStage {
    ReadingOffsets,
    Moving,
    Probing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeState {
    target: Point2F,
    settings: ProbeSettings,
    offsets: Option<ProbeOffsets>,
    samples: Vec<f64>,
    stage: ProbeStage,
}

impl ProbeState {
    /// Move the probe above the target at probe height
    fn move_command(&self, offsets: ProbeOffsets) -> GCode {
        GCode::G0(G0 {
            f: Some(self.settings.xy_speed),
            x: Some(self.target.x - offsets.x),
            y: Some(self.target.y - offsets.y),
            z: Some(self.settings.z_height),
            ..G0::default()
        })
    }

    fn move_next(mut self, offsets: ProbeOffsets) -> Transition {
        let gcode = self.move_command(offsets);
        self.stage = ProbeStage::Moving;
        Transition::send(Machine::Probe(self), gcode)
    }
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
    Init(InitState),
    Home,
    GetTemperatures,
    GetProbeOffsets,
    GetCurrentPosition,
    GetTravelBounds,
    GetMeshCoordinates(MeshState),
    SetBedTemperature,
    SetNozzleTemperature,
    Probe(ProbeState),
    Move(MoveRequest, MoveStage),
    SendLine,
    Done,
}

impl Machine {
    /// Start an operation
    pub fn start(request: &OperationRequest, ctx: &StartContext) -> Transition {
        match request {
            OperationRequest::Init => Transition::send(
                Machine::Init(InitState::Homing),
                GCode::G28(G28::default()),
            ),
            OperationRequest::Home(axes) => Transition::send(Machine::Home, home_command(*axes)),
            OperationRequest::GetTemperatures => {
                Transition::send(Machine::GetTemperatures, GCode::M105(Default::default()))
            }
            OperationRequest::GetProbeOffsets => {
                Transition::send(Machine::GetProbeOffsets, GCode::M851(M851::default()))
            }
            OperationRequest::GetCurrentPosition => {
                Transition::send(Machine::GetCurrentPosition, GCode::M114(M114::default()))
            }
            OperationRequest::GetTravelBounds => match ctx.calibration {
                Some(calibration) => {
                    Transition::finish(OperationOutput::TravelBounds(calibration.bounds))
                }
                None => Transition::send(Machine::GetTravelBounds, GCode::M211(M211::default())),
            },
            OperationRequest::GetMeshCoordinates => Transition::send(
                Machine::GetMeshCoordinates(MeshState::ReadingReport),
                GCode::M420(M420 {
                    v: true,
                    ..M420::default()
                }),
            ),
            OperationRequest::SetBedTemperature { temperature } => Transition::send(
                Machine::SetBedTemperature,
                GCode::M140(M140 {
                    s: Some(*temperature),
                    ..M140::default()
                }),
            ),
            OperationRequest::SetNozzleTemperature { temperature } => Transition::send(
                Machine::SetNozzleTemperature,
                GCode::M104(M104 {
                    s: Some(*temperature),
                    ..M104::default()
                }),
            ),
            OperationRequest::GetDefaultProbeSampleCount => Transition::finish(
                OperationOutput::DefaultProbeSampleCount(ctx.probe_settings.sample_count),
            ),
            OperationRequest::GetDefaultProbeZHeight => Transition::finish(
                OperationOutput::DefaultProbeZHeight(ctx.probe_settings.z_height),
            ),
            OperationRequest::GetDefaultProbeXySpeed => Transition::finish(
                OperationOutput::DefaultProbeXySpeed(ctx.probe_settings.xy_speed),
            ),
            OperationRequest::Probe { x, y } => {
                if let Err(e) = ctx.probe_settings.validate() {
                    return Transition::fail(e);
                }
                let state = ProbeState {
                    target: Point2F::new(*x, *y),
                    settings: ctx.probe_settings,
                    offsets: ctx.calibration.map(|c| c.offsets),
                    samples: Vec::new(),
                    stage: ProbeStage::ReadingOffsets,
                };
                match state.offsets {
                    Some(offsets) => state.move_next(offsets),
                    None => Transition::send(Machine::Probe(state), GCode::M851(M851::default())),
                }
            }
            OperationRequest::Move(request) => {
                let gcode = if request.relative {
                    GCode::G91
                } else {
                    GCode::G90
                };
                Transition::send(Machine::Move(*request, MoveStage::Mode), gcode)
            }
            OperationRequest::SendLine { line } => {
                Transition::send(Machine::SendLine, GCode::Raw(line.clone()))
            }
        }
    }

    /// Advance with the reply of the command in flight
    pub fn step(self, reply: CommandReply) -> Transition {
        match self {
            Machine::Init(state) => step_init(state, reply),
            Machine::Home => Transition::finish(OperationOutput::Homed),
            Machine::GetTemperatures => match reply {
                CommandReply::Temperatures(r) => {
                    Transition::finish(OperationOutput::Temperatures(Temperatures {
                        tool_actual: r.tool_actual,
                        tool_desired: r.tool_desired,
                        tool_power: r.tool_power / MAX_POWER,
                        bed_actual: r.bed_actual,
                        bed_desired: r.bed_desired,
                        bed_power: r.bed_power / MAX_POWER,
                    }))
                }
                _ => Transition::unexpected(CommandKind::M105),
            },
            Machine::GetProbeOffsets => match reply {
                CommandReply::ProbeOffsets(offsets) => {
                    Transition::finish(OperationOutput::ProbeOffsets(offsets))
                }
                _ => Transition::unexpected(CommandKind::M851),
            },
            Machine::GetCurrentPosition => match reply {
                CommandReply::Position(p) => {
                    Transition::finish(OperationOutput::CurrentPosition(CurrentPosition {
                        x: p.x,
                        y: p.y,
                        z: p.z,
                        e: p.e,
                    }))
                }
                _ => Transition::unexpected(CommandKind::M114),
            },
            Machine::GetTravelBounds => match reply {
                CommandReply::SoftEndstops(report) => {
                    Transition::finish(OperationOutput::TravelBounds(report.bounds))
                }
                _ => Transition::unexpected(CommandKind::M211),
            },
            Machine::GetMeshCoordinates(state) => step_mesh(state, reply),
            Machine::SetBedTemperature => Transition::finish(OperationOutput::BedTemperatureSet),
            Machine::SetNozzleTemperature => {
                Transition::finish(OperationOutput::NozzleTemperatureSet)
            }
            Machine::Probe(state) => step_probe(state, reply),
            Machine::Move(request, stage) => step_move(request, stage),
            Machine::SendLine => match reply {
                CommandReply::Lines(lines) => Transition::finish(OperationOutput::LineSent(lines)),
                _ => Transition::unexpected(CommandKind::Raw),
            },
            Machine::Done => Transition::fail(Error::other("Operation already finished")),
        }
    }
}

fn home_command(axes: HomeAxes) -> GCode {
    GCode::G28(G28 {
        x: axes.x,
        y: axes.y,
        z: axes.z,
        ..G28::default()
    })
}

fn step_init(state: InitState, reply: CommandReply) -> Transition {
    match (state, reply) {
        (InitState::Homing, _) => Transition::send(
            Machine::Init(InitState::ReadingOffsets),
            GCode::M851(M851::default()),
        ),
        (InitState::ReadingOffsets, CommandReply::ProbeOffsets(offsets)) => Transition::send(
            Machine::Init(InitState::ReadingBounds(offsets)),
            GCode::M211(M211::default()),
        ),
        (InitState::ReadingOffsets, _) => Transition::unexpected(CommandKind::M851),
        (InitState::ReadingBounds(offsets), CommandReply::SoftEndstops(report)) => {
            Transition::send(
                Machine::Init(InitState::SettingAbsolute(Calibration {
                    offsets,
                    bounds: report.bounds,
                })),
                GCode::G90,
            )
        }
        (InitState::ReadingBounds(_), _) => Transition::unexpected(CommandKind::M211),
        (InitState::SettingAbsolute(calibration), _) => Transition {
            machine: Machine::Done,
            effect: Effect::Initialized(calibration),
        },
    }
}

fn is_integer(token: &str) -> bool {
    token
        .parse::<f64>()
        .map(|v| v.is_finite() && v.fract() == 0.0)
        .unwrap_or(false)
}

/// Recover the grid size from a verbose M420 report.
///
/// Only bilinear leveling is supported. After the banner, the header line
/// numbers the columns and every row line starts with its row index.
pub fn parse_mesh_size(lines: &[String]) -> Result<MeshSize, ResponseError> {
    let mut found_banner = false;
    let mut columns: Option<usize> = None;
    let mut rows = 0usize;

    for line in lines {
        if line.starts_with("echo:") {
            continue;
        }

        if !found_banner {
            if line.contains(MESH_BANNER) {
                found_banner = true;
                continue;
            }
            return Err(ResponseError::UnexpectedMeshLine { line: line.clone() });
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            if columns.is_some() {
                break;
            }
            continue;
        };
        if !is_integer(first) {
            continue;
        }

        match columns {
            None => {
                let last = tokens[tokens.len() - 1];
                let numbered = is_integer(last)
                    && last.parse::<f64>().ok() == Some((tokens.len() - 1) as f64);
                if !numbered {
                    return Err(ResponseError::UnexpectedMeshLine { line: line.clone() });
                }
                columns = Some(tokens.len());
            }
            Some(count) => {
                let index_matches = first.parse::<f64>().ok() == Some(rows as f64);
                if tokens.len() - 1 != count || !index_matches {
                    return Err(ResponseError::UnexpectedMeshLine { line: line.clone() });
                }
                rows += 1;
            }
        }
    }

    if !found_banner {
        return Err(ResponseError::NoMesh);
    }
    match columns {
        Some(columns) if columns >= 2 && rows >= 2 => Ok(MeshSize { rows, columns }),
        _ => Err(ResponseError::IncompleteMesh),
    }
}

fn g42(column: usize, row: usize) -> GCode {
    GCode::G42(G42 {
        f: Some(MESH_SPEED),
        i: Some(column as i32),
        j: Some(row as i32),
    })
}

fn step_mesh(state: MeshState, reply: CommandReply) -> Transition {
    let next = |state: MeshState, gcode: GCode| {
        Transition::send(Machine::GetMeshCoordinates(state), gcode)
    };

    match (state, reply) {
        (MeshState::ReadingReport, CommandReply::Lines(lines)) => match parse_mesh_size(&lines) {
            Ok(size) => {
                tracing::debug!("Detected {}x{} mesh", size.rows, size.columns);
                next(
                    MeshState::Raising(size),
                    GCode::G0(G0 {
                        z: Some(MESH_RAISE_Z),
                        ..G0::default()
                    }),
                )
            }
            Err(e) => Transition::fail(e),
        },
        (MeshState::ReadingReport, _) => Transition::unexpected(CommandKind::M420),
        (MeshState::Raising(size), _) => next(MeshState::MovingToFirst(size), g42(0, 0)),
        (MeshState::MovingToFirst(size), _) => next(MeshState::WaitingForFirst(size), GCode::M400),
        (MeshState::WaitingForFirst(size), _) => next(
            MeshState::ReadingFirst(size),
            GCode::M114(M114::default()),
        ),
        (MeshState::ReadingFirst(size), CommandReply::Position(p)) => next(
            MeshState::MovingToLast(size, Point2F::new(p.x, p.y)),
            g42(size.columns - 1, size.rows - 1),
        ),
        (MeshState::ReadingFirst(_), _) => Transition::unexpected(CommandKind::M114),
        (MeshState::MovingToLast(size, first), _) => {
            next(MeshState::WaitingForLast(size, first), GCode::M400)
        }
        (MeshState::WaitingForLast(size, first), _) => next(
            MeshState::ReadingLast(size, first),
            GCode::M114(M114::default()),
        ),
        (MeshState::ReadingLast(size, first), CommandReply::Position(p)) => {
            finish_mesh(size, first, Point2F::new(p.x, p.y))
        }
        (MeshState::ReadingLast(_, _), _) => Transition::unexpected(CommandKind::M114),
    }
}

fn finish_mesh(size: MeshSize, first: Point2F, last: Point2F) -> Transition {
    match calculate_mesh_coordinates(size.rows, size.columns, first.x, last.x, first.y, last.y) {
        Ok(mesh) => Transition::finish(OperationOutput::MeshCoordinates(mesh)),
        Err(e) => Transition::fail(e),
    }
}

fn step_probe(mut state: ProbeState, reply: CommandReply) -> Transition {
    match (state.stage, reply) {
        (ProbeStage::ReadingOffsets, CommandReply::ProbeOffsets(offsets)) => {
            state.offsets = Some(offsets);
            state.move_next(offsets)
        }
        (ProbeStage::ReadingOffsets, _) => Transition::unexpected(CommandKind::M851),
        (ProbeStage::Moving, _) => {
            state.stage = ProbeStage::Probing;
            let gcode = GCode::G30(G30 {
                e: Some(true),
                x: Some(state.target.x),
                y: Some(state.target.y),
                ..G30::default()
            });
            Transition::send(Machine::Probe(state), gcode)
        }
        (ProbeStage::Probing, CommandReply::BedProbe(report)) => {
            state.samples.push(report.bed.z);
            tracing::debug!(
                "Probe sample {}/{} at {}: {}",
                state.samples.len(),
                state.settings.sample_count,
                state.target,
                report.bed.z
            );

            if state.samples.len() < state.settings.sample_count as usize {
                return match state.offsets {
                    Some(offsets) => state.move_next(offsets),
                    None => Transition::unexpected(CommandKind::M851),
                };
            }

            match average_samples(&state.samples) {
                Ok(z) => Transition::finish(OperationOutput::Probed(ProbeResult {
                    x: state.target.x,
                    y: state.target.y,
                    z,
                })),
                Err(e) => Transition::fail(e),
            }
        }
        (ProbeStage::Probing, _) => Transition::unexpected(CommandKind::G30),
    }
}

fn step_move(request: MoveRequest, stage: MoveStage) -> Transition {
    match stage {
        MoveStage::Mode => Transition::send(
            Machine::Move(request, MoveStage::Moving),
            GCode::G0(G0 {
                e: request.e,
                f: request.f,
                x: request.x,
                y: request.y,
                z: request.z,
                ..G0::default()
            }),
        ),
        MoveStage::Moving if request.wait => {
            Transition::send(Machine::Move(request, MoveStage::Waiting), GCode::M400)
        }
        MoveStage::Moving | MoveStage::Waiting => Transition::finish(OperationOutput::Moved),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::marlin2::commands::{
        BedPoint, BedProbeReport, PositionReport, SoftEndstops,
    };

    fn ctx() -> StartContext {
        StartContext {
            probe_settings: DEFAULT_PROBE_SETTINGS,
            calibration: None,
        }
    }

    fn sent(transition: &Transition) -> String {
        match &transition.effect {
            Effect::Send(gcode) => gcode.request().unwrap(),
            other => panic!("expected a command, got {:?}", other),
        }
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_init_sequence() {
        let t = Machine::start(&OperationRequest::Init, &ctx());
        assert_eq!(sent(&t), "G28");
        let t = t.machine.step(CommandReply::Position(PositionReport::default()));
        assert_eq!(sent(&t), "M851");
        let offsets = ProbeOffsets {
            x: -40.0,
            y: -5.0,
            z: 0.0,
        };
        let t = t.machine.step(CommandReply::ProbeOffsets(offsets));
        assert_eq!(sent(&t), "M211");
        let bounds = Bounds {
            max_x: 235.0,
            max_y: 235.0,
            max_z: 250.0,
            ..Bounds::default()
        };
        let t = t
            .machine
            .step(CommandReply::SoftEndstops(SoftEndstops { on: true, bounds }));
        assert_eq!(sent(&t), "G90");
        let t = t.machine.step(CommandReply::Ok);
        match t.effect {
            Effect::Initialized(calibration) => {
                assert_eq!(calibration.offsets, offsets);
                assert_eq!(calibration.bounds, bounds);
            }
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[test]
    fn test_init_rejects_wrong_reply() {
        let t = Machine::Init(InitState::ReadingOffsets).step(CommandReply::Ok);
        match t.effect {
            Effect::Fail(e) => assert_eq!(e.to_string(), "Failed to process output of M851 command."),
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[test]
    fn test_probe_uses_cached_offsets_and_averages() {
        let settings = ProbeSettings::new(2, 5.0, 3000.0).unwrap();
        let start = StartContext {
            probe_settings: settings,
            calibration: Some(Calibration {
                offsets: ProbeOffsets {
                    x: -40.0,
                    y: -5.0,
                    z: 0.0,
                },
                bounds: Bounds::default(),
            }),
        };

        let t = Machine::start(&OperationRequest::Probe { x: 100.0, y: 50.0 }, &start);
        assert_eq!(sent(&t), "G0 F3000 X140 Y55 Z5");
        let t = t.machine.step(CommandReply::Ok);
        assert_eq!(sent(&t), "G30 E1 X100 Y50");

        let sample = |z: f64| {
            CommandReply::BedProbe(BedProbeReport {
                bed: BedPoint { x: 100.0, y: 50.0, z },
                position: PositionReport::default(),
            })
        };
        let t = t.machine.step(sample(0.25));
        assert_eq!(sent(&t), "G0 F3000 X140 Y55 Z5");
        let t = t.machine.step(CommandReply::Ok);
        let t = t.machine.step(sample(0.75));
        match t.effect {
            Effect::Finish(OperationOutput::Probed(result)) => {
                assert_eq!(result, ProbeResult { x: 100.0, y: 50.0, z: 0.5 });
            }
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[test]
    fn test_probe_reads_offsets_without_calibration() {
        let t = Machine::start(&OperationRequest::Probe { x: 10.0, y: 10.0 }, &ctx());
        assert_eq!(sent(&t), "M851");
        let t = t.machine.step(CommandReply::ProbeOffsets(ProbeOffsets::default()));
        assert_eq!(sent(&t), "G0 F5000 X10 Y10 Z10");
    }

    #[test]
    fn test_travel_bounds_from_cache() {
        let bounds = Bounds {
            max_x: 10.0,
            ..Bounds::default()
        };
        let start = StartContext {
            calibration: Some(Calibration {
                offsets: ProbeOffsets::default(),
                bounds,
            }),
            ..ctx()
        };
        let t = Machine::start(&OperationRequest::GetTravelBounds, &start);
        assert!(matches!(
            t.effect,
            Effect::Finish(OperationOutput::TravelBounds(b)) if b == bounds
        ));
    }

    #[test]
    fn test_move_without_wait() {
        let request = MoveRequest {
            x: Some(10.0),
            f: Some(600.0),
            relative: true,
            ..MoveRequest::default()
        };
        let t = Machine::start(&OperationRequest::Move(request), &ctx());
        assert_eq!(sent(&t), "G91");
        let t = t.machine.step(CommandReply::Ok);
        assert_eq!(sent(&t), "G0 F600 X10");
        let t = t.machine.step(CommandReply::Ok);
        assert!(matches!(t.effect, Effect::Finish(OperationOutput::Moved)));
    }

    #[test]
    fn test_send_line_returns_transcript() {
        let request = OperationRequest::SendLine {
            line: " M503 S0 ".to_string(),
        };
        let t = Machine::start(&request, &ctx());
        assert_eq!(sent(&t), "M503 S0");
        let t = t.machine.step(CommandReply::Lines(lines(&["echo:G21", "ok"])));
        match t.effect {
            Effect::Finish(OperationOutput::LineSent(reply)) => {
                assert_eq!(reply, lines(&["echo:G21", "ok"]));
            }
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[test]
    fn test_temperatures_normalise_power() {
        let t = Machine::GetTemperatures.step(CommandReply::Temperatures(
            crate::firmware::marlin2::commands::TemperatureReport {
                tool_power: 127.0,
                bed_power: 63.5,
                ..Default::default()
            },
        ));
        match t.effect {
            Effect::Finish(OperationOutput::Temperatures(temps)) => {
                assert_eq!(temps.tool_power, 1.0);
                assert_eq!(temps.bed_power, 0.5);
            }
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[test]
    fn test_parse_mesh_size() {
        let report = lines(&[
            "Bilinear Leveling Grid:",
            "      0      1      2",
            " 0 +0.000 +0.000 +0.000",
            " 1 +0.000 +0.000 +0.000",
            "",
            "echo:Bed Leveling ON",
        ]);
        assert_eq!(
            parse_mesh_size(&report),
            Ok(MeshSize {
                rows: 2,
                columns: 3
            })
        );
    }

    #[test]
    fn test_parse_mesh_size_errors() {
        assert_eq!(
            parse_mesh_size(&lines(&["echo:Bed Leveling OFF"])),
            Err(ResponseError::NoMesh)
        );
        assert!(matches!(
            parse_mesh_size(&lines(&["Error:Failed to enable Bed Leveling"])),
            Err(ResponseError::UnexpectedMeshLine { .. })
        ));
        assert!(matches!(
            parse_mesh_size(&lines(&[
                "Bilinear Leveling Grid:",
                "      0      1      2",
                " 1 +0.000 +0.000 +0.000",
            ])),
            Err(ResponseError::UnexpectedMeshLine { .. })
        ));
        assert_eq!(
            parse_mesh_size(&lines(&["Bilinear Leveling Grid:", "      0      1", ""])),
            Err(ResponseError::IncompleteMesh)
        );
    }

    #[test]
    fn test_mesh_sequence() {
        let position = |x: f64, y: f64| {
            CommandReply::Position(PositionReport {
                x,
                y,
                ..PositionReport::default()
            })
        };

        let t = Machine::start(&OperationRequest::GetMeshCoordinates, &ctx());
        assert_eq!(sent(&t), "M420 V");
        let t = t.machine.step(CommandReply::Lines(lines(&[
            "Bilinear Leveling Grid:",
            "      0      1      2",
            " 0 +0.000 +0.000 +0.000",
            " 1 +0.000 +0.000 +0.000",
            " 2 +0.000 +0.000 +0.000",
            "",
        ])));
        assert_eq!(sent(&t), "G0 Z20");
        let t = t.machine.step(CommandReply::Ok);
        assert_eq!(sent(&t), "G42 F5000 I0 J0");
        let t = t.machine.step(CommandReply::Ok);
        assert_eq!(sent(&t), "M400");
        let t = t.machine.step(CommandReply::Ok);
        assert_eq!(sent(&t), "M114");
        let t = t.machine.step(position(10.0, 20.0));
        assert_eq!(sent(&t), "G42 F5000 I2 J2");
        let t = t.machine.step(CommandReply::Ok);
        assert_eq!(sent(&t), "M400");
        let t = t.machine.step(CommandReply::Ok);
        assert_eq!(sent(&t), "M114");
        let t = t.machine.step(position(210.0, 220.0));
        match t.effect {
            Effect::Finish(OperationOutput::MeshCoordinates(mesh)) => {
                assert_eq!(mesh.row_count, 3);
                assert_eq!(mesh.point(0, 0), Some(Point2F::new(10.0, 20.0)));
                assert_eq!(mesh.point(1, 1), Some(Point2F::new(110.0, 120.0)));
                assert_eq!(mesh.point(2, 2), Some(Point2F::new(210.0, 220.0)));
            }
            other => panic!("unexpected effect {:?}", other),
        }
    }
}
