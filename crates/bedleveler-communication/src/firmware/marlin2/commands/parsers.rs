//! Per-command reply parsers

use super::lines::{
    axis_value, is_auto_report, is_metadata, is_ok, is_temperature_auto_report, parse_bed,
    parse_min_max, parse_number, parse_position, verify_ok, TARING_PROBE,
};
use super::{
    BedPoint, BedProbeReport, CommandReply, GCode, PositionReport, SoftEndstops, TemperatureReport,
};
use bedleveler_core::{Bounds, Error, FirmwareError, GcodeError, ProbeOffsets};

const PROBE_PAST_BED: &str = "Z Probe Past Bed";
const SOFT_ENDSTOPS_ECHO: &str = "echo:Soft endstops:";

type Step = Result<Option<CommandReply>, Error>;

fn unexpected(line: &str) -> GcodeError {
    GcodeError::UnexpectedResponse {
        line: line.to_string(),
    }
}

fn missing(payload: &str, line: &str) -> GcodeError {
    GcodeError::MissingPayload {
        payload: payload.to_string(),
        line: line.to_string(),
    }
}

fn finish(line: &str, reply: CommandReply) -> Step {
    verify_ok(line)?;
    Ok(Some(reply))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum G30State {
    Bed,
    Position(BedPoint),
    Ok(BedProbeReport),
    PastBed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum M211State {
    State,
    Bounds(bool),
    Ok(SoftEndstops),
}

/// Reply parser, one variant per reply shape
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReplyParser {
    /// Bare acknowledgement
    Ok,
    /// Position line followed by ok. A bare ok is accepted when `optional`,
    /// which `G28 O` answers with once the axes are already trusted.
    Position {
        report: Option<PositionReport>,
        optional: bool,
    },
    /// Bed line, position line, ok
    BedProbe(G30State),
    /// Single `ok T:...` line
    Temperatures,
    /// Echoed text followed by ok
    Message(Option<String>),
    /// M211 query
    SoftEndstops(M211State),
    /// M851 query
    ProbeOffsets(Option<ProbeOffsets>),
    /// Payload lines until ok, without metadata or auto reports
    Lines(Vec<String>),
    /// Every line up to and including the acknowledgement
    Transcript(Vec<String>),
}

impl ReplyParser {
    pub(crate) fn for_gcode(gcode: &GCode) -> Self {
        match gcode {
            GCode::G28(p) => Self::Position {
                report: None,
                optional: p.o,
            },
            GCode::M114(_) => Self::Position {
                report: None,
                optional: false,
            },
            GCode::G30(_) => Self::BedProbe(G30State::Bed),
            GCode::M105(_) => Self::Temperatures,
            GCode::M118(_) => Self::Message(None),
            GCode::M211(p) if p.s.is_none() => Self::SoftEndstops(M211State::State),
            GCode::M851(p) if p.is_query() => Self::ProbeOffsets(None),
            GCode::M420(_) => Self::Lines(Vec::new()),
            GCode::Raw(_) => Self::Transcript(Vec::new()),
            GCode::G0(_)
            | GCode::G42(_)
            | GCode::G90
            | GCode::G91
            | GCode::M104(_)
            | GCode::M140(_)
            | GCode::M211(_)
            | GCode::M400
            | GCode::M851(_) => Self::Ok,
        }
    }

    pub(crate) fn process_line(&mut self, line: &str) -> Step {
        match self {
            Self::Ok => {
                if is_metadata(line) || is_auto_report(line) {
                    return Ok(None);
                }
                finish(line, CommandReply::Ok)
            }
            Self::Position { report, optional } => process_position(report, *optional, line),
            Self::BedProbe(state) => process_bed_probe(state, line),
            Self::Temperatures => {
                if is_metadata(line) || is_auto_report(line) {
                    return Ok(None);
                }
                Ok(Some(CommandReply::Temperatures(parse_temperatures(line)?)))
            }
            Self::Message(text) => match text.take() {
                None => {
                    *text = Some(line.strip_suffix('\r').unwrap_or(line).to_string());
                    Ok(None)
                }
                Some(message) => finish(line, CommandReply::Message(message)),
            },
            Self::SoftEndstops(state) => process_soft_endstops(state, line),
            Self::ProbeOffsets(offsets) => process_probe_offsets(offsets, line),
            Self::Lines(collected) => {
                if is_metadata(line) || is_auto_report(line) {
                    return Ok(None);
                }
                if is_ok(line) {
                    return finish(line, CommandReply::Lines(std::mem::take(collected)));
                }
                collected.push(line.to_string());
                Ok(None)
            }
            Self::Transcript(collected) => {
                collected.push(line.to_string());
                if is_ok(line) {
                    return Ok(Some(CommandReply::Lines(std::mem::take(collected))));
                }
                Ok(None)
            }
        }
    }
}

fn process_position(report: &mut Option<PositionReport>, optional: bool, line: &str) -> Step {
    if is_metadata(line) || line == TARING_PROBE {
        return Ok(None);
    }

    if is_temperature_auto_report(line) {
        *report = None;
        return Ok(None);
    }

    if line.starts_with("X:") {
        *report = Some(parse_position(line)?);
        return Ok(None);
    }

    match report.take() {
        Some(position) => finish(line, CommandReply::Position(position)),
        None if optional => finish(line, CommandReply::Ok),
        None => Err(missing("position", line).into()),
    }
}

fn process_bed_probe(state: &mut G30State, line: &str) -> Step {
    if is_metadata(line) || line == TARING_PROBE || is_temperature_auto_report(line) {
        return Ok(None);
    }

    if line == PROBE_PAST_BED {
        *state = G30State::PastBed;
        return Ok(None);
    }

    match *state {
        G30State::Bed => {
            if line.starts_with("Bed") {
                *state = G30State::Position(parse_bed(line)?);
                Ok(None)
            } else if line.starts_with("X:") {
                Ok(None)
            } else if is_ok(line) {
                Err(missing("bed position", line).into())
            } else {
                Err(unexpected(line).into())
            }
        }
        G30State::Position(bed) => {
            if is_ok(line) {
                return Err(missing("position", line).into());
            }
            *state = G30State::Ok(BedProbeReport {
                bed,
                position: parse_position(line)?,
            });
            Ok(None)
        }
        G30State::Ok(report) => {
            if line.starts_with("X:") {
                return Ok(None);
            }
            finish(line, CommandReply::BedProbe(report))
        }
        G30State::PastBed => {
            verify_ok(line)?;
            Err(FirmwareError::ProbePastBed.into())
        }
    }
}

/// Parse `ok T:<a> /<d> B:<a> /<d> @:<p> B@:<p>`, including the
/// multi-extruder form where every tool is listed. The first tool wins.
fn parse_temperatures(line: &str) -> Result<TemperatureReport, GcodeError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first() != Some(&"ok") {
        return Err(unexpected(line));
    }

    let desired = |index: usize| -> Result<f64, GcodeError> {
        let token = tokens.get(index + 1).ok_or_else(|| unexpected(line))?;
        let value = token.strip_prefix('/').ok_or_else(|| unexpected(line))?;
        parse_number(value, line)
    };

    let mut tool: Option<(f64, f64)> = None;
    let mut bed: Option<(f64, f64)> = None;
    let mut tool_power: Option<f64> = None;
    let mut bed_power: Option<f64> = None;

    for (index, token) in tokens.iter().enumerate().skip(1) {
        let Some((name, value)) = token.split_once(':') else {
            continue;
        };
        match name {
            "B" if bed.is_none() => bed = Some((parse_number(value, line)?, desired(index)?)),
            "@" => tool_power = Some(parse_number(value, line)?),
            "B@" => bed_power = Some(parse_number(value, line)?),
            _ if tool.is_none()
                && name.starts_with('T')
                && name[1..].chars().all(|c| c.is_ascii_digit()) =>
            {
                tool = Some((parse_number(value, line)?, desired(index)?))
            }
            _ => {}
        }
    }

    match (tool, bed, tool_power, bed_power) {
        (Some((tool_actual, tool_desired)), Some((bed_actual, bed_desired)), Some(tp), Some(bp)) => {
            Ok(TemperatureReport {
                tool_actual,
                tool_desired,
                tool_power: tp,
                bed_actual,
                bed_desired,
                bed_power: bp,
            })
        }
        _ => Err(unexpected(line)),
    }
}

fn process_soft_endstops(state: &mut M211State, line: &str) -> Step {
    // Ender firmwares put state and bounds on one echo line
    if *state == M211State::State && line.starts_with(SOFT_ENDSTOPS_ECHO) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (on, rest) = match tokens.as_slice() {
            [_, _, "ON", rest @ ..] => (true, rest),
            [_, _, "OFF", rest @ ..] => (false, rest),
            _ => return Err(unexpected(line).into()),
        };
        let bounds = parse_min_max(rest, line)?;
        *state = M211State::Ok(SoftEndstops { on, bounds });
        return Ok(None);
    }

    if is_metadata(line) || is_auto_report(line) {
        return Ok(None);
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    match *state {
        M211State::State => {
            if is_ok(line) {
                return Err(missing("soft endstop state", line).into());
            }
            let on = match tokens.as_slice() {
                ["M211", "S1", ..] => true,
                ["M211", "S0", ..] => false,
                _ => return Err(unexpected(line).into()),
            };
            *state = M211State::Bounds(on);
            Ok(None)
        }
        M211State::Bounds(on) => {
            if is_ok(line) {
                return Err(missing("soft endstop bounds", line).into());
            }
            let bounds: Bounds = parse_min_max(&tokens, line)?;
            *state = M211State::Ok(SoftEndstops { on, bounds });
            Ok(None)
        }
        M211State::Ok(report) => finish(line, CommandReply::SoftEndstops(report)),
    }
}

fn process_probe_offsets(offsets: &mut Option<ProbeOffsets>, line: &str) -> Step {
    if is_metadata(line) || is_auto_report(line) {
        return Ok(None);
    }

    if let Some(report) = *offsets {
        return finish(line, CommandReply::ProbeOffsets(report));
    }

    if is_ok(line) {
        return Err(missing("probe offsets", line).into());
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (x, y, z) = match tokens.as_slice() {
        ["M851", x, y, z, ";", "(mm)"] => (*x, *y, *z),
        ["Probe", "Offset", x, y, z] => (*x, *y, *z),
        [_, _, _, _, _, _] | [_, _, _, _, _] => return Err(unexpected(line).into()),
        _ => {
            return Err(GcodeError::TokenCount {
                line: line.to_string(),
            }
            .into())
        }
    };

    *offsets = Some(ProbeOffsets {
        x: axis_value(x, 'X', line)?,
        y: axis_value(y, 'Y', line)?,
        z: axis_value(z, 'Z', line)?,
    });
    Ok(None)
}
