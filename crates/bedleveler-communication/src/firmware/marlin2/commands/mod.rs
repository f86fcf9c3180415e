//! Marlin2 G-code commands
//!
//! A [`Command`] pairs the request line built from a typed [`GCode`] with the
//! reply parser for that command. Response lines are fed to the command one
//! at a time until it reports a [`CommandReply`] or an error.
//!
//! Optional parameters are appended in a fixed, command-specific order as
//! `" <LETTER><value>"` and omitted entirely when unset.

pub mod lines;
mod parsers;

use crate::firmware::format_number;
use bedleveler_core::{Bounds, Error, ProbeOffsets, UsageError};
use parsers::ReplyParser;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The commands understood by the Marlin2 backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    G0,
    G28,
    G30,
    G42,
    G90,
    G91,
    M104,
    M105,
    M114,
    M118,
    M140,
    M211,
    M400,
    M420,
    M851,
    /// Free-form line from the console
    Raw,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::G0 => "G0",
            Self::G28 => "G28",
            Self::G30 => "G30",
            Self::G42 => "G42",
            Self::G90 => "G90",
            Self::G91 => "G91",
            Self::M104 => "M104",
            Self::M105 => "M105",
            Self::M114 => "M114",
            Self::M118 => "M118",
            Self::M140 => "M140",
            Self::M211 => "M211",
            Self::M400 => "M400",
            Self::M420 => "M420",
            Self::M851 => "M851",
            Self::Raw => "Raw",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Linear move
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct G0 {
    pub e: Option<f64>,
    pub f: Option<f64>,
    pub s: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

/// Auto home. No axis flag homes every axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct G28 {
    /// Keep bed leveling state
    pub l: bool,
    /// Skip homing when already trusted
    pub o: bool,
    /// Raise distance before homing
    pub r: Option<f64>,
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

/// Single Z probe
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct G30 {
    /// Probe temperature compensation
    pub c: Option<bool>,
    /// Engage the probe for each point
    pub e: Option<bool>,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

/// Move to mesh coordinate
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct G42 {
    pub f: Option<f64>,
    /// Mesh column index
    pub i: Option<i32>,
    /// Mesh row index
    pub j: Option<i32>,
}

/// Set hotend temperature
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct M104 {
    pub b: Option<f64>,
    pub f: Option<f64>,
    /// Material preset index
    pub i: Option<i32>,
    pub s: Option<f64>,
    /// Tool index
    pub t: Option<i32>,
}

/// Report temperatures
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct M105 {
    /// Include redundant sensor
    pub r: bool,
    pub t: Option<i32>,
}

/// Get current position
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct M114 {
    /// Detailed report
    pub d: bool,
    /// Report stepper position
    pub e: bool,
    /// Real position
    pub r: bool,
}

/// Serial print
#[derive(Debug, Clone, PartialEq, Default)]
pub struct M118 {
    /// Prefix with `//`
    pub a1: bool,
    /// Prefix with `echo:`
    pub e1: bool,
    /// Serial port, 0-9
    pub pn: Option<u8>,
    pub text: Option<String>,
}

/// Set bed temperature
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct M140 {
    /// Material preset index
    pub i: Option<i32>,
    pub s: Option<f64>,
}

/// Software endstops. `s: None` queries the current state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct M211 {
    pub s: Option<bool>,
}

/// Bed leveling state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct M420 {
    /// Center mesh on zero
    pub c: bool,
    /// Load mesh from slot
    pub l: Option<i32>,
    /// Enable leveling
    pub s: bool,
    /// Report format: 0, 1 or 4
    pub t: Option<u8>,
    /// Verbose report including the mesh
    pub v: bool,
    /// Fade height
    pub z: Option<f64>,
}

/// XYZ probe offsets. All `None` queries the current offsets.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct M851 {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl M851 {
    /// True when no offset is being set
    pub fn is_query(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none()
    }
}

/// A typed G-code command
#[derive(Debug, Clone, PartialEq)]
pub enum GCode {
    G0(G0),
    G28(G28),
    G30(G30),
    G42(G42),
    G90,
    G91,
    M104(M104),
    M105(M105),
    M114(M114),
    M118(M118),
    M140(M140),
    M211(M211),
    M400,
    M420(M420),
    M851(M851),
    /// Sent verbatim. Replies are collected until the acknowledgement.
    Raw(String),
}

/// Accumulates a request line
struct RequestBuilder {
    kind: CommandKind,
    line: String,
}

impl RequestBuilder {
    fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            line: kind.name().to_string(),
        }
    }

    fn flag(mut self, letter: &str, set: bool) -> Self {
        if set {
            self.line.push(' ');
            self.line.push_str(letter);
        }
        self
    }

    fn float(mut self, letter: &str, value: Option<f64>) -> Result<Self, UsageError> {
        if let Some(value) = value {
            if !value.is_finite() {
                return Err(UsageError::ParameterOutOfRange {
                    command: self.kind.name().to_string(),
                    param: letter.to_string(),
                    reason: format!("{} is not a finite number", value),
                });
            }
            self.line.push(' ');
            self.line.push_str(letter);
            self.line.push_str(&format_number(value));
        }
        Ok(self)
    }

    fn int<T: fmt::Display>(mut self, letter: &str, value: Option<T>) -> Self {
        if let Some(value) = value {
            self.line.push_str(&format!(" {}{}", letter, value));
        }
        self
    }

    fn switch(self, letter: &str, value: Option<bool>) -> Self {
        self.int(letter, value.map(u8::from))
    }

    fn text(mut self, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.line.push(' ');
            self.line.push_str(value);
        }
        self
    }

    fn build(self) -> String {
        self.line
    }
}

impl GCode {
    /// The command kind
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::G0(_) => CommandKind::G0,
            Self::G28(_) => CommandKind::G28,
            Self::G30(_) => CommandKind::G30,
            Self::G42(_) => CommandKind::G42,
            Self::G90 => CommandKind::G90,
            Self::G91 => CommandKind::G91,
            Self::M104(_) => CommandKind::M104,
            Self::M105(_) => CommandKind::M105,
            Self::M114(_) => CommandKind::M114,
            Self::M118(_) => CommandKind::M118,
            Self::M140(_) => CommandKind::M140,
            Self::M211(_) => CommandKind::M211,
            Self::M400 => CommandKind::M400,
            Self::M420(_) => CommandKind::M420,
            Self::M851(_) => CommandKind::M851,
            Self::Raw(_) => CommandKind::Raw,
        }
    }

    /// Build the request line, validating parameter ranges
    pub fn request(&self) -> Result<String, UsageError> {
        let b = RequestBuilder::new(self.kind());
        let line = match self {
            Self::G0(p) => b
                .float("E", p.e)?
                .float("F", p.f)?
                .float("S", p.s)?
                .float("X", p.x)?
                .float("Y", p.y)?
                .float("Z", p.z)?
                .build(),
            Self::G28(p) => b
                .flag("L", p.l)
                .flag("O", p.o)
                .float("R", p.r)?
                .flag("X", p.x)
                .flag("Y", p.y)
                .flag("Z", p.z)
                .build(),
            Self::G30(p) => b
                .switch("C", p.c)
                .switch("E", p.e)
                .float("X", p.x)?
                .float("Y", p.y)?
                .build(),
            Self::G42(p) => b.float("F", p.f)?.int("I", p.i).int("J", p.j).build(),
            Self::G90 | Self::G91 | Self::M400 => b.build(),
            Self::M104(p) => b
                .float("B", p.b)?
                .float("F", p.f)?
                .int("I", p.i)
                .float("S", p.s)?
                .int("T", p.t)
                .build(),
            Self::M105(p) => b.flag("R", p.r).int("T", p.t).build(),
            Self::M114(p) => b.flag("D", p.d).flag("E", p.e).flag("R", p.r).build(),
            Self::M118(p) => {
                if let Some(pn) = p.pn.filter(|pn| *pn > 9) {
                    return Err(UsageError::ParameterOutOfRange {
                        command: "M118".to_string(),
                        param: "Pn".to_string(),
                        reason: format!("must be between 0 and 9, got {}", pn),
                    });
                }
                b.flag("A1", p.a1)
                    .flag("E1", p.e1)
                    .int("Pn", p.pn)
                    .text(p.text.as_deref())
                    .build()
            }
            Self::M140(p) => b.int("I", p.i).float("S", p.s)?.build(),
            Self::M211(p) => b.switch("S", p.s).build(),
            Self::M420(p) => {
                if let Some(t) = p.t.filter(|t| ![0, 1, 4].contains(t)) {
                    return Err(UsageError::ParameterOutOfRange {
                        command: "M420".to_string(),
                        param: "T".to_string(),
                        reason: format!("must be 0, 1 or 4, got {}", t),
                    });
                }
                b.flag("C", p.c)
                    .int("L", p.l)
                    .flag("S", p.s)
                    .int("T", p.t)
                    .flag("V", p.v)
                    .float("Z", p.z)?
                    .build()
            }
            Self::M851(p) => b
                .float("X", p.x)?
                .float("Y", p.y)?
                .float("Z", p.z)?
                .build(),
            Self::Raw(line) => raw_request(line)?,
        };
        Ok(line)
    }
}

/// A console line must be one non-empty line of ASCII
fn raw_request(line: &str) -> Result<String, UsageError> {
    let invalid = |reason: &str| UsageError::InvalidLine {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(invalid("line is empty"));
    }
    if trimmed.contains(['\n', '\r']) {
        return Err(invalid("line contains a line break"));
    }
    if !trimmed.is_ascii() {
        return Err(invalid("line is not ASCII"));
    }
    Ok(trimmed.to_string())
}

/// Motor step counters reported alongside a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepCounts {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

/// Position line: `X:<f> Y:<f> Z:<f> E:<f> Count X:<i> Y:<i> Z:<i>`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionReport {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: f64,
    pub count: StepCounts,
}

/// Bed point measured by G30
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BedPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// G30 result
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BedProbeReport {
    pub bed: BedPoint,
    pub position: PositionReport,
}

/// M105 result. Power is the raw PWM value (0-127).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TemperatureReport {
    pub tool_actual: f64,
    pub tool_desired: f64,
    pub tool_power: f64,
    pub bed_actual: f64,
    pub bed_desired: f64,
    pub bed_power: f64,
}

/// M211 query result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoftEndstops {
    pub on: bool,
    pub bounds: Bounds,
}

/// Parsed result of a finished command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    /// Plain acknowledgement
    Ok,
    /// G28, M114
    Position(PositionReport),
    /// G30
    BedProbe(BedProbeReport),
    /// M105
    Temperatures(TemperatureReport),
    /// M118
    Message(String),
    /// M211 query
    SoftEndstops(SoftEndstops),
    /// M851 query
    ProbeOffsets(ProbeOffsets),
    /// M420 payload lines, or the full transcript of a raw line
    Lines(Vec<String>),
}

/// A command in flight: its request line and reply parser
#[derive(Debug)]
pub struct Command {
    kind: CommandKind,
    request: String,
    parser: ReplyParser,
}

impl Command {
    /// Build the command. Fails if a parameter is out of range.
    pub fn new(gcode: GCode) -> Result<Self, UsageError> {
        let request = gcode.request()?;
        Ok(Self {
            kind: gcode.kind(),
            request,
            parser: ReplyParser::for_gcode(&gcode),
        })
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// The request line, without terminator
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Feed one response line.
    ///
    /// Returns `Ok(Some(reply))` when the command finished, `Ok(None)` while
    /// more lines are expected, and an error when the line is malformed or
    /// the firmware reported a failure. Errors finish the command.
    pub fn process_line(&mut self, line: &str) -> Result<Option<CommandReply>, Error> {
        self.parser.process_line(line)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name: {} Request: {}", self.kind, self.request)
    }
}
