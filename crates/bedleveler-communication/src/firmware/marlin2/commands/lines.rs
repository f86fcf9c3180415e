//! Marlin2 response line classification and field parsing

use super::{BedPoint, PositionReport, StepCounts};
use bedleveler_core::{Bounds, GcodeError};
use std::str::FromStr;

/// Lines that some printers emit while homing or probing. Observed with a
/// Neptune 3 Pro.
pub const TARING_PROBE: &str = "Taring probe";

/// `echo:` status line
pub fn is_echo(line: &str) -> bool {
    line.starts_with("echo:")
}

/// `//` host comment line
pub fn is_comment(line: &str) -> bool {
    line.starts_with("//")
}

/// Informational line that never belongs to a command's payload
pub fn is_metadata(line: &str) -> bool {
    is_echo(line) || is_comment(line)
}

/// Unsolicited position report (M154)
pub fn is_position_auto_report(line: &str) -> bool {
    line.starts_with("X:")
}

/// Unsolicited temperature report (M155)
pub fn is_temperature_auto_report(line: &str) -> bool {
    line.starts_with(" T")
}

pub fn is_auto_report(line: &str) -> bool {
    is_position_auto_report(line) || is_temperature_auto_report(line)
}

/// First token is `ok`
pub fn is_ok(line: &str) -> bool {
    line.split_whitespace().next() == Some("ok")
}

/// Check the terminal acknowledgement: `ok` or `ok P<n> B<n>`
pub fn verify_ok(line: &str) -> Result<(), GcodeError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let valid = match tokens.as_slice() {
        ["ok"] => true,
        ["ok", p, b] => p.starts_with('P') && b.starts_with('B'),
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(GcodeError::ExpectedOk {
            line: line.to_string(),
        })
    }
}

/// Split a line into exactly `count` tokens after replacing `replace` with
/// whitespace
pub fn tokenize(
    line: &str,
    count: usize,
    replace: Option<char>,
) -> Result<Vec<String>, GcodeError> {
    let normalized = match replace {
        Some(c) => line.replace(c, " "),
        None => line.to_string(),
    };
    let tokens: Vec<String> = normalized.split_whitespace().map(str::to_string).collect();

    if tokens.len() != count {
        return Err(GcodeError::TokenCount {
            line: line.to_string(),
        });
    }
    Ok(tokens)
}

/// Parse a numeric token, reporting the whole line on failure
pub fn parse_number<T: FromStr>(token: &str, line: &str) -> Result<T, GcodeError> {
    token.parse().map_err(|_| GcodeError::InvalidNumber {
        line: line.to_string(),
    })
}

fn unexpected(line: &str) -> GcodeError {
    GcodeError::UnexpectedResponse {
        line: line.to_string(),
    }
}

/// Parse `X:<f> Y:<f> Z:<f> E:<f> Count X:<i> Y:<i> Z:<i>`
pub fn parse_position(line: &str) -> Result<PositionReport, GcodeError> {
    let t = tokenize(line, 15, Some(':'))?;

    if t[0] != "X"
        || t[2] != "Y"
        || t[4] != "Z"
        || t[6] != "E"
        || t[8] != "Count"
        || t[9] != "X"
        || t[11] != "Y"
        || t[13] != "Z"
    {
        return Err(unexpected(line));
    }

    Ok(PositionReport {
        x: parse_number(&t[1], line)?,
        y: parse_number(&t[3], line)?,
        z: parse_number(&t[5], line)?,
        e: parse_number(&t[7], line)?,
        count: StepCounts {
            x: parse_number(&t[10], line)?,
            y: parse_number(&t[12], line)?,
            z: parse_number(&t[14], line)?,
        },
    })
}

/// Parse `Bed X: <f> Y: <f> Z: <f>`, with or without the space after each
/// colon
pub fn parse_bed(line: &str) -> Result<BedPoint, GcodeError> {
    let t = tokenize(line, 7, Some(':'))?;

    if t[0] != "Bed" || t[1] != "X" || t[3] != "Y" || t[5] != "Z" {
        return Err(unexpected(line));
    }

    Ok(BedPoint {
        x: parse_number(&t[2], line)?,
        y: parse_number(&t[4], line)?,
        z: parse_number(&t[6], line)?,
    })
}

/// Strip a single-letter axis prefix from a token such as `X-40.00`
pub fn axis_value(token: &str, axis: char, line: &str) -> Result<f64, GcodeError> {
    match token.strip_prefix(axis) {
        Some(value) => parse_number(value, line),
        None => Err(unexpected(line)),
    }
}

/// Parse the eight tokens `Min: X<f> Y<f> Z<f> Max: X<f> Y<f> Z<f>`
pub fn parse_min_max(tokens: &[&str], line: &str) -> Result<Bounds, GcodeError> {
    match tokens {
        ["Min:", min_x, min_y, min_z, "Max:", max_x, max_y, max_z] => Ok(Bounds {
            min_x: axis_value(min_x, 'X', line)?,
            max_x: axis_value(max_x, 'X', line)?,
            min_y: axis_value(min_y, 'Y', line)?,
            max_y: axis_value(max_y, 'Y', line)?,
            min_z: axis_value(min_z, 'Z', line)?,
            max_z: axis_value(max_z, 'Z', line)?,
        }),
        _ => Err(unexpected(line)),
    }
}
