//! Moonraker reply envelopes and typed field lookup
//!
//! Moonraker wraps every answer in `{"result": ...}` or
//! `{"error": {"message": ...}}`. Lookups name the operation step and the
//! exact field (or `printer.cfg` section and key) that was missing.

use crate::communication::http::HttpReply;
use bedleveler_core::{ConnectionError, Error, FirmwareError, ResponseError};
use serde_json::{Map, Value};

/// Unwrap the `result` of a reply.
///
/// An error envelope is surfaced verbatim as a firmware error. A body that
/// is not JSON is a transport error when the status is a failure and a
/// protocol error otherwise.
pub fn parse_envelope(url: &str, reply: HttpReply) -> Result<Value, Error> {
    let mut value: Value = match serde_json::from_str(&reply.body) {
        Ok(value) => value,
        Err(e) => {
            if !reply.is_success() {
                return Err(ConnectionError::HttpStatus {
                    url: url.to_string(),
                    status: reply.status,
                }
                .into());
            }
            return Err(ResponseError::MalformedReply {
                url: url.to_string(),
                reason: e.to_string(),
            }
            .into());
        }
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(FirmwareError::Reported { message }.into());
    }

    match value.as_object_mut().and_then(|o| o.remove("result")) {
        Some(result) => Ok(result),
        None if !reply.is_success() => Err(ConnectionError::HttpStatus {
            url: url.to_string(),
            status: reply.status,
        }
        .into()),
        None => Err(ResponseError::MalformedReply {
            url: url.to_string(),
            reason: "no 'result' in reply".to_string(),
        }
        .into()),
    }
}

/// Check that a G-code script step answered `"ok"`
pub fn expect_ok(context: &str, result: &Value) -> Result<(), ResponseError> {
    if result.as_str() == Some("ok") {
        Ok(())
    } else {
        tracing::debug!("{} replied {}", context, result);
        Err(ResponseError::NotOk {
            context: context.to_string(),
            reply: result.to_string(),
        })
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Path-aware view of a reply result
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    context: &'a str,
    root: &'a Value,
}

impl<'a> Fields<'a> {
    pub fn new(context: &'a str, root: &'a Value) -> Self {
        Self { context, root }
    }

    /// Look up a dotted path. Numeric segments index arrays.
    pub fn get(&self, path: &str) -> Result<&'a Value, ResponseError> {
        let mut current = self.root;
        for segment in path.split('.') {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            current = next.ok_or_else(|| ResponseError::MissingField {
                context: self.context.to_string(),
                path: path.to_string(),
            })?;
        }
        Ok(current)
    }

    /// Numeric field
    pub fn f64(&self, path: &str) -> Result<f64, ResponseError> {
        let value = self.get(path)?;
        as_number(value).ok_or_else(|| ResponseError::InvalidField {
            context: self.context.to_string(),
            path: path.to_string(),
            value: value.to_string(),
        })
    }

    /// The `printer.cfg` section from a `configfile` query
    pub fn config_section(&self, section: &'a str) -> Result<ConfigSection<'a>, ResponseError> {
        let config = self.get("status.configfile.config")?;
        let values = config
            .get(section)
            .and_then(Value::as_object)
            .ok_or_else(|| ResponseError::MissingConfigSection {
                context: self.context.to_string(),
                section: section.to_string(),
            })?;
        Ok(ConfigSection {
            context: self.context,
            section,
            values,
        })
    }
}

/// One section of `printer.cfg`. Klipper reports raw values as strings.
#[derive(Debug, Clone, Copy)]
pub struct ConfigSection<'a> {
    context: &'a str,
    section: &'a str,
    values: &'a Map<String, Value>,
}

impl<'a> ConfigSection<'a> {
    fn raw(&self, key: &str) -> Result<&'a Value, ResponseError> {
        self.values
            .get(key)
            .ok_or_else(|| ResponseError::MissingConfigKey {
                context: self.context.to_string(),
                section: self.section.to_string(),
                key: key.to_string(),
            })
    }

    fn invalid(&self, key: &str, value: &Value) -> ResponseError {
        ResponseError::InvalidConfigValue {
            context: self.context.to_string(),
            section: self.section.to_string(),
            key: key.to_string(),
            value: match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }

    pub fn f64(&self, key: &str) -> Result<f64, ResponseError> {
        let value = self.raw(key)?;
        as_number(value)
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.invalid(key, value))
    }

    pub fn u32(&self, key: &str) -> Result<u32, ResponseError> {
        let value = self.raw(key)?;
        as_number(value)
            .filter(|v| v.fract() == 0.0 && *v >= 0.0 && *v <= u32::MAX as f64)
            .map(|v| v as u32)
            .ok_or_else(|| self.invalid(key, value))
    }

    fn numbers(&self, key: &str) -> Result<Vec<f64>, ResponseError> {
        let value = self.raw(key)?;
        let parsed: Option<Vec<f64>> = match value {
            Value::String(s) => s.split(',').map(|p| p.trim().parse().ok()).collect(),
            Value::Array(items) => items.iter().map(as_number).collect(),
            Value::Number(n) => n.as_f64().map(|v| vec![v]),
            _ => None,
        };
        parsed
            .filter(|values| values.iter().all(|v| v.is_finite()))
            .ok_or_else(|| self.invalid(key, value))
    }

    /// Comma separated pair such as `mesh_min: 10, 10`
    pub fn pair(&self, key: &str) -> Result<(f64, f64), ResponseError> {
        match self.numbers(key)?.as_slice() {
            [a, b] => Ok((*a, *b)),
            _ => Err(self.invalid(key, self.raw(key)?)),
        }
    }

    /// `probe_count`: either `columns, rows` or a single count used for both
    pub fn counts(&self, key: &str) -> Result<(usize, usize), ResponseError> {
        let to_count = |v: f64| (v.fract() == 0.0 && v >= 0.0).then_some(v as usize);
        let counts = match self.numbers(key)?.as_slice() {
            [n] => to_count(*n).map(|n| (n, n)),
            [columns, rows] => to_count(*columns).zip(to_count(*rows)),
            _ => None,
        };
        match counts {
            Some(counts) => Ok(counts),
            None => Err(self.invalid(key, self.raw(key)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const URL: &str = "http://printer/printer/objects/query?probe";

    #[test]
    fn test_envelope_result() {
        let reply = HttpReply::new(200, r#"{"result": "ok"}"#);
        assert_eq!(parse_envelope(URL, reply).unwrap(), json!("ok"));
    }

    #[test]
    fn test_envelope_error_is_verbatim() {
        let reply = HttpReply::new(
            400,
            r#"{"error": {"code": 400, "message": "Must home axis first: 0.000 0.000 5.000 [0.000]"}}"#,
        );
        let err = parse_envelope(URL, reply).unwrap_err();
        assert!(err.is_firmware_error());
        assert_eq!(err.to_string(), "Must home axis first: 0.000 0.000 5.000 [0.000]");
    }

    #[test]
    fn test_envelope_non_json() {
        let err = parse_envelope(URL, HttpReply::new(502, "Bad Gateway")).unwrap_err();
        assert!(err.is_connection_error());

        let err = parse_envelope(URL, HttpReply::new(200, "<html>")).unwrap_err();
        assert!(err.is_response_error());

        let err = parse_envelope(URL, HttpReply::new(200, r#"{"status": 1}"#)).unwrap_err();
        assert!(err.is_response_error());
    }

    #[test]
    fn test_field_paths() {
        let result = json!({"status": {"gcode_move": {"gcode_position": [1.0, 2.0, 3.0, 4.0]}}});
        let fields = Fields::new("GetCurrentPosition", &result);
        assert_eq!(fields.f64("status.gcode_move.gcode_position.3").unwrap(), 4.0);
        assert_eq!(
            fields.f64("status.gcode_move.gcode_position.4").unwrap_err(),
            ResponseError::MissingField {
                context: "GetCurrentPosition".to_string(),
                path: "status.gcode_move.gcode_position.4".to_string(),
            }
        );
    }

    #[test]
    fn test_config_values() {
        let result = json!({"status": {"configfile": {"config": {
            "bed_mesh": {
                "speed": "120",
                "mesh_min": "10, 15",
                "probe_count": "5",
                "horizontal_move_z": "five"
            }
        }}}});
        let fields = Fields::new("GetMeshCoordinates", &result);
        let section = fields.config_section("bed_mesh").unwrap();
        assert_eq!(section.f64("speed").unwrap(), 120.0);
        assert_eq!(section.pair("mesh_min").unwrap(), (10.0, 15.0));
        assert_eq!(section.counts("probe_count").unwrap(), (5, 5));
        assert!(matches!(
            section.f64("horizontal_move_z"),
            Err(ResponseError::InvalidConfigValue { .. })
        ));
        assert!(matches!(
            section.pair("mesh_max"),
            Err(ResponseError::MissingConfigKey { .. })
        ));
        assert_eq!(
            fields.config_section("probe").unwrap_err().to_string(),
            "GetMeshCoordinates failed, 'probe' section not found in 'printer.cfg'"
        );
    }
}
