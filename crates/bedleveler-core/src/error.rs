//! Error handling for BedLeveler
//!
//! Errors are split by the layer that raises them:
//! - Connection errors (transport failures, fatal to the owning connection)
//! - G-Code errors (malformed firmware response lines)
//! - Response errors (missing or invalid fields in parsed replies)
//! - Firmware errors (failures the printer reported itself)
//! - Usage errors (invalid caller input, rejected before any I/O)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Raised by transports. Once a connection error is reported the owning
/// connection is unusable and the caller has to reopen it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Serial port error
    #[error("Serial port error: {reason}")]
    SerialError {
        /// The reason for the serial port error.
        reason: String,
    },

    /// A line arrived while no command was waiting for a reply
    #[error("Received a line with no pending command: [{line}]")]
    UnexpectedLine {
        /// The stray line.
        line: String,
    },

    /// HTTP request could not be completed
    #[error("HTTP request to {url} failed: {reason}")]
    HttpError {
        /// The requested URL.
        url: String,
        /// The reason the request failed.
        reason: String,
    },

    /// HTTP request completed with a failure status and no usable body
    #[error("Rest error occurred: {url} returned status {status}")]
    HttpStatus {
        /// The requested URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The printer is not connected
    #[error("Printer not connected")]
    NotConnected,

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// G-Code error type
///
/// Raised while parsing the response lines of a single command. The command
/// that raised it is finished; other commands are unaffected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GcodeError {
    /// The terminal acknowledgement line was malformed
    #[error("Expected 'ok [PXX] [BXX]' but detected '{line}'.")]
    ExpectedOk {
        /// The offending line.
        line: String,
    },

    /// A payload line had the wrong number of tokens
    #[error("Incorrect number of tokens in response: [{line}].")]
    TokenCount {
        /// The offending line.
        line: String,
    },

    /// A line did not have the expected shape
    #[error("Unable to parse response: [{line}].")]
    UnexpectedResponse {
        /// The offending line.
        line: String,
    },

    /// A numeric field could not be parsed
    #[error("Incorrect numeric data type found in response: [{line}].")]
    InvalidNumber {
        /// The offending line.
        line: String,
    },

    /// The acknowledgement arrived before a required payload line
    #[error("Missing {payload} before '{line}'.")]
    MissingPayload {
        /// Description of the payload that was expected.
        payload: String,
        /// The line that arrived instead.
        line: String,
    },
}

/// Response error type
///
/// Raised when a structurally valid reply does not carry the data an
/// operation needs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResponseError {
    /// A printer.cfg section is missing from the queried configuration
    #[error("{context} failed, '{section}' section not found in 'printer.cfg'")]
    MissingConfigSection {
        /// The operation step that needed the section.
        context: String,
        /// The missing section.
        section: String,
    },

    /// A key is missing from a printer.cfg section
    #[error("{context} failed, '{key}' not found in section '{section}' of 'printer.cfg'")]
    MissingConfigKey {
        /// The operation step that needed the key.
        context: String,
        /// The section that was searched.
        section: String,
        /// The missing key.
        key: String,
    },

    /// A printer.cfg value could not be interpreted
    #[error("{context} failed, invalid value '{value}' for '{key}' in section '{section}' of 'printer.cfg'")]
    InvalidConfigValue {
        /// The operation step that needed the value.
        context: String,
        /// The section holding the value.
        section: String,
        /// The key holding the value.
        key: String,
        /// The raw value.
        value: String,
    },

    /// A field is missing from a reply
    #[error("{context} failed, field '{path}' not found in reply")]
    MissingField {
        /// The operation step that needed the field.
        context: String,
        /// Dotted path of the missing field.
        path: String,
    },

    /// A reply field has the wrong type or value
    #[error("{context} failed, field '{path}' has an invalid value: {value}")]
    InvalidField {
        /// The operation step that needed the field.
        context: String,
        /// Dotted path of the field.
        path: String,
        /// The raw value.
        value: String,
    },

    /// A G-code step did not answer with "ok"
    #[error("{context} failed.")]
    NotOk {
        /// The operation step that sent the G-code.
        context: String,
        /// The reply that was received instead.
        reply: String,
    },

    /// A reply body is not a result/error envelope
    #[error("Malformed reply from {url}: {reason}")]
    MalformedReply {
        /// The requested URL.
        url: String,
        /// The reason the body was rejected.
        reason: String,
    },

    /// A command finished with a reply of the wrong shape for the current step
    #[error("Failed to process output of {command} command.")]
    UnexpectedCommandReply {
        /// The command name.
        command: String,
    },

    /// The verbose mesh report has no bilinear grid
    #[error("No mesh found. Please perform automatic bed leveling and try again.")]
    NoMesh,

    /// The verbose mesh report contains a line that breaks the grid layout
    #[error("Detected an unexpected line.")]
    UnexpectedMeshLine {
        /// The offending line.
        line: String,
    },

    /// The verbose mesh report ended before a usable grid was read
    #[error("Failed to parse the M420 output.")]
    IncompleteMesh,
}

/// Firmware error type
///
/// Failures reported by the printer itself, surfaced verbatim.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FirmwareError {
    /// The probe target is outside the bed
    #[error("Z Probe Past Bed")]
    ProbePastBed,

    /// Error envelope returned by Moonraker
    #[error("{message}")]
    Reported {
        /// The message as reported.
        message: String,
    },
}

/// Usage error type
///
/// Invalid input from the caller. Always raised before any I/O happens.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UsageError {
    /// Probe sample count below one
    #[error("Probe sample count must be at least 1, got {0}")]
    InvalidSampleCount(u32),

    /// Negative probe height
    #[error("Probe height must not be negative, got {0}")]
    NegativeProbeHeight(f64),

    /// Probe travel speed not positive
    #[error("Probe XY speed must be positive, got {0}")]
    InvalidProbeSpeed(f64),

    /// Mesh too small to interpolate
    #[error("Mesh needs at least 2 rows and 2 columns, got {rows}x{columns}")]
    MeshTooSmall {
        /// Requested row count.
        rows: usize,
        /// Requested column count.
        columns: usize,
    },

    /// Nothing to average
    #[error("No probe samples to average")]
    NoSamples,

    /// A G-code parameter is outside its allowed range
    #[error("Parameter '{param}' of {command} out of range: {reason}")]
    ParameterOutOfRange {
        /// The command name.
        command: String,
        /// The parameter letter(s).
        param: String,
        /// What the parameter accepts.
        reason: String,
    },

    /// Probe defaults have not been read from the printer yet
    #[error("Probe defaults are unknown, run Init first")]
    ProbeDefaultsUnknown,

    /// A raw line that cannot be sent as a single command
    #[error("Cannot send line {line:?}: {reason}")]
    InvalidLine {
        /// The rejected line.
        line: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Main error type for BedLeveler
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// G-Code error
    #[error(transparent)]
    Gcode(#[from] GcodeError),

    /// Response error
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// Firmware error
    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    /// Usage error
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a G-Code error
    pub fn is_gcode_error(&self) -> bool {
        matches!(self, Error::Gcode(_))
    }

    /// Check if this is a response error
    pub fn is_response_error(&self) -> bool {
        matches!(self, Error::Response(_))
    }

    /// Check if this is a firmware error
    pub fn is_firmware_error(&self) -> bool {
        matches!(self, Error::Firmware(_))
    }

    /// Check if this is a usage error
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Error::Usage(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a high-level printer operation that did not produce a result
#[derive(Error, Debug)]
pub enum OperationError {
    /// The operation failed
    #[error(transparent)]
    Failed(#[from] Error),

    /// The operation was aborted before it finished
    #[error("Operation aborted")]
    Aborted,
}

impl OperationError {
    /// Check if the operation was aborted
    pub fn is_aborted(&self) -> bool {
        matches!(self, OperationError::Aborted)
    }
}

impl From<ConnectionError> for OperationError {
    fn from(err: ConnectionError) -> Self {
        OperationError::Failed(err.into())
    }
}

impl From<UsageError> for OperationError {
    fn from(err: UsageError) -> Self {
        OperationError::Failed(err.into())
    }
}
