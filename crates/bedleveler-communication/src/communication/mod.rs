//! Transports used by the printer backends
//!
//! - `line_framer`: splits a raw serial byte stream into lines
//! - `serial`: serial port transport for Marlin2 printers
//! - `http`: HTTP client for Moonraker printers

pub mod http;
pub mod line_framer;
pub mod serial;

use bedleveler_core::ConnectionError;

/// Events delivered by a byte-stream transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Raw bytes read from the device
    Data(Vec<u8>),
    /// The device closed the stream
    Closed,
    /// The transport failed and stopped reading
    Error(ConnectionError),
}

/// Write side of a line-oriented transport
pub trait LineWriter: Send {
    /// Write one line. The line terminator is appended by the writer.
    fn write_line(&mut self, line: &str) -> Result<(), ConnectionError>;
}

impl<W: LineWriter + ?Sized> LineWriter for Box<W> {
    fn write_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        (**self).write_line(line)
    }
}
