//! Serial port communication implementation
//!
//! Opens the port with the printer's line settings and splits it into a
//! writer used by the command connection and a reader that forwards raw
//! bytes as [`TransportEvent`]s.
//!
//! The `serialport` crate only offers blocking reads, so a dedicated reader
//! thread polls the port with a short timeout and pushes whatever arrives
//! into a tokio channel. The reader never interprets the data.

use super::{LineWriter, TransportEvent};
use bedleveler_core::{ConnectionError, FlowControl, Parity, SerialSettings};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const READ_TIMEOUT: Duration = Duration::from_millis(10);
const READ_BUFFER_SIZE: usize = 256;
const EVENT_CHANNEL_SIZE: usize = 256;

/// Convert a parity setting to serialport format
fn to_serialport_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

/// Convert a flow control setting to serialport format
fn to_serialport_flow_control(flow_control: FlowControl) -> serialport::FlowControl {
    match flow_control {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Software => serialport::FlowControl::Software,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
    }
}

fn build_port(
    port: &str,
    settings: &SerialSettings,
) -> Result<serialport::SerialPortBuilder, ConnectionError> {
    let data_bits = match settings.data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        8 => serialport::DataBits::Eight,
        other => {
            return Err(ConnectionError::InvalidParameters {
                reason: format!("Invalid data bits: {}", other),
            })
        }
    };
    let stop_bits = match settings.stop_bits {
        1 => serialport::StopBits::One,
        2 => serialport::StopBits::Two,
        other => {
            return Err(ConnectionError::InvalidParameters {
                reason: format!("Invalid stop bits: {}", other),
            })
        }
    };

    Ok(serialport::new(port, settings.baud_rate)
        .timeout(READ_TIMEOUT)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(to_serialport_parity(settings.parity))
        .flow_control(to_serialport_flow_control(settings.flow_control)))
}

/// Write half of an open serial port
pub struct SerialWriter {
    port_name: String,
    port: Box<dyn serialport::SerialPort>,
    running: Arc<AtomicBool>,
}

impl SerialWriter {
    /// Name of the underlying device
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl LineWriter for SerialWriter {
    fn write_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        tracing::debug!("Sending: {}", line);
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');

        self.port
            .write_all(&data)
            .and_then(|_| self.port.flush())
            .map_err(|e| ConnectionError::SerialError {
                reason: format!("Write to {} failed: {}", self.port_name, e),
            })
    }
}

impl Drop for SerialWriter {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Closed serial port {}", self.port_name);
    }
}

/// Open a serial port.
///
/// Returns the writer and a receiver of the bytes read from the port. The
/// reader thread stops when the writer is dropped, the receiver is dropped,
/// or the port fails.
pub fn open(
    port: &str,
    settings: &SerialSettings,
) -> Result<(SerialWriter, mpsc::Receiver<TransportEvent>), ConnectionError> {
    let serial = build_port(port, settings)?
        .open()
        .map_err(|e| {
            tracing::warn!("Failed to open serial port {}: {}", port, e);
            ConnectionError::FailedToOpen {
                port: port.to_string(),
                reason: e.to_string(),
            }
        })?;
    let reader = serial
        .try_clone()
        .map_err(|e| ConnectionError::FailedToOpen {
            port: port.to_string(),
            reason: e.to_string(),
        })?;

    let running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    spawn_reader(port.to_string(), reader, running.clone(), tx)?;

    tracing::info!("Opened serial port {} ({})", port, settings);
    Ok((
        SerialWriter {
            port_name: port.to_string(),
            port: serial,
            running,
        },
        rx,
    ))
}

fn spawn_reader(
    port_name: String,
    mut reader: Box<dyn serialport::SerialPort>,
    running: Arc<AtomicBool>,
    tx: mpsc::Sender<TransportEvent>,
) -> Result<(), ConnectionError> {
    std::thread::Builder::new()
        .name(format!("serial-reader {}", port_name))
        .spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            while running.load(Ordering::SeqCst) {
                let event = match reader.read(&mut buf) {
                    Ok(0) => TransportEvent::Closed,
                    Ok(n) => TransportEvent::Data(buf[..n].to_vec()),
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => TransportEvent::Error(ConnectionError::ConnectionLost {
                        reason: format!("Read from {} failed: {}", port_name, e),
                    }),
                };

                let last = !matches!(event, TransportEvent::Data(_));
                if tx.blocking_send(event).is_err() || last {
                    break;
                }
            }
            tracing::debug!("Serial reader for {} stopped", port_name);
        })
        .map(|_| ())
        .map_err(|e| ConnectionError::SerialError {
            reason: format!("Failed to start reader thread: {}", e),
        })
}
