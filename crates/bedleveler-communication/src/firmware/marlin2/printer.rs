//! Marlin2 printer
//!
//! [`Marlin2Engine`] is the synchronous core: it owns the command connection,
//! the set of active operations and the calibration cached by Init, and does
//! no I/O beyond writing lines. [`Marlin2Printer`] drives an engine from one
//! tokio task that multiplexes caller requests and transport events.

use super::commands::Command;
use super::connection::{CommandConnection, CommandTicket, ConnectionEvent};
use super::machines::{
    Calibration, Effect, Machine, StartContext, Transition, DEFAULT_PROBE_SETTINGS,
};
use crate::communication::{serial, LineWriter, TransportEvent};
use async_trait::async_trait;
use bedleveler_core::{
    CommandPrinter, ConnectionError, Context, Error, EventDispatcher, OperationError, OperationId,
    OperationKind, OperationOutput, OperationRequest, OperationResult, PrinterEvent, ProbeSettings,
    Result, SerialSettings, SharedProbeSettings,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Engine-assigned handle of an active operation
pub type OperationKey = u64;

/// Result of an operation that left the active set
#[derive(Debug)]
pub struct Completion {
    pub key: OperationKey,
    pub outcome: std::result::Result<OperationOutput, Error>,
}

#[derive(Debug)]
struct ActiveOperation {
    kind: OperationKind,
    id: OperationId,
    context: Context,
    machine: Machine,
    ticket: Option<CommandTicket>,
}

/// Synchronous Marlin2 operation engine
pub struct Marlin2Engine<W: LineWriter> {
    connection: CommandConnection<W>,
    operations: HashMap<OperationKey, ActiveOperation>,
    tickets: HashMap<CommandTicket, OperationKey>,
    events: EventDispatcher,
    probe_settings: SharedProbeSettings,
    calibration: Option<Calibration>,
    completions: Vec<Completion>,
}

impl<W: LineWriter> Marlin2Engine<W> {
    pub fn new(writer: W, events: EventDispatcher, probe_settings: SharedProbeSettings) -> Self {
        Self {
            connection: CommandConnection::new(writer),
            operations: HashMap::new(),
            tickets: HashMap::new(),
            events,
            probe_settings,
            calibration: None,
            completions: Vec::new(),
        }
    }

    /// Start an operation.
    ///
    /// Only a transport failure is returned; every other outcome is reported
    /// through [`Marlin2Engine::take_completions`].
    pub fn submit(
        &mut self,
        key: OperationKey,
        id: OperationId,
        context: Context,
        request: OperationRequest,
    ) -> std::result::Result<(), ConnectionError> {
        let kind = request.kind();
        tracing::info!("Starting {} with id: {}, context: {}", kind, id, context);

        if kind == OperationKind::Init {
            *self.probe_settings.write() = Some(DEFAULT_PROBE_SETTINGS);
        }

        let ctx = StartContext {
            probe_settings: (*self.probe_settings.read()).unwrap_or(DEFAULT_PROBE_SETTINGS),
            calibration: self.calibration,
        };
        let transition = Machine::start(&request, &ctx);

        self.operations.insert(
            key,
            ActiveOperation {
                kind,
                id,
                context,
                machine: Machine::Done,
                ticket: None,
            },
        );
        self.apply(key, transition)?;
        self.pump()
    }

    /// Feed bytes read from the transport
    pub fn receive(&mut self, bytes: &[u8]) -> std::result::Result<(), ConnectionError> {
        self.connection.receive(bytes)?;
        self.pump()
    }

    /// Abort every active operation and return their keys.
    ///
    /// In-flight commands are detached: their reply lines are still consumed
    /// but nothing more is written on their behalf. No events are published.
    pub fn abort(&mut self) -> Vec<OperationKey> {
        let mut keys = Vec::with_capacity(self.operations.len());
        for (key, operation) in self.operations.drain() {
            tracing::info!("Aborting {} [{}]", operation.kind, operation.id);
            if let Some(ticket) = operation.ticket {
                self.connection.detach(ticket);
            }
            keys.push(key);
        }
        self.tickets.clear();
        keys
    }

    /// Fail every active operation with a transport error and forget all
    /// queued commands
    pub fn fail_all(&mut self, error: ConnectionError) {
        let keys: Vec<OperationKey> = self.operations.keys().copied().collect();
        for key in keys {
            self.complete(key, Err(error.clone().into()));
        }
        self.tickets.clear();
        self.connection.reset();
    }

    /// Drain the results of operations that left the active set
    pub fn take_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completions)
    }

    /// Calibration cached by the last successful Init
    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    pub fn active_count(&self) -> usize {
        self.operations.len()
    }

    /// The command connection
    pub fn connection(&self) -> &CommandConnection<W> {
        &self.connection
    }

    fn apply(
        &mut self,
        key: OperationKey,
        transition: Transition,
    ) -> std::result::Result<(), ConnectionError> {
        match transition.effect {
            Effect::Send(gcode) => {
                let command = match Command::new(gcode) {
                    Ok(command) => command,
                    Err(e) => {
                        self.complete(key, Err(e.into()));
                        return Ok(());
                    }
                };
                if let Some(operation) = self.operations.get_mut(&key) {
                    operation.machine = transition.machine;
                }
                let ticket = self.connection.send(command)?;
                self.tickets.insert(ticket, key);
                if let Some(operation) = self.operations.get_mut(&key) {
                    operation.ticket = Some(ticket);
                }
            }
            Effect::Finish(output) => self.complete(key, Ok(output)),
            Effect::Initialized(calibration) => {
                tracing::info!(
                    "Probe offsets {:?}, travel bounds {:?}",
                    calibration.offsets,
                    calibration.bounds
                );
                self.calibration = Some(calibration);
                self.complete(key, Ok(OperationOutput::Initialized));
            }
            Effect::Fail(error) => self.complete(key, Err(error)),
        }
        Ok(())
    }

    fn pump(&mut self) -> std::result::Result<(), ConnectionError> {
        loop {
            let events = self.connection.take_events();
            if events.is_empty() {
                return Ok(());
            }

            for event in events {
                match event {
                    ConnectionEvent::Written { ticket, request } => {
                        let Some(operation) = self
                            .tickets
                            .get(&ticket)
                            .and_then(|key| self.operations.get(key))
                        else {
                            continue;
                        };
                        self.events.notify(PrinterEvent::Sent {
                            kind: operation.kind,
                            id: operation.id.clone(),
                            context: operation.context.clone(),
                            command: request,
                        });
                    }
                    ConnectionEvent::Completed { ticket, outcome } => {
                        let Some(key) = self.tickets.remove(&ticket) else {
                            continue;
                        };
                        let Some(operation) = self.operations.get_mut(&key) else {
                            continue;
                        };
                        operation.ticket = None;

                        match outcome {
                            Ok(reply) => {
                                let machine =
                                    std::mem::replace(&mut operation.machine, Machine::Done);
                                let transition = machine.step(reply);
                                self.apply(key, transition)?;
                            }
                            Err(error) => self.complete(key, Err(error)),
                        }
                    }
                }
            }
        }
    }

    fn complete(&mut self, key: OperationKey, outcome: std::result::Result<OperationOutput, Error>) {
        let Some(operation) = self.operations.remove(&key) else {
            return;
        };
        if let Some(ticket) = operation.ticket {
            self.tickets.remove(&ticket);
            self.connection.detach(ticket);
        }

        let event = match &outcome {
            Ok(output) => {
                tracing::info!("{} [{}] finished", operation.kind, operation.id);
                PrinterEvent::Finished {
                    kind: operation.kind,
                    id: operation.id,
                    context: operation.context,
                    output: output.clone(),
                }
            }
            Err(error) => {
                tracing::error!("{} [{}] failed: {}", operation.kind, operation.id, error);
                PrinterEvent::Failed {
                    kind: operation.kind,
                    id: operation.id,
                    context: operation.context,
                    message: error.to_string(),
                }
            }
        };
        self.events.notify(event);
        self.completions.push(Completion { key, outcome });
    }
}

enum DriverRequest {
    Execute {
        id: OperationId,
        context: Context,
        request: OperationRequest,
        reply: oneshot::Sender<OperationResult<OperationOutput>>,
    },
    Abort,
}

/// Marlin2 printer on a serial line
pub struct Marlin2Printer {
    requests: mpsc::UnboundedSender<DriverRequest>,
    events: EventDispatcher,
    probe_settings: SharedProbeSettings,
    io_task: JoinHandle<()>,
}

impl Marlin2Printer {
    /// Open the serial port and start the driver task
    pub fn open(
        port: &str,
        settings: &SerialSettings,
    ) -> std::result::Result<Self, ConnectionError> {
        let (writer, transport) = serial::open(port, settings)?;
        Ok(Self::with_transport(writer, transport))
    }

    /// Start a driver over an already open transport
    pub fn with_transport<W>(writer: W, transport: mpsc::Receiver<TransportEvent>) -> Self
    where
        W: LineWriter + 'static,
    {
        let events = EventDispatcher::default();
        let probe_settings: SharedProbeSettings =
            Arc::new(RwLock::new(Some(DEFAULT_PROBE_SETTINGS)));
        let engine = Marlin2Engine::new(writer, events.clone(), probe_settings.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let io_task = tokio::spawn(drive(engine, rx, transport));

        Self {
            requests: tx,
            events,
            probe_settings,
            io_task,
        }
    }

    /// True while the driver task is running
    pub fn is_connected(&self) -> bool {
        !self.io_task.is_finished()
    }
}

impl Drop for Marlin2Printer {
    fn drop(&mut self) {
        self.io_task.abort();
    }
}

async fn drive<W: LineWriter>(
    mut engine: Marlin2Engine<W>,
    mut requests: mpsc::UnboundedReceiver<DriverRequest>,
    mut transport: mpsc::Receiver<TransportEvent>,
) {
    let mut pending: HashMap<OperationKey, oneshot::Sender<OperationResult<OperationOutput>>> =
        HashMap::new();
    let mut next_key: OperationKey = 1;

    loop {
        let failure = tokio::select! {
            request = requests.recv() => match request {
                Some(DriverRequest::Execute { id, context, request, reply }) => {
                    let key = next_key;
                    next_key += 1;
                    pending.insert(key, reply);
                    engine.submit(key, id, context, request).err()
                }
                Some(DriverRequest::Abort) => {
                    for key in engine.abort() {
                        if let Some(reply) = pending.remove(&key) {
                            let _ = reply.send(Err(OperationError::Aborted));
                        }
                    }
                    None
                }
                None => break,
            },
            event = transport.recv() => match event {
                Some(TransportEvent::Data(bytes)) => engine.receive(&bytes).err(),
                Some(TransportEvent::Error(e)) => Some(e),
                Some(TransportEvent::Closed) | None => Some(ConnectionError::ConnectionLost {
                    reason: "Port closed".to_string(),
                }),
            },
        };

        if let Some(error) = &failure {
            tracing::error!("Marlin2 connection failed: {}", error);
            engine.fail_all(error.clone());
        }

        for completion in engine.take_completions() {
            if let Some(reply) = pending.remove(&completion.key) {
                let _ = reply.send(completion.outcome.map_err(OperationError::Failed));
            }
        }

        if failure.is_some() {
            break;
        }
    }

    tracing::debug!("Marlin2 driver stopped");
}

#[async_trait]
impl CommandPrinter for Marlin2Printer {
    async fn execute(
        &self,
        id: OperationId,
        context: Context,
        request: OperationRequest,
    ) -> OperationResult<OperationOutput> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(DriverRequest::Execute {
                id,
                context,
                request,
                reply,
            })
            .map_err(|_| ConnectionError::NotConnected)?;

        rx.await.map_err(|_| ConnectionError::NotConnected)?
    }

    fn abort(&self) {
        if self.requests.send(DriverRequest::Abort).is_err() {
            tracing::debug!("Abort ignored, driver not running");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.events.subscribe()
    }

    fn probe_settings(&self) -> Option<ProbeSettings> {
        *self.probe_settings.read()
    }

    fn set_probe_settings(&self, settings: ProbeSettings) -> Result<()> {
        settings.validate()?;
        *self.probe_settings.write() = Some(settings);
        Ok(())
    }
}
