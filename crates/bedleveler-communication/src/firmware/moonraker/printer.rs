//! Moonraker printer
//!
//! Every operation runs as its own tokio task and walks its machine one GET
//! at a time. Operations on the same printer do not wait for each other.

use super::machines::{Effect, Machine};
use super::reply::parse_envelope;
use crate::communication::http::{MoonrakerClient, ReqwestClient};
use async_trait::async_trait;
use bedleveler_core::{
    CommandPrinter, ConnectionError, Context, Error, EventDispatcher, OperationError, OperationId,
    OperationOutput, OperationRequest, OperationResult, PrinterEvent, ProbeSettings, Result,
    SharedProbeSettings,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

struct Shared<C> {
    host: String,
    client: C,
    events: EventDispatcher,
    probe_settings: SharedProbeSettings,
    active: Mutex<HashMap<u64, AbortHandle>>,
    next_key: AtomicU64,
}

/// Klipper printer behind a Moonraker server
pub struct MoonrakerPrinter<C: MoonrakerClient = ReqwestClient> {
    shared: Arc<Shared<C>>,
}

impl MoonrakerPrinter<ReqwestClient> {
    /// Create a printer talking to `host` (`name` or `name:port`)
    pub fn new(host: impl Into<String>) -> std::result::Result<Self, ConnectionError> {
        let client = ReqwestClient::new(CONNECT_TIMEOUT)?;
        Ok(Self::with_client(host, client))
    }
}

impl<C: MoonrakerClient> MoonrakerPrinter<C> {
    /// Create a printer using a custom HTTP client
    pub fn with_client(host: impl Into<String>, client: C) -> Self {
        let host = host.into();
        tracing::info!("Using Moonraker at {}", host);
        Self {
            shared: Arc::new(Shared {
                host,
                client,
                events: EventDispatcher::default(),
                probe_settings: Arc::new(RwLock::new(None)),
                active: Mutex::new(HashMap::new()),
                next_key: AtomicU64::new(1),
            }),
        }
    }

    pub fn host(&self) -> &str {
        &self.shared.host
    }

    /// Number of operations still running
    pub fn active_count(&self) -> usize {
        self.shared.active.lock().len()
    }
}

impl<C: MoonrakerClient> Drop for MoonrakerPrinter<C> {
    fn drop(&mut self) {
        for (_, handle) in self.shared.active.lock().drain() {
            handle.abort();
        }
    }
}

async fn run_operation<C: MoonrakerClient>(
    shared: Arc<Shared<C>>,
    key: u64,
    id: OperationId,
    context: Context,
    request: OperationRequest,
) -> std::result::Result<OperationOutput, Error> {
    let kind = request.kind();
    tracing::info!("Starting {} with id: {}, context: {}", kind, id, context);

    let probe_settings = *shared.probe_settings.read();
    let mut transition = Machine::start(&request, probe_settings);

    let outcome = loop {
        match transition.effect {
            Effect::Get(endpoint) => {
                let url = endpoint.url(&shared.host);
                shared.events.notify(PrinterEvent::Sent {
                    kind,
                    id: id.clone(),
                    context: context.clone(),
                    command: url.clone(),
                });

                let result = match shared.client.get(&url).await {
                    Ok(reply) => parse_envelope(&url, reply),
                    Err(e) => Err(e.into()),
                };
                match result {
                    Ok(result) => {
                        tracing::debug!("{} [{}] result: {}", kind, id, result);
                        transition = transition.machine.step(result);
                    }
                    Err(e) => break Err(e),
                }
            }
            Effect::Finish(output) => break Ok(output),
            Effect::Initialized(settings) => {
                tracing::info!("Probe defaults from printer.cfg: {:?}", settings);
                *shared.probe_settings.write() = Some(settings);
                break Ok(OperationOutput::Initialized);
            }
            Effect::Fail(e) => break Err(e),
        }
    };

    shared.active.lock().remove(&key);

    let event = match &outcome {
        Ok(output) => {
            tracing::info!("{} [{}] finished", kind, id);
            PrinterEvent::Finished {
                kind,
                id,
                context,
                output: output.clone(),
            }
        }
        Err(error) => {
            tracing::error!("{} [{}] failed: {}", kind, id, error);
            PrinterEvent::Failed {
                kind,
                id,
                context,
                message: error.to_string(),
            }
        }
    };
    shared.events.notify(event);
    outcome
}

#[async_trait]
impl<C: MoonrakerClient> CommandPrinter for MoonrakerPrinter<C> {
    async fn execute(
        &self,
        id: OperationId,
        context: Context,
        request: OperationRequest,
    ) -> OperationResult<OperationOutput> {
        let key = self.shared.next_key.fetch_add(1, Ordering::Relaxed);
        let handle = {
            // Registered before the task can remove itself
            let mut active = self.shared.active.lock();
            let handle = tokio::spawn(run_operation(
                self.shared.clone(),
                key,
                id,
                context,
                request,
            ));
            active.insert(key, handle.abort_handle());
            handle
        };

        match handle.await {
            Ok(outcome) => outcome.map_err(OperationError::Failed),
            Err(e) if e.is_cancelled() => Err(OperationError::Aborted),
            Err(e) => Err(OperationError::Failed(Error::other(format!(
                "Operation task failed: {}",
                e
            )))),
        }
    }

    fn abort(&self) {
        let handles: Vec<AbortHandle> = self
            .shared
            .active
            .lock()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        tracing::info!("Aborting {} Moonraker operation(s)", handles.len());
        for handle in handles {
            handle.abort();
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.shared.events.subscribe()
    }

    fn probe_settings(&self) -> Option<ProbeSettings> {
        *self.shared.probe_settings.read()
    }

    fn set_probe_settings(&self, settings: ProbeSettings) -> Result<()> {
        settings.validate()?;
        *self.shared.probe_settings.write() = Some(settings);
        Ok(())
    }
}
