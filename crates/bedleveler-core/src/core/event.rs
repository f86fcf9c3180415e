//! Event system for printer operations
//!
//! Provides:
//! - Event types emitted while operations run
//! - Event dispatcher for publishing events to subscribers

use crate::operation::{Context, OperationId, OperationKind, OperationOutput};
use tokio::sync::broadcast;

/// Printer event types
#[derive(Debug, Clone)]
pub enum PrinterEvent {
    /// A command or request was put on the wire
    Sent {
        kind: OperationKind,
        id: OperationId,
        context: Context,
        /// Raw G-code line or request URL
        command: String,
    },
    /// An operation finished successfully
    Finished {
        kind: OperationKind,
        id: OperationId,
        context: Context,
        output: OperationOutput,
    },
    /// An operation failed
    Failed {
        kind: OperationKind,
        id: OperationId,
        context: Context,
        message: String,
    },
}

impl PrinterEvent {
    /// Operation kind the event belongs to
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Sent { kind, .. } | Self::Finished { kind, .. } | Self::Failed { kind, .. } => {
                *kind
            }
        }
    }

    /// Correlation id of the operation the event belongs to
    pub fn id(&self) -> &str {
        match self {
            Self::Sent { id, .. } | Self::Finished { id, .. } | Self::Failed { id, .. } => id,
        }
    }
}

impl std::fmt::Display for PrinterEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrinterEvent::Sent {
                kind, id, command, ..
            } => write!(f, "{} [{}] sent: {}", kind, id, command),
            PrinterEvent::Finished { kind, id, .. } => write!(f, "{} [{}] finished", kind, id),
            PrinterEvent::Failed {
                kind, id, message, ..
            } => write!(f, "{} [{}] failed: {}", kind, id, message),
        }
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for printer events.
    tx: broadcast::Sender<PrinterEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 100)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Create a new event dispatcher with default buffer size
    pub fn default_with_buffer() -> Self {
        Self::new(100)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(
        &self,
        event: PrinterEvent,
    ) -> Result<usize, broadcast::error::SendError<PrinterEvent>> {
        self.tx.send(event)
    }

    /// Publish an event, ignoring the absence of subscribers
    pub fn notify(&self, event: PrinterEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for printer event");
        }
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::default_with_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let dispatcher = EventDispatcher::default();
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.subscriber_count(), 1);

        dispatcher.notify(PrinterEvent::Sent {
            kind: OperationKind::Home,
            id: "home-1".to_string(),
            context: json!({"row": 1}),
            command: "G28".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), OperationKind::Home);
        assert_eq!(event.id(), "home-1");
        assert_eq!(event.to_string(), "Home [home-1] sent: G28");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let dispatcher = EventDispatcher::new(4);
        let result = dispatcher.publish(PrinterEvent::Failed {
            kind: OperationKind::Probe,
            id: "p".to_string(),
            context: serde_json::Value::Null,
            message: "Z Probe Past Bed".to_string(),
        });
        assert!(result.is_err());
    }
}
