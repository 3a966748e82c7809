//! Sink contract and bundled sink implementations.

use async_trait::async_trait;
use scribe_audit_types::AuditEvent;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

/// Error returned by a sink. Sink errors are logged at the worker boundary
/// and never unwind into the hook caller.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink's backing store is unreachable.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    /// The sink refused the event.
    #[error("sink rejected event: {0}")]
    Rejected(String),
    /// I/O failure while writing the event.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The event could not be serialized for the sink's wire format.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A pluggable consumer that records audit events.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Accept one event.
    async fn handle(&self, event: &AuditEvent) -> Result<(), SinkError>;

    /// Accept a batch of events. The default forwards one by one; sinks with
    /// a cheaper bulk path should override.
    async fn handle_batch(&self, events: &[AuditEvent]) -> Result<(), SinkError> {
        for event in events {
            self.handle(event).await?;
        }
        Ok(())
    }

    /// Human-readable sink name for log context.
    fn name(&self) -> &str {
        "sink"
    }
}

/// Writes each event as a JSON log line.
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait]
impl Sink for ConsoleSink {
    async fn handle(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let json = serde_json::to_string(event)?;
        info!(target: "scribe::audit", table = %event.table, operation = %event.operation, "{json}");
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}

/// Collects events in memory. Intended for tests and demos.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of events received so far.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing has been received yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn handle(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }

    async fn handle_batch(&self, events: &[AuditEvent]) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(events);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
