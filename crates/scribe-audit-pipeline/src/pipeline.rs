//! Pipeline façade wiring hooks to filters, shedding, and dispatch.

use crate::batch::BatchProcessor;
use crate::config::AuditConfig;
use crate::degradation::{DegradationController, LoadSignal, WorkerLoadSignal};
use crate::dispatch::{DispatchStats, EventDispatcher, WorkerPool};
use crate::sampler::Sampler;
use crate::sink::Sink;
use scribe_audit_filter::AuditFilter;
use scribe_audit_metrics::AuditMetrics;
use scribe_audit_types::{AuditEvent, Operation};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Typed access to actor/request metadata for the operation in flight.
///
/// Accessors returning `None` yield empty strings on the event, never
/// errors.
pub trait ActorSource {
    /// Acting user's identifier.
    fn user_id(&self) -> Option<String> {
        None
    }
    /// Acting user's display name.
    fn username(&self) -> Option<String> {
        None
    }
    /// Client IP address.
    fn ip(&self) -> Option<String> {
        None
    }
    /// Client user agent.
    fn user_agent(&self) -> Option<String> {
        None
    }
    /// Request correlation identifier.
    fn request_id(&self) -> Option<String> {
        None
    }
}

/// Fixed actor metadata, handy for tests and system-initiated operations.
#[derive(Debug, Clone, Default)]
pub struct StaticActor {
    /// Acting user's identifier.
    pub user_id: Option<String>,
    /// Acting user's display name.
    pub username: Option<String>,
    /// Client IP address.
    pub ip: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// Request correlation identifier.
    pub request_id: Option<String>,
}

impl ActorSource for StaticActor {
    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
    fn username(&self) -> Option<String> {
        self.username.clone()
    }
    fn ip(&self) -> Option<String> {
        self.ip.clone()
    }
    fn user_agent(&self) -> Option<String> {
        self.user_agent.clone()
    }
    fn request_id(&self) -> Option<String> {
        self.request_id.clone()
    }
}

/// An actor source that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActor;

impl ActorSource for NoActor {}

/// What the host data layer hands over after an operation completes.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    /// The operation kind.
    pub operation: Operation,
    /// Affected table.
    pub table: String,
    /// Primary key, composite keys comma-joined.
    pub primary_key: String,
    /// Values after the mutation.
    pub new_values: HashMap<String, serde_json::Value>,
    /// Current row values, used as the pre-image when no snapshot was
    /// captured (soft deletes, missed before-hooks).
    pub current_values: HashMap<String, serde_json::Value>,
    /// The underlying statement.
    pub sql: String,
    /// Bound statement arguments.
    pub sql_args: Vec<serde_json::Value>,
}

impl OperationRecord {
    /// Create a record with empty payloads.
    pub fn new(operation: Operation, table: impl Into<String>) -> Self {
        Self {
            operation,
            table: table.into(),
            primary_key: String::new(),
            new_values: HashMap::new(),
            current_values: HashMap::new(),
            sql: String::new(),
            sql_args: Vec::new(),
        }
    }
}

/// Per-operation audit context stashed between the before and after hooks.
struct OperationSession {
    old_values: Option<HashMap<String, serde_json::Value>>,
    started_at: Instant,
    skipped: bool,
}

/// Builder for [`AuditPipeline`].
pub struct AuditPipelineBuilder {
    config: AuditConfig,
    sink: Arc<dyn Sink>,
    filters: Vec<Arc<dyn AuditFilter>>,
    load: Option<Arc<dyn LoadSignal>>,
}

impl AuditPipelineBuilder {
    /// Add a filter; all registered filters must keep an event for it to
    /// be audited.
    pub fn filter(mut self, filter: Arc<dyn AuditFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Override the degradation controller's load signal.
    pub fn load_signal(mut self, load: Arc<dyn LoadSignal>) -> Self {
        self.load = Some(load);
        self
    }

    /// Assemble the pipeline and start its background tasks.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> AuditPipeline {
        let config = self.config.sanitized();
        let metrics = Arc::new(AuditMetrics::new());

        let dispatcher: Arc<dyn EventDispatcher> = if config.batch.enabled {
            Arc::new(BatchProcessor::new(
                &config.batch,
                config.worker.queue_size,
                config.worker.timeout,
                self.sink,
                metrics.clone(),
            ))
        } else {
            Arc::new(WorkerPool::new(&config.worker, self.sink, metrics.clone()))
        };

        let sampler = Arc::new(Sampler::new(config.sample_rate));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (degradation, degradation_task) = if config.degradation.enabled {
            let load = self
                .load
                .unwrap_or_else(|| Arc::new(WorkerLoadSignal::new(dispatcher.clone())));
            let controller = Arc::new(DegradationController::new(
                config.degradation.levels.clone(),
                config.degradation.recovery_cooldown,
                config.degradation.eval_interval,
                config.sample_rate,
                sampler.clone(),
                load,
                dispatcher.clone(),
            ));
            let task = tokio::spawn(controller.clone().run(shutdown_rx));
            (Some(controller), Some(task))
        } else {
            (None, None)
        };

        AuditPipeline {
            config,
            filters: self.filters,
            sampler,
            dispatcher,
            degradation,
            degradation_task: Mutex::new(degradation_task),
            shutdown,
            sessions: Mutex::new(HashMap::new()),
            metrics,
            closed: AtomicBool::new(false),
        }
    }
}

/// The audit pipeline façade.
///
/// Lifecycle hooks of the host data layer call [`begin`](Self::begin) /
/// [`finish`](Self::finish); everything downstream of that is this crate's
/// concern and never surfaces a failure to the caller.
pub struct AuditPipeline {
    config: AuditConfig,
    filters: Vec<Arc<dyn AuditFilter>>,
    sampler: Arc<Sampler>,
    dispatcher: Arc<dyn EventDispatcher>,
    degradation: Option<Arc<DegradationController>>,
    degradation_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    sessions: Mutex<HashMap<u64, OperationSession>>,
    metrics: Arc<AuditMetrics>,
    closed: AtomicBool,
}

impl AuditPipeline {
    /// Start building a pipeline around a sink.
    pub fn builder(config: AuditConfig, sink: Arc<dyn Sink>) -> AuditPipelineBuilder {
        AuditPipelineBuilder {
            config,
            sink,
            filters: Vec::new(),
            load: None,
        }
    }

    /// Before-hook: stash the pre-image snapshot and start time for a
    /// session. A session already marked skipped stays skipped.
    pub fn begin(&self, session: u64, old_values: Option<HashMap<String, serde_json::Value>>) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(&session) {
            Some(existing) if existing.skipped => {}
            _ => {
                sessions.insert(
                    session,
                    OperationSession {
                        old_values,
                        started_at: Instant::now(),
                        skipped: false,
                    },
                );
            }
        }
    }

    /// Escape hatch: mark a session so the after-hook takes no action.
    pub fn mark_skipped(&self, session: u64) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(
            session,
            OperationSession {
                old_values: None,
                started_at: Instant::now(),
                skipped: true,
            },
        );
    }

    /// After-hook: build the event for a completed operation and submit it.
    ///
    /// Returns whether the event was accepted for delivery; the caller may
    /// ignore the result, nothing here ever fails the operation.
    pub fn finish(&self, session: u64, record: OperationRecord, actor: &dyn ActorSource) -> bool {
        let stashed = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.remove(&session)
        };

        let (old_values, started_at) = match stashed {
            Some(session) if session.skipped => return false,
            Some(session) => (session.old_values, Some(session.started_at)),
            None => (None, None),
        };

        // Pre-image fallback: with no snapshot, current values stand in for
        // old values rather than failing the operation.
        let old_values = old_values.unwrap_or(record.current_values);

        let event = AuditEvent::builder(record.operation, record.table)
            .primary_key(record.primary_key)
            .old_values(old_values)
            .new_values(record.new_values)
            .sql(record.sql, record.sql_args)
            .user_id(actor.user_id().unwrap_or_default())
            .username(actor.username().unwrap_or_default())
            .ip(actor.ip().unwrap_or_default())
            .user_agent(actor.user_agent().unwrap_or_default())
            .request_id(actor.request_id().unwrap_or_default())
            .build();

        if let Some(started_at) = started_at {
            debug!(
                table = %event.table,
                operation = %event.operation,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "operation audited"
            );
        }

        self.submit(event)
    }

    /// Run an already-built event through the gate chain and dispatch it.
    pub fn submit(&self, event: AuditEvent) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if !self.config.level.permits(event.operation) {
            return false;
        }
        if event.operation == Operation::Query && !self.config.include_query {
            return false;
        }
        if !self.filters.iter().all(|f| f.should_audit(&event)) {
            debug!(table = %event.table, operation = %event.operation, "event filtered");
            return false;
        }
        if let Some(degradation) = &self.degradation {
            if degradation.should_skip(&event) {
                debug!(
                    table = %event.table,
                    level = degradation.current_level(),
                    "event shed by degradation"
                );
                return false;
            }
        }
        if !self.sampler.should_sample() {
            return false;
        }
        self.dispatcher.dispatch(event)
    }

    /// The metrics collector fed by this pipeline.
    pub fn metrics(&self) -> &Arc<AuditMetrics> {
        &self.metrics
    }

    /// Current dispatch occupancy.
    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// The sampler rate currently in effect.
    pub fn effective_sample_rate(&self) -> f64 {
        self.sampler.effective_rate()
    }

    /// The degradation level currently in effect (0 when disabled).
    pub fn degradation_level(&self) -> usize {
        self.degradation
            .as_ref()
            .map(|d| d.current_level())
            .unwrap_or(0)
    }

    /// Stop the evaluation loop and close the dispatcher, flushing any
    /// buffered batch. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        let task = {
            let mut slot = self
                .degradation_task
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
        self.dispatcher.close().await;
    }
}
