//! Asynchronous audit-event pipeline for Scribe.
//!
//! Sits behind a data layer's record-lifecycle hooks and delivers one
//! structured [`AuditEvent`] per tracked mutation to a pluggable [`Sink`],
//! best effort: the triggering operation is never slowed, blocked, or
//! failed by anything in this crate. Under pressure events are shed, first
//! probabilistically by the [`Sampler`], then hard by the
//! [`DegradationController`], and finally at the bounded dispatch queue.

mod batch;
mod config;
mod degradation;
mod dispatch;
mod pipeline;
mod sampler;
mod sink;

pub use batch::BatchProcessor;
pub use config::{AuditConfig, BatchConfig, DegradationConfig, WorkerConfig};
pub use degradation::{
    DegradationController, DegradationLevel, LevelAction, LoadSignal, WorkerLoadSignal,
};
pub use dispatch::{DispatchStats, EventDispatcher, WorkerPool};
pub use pipeline::{
    ActorSource, AuditPipeline, AuditPipelineBuilder, NoActor, OperationRecord, StaticActor,
};
pub use sampler::Sampler;
pub use sink::{ConsoleSink, MemorySink, Sink, SinkError};

// Re-export important types from the sibling audit crates
pub use scribe_audit_filter::{
    AuditFilter, CompositeFilter, FieldFilter, FilterLogic, FilterMode, OperationFilter,
    TableFilter, UserFilter,
};
pub use scribe_audit_metrics::{AuditMetrics, EventStatus};
pub use scribe_audit_types::{AuditEvent, AuditLevel, Operation};
