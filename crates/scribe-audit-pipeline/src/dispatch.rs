//! Bounded-queue dispatch into a fixed worker pool.

use crate::config::WorkerConfig;
use crate::sink::Sink;
use async_trait::async_trait;
use futures_util::FutureExt;
use scribe_audit_metrics::{AuditMetrics, EventStatus};
use scribe_audit_types::AuditEvent;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Point-in-time dispatch statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events currently queued.
    pub queue_len: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
    /// Workers still running.
    pub worker_count: usize,
    /// Workers currently inside a sink call.
    pub active_workers: usize,
    /// Events held in a batch buffer (zero for per-event dispatch).
    pub buffered: usize,
}

/// The handoff point between the hook-side producer and a consumer.
///
/// Implemented by [`WorkerPool`] for per-event dispatch and by
/// [`crate::BatchProcessor`] for batched consumption; callers are agnostic
/// to which strategy is active.
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    /// Hand off one event. Never blocks: a full queue drops the event and
    /// returns `false`.
    fn dispatch(&self, event: AuditEvent) -> bool;

    /// Stop consumers and wait for them to finish. Idempotent.
    async fn close(&self);

    /// Current queue and worker occupancy.
    fn stats(&self) -> DispatchStats;
}

/// Fixed pool of workers pulling events off a bounded queue and invoking
/// the sink one event at a time, each call under a deadline and a panic
/// boundary.
pub struct WorkerPool {
    sender: mpsc::Sender<AuditEvent>,
    queue_capacity: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    metrics: Arc<AuditMetrics>,
}

struct WorkerContext {
    receiver: Arc<AsyncMutex<mpsc::Receiver<AuditEvent>>>,
    sender: mpsc::Sender<AuditEvent>,
    sink: Arc<dyn Sink>,
    timeout: Duration,
    metrics: Arc<AuditMetrics>,
    worker_count: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    shutdown: watch::Receiver<bool>,
}

impl WorkerPool {
    /// Spin up `config.worker_count` workers over a queue of
    /// `config.queue_size` events.
    pub fn new(config: &WorkerConfig, sink: Arc<dyn Sink>, metrics: Arc<AuditMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_size);
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let (shutdown, _) = watch::channel(false);
        let worker_count = Arc::new(AtomicUsize::new(config.worker_count));
        let active = Arc::new(AtomicUsize::new(0));

        let workers = (0..config.worker_count)
            .map(|id| {
                let ctx = WorkerContext {
                    receiver: receiver.clone(),
                    sender: sender.clone(),
                    sink: sink.clone(),
                    timeout: config.timeout,
                    metrics: metrics.clone(),
                    worker_count: worker_count.clone(),
                    active: active.clone(),
                    shutdown: shutdown.subscribe(),
                };
                tokio::spawn(worker_loop(id, ctx))
            })
            .collect();

        Self {
            sender,
            queue_capacity: config.queue_size,
            workers: Mutex::new(workers),
            worker_count,
            active,
            shutdown,
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    fn queue_len(&self) -> usize {
        self.queue_capacity.saturating_sub(self.sender.capacity())
    }
}

#[async_trait]
impl EventDispatcher for WorkerPool {
    fn dispatch(&self, event: AuditEvent) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        match self.sender.try_send(event) {
            Ok(()) => {
                self.metrics.set_queue_size(self.queue_len());
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                // Counted, not logged: a full queue is exactly the condition
                // where per-event logging would amplify the overload.
                self.metrics.record_event(
                    &event.table,
                    event.operation,
                    EventStatus::Dropped,
                    0.0,
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            // Already closing; wait until the first close emptied the pool.
            while self.worker_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            return;
        }
        let _ = self.shutdown.send(true);
        let handles: Vec<_> = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            workers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        self.metrics.set_queue_size(0);
    }

    fn stats(&self) -> DispatchStats {
        DispatchStats {
            queue_len: self.queue_len(),
            queue_capacity: self.queue_capacity,
            worker_count: self.worker_count.load(Ordering::SeqCst),
            active_workers: self.active.load(Ordering::SeqCst),
            buffered: 0,
        }
    }
}

async fn worker_loop(id: usize, mut ctx: WorkerContext) {
    debug!(worker = id, "audit worker started");
    loop {
        let event = {
            let mut receiver = ctx.receiver.lock().await;
            tokio::select! {
                event = receiver.recv() => event,
                _ = ctx.shutdown.changed() => None,
            }
        };
        match event {
            Some(event) => handle_event(id, &ctx, event).await,
            None => break,
        }
    }

    // Drain what was queued before the stop signal so accepted events are
    // not stranded.
    loop {
        let event = match ctx.receiver.lock().await.try_recv() {
            Ok(event) => event,
            Err(_) => break,
        };
        handle_event(id, &ctx, event).await;
    }

    ctx.worker_count.fetch_sub(1, Ordering::SeqCst);
    debug!(worker = id, "audit worker stopped");
}

async fn handle_event(id: usize, ctx: &WorkerContext, event: AuditEvent) {
    ctx.metrics.set_queue_size(
        ctx.sender
            .max_capacity()
            .saturating_sub(ctx.sender.capacity()),
    );
    ctx.active.fetch_add(1, Ordering::SeqCst);
    let started = Instant::now();

    let outcome = tokio::time::timeout(
        ctx.timeout,
        AssertUnwindSafe(ctx.sink.handle(&event)).catch_unwind(),
    )
    .await;

    let status = match outcome {
        Ok(Ok(Ok(()))) => EventStatus::Success,
        Ok(Ok(Err(err))) => {
            warn!(
                worker = id,
                sink = ctx.sink.name(),
                table = %event.table,
                operation = %event.operation,
                error = %err,
                "sink returned error"
            );
            EventStatus::Error
        }
        Ok(Err(payload)) => {
            // A panicking sink must never take the worker down with it.
            error!(
                worker = id,
                sink = ctx.sink.name(),
                table = %event.table,
                operation = %event.operation,
                panic = %panic_message(&payload),
                "sink panicked"
            );
            EventStatus::Error
        }
        Err(_) => {
            warn!(
                worker = id,
                sink = ctx.sink.name(),
                table = %event.table,
                operation = %event.operation,
                timeout_ms = ctx.timeout.as_millis() as u64,
                "sink call timed out"
            );
            EventStatus::Timeout
        }
    };

    ctx.metrics.record_event(
        &event.table,
        event.operation,
        status,
        started.elapsed().as_secs_f64(),
    );
    ctx.active.fetch_sub(1, Ordering::SeqCst);
}

/// Best-effort extraction of a panic payload for logging.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, SinkError};
    use scribe_audit_types::Operation;

    fn event(table: &str) -> AuditEvent {
        AuditEvent::builder(Operation::Update, table).build()
    }

    fn pool_config(workers: usize, queue: usize) -> WorkerConfig {
        WorkerConfig {
            worker_count: workers,
            queue_size: queue,
            timeout: Duration::from_millis(200),
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl Sink for PanickingSink {
        async fn handle(&self, _event: &AuditEvent) -> Result<(), SinkError> {
            panic!("sink exploded");
        }
    }

    struct SlowSink(Duration);

    #[async_trait]
    impl Sink for SlowSink {
        async fn handle(&self, _event: &AuditEvent) -> Result<(), SinkError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        async fn handle(&self, _event: &AuditEvent) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("backend down".into()))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn events_reach_the_sink() {
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(AuditMetrics::new());
        let pool = WorkerPool::new(&pool_config(2, 16), sink.clone(), metrics.clone());

        for i in 0..5 {
            assert!(pool.dispatch(event(&format!("t{i}"))));
        }
        pool.close().await;

        assert_eq!(sink.len(), 5);
        assert_eq!(metrics.events_success(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_queue_drops_without_blocking() {
        let sink = Arc::new(SlowSink(Duration::from_millis(100)));
        let metrics = Arc::new(AuditMetrics::new());
        let pool = WorkerPool::new(&pool_config(1, 1), sink, metrics.clone());

        // First event occupies the worker, second fills the queue; anything
        // after must be rejected immediately.
        let mut accepted = 0;
        let started = Instant::now();
        for _ in 0..10 {
            if pool.dispatch(event("users")) {
                accepted += 1;
            }
        }
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(accepted < 10);
        pool.close().await;
        assert!(metrics.events_error() > 0); // drops counted
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn panicking_sink_does_not_kill_workers() {
        let metrics = Arc::new(AuditMetrics::new());
        let pool = WorkerPool::new(&pool_config(2, 32), Arc::new(PanickingSink), metrics.clone());

        for _ in 0..8 {
            assert!(pool.dispatch(event("users")));
        }
        // Give workers time to chew through the panics.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.stats().worker_count, 2);

        pool.close().await;
        assert_eq!(metrics.events_error(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sink_errors_are_contained() {
        let metrics = Arc::new(AuditMetrics::new());
        let pool = WorkerPool::new(&pool_config(1, 8), Arc::new(FailingSink), metrics.clone());

        assert!(pool.dispatch(event("users")));
        pool.close().await;
        assert_eq!(metrics.events_error(), 1);
        assert_eq!(metrics.events_success(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_sink_times_out() {
        let metrics = Arc::new(AuditMetrics::new());
        let config = WorkerConfig {
            worker_count: 1,
            queue_size: 4,
            timeout: Duration::from_millis(20),
        };
        let pool = WorkerPool::new(
            &config,
            Arc::new(SlowSink(Duration::from_secs(10))),
            metrics.clone(),
        );

        assert!(pool.dispatch(event("users")));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(metrics.events_error(), 1);
        pool.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn close_is_idempotent() {
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(AuditMetrics::new());
        let pool = WorkerPool::new(&pool_config(3, 8), sink, metrics);

        pool.close().await;
        pool.close().await;
        assert_eq!(pool.stats().worker_count, 0);
        assert!(!pool.dispatch(event("users")));
    }
}
