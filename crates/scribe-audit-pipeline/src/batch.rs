//! Batched event consumption.
//!
//! Alternative to per-event dispatch: events accumulate in a buffer owned by
//! a single collector task and are flushed to the sink either when the
//! buffer reaches `batch_size` or when `flush_interval` has elapsed since
//! the last flush, whichever comes first. Producers hand events over a
//! bounded channel, so they never wait on sink I/O.

use crate::config::BatchConfig;
use crate::dispatch::{panic_message, DispatchStats, EventDispatcher};
use crate::sink::Sink;
use async_trait::async_trait;
use futures_util::FutureExt;
use scribe_audit_metrics::{AuditMetrics, EventStatus};
use scribe_audit_types::AuditEvent;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Accumulates dispatched events and flushes them to the sink in batches.
///
/// Exposes the same [`EventDispatcher`] contract as the worker pool so the
/// façade is agnostic to the active strategy.
pub struct BatchProcessor {
    sender: mpsc::Sender<AuditEvent>,
    queue_capacity: usize,
    buffered: Arc<AtomicUsize>,
    consumer_count: Arc<AtomicUsize>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    metrics: Arc<AuditMetrics>,
}

struct FlushContext {
    sink: Arc<dyn Sink>,
    timeout: Duration,
    metrics: Arc<AuditMetrics>,
    buffered: Arc<AtomicUsize>,
}

impl BatchProcessor {
    /// Start the collector task.
    ///
    /// `queue_size` bounds the producer handoff channel and `timeout` caps
    /// each batch flush, mirroring the worker-pool knobs.
    pub fn new(
        config: &BatchConfig,
        queue_size: usize,
        timeout: Duration,
        sink: Arc<dyn Sink>,
        metrics: Arc<AuditMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let buffered = Arc::new(AtomicUsize::new(0));
        let consumer_count = Arc::new(AtomicUsize::new(1));

        let ctx = FlushContext {
            sink,
            timeout,
            metrics: metrics.clone(),
            buffered: buffered.clone(),
        };
        let task = tokio::spawn(collector_loop(
            receiver,
            shutdown_rx,
            config.clone(),
            ctx,
            consumer_count.clone(),
        ));

        Self {
            sender,
            queue_capacity: queue_size,
            buffered,
            consumer_count,
            task: Mutex::new(Some(task)),
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
impl EventDispatcher for BatchProcessor {
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
            while self.consumer_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            return;
        }
        let _ = self.shutdown.send(true);
        let task = {
            let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
        self.metrics.set_queue_size(0);
        self.metrics.set_buffer_size(0);
    }

    fn stats(&self) -> DispatchStats {
        let running = self.consumer_count.load(Ordering::SeqCst);
        DispatchStats {
            queue_len: self.queue_len(),
            queue_capacity: self.queue_capacity,
            worker_count: running,
            active_workers: 0,
            buffered: self.buffered.load(Ordering::SeqCst),
        }
    }
}

async fn collector_loop(
    mut receiver: mpsc::Receiver<AuditEvent>,
    mut shutdown: watch::Receiver<bool>,
    config: BatchConfig,
    ctx: FlushContext,
    consumer_count: Arc<AtomicUsize>,
) {
    let mut buffer: Vec<AuditEvent> = Vec::with_capacity(config.batch_size);
    let mut last_flush = Instant::now();
    // Tick at half the flush interval so an age-triggered flush lands close
    // to its deadline.
    let tick = (config.flush_interval / 2).max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(tick);

    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Some(event) => {
                    buffer.push(event);
                    ctx.note_buffered(buffer.len());
                    if buffer.len() >= config.batch_size {
                        debug!(len = buffer.len(), "flushing batch (size limit)");
                        flush(&ctx, &mut buffer).await;
                        last_flush = Instant::now();
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() && last_flush.elapsed() >= config.flush_interval {
                    debug!(len = buffer.len(), "flushing batch (time limit)");
                    flush(&ctx, &mut buffer).await;
                    last_flush = Instant::now();
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    // Drain the channel, then flush whatever remains. Accepted events are
    // never lost at shutdown.
    while let Ok(event) = receiver.try_recv() {
        buffer.push(event);
        ctx.note_buffered(buffer.len());
        if buffer.len() >= config.batch_size {
            flush(&ctx, &mut buffer).await;
        }
    }
    if !buffer.is_empty() {
        debug!(len = buffer.len(), "flushing final batch");
        flush(&ctx, &mut buffer).await;
    }

    consumer_count.fetch_sub(1, Ordering::SeqCst);
}

impl FlushContext {
    fn note_buffered(&self, len: usize) {
        self.buffered.store(len, Ordering::SeqCst);
        self.metrics.set_buffer_size(len);
    }
}

async fn flush(ctx: &FlushContext, buffer: &mut Vec<AuditEvent>) {
    if buffer.is_empty() {
        return;
    }
    let started = Instant::now();
    let outcome = tokio::time::timeout(
        ctx.timeout,
        AssertUnwindSafe(ctx.sink.handle_batch(buffer.as_slice())).catch_unwind(),
    )
    .await;

    let status = match outcome {
        Ok(Ok(Ok(()))) => EventStatus::Success,
        Ok(Ok(Err(err))) => {
            warn!(
                sink = ctx.sink.name(),
                len = buffer.len(),
                error = %err,
                "batch flush failed"
            );
            EventStatus::Error
        }
        Ok(Err(payload)) => {
            error!(
                sink = ctx.sink.name(),
                len = buffer.len(),
                panic = %panic_message(&payload),
                "sink panicked during batch flush"
            );
            EventStatus::Error
        }
        Err(_) => {
            warn!(
                sink = ctx.sink.name(),
                len = buffer.len(),
                timeout_ms = ctx.timeout.as_millis() as u64,
                "batch flush timed out"
            );
            EventStatus::Timeout
        }
    };

    let latency = started.elapsed().as_secs_f64();
    for event in buffer.iter() {
        ctx.metrics
            .record_event(&event.table, event.operation, status, latency);
    }
    buffer.clear();
    ctx.note_buffered(0);
}
