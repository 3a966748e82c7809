//! Pipeline metrics for Scribe.
//!
//! A passive collector fed by the dispatcher, batch processor, and façade.
//! Hot-path counters and gauges are lock-free atomics; the per-dimension
//! counter map takes a dedicated mutex because it is written once per event
//! but read only on scrape, so exposition never contends with counting.
//!
//! # Examples
//!
//! ```rust
//! use scribe_audit_metrics::{AuditMetrics, EventStatus};
//! use scribe_audit_types::Operation;
//!
//! let metrics = AuditMetrics::new();
//! metrics.record_event("users", Operation::Update, EventStatus::Success, 0.002);
//! metrics.set_queue_size(3);
//!
//! let text = metrics.render();
//! assert!(text.contains("events_total 1"));
//! ```

mod histogram;

pub use histogram::LatencyHistogram;

use scribe_audit_types::Operation;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Outcome of one event's trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    /// Sink accepted the event.
    Success,
    /// Sink returned an error or panicked.
    Error,
    /// Sink call exceeded its deadline.
    Timeout,
    /// Event was shed before reaching a sink.
    Dropped,
}

impl EventStatus {
    /// Label value for exposition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Dropped => "dropped",
        }
    }

    fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Per-dimension counter key: (table, operation, status).
type Dimension = (String, Operation, EventStatus);

/// Counters, gauges, and a latency histogram for the audit pipeline.
///
/// Counters are monotonic and gauges hold the latest value; nothing resets
/// except on process restart.
pub struct AuditMetrics {
    events_total: AtomicU64,
    events_success: AtomicU64,
    events_error: AtomicU64,
    queue_size: AtomicU64,
    buffer_size: AtomicU64,
    duration: LatencyHistogram,
    dimensions: Mutex<HashMap<Dimension, u64>>,
}

impl AuditMetrics {
    /// Create a new collector with zeroed state.
    pub fn new() -> Self {
        Self {
            events_total: AtomicU64::new(0),
            events_success: AtomicU64::new(0),
            events_error: AtomicU64::new(0),
            queue_size: AtomicU64::new(0),
            buffer_size: AtomicU64::new(0),
            duration: LatencyHistogram::new(),
            dimensions: Mutex::new(HashMap::new()),
        }
    }

    /// Record one event outcome with its sink latency in seconds.
    pub fn record_event(
        &self,
        table: &str,
        operation: Operation,
        status: EventStatus,
        latency_seconds: f64,
    ) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        if status.is_success() {
            self.events_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.events_error.fetch_add(1, Ordering::Relaxed);
        }
        self.duration.observe(latency_seconds);

        let mut dimensions = self.dimensions.lock().unwrap_or_else(|e| e.into_inner());
        *dimensions
            .entry((table.to_string(), operation, status))
            .or_insert(0) += 1;
    }

    /// Set the dispatcher queue depth gauge.
    pub fn set_queue_size(&self, size: usize) {
        self.queue_size.store(size as u64, Ordering::Relaxed);
    }

    /// Set the batch buffer depth gauge.
    pub fn set_buffer_size(&self, size: usize) {
        self.buffer_size.store(size as u64, Ordering::Relaxed);
    }

    /// Total events recorded.
    pub fn events_total(&self) -> u64 {
        self.events_total.load(Ordering::Relaxed)
    }

    /// Events whose sink call succeeded.
    pub fn events_success(&self) -> u64 {
        self.events_success.load(Ordering::Relaxed)
    }

    /// Events that errored, timed out, or were dropped.
    pub fn events_error(&self) -> u64 {
        self.events_error.load(Ordering::Relaxed)
    }

    /// Latest queue depth.
    pub fn queue_size(&self) -> u64 {
        self.queue_size.load(Ordering::Relaxed)
    }

    /// Latest batch buffer depth.
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size.load(Ordering::Relaxed)
    }

    /// Render all metrics in the plain-text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP events_total Total audit events observed by the pipeline.\n");
        out.push_str("# TYPE events_total counter\n");
        let _ = writeln!(out, "events_total {}", self.events_total());
        {
            let dimensions = self.dimensions.lock().unwrap_or_else(|e| e.into_inner());
            let mut lines: Vec<String> = dimensions
                .iter()
                .map(|((table, operation, status), count)| {
                    format!(
                        "events_total{{table=\"{}\",operation=\"{}\",status=\"{}\"}} {}",
                        table,
                        operation,
                        status.as_str(),
                        count
                    )
                })
                .collect();
            lines.sort();
            for line in lines {
                out.push_str(&line);
                out.push('\n');
            }
        }

        out.push_str("# HELP events_success_total Audit events delivered successfully.\n");
        out.push_str("# TYPE events_success_total counter\n");
        let _ = writeln!(out, "events_success_total {}", self.events_success());

        out.push_str("# HELP events_error_total Audit events that failed delivery.\n");
        out.push_str("# TYPE events_error_total counter\n");
        let _ = writeln!(out, "events_error_total {}", self.events_error());

        out.push_str("# HELP queue_size Current dispatcher queue depth.\n");
        out.push_str("# TYPE queue_size gauge\n");
        let _ = writeln!(out, "queue_size {}", self.queue_size());

        out.push_str("# HELP buffer_size Current batch buffer depth.\n");
        out.push_str("# TYPE buffer_size gauge\n");
        let _ = writeln!(out, "buffer_size {}", self.buffer_size());

        out.push_str("# HELP events_duration_seconds Sink delivery latency.\n");
        out.push_str("# TYPE events_duration_seconds histogram\n");
        self.duration.render("events_duration_seconds", &mut out);

        out
    }
}

impl Default for AuditMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_collector_starts_zeroed() {
        let metrics = AuditMetrics::default();
        assert_eq!(metrics.events_total(), 0);
        assert_eq!(metrics.queue_size(), 0);
    }

    #[test]
    fn counts_success_and_error_separately() {
        let metrics = AuditMetrics::new();
        metrics.record_event("users", Operation::Create, EventStatus::Success, 0.001);
        metrics.record_event("users", Operation::Update, EventStatus::Error, 0.002);
        metrics.record_event("orders", Operation::Delete, EventStatus::Timeout, 1.5);

        assert_eq!(metrics.events_total(), 3);
        assert_eq!(metrics.events_success(), 1);
        assert_eq!(metrics.events_error(), 2);
    }

    #[test]
    fn gauges_hold_latest_value() {
        let metrics = AuditMetrics::new();
        metrics.set_queue_size(10);
        metrics.set_queue_size(4);
        metrics.set_buffer_size(7);

        assert_eq!(metrics.queue_size(), 4);
        assert_eq!(metrics.buffer_size(), 7);
    }

    #[test]
    fn render_includes_metadata_and_values() {
        let metrics = AuditMetrics::new();
        metrics.record_event("users", Operation::Update, EventStatus::Success, 0.003);
        metrics.set_queue_size(2);

        let text = metrics.render();
        assert!(text.contains("# TYPE events_total counter"));
        assert!(text.contains("events_total 1"));
        assert!(text.contains(
            "events_total{table=\"users\",operation=\"update\",status=\"success\"} 1"
        ));
        assert!(text.contains("# TYPE queue_size gauge"));
        assert!(text.contains("queue_size 2"));
        assert!(text.contains("# TYPE events_duration_seconds histogram"));
        assert!(text.contains("events_duration_seconds_count 1"));
        assert!(text.contains("le=\"+Inf\""));
    }

    #[test]
    fn dimension_counters_accumulate_per_key() {
        let metrics = AuditMetrics::new();
        for _ in 0..3 {
            metrics.record_event("users", Operation::Update, EventStatus::Success, 0.001);
        }
        metrics.record_event("users", Operation::Update, EventStatus::Error, 0.001);

        let text = metrics.render();
        assert!(text.contains(
            "events_total{table=\"users\",operation=\"update\",status=\"success\"} 3"
        ));
        assert!(text.contains(
            "events_total{table=\"users\",operation=\"update\",status=\"error\"} 1"
        ));
    }
}
