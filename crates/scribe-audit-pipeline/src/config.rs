//! Runtime configuration for the audit pipeline.
//!
//! These are plain values; loading them from files or flags is the host's
//! concern. Malformed values are clamped to safe defaults with a warning,
//! never treated as fatal.

use crate::degradation::DegradationLevel;
use scribe_audit_types::AuditLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Maximum audit verbosity.
    pub level: AuditLevel,
    /// Whether query operations are audited at all.
    pub include_query: bool,
    /// Baseline sampler admission rate in [0, 1].
    pub sample_rate: f64,
    /// Worker-pool dispatch knobs.
    pub worker: WorkerConfig,
    /// Batch consumption knobs; when enabled, replaces per-event dispatch.
    pub batch: BatchConfig,
    /// Load-shedding knobs.
    pub degradation: DegradationConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            level: AuditLevel::ChangesOnly,
            include_query: false,
            sample_rate: 1.0,
            worker: WorkerConfig::default(),
            batch: BatchConfig::default(),
            degradation: DegradationConfig::default(),
        }
    }
}

impl AuditConfig {
    /// Return a copy with every out-of-range value clamped to a safe
    /// default, warning once per correction.
    pub fn sanitized(mut self) -> Self {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            warn!(rate = self.sample_rate, "sample_rate out of [0, 1], clamping");
            self.sample_rate = if self.sample_rate.is_nan() {
                1.0
            } else {
                self.sample_rate.clamp(0.0, 1.0)
            };
        }
        self.worker = self.worker.sanitized();
        self.batch = self.batch.sanitized();
        self.degradation = self.degradation.sanitized();
        self
    }
}

/// Worker-pool dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers pulling from the queue.
    pub worker_count: usize,
    /// Bounded queue capacity; a full queue drops events.
    pub queue_size: usize,
    /// How long a worker waits on one sink call.
    pub timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_size: 1_000,
            timeout: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    fn sanitized(mut self) -> Self {
        if self.worker_count == 0 {
            warn!("worker_count of zero, using 1");
            self.worker_count = 1;
        }
        if self.queue_size == 0 {
            warn!("queue_size of zero, using 1000");
            self.queue_size = 1_000;
        }
        if self.timeout.is_zero() {
            warn!("zero sink timeout, using 5s");
            self.timeout = Duration::from_secs(5);
        }
        self
    }
}

/// Batch consumption configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Use the batch processor instead of per-event dispatch.
    pub enabled: bool,
    /// Flush once the buffer holds this many events.
    pub batch_size: usize,
    /// Flush pending events after this much time since the last flush.
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
        }
    }
}

impl BatchConfig {
    fn sanitized(mut self) -> Self {
        if self.batch_size == 0 {
            warn!("batch_size of zero, using 100");
            self.batch_size = 100;
        }
        if self.flush_interval.is_zero() {
            warn!("zero flush_interval, using 1s");
            self.flush_interval = Duration::from_secs(1);
        }
        self
    }
}

/// Load-shedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationConfig {
    /// Run the evaluation loop at all.
    pub enabled: bool,
    /// Severity tiers, index 0 = normal operation. Scanned most-severe
    /// first; the first tier whose trigger is met wins.
    pub levels: Vec<DegradationLevel>,
    /// Minimum time at a degraded level before recovering to normal.
    pub recovery_cooldown: Duration,
    /// How often pressure signals are inspected.
    pub eval_interval: Duration,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            levels: DegradationLevel::default_levels(),
            recovery_cooldown: Duration::from_secs(30),
            eval_interval: Duration::from_secs(5),
        }
    }
}

impl DegradationConfig {
    fn sanitized(mut self) -> Self {
        if self.levels.is_empty() {
            warn!("empty degradation level list, using defaults");
            self.levels = DegradationLevel::default_levels();
        }
        for level in &mut self.levels {
            if !(0.0..=1.0).contains(&level.action.sample_rate) {
                warn!(
                    rate = level.action.sample_rate,
                    "degradation sample_rate out of [0, 1], clamping"
                );
                level.action.sample_rate = if level.action.sample_rate.is_nan() {
                    1.0
                } else {
                    level.action.sample_rate.clamp(0.0, 1.0)
                };
            }
        }
        if self.eval_interval.is_zero() {
            warn!("zero eval_interval, using 5s");
            self.eval_interval = Duration::from_secs(5);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sizes_clamp_to_defaults() {
        let config = AuditConfig {
            worker: WorkerConfig {
                worker_count: 0,
                queue_size: 0,
                timeout: Duration::ZERO,
            },
            batch: BatchConfig {
                enabled: true,
                batch_size: 0,
                flush_interval: Duration::ZERO,
            },
            ..AuditConfig::default()
        }
        .sanitized();

        assert_eq!(config.worker.worker_count, 1);
        assert_eq!(config.worker.queue_size, 1_000);
        assert_eq!(config.worker.timeout, Duration::from_secs(5));
        assert_eq!(config.batch.batch_size, 100);
        assert_eq!(config.batch.flush_interval, Duration::from_secs(1));
    }

    #[test]
    fn out_of_range_sample_rate_clamps() {
        let config = AuditConfig {
            sample_rate: 7.5,
            ..AuditConfig::default()
        }
        .sanitized();
        assert_eq!(config.sample_rate, 1.0);

        let config = AuditConfig {
            sample_rate: -1.0,
            ..AuditConfig::default()
        }
        .sanitized();
        assert_eq!(config.sample_rate, 0.0);
    }

    #[test]
    fn empty_level_list_falls_back_to_defaults() {
        let config = AuditConfig {
            degradation: DegradationConfig {
                enabled: true,
                levels: Vec::new(),
                ..DegradationConfig::default()
            },
            ..AuditConfig::default()
        }
        .sanitized();

        assert!(!config.degradation.levels.is_empty());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = AuditConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: AuditConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.worker.queue_size, config.worker.queue_size);
        assert_eq!(back.degradation.levels.len(), config.degradation.levels.len());
    }
}
