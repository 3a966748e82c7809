//! Fixed-bucket latency histogram.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bounds in seconds, monotonically increasing. Values above the last
/// bound land in the +Inf overflow bucket.
const BUCKET_BOUNDS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0];

/// Lock-free histogram of sink delivery latencies.
///
/// The sum is stored as integer microseconds so it fits an `AtomicU64`.
pub struct LatencyHistogram {
    buckets: Vec<AtomicU64>,
    overflow: AtomicU64,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl LatencyHistogram {
    /// Create a histogram with the default bucket bounds.
    pub fn new() -> Self {
        Self {
            buckets: BUCKET_BOUNDS.iter().map(|_| AtomicU64::new(0)).collect(),
            overflow: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record one observation in seconds.
    ///
    /// Increments the first bucket whose upper bound is >= the value, or the
    /// overflow bucket when none matches.
    pub fn observe(&self, seconds: f64) {
        let seconds = seconds.max(0.0);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);

        match BUCKET_BOUNDS.iter().position(|bound| seconds <= *bound) {
            Some(idx) => {
                self.buckets[idx].fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of observations in seconds.
    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Non-cumulative per-bucket counts, bound paired with count.
    pub fn buckets(&self) -> Vec<(f64, u64)> {
        BUCKET_BOUNDS
            .iter()
            .zip(&self.buckets)
            .map(|(bound, count)| (*bound, count.load(Ordering::Relaxed)))
            .collect()
    }

    /// Append cumulative `_bucket`, `_sum`, and `_count` lines.
    pub fn render(&self, name: &str, out: &mut String) {
        let mut cumulative = 0u64;
        for (bound, count) in self.buckets() {
            cumulative += count;
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, bound, cumulative);
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, self.count());
        let _ = writeln!(out, "{}_sum {}", name, self.sum());
        let _ = writeln!(out, "{}_count {}", name, self.count());
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_lands_in_first_covering_bucket() {
        let histogram = LatencyHistogram::new();
        histogram.observe(0.003);

        let buckets = histogram.buckets();
        assert_eq!(buckets[0], (0.001, 0));
        assert_eq!(buckets[1], (0.005, 1));
        assert_eq!(buckets[2], (0.01, 0));
    }

    #[test]
    fn oversized_observation_lands_in_overflow() {
        let histogram = LatencyHistogram::new();
        histogram.observe(60.0);

        assert!(histogram.buckets().iter().all(|(_, count)| *count == 0));
        assert_eq!(histogram.count(), 1);

        let mut out = String::new();
        histogram.render("d", &mut out);
        assert!(out.contains("d_bucket{le=\"+Inf\"} 1"));
        assert!(out.contains("d_bucket{le=\"10\"} 0"));
    }

    #[test]
    fn sum_and_count_accumulate() {
        let histogram = LatencyHistogram::new();
        histogram.observe(0.5);
        histogram.observe(1.5);

        assert_eq!(histogram.count(), 2);
        assert!((histogram.sum() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn rendered_buckets_are_cumulative() {
        let histogram = LatencyHistogram::new();
        histogram.observe(0.0005);
        histogram.observe(0.003);
        histogram.observe(0.02);

        let mut out = String::new();
        histogram.render("d", &mut out);
        assert!(out.contains("d_bucket{le=\"0.001\"} 1"));
        assert!(out.contains("d_bucket{le=\"0.005\"} 2"));
        assert!(out.contains("d_bucket{le=\"0.05\"} 3"));
        assert!(out.contains("d_count 3"));
    }
}
