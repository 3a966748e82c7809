//! Probabilistic event sampling.

use rand::Rng;
use std::sync::RwLock;

/// A statistical gate that admits a fraction of events.
///
/// Exists to cheaply shed volume under normal-but-high load; hard,
/// threshold-triggered shedding belongs to the degradation controller,
/// which overrides the rate on level transitions.
pub struct Sampler {
    rate: RwLock<f64>,
}

impl Sampler {
    /// Create a sampler with the given admission rate, clamped to [0, 1].
    pub fn new(rate: f64) -> Self {
        Self {
            rate: RwLock::new(rate.clamp(0.0, 1.0)),
        }
    }

    /// Decide whether to admit one event.
    ///
    /// Rate >= 1.0 always admits, <= 0.0 never admits, otherwise a uniform
    /// [0, 1) draw is compared against the rate.
    pub fn should_sample(&self) -> bool {
        let rate = *self.rate.read().unwrap_or_else(|e| e.into_inner());
        if rate >= 1.0 {
            return true;
        }
        if rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen::<f64>() < rate
    }

    /// Replace the admission rate, clamped to [0, 1]. Safe to call
    /// concurrently with sampling.
    pub fn update_rate(&self, rate: f64) {
        *self.rate.write().unwrap_or_else(|e| e.into_inner()) = rate.clamp(0.0, 1.0);
    }

    /// The rate currently in effect.
    pub fn effective_rate(&self) -> f64 {
        *self.rate.read().unwrap_or_else(|e| e.into_inner())
    }
}
