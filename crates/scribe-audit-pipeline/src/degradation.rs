//! Threshold-triggered load shedding.
//!
//! A periodic control loop inspects pressure signals (a pluggable load
//! proxy plus the dispatch queue depth) and holds a current severity level.
//! Escalation is immediate; recovery back to normal requires the pressure
//! to clear and a cooldown to elapse, so the level does not flap.

use crate::dispatch::EventDispatcher;
use crate::sampler::Sampler;
use scribe_audit_types::{AuditEvent, AuditLevel};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

/// What a degradation tier forces while active.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelAction {
    /// Maximum audit verbosity at this tier.
    pub audit_level: AuditLevel,
    /// Sampler rate forced at this tier.
    pub sample_rate: f64,
}

/// One severity tier. Index 0 in the configured list is normal operation;
/// its triggers are never evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradationLevel {
    /// Load-proxy threshold (percent); zero disables this trigger.
    pub trigger_load: f64,
    /// Queue-depth threshold; zero disables this trigger.
    pub trigger_queue_depth: usize,
    /// Forced verbosity and sample rate while this tier is active.
    pub action: LevelAction,
}

impl DegradationLevel {
    fn triggered(&self, load: f64, queue_depth: usize) -> bool {
        (self.trigger_load > 0.0 && load >= self.trigger_load)
            || (self.trigger_queue_depth > 0 && queue_depth >= self.trigger_queue_depth)
    }

    /// Built-in four-tier ladder used when no levels are configured.
    pub fn default_levels() -> Vec<DegradationLevel> {
        vec![
            DegradationLevel {
                trigger_load: 0.0,
                trigger_queue_depth: 0,
                action: LevelAction {
                    audit_level: AuditLevel::All,
                    sample_rate: 1.0,
                },
            },
            DegradationLevel {
                trigger_load: 70.0,
                trigger_queue_depth: 500,
                action: LevelAction {
                    audit_level: AuditLevel::ChangesOnly,
                    sample_rate: 0.5,
                },
            },
            DegradationLevel {
                trigger_load: 85.0,
                trigger_queue_depth: 800,
                action: LevelAction {
                    audit_level: AuditLevel::ChangesOnly,
                    sample_rate: 0.1,
                },
            },
            DegradationLevel {
                trigger_load: 95.0,
                trigger_queue_depth: 950,
                action: LevelAction {
                    audit_level: AuditLevel::None,
                    sample_rate: 0.0,
                },
            },
        ]
    }
}

/// A monotone signal correlated with system pressure.
///
/// The default implementation derives a busy-worker percentage from
/// dispatcher stats; it is an approximation, and the interface rather than
/// the heuristic is the contract.
pub trait LoadSignal: Send + Sync {
    /// Current load as a percentage, nominally 0-100.
    fn current_load(&self) -> f64;
}

/// Busy-worker ratio over the dispatcher's own stats.
pub struct WorkerLoadSignal {
    dispatcher: Arc<dyn EventDispatcher>,
}

impl WorkerLoadSignal {
    /// Read load from the given dispatcher.
    pub fn new(dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl LoadSignal for WorkerLoadSignal {
    fn current_load(&self) -> f64 {
        let stats = self.dispatcher.stats();
        if stats.worker_count == 0 {
            return 0.0;
        }
        stats.active_workers as f64 / stats.worker_count as f64 * 100.0
    }
}

/// State machine over the configured severity tiers.
pub struct DegradationController {
    levels: Vec<DegradationLevel>,
    current: AtomicUsize,
    last_transition: Mutex<Instant>,
    recovery_cooldown: Duration,
    eval_interval: Duration,
    baseline_rate: f64,
    sampler: Arc<Sampler>,
    load: Arc<dyn LoadSignal>,
    dispatcher: Arc<dyn EventDispatcher>,
}

impl DegradationController {
    /// Create a controller starting at level 0.
    pub fn new(
        levels: Vec<DegradationLevel>,
        recovery_cooldown: Duration,
        eval_interval: Duration,
        baseline_rate: f64,
        sampler: Arc<Sampler>,
        load: Arc<dyn LoadSignal>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Self {
        let levels = if levels.is_empty() {
            DegradationLevel::default_levels()
        } else {
            levels
        };
        Self {
            levels,
            current: AtomicUsize::new(0),
            last_transition: Mutex::new(Instant::now()),
            recovery_cooldown,
            eval_interval,
            baseline_rate,
            sampler,
            load,
            dispatcher,
        }
    }

    /// The level index currently in effect, bounds-checked.
    pub fn current_level(&self) -> usize {
        self.current
            .load(Ordering::Relaxed)
            .min(self.levels.len().saturating_sub(1))
    }

    /// Whether the current level forces this event to be skipped.
    pub fn should_skip(&self, event: &AuditEvent) -> bool {
        let index = self.current_level();
        if index == 0 {
            return false;
        }
        match self.levels.get(index) {
            Some(level) => !level.action.audit_level.permits(event.operation),
            None => false,
        }
    }

    /// Inspect the pressure signals once and transition if warranted.
    ///
    /// The decision is made from plain reads; the state-mutating step
    /// happens afterwards, never under the decision's data.
    pub fn evaluate(&self) {
        let load = self.load.current_load();
        let queue_depth = self.dispatcher.stats().queue_len;
        let current = self.current_level();

        // Most severe tier first; the first trigger met wins.
        let candidate = self
            .levels
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .find(|(_, level)| level.triggered(load, queue_depth))
            .map(|(index, _)| index);

        match candidate {
            Some(target) if target != current => {
                self.transition(current, target, load, queue_depth);
            }
            Some(_) => {}
            None if current != 0 => {
                let since = {
                    let last = self
                        .last_transition
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    last.elapsed()
                };
                if since > self.recovery_cooldown {
                    self.transition(current, 0, load, queue_depth);
                }
            }
            None => {}
        }
    }

    fn transition(&self, from: usize, to: usize, load: f64, queue_depth: usize) {
        let Some(level) = self.levels.get(to) else {
            return;
        };
        self.current.store(to, Ordering::Relaxed);
        {
            let mut last = self
                .last_transition
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *last = Instant::now();
        }

        // Apply the sampler override outside any lock held above.
        let rate = if to == 0 {
            self.baseline_rate
        } else {
            level.action.sample_rate
        };
        self.sampler.update_rate(rate);

        if to == 0 {
            info!(from, load, queue_depth, "audit degradation recovered");
        } else {
            warn!(
                from,
                to,
                load,
                queue_depth,
                forced_rate = rate,
                "audit degradation level changed"
            );
        }
    }

    /// Run the evaluation loop until the shutdown signal fires.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.eval_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.evaluate(),
                _ = shutdown.changed() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchStats;
    use async_trait::async_trait;
    use scribe_audit_types::Operation;
    use std::sync::atomic::AtomicUsize;

    /// Dispatcher stub reporting a settable queue depth.
    struct StubDispatcher {
        queue_len: AtomicUsize,
    }

    impl StubDispatcher {
        fn new(queue_len: usize) -> Arc<Self> {
            Arc::new(Self {
                queue_len: AtomicUsize::new(queue_len),
            })
        }

        fn set_queue_len(&self, len: usize) {
            self.queue_len.store(len, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EventDispatcher for StubDispatcher {
        fn dispatch(&self, _event: AuditEvent) -> bool {
            true
        }

        async fn close(&self) {}

        fn stats(&self) -> DispatchStats {
            DispatchStats {
                queue_len: self.queue_len.load(Ordering::SeqCst),
                queue_capacity: 1_000,
                worker_count: 2,
                active_workers: 0,
                buffered: 0,
            }
        }
    }

    /// Load signal stub with a settable value.
    struct StubLoad(Mutex<f64>);

    impl StubLoad {
        fn new(load: f64) -> Arc<Self> {
            Arc::new(Self(Mutex::new(load)))
        }

        fn set(&self, load: f64) {
            *self.0.lock().unwrap() = load;
        }
    }

    impl LoadSignal for StubLoad {
        fn current_load(&self) -> f64 {
            *self.0.lock().unwrap()
        }
    }

    fn controller(
        cooldown: Duration,
        load: Arc<StubLoad>,
        dispatcher: Arc<StubDispatcher>,
    ) -> (Arc<DegradationController>, Arc<Sampler>) {
        let sampler = Arc::new(Sampler::new(1.0));
        let controller = Arc::new(DegradationController::new(
            DegradationLevel::default_levels(),
            cooldown,
            Duration::from_millis(10),
            1.0,
            sampler.clone(),
            load,
            dispatcher,
        ));
        (controller, sampler)
    }

    fn query_event() -> AuditEvent {
        AuditEvent::builder(Operation::Query, "users").build()
    }

    fn update_event() -> AuditEvent {
        AuditEvent::builder(Operation::Update, "users").build()
    }

    #[test]
    fn most_severe_matching_level_wins() {
        let load = StubLoad::new(96.0); // exceeds every load trigger
        let dispatcher = StubDispatcher::new(0);
        let (controller, sampler) = controller(Duration::from_secs(30), load, dispatcher);

        controller.evaluate();
        assert_eq!(controller.current_level(), 3);
        assert_eq!(sampler.effective_rate(), 0.0);
    }

    #[test]
    fn queue_depth_alone_can_escalate() {
        let load = StubLoad::new(0.0);
        let dispatcher = StubDispatcher::new(600);
        let (controller, sampler) = controller(Duration::from_secs(30), load, dispatcher);

        controller.evaluate();
        assert_eq!(controller.current_level(), 1);
        assert_eq!(sampler.effective_rate(), 0.5);
    }

    #[test]
    fn no_recovery_before_cooldown() {
        let load = StubLoad::new(75.0);
        let dispatcher = StubDispatcher::new(0);
        let (controller, _) = controller(Duration::from_secs(60), load.clone(), dispatcher);

        controller.evaluate();
        assert_eq!(controller.current_level(), 1);

        // Pressure clears immediately, but the cooldown has not elapsed.
        load.set(0.0);
        controller.evaluate();
        assert_eq!(controller.current_level(), 1);
    }

    #[test]
    fn recovery_after_cooldown_restores_baseline() {
        let load = StubLoad::new(75.0);
        let dispatcher = StubDispatcher::new(0);
        let (controller, sampler) =
            controller(Duration::from_millis(10), load.clone(), dispatcher);

        controller.evaluate();
        assert_eq!(controller.current_level(), 1);
        assert_eq!(sampler.effective_rate(), 0.5);

        load.set(0.0);
        std::thread::sleep(Duration::from_millis(30));
        controller.evaluate();
        assert_eq!(controller.current_level(), 0);
        assert_eq!(sampler.effective_rate(), 1.0);
    }

    #[test]
    fn escalation_between_degraded_levels_is_immediate() {
        let load = StubLoad::new(75.0);
        let dispatcher = StubDispatcher::new(0);
        let (controller, sampler) = controller(Duration::from_secs(60), load.clone(), dispatcher);

        controller.evaluate();
        assert_eq!(controller.current_level(), 1);

        load.set(90.0);
        controller.evaluate();
        assert_eq!(controller.current_level(), 2);
        assert_eq!(sampler.effective_rate(), 0.1);
    }

    #[test]
    fn skip_policy_follows_forced_level() {
        let load = StubLoad::new(0.0);
        let dispatcher = StubDispatcher::new(0);
        let (controller, _) = controller(Duration::from_secs(30), load.clone(), dispatcher.clone());

        // Level 0: nothing skipped.
        assert!(!controller.should_skip(&query_event()));

        // Level 1 forces changes-only: queries skipped, mutations kept.
        load.set(75.0);
        controller.evaluate();
        assert!(controller.should_skip(&query_event()));
        assert!(!controller.should_skip(&update_event()));

        // Level 3 forces none: everything skipped.
        load.set(96.0);
        controller.evaluate();
        assert!(controller.should_skip(&update_event()));
    }

    #[test]
    fn level_reads_are_bounds_checked() {
        let load = StubLoad::new(0.0);
        let dispatcher = StubDispatcher::new(0);
        let (controller, _) = controller(Duration::from_secs(30), load, dispatcher);

        // Simulate a stored index past the configured list.
        controller.current.store(99, Ordering::Relaxed);
        assert_eq!(controller.current_level(), 3);
        assert!(controller.should_skip(&update_event()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_loop_stops_on_shutdown() {
        let load = StubLoad::new(0.0);
        let dispatcher = StubDispatcher::new(0);
        let (controller, _) = controller(Duration::from_secs(30), load, dispatcher);

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(controller.run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = tx.send(true);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should stop promptly")
            .unwrap();
    }
}
